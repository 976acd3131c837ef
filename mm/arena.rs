//! Table node arena
//!
//! Table memory is handed out from a fixed array of slots. Each slot owns
//! at most one power-of-two sized block of entry words and carries the
//! node's bookkeeping next to it: size class, coherence state and the
//! intrusive link used while the node waits to be freed.
//!
//! Every slot has a synthetic physical address, `base + index << stride`,
//! which is what table entries encode. The stride is the size of the
//! largest table the format can allocate, so every node is naturally
//! aligned to its own size.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::Mutex;

use super::dma::{DmaSync, FLUSH_CHUNK};
use super::freelist::{FreeLinks, FreeList, NIL};
use super::reclaim::{Guard, Reclaimer};
use super::PhysAddr;
use crate::pt::entry::PtWord;
use crate::utils::log2;
use crate::{Error, Result};

/// Opaque reference to an arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Slot index
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Per node bookkeeping
struct NodeMeta {
    /// log2 of the table size in bytes
    lg2sz: AtomicU8,
    /// Registered with the platform cache maintenance
    incoherent: AtomicBool,
    /// Linked but its link may not be visible to the device yet
    still_flushing: AtomicBool,
    /// Intrusive free list link
    free_next: AtomicU32,
}

impl NodeMeta {
    fn new() -> Self {
        Self {
            lg2sz: AtomicU8::new(0),
            incoherent: AtomicBool::new(false),
            still_flushing: AtomicBool::new(false),
            free_next: AtomicU32::new(NIL),
        }
    }
}

struct Slot<W: PtWord> {
    mem: AtomicPtr<W::Atomic>,
    meta: NodeMeta,
}

/// Arena statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Number of slots
    pub capacity: u32,
    /// Nodes currently allocated, including nodes waiting for a grace period
    pub live: u32,
    /// Highest `live` ever observed
    pub peak: u32,
    /// Total successful allocations
    pub allocated: u64,
    /// Total releases
    pub freed: u64,
    /// Allocations refused because the arena was full
    pub failures: u64,
}

/// Borrowed view of one table node
pub struct TableRef<'g, W: PtWord> {
    node: NodeHandle,
    pa: PhysAddr,
    entries: &'g [W::Atomic],
}

impl<W: PtWord> Clone for TableRef<'_, W> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<W: PtWord> Copy for TableRef<'_, W> {}

impl<W: PtWord> core::fmt::Debug for TableRef<'_, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableRef")
            .field("node", &self.node)
            .field("pa", &format_args!("{:#x}", self.pa))
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<'g, W: PtWord> TableRef<'g, W> {
    /// Arena handle of the node
    pub fn node(&self) -> NodeHandle {
        self.node
    }

    /// Physical address entries use to point at this table
    pub fn pa(&self) -> PhysAddr {
        self.pa
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Tables are never empty; present for API symmetry with slices
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read an entry
    #[inline]
    pub fn load(&self, index: u32) -> u64 {
        W::load(&self.entries[index as usize], Ordering::Acquire)
    }

    /// Write an entry
    #[inline]
    pub fn store(&self, index: u32, value: u64) {
        W::store(&self.entries[index as usize], value, Ordering::Release)
    }

    /// Replace `old` with `new`; false when another writer changed the entry first
    #[inline]
    pub fn compare_exchange(&self, index: u32, old: u64, new: u64) -> bool {
        W::compare_exchange(&self.entries[index as usize], old, new)
    }

    /// Atomically clear the bits not in `mask`
    #[inline]
    pub fn fetch_and(&self, index: u32, mask: u64) -> u64 {
        W::fetch_and(&self.entries[index as usize], mask)
    }

    /// Atomically set `bits`
    #[inline]
    pub fn fetch_or(&self, index: u32, bits: u64) -> u64 {
        W::fetch_or(&self.entries[index as usize], bits)
    }
}

/// Fixed capacity allocator for table nodes
pub struct NodeArena<W: PtWord> {
    slots: Box<[Slot<W>]>,
    free_slots: Mutex<Vec<u32>>,
    base_pa: PhysAddr,
    stride_lg2: u32,
    live: AtomicU32,
    peak: AtomicU32,
    allocated: AtomicU64,
    freed: AtomicU64,
    failures: AtomicU64,
    reclaimer: Reclaimer,
    dma: Option<Arc<dyn DmaSync>>,
}

impl<W: PtWord> NodeArena<W> {
    /// Create an arena of `capacity` slots of `2^stride_lg2` bytes at `base_pa`
    pub fn new(
        base_pa: PhysAddr,
        stride_lg2: u32,
        capacity: u32,
        dma: Option<Arc<dyn DmaSync>>,
    ) -> Result<Self> {
        if capacity == 0 || capacity == NIL || stride_lg2 < W::SIZE_LG2 || stride_lg2 >= 48 {
            return Err(Error::InvalidArgument);
        }
        if log2::rem(base_pa, stride_lg2) != 0 {
            log::warn!(
                "table arena base {:#x} is not aligned to {:#x}",
                base_pa,
                log2::to_int(stride_lg2)
            );
            return Err(Error::InvalidArgument);
        }
        (capacity as u64)
            .checked_shl(stride_lg2)
            .and_then(|span| base_pa.checked_add(span))
            .ok_or(Error::InvalidArgument)?;

        let slots = (0..capacity)
            .map(|_| Slot {
                mem: AtomicPtr::new(ptr::null_mut()),
                meta: NodeMeta::new(),
            })
            .collect();
        Ok(Self {
            slots,
            free_slots: Mutex::new((0..capacity).rev().collect()),
            base_pa,
            stride_lg2,
            live: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            reclaimer: Reclaimer::new(),
            dma,
        })
    }

    /// Inclusive physical window covered by the slots
    pub fn pa_window(&self) -> (PhysAddr, PhysAddr) {
        let span = (self.slots.len() as u64) << self.stride_lg2;
        (self.base_pa, self.base_pa + span - 1)
    }

    /// Physical address of a node
    pub fn pa_of(&self, node: NodeHandle) -> PhysAddr {
        self.base_pa + ((node.0 as u64) << self.stride_lg2)
    }

    /// Node whose table starts at `pa`
    pub fn node_at(&self, pa: PhysAddr) -> Option<NodeHandle> {
        let offset = pa.checked_sub(self.base_pa)?;
        if log2::rem(offset, self.stride_lg2) != 0 {
            return None;
        }
        let index = log2::div(offset, self.stride_lg2);
        (index < self.slots.len() as u64).then_some(NodeHandle(index as u32))
    }

    fn slot(&self, node: NodeHandle) -> &Slot<W> {
        &self.slots[node.0 as usize]
    }

    fn entry_count(&self, node: NodeHandle) -> usize {
        let lg2sz = self.slot(node).meta.lg2sz.load(Ordering::Relaxed) as u32;
        1usize << (lg2sz - W::SIZE_LG2)
    }

    /// Allocate a zeroed table of `2^lg2sz` bytes
    pub fn alloc(&self, lg2sz: u32, level: u32) -> Result<NodeHandle> {
        if pt_warn_on!(lg2sz < W::SIZE_LG2 || lg2sz > self.stride_lg2) {
            return Err(Error::InvalidArgument);
        }
        let Some(index) = self.free_slots.lock().pop() else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("table arena exhausted ({} slots)", self.slots.len());
            return Err(Error::OutOfMemory);
        };

        let count = 1usize << (lg2sz - W::SIZE_LG2);
        let mem: Box<[W::Atomic]> = (0..count).map(|_| W::new_atomic()).collect();
        let slot = &self.slots[index as usize];
        slot.meta.lg2sz.store(lg2sz as u8, Ordering::Relaxed);
        slot.meta.incoherent.store(false, Ordering::Relaxed);
        slot.meta.still_flushing.store(false, Ordering::Relaxed);
        slot.meta.free_next.store(NIL, Ordering::Relaxed);
        slot.mem
            .store(Box::into_raw(mem) as *mut W::Atomic, Ordering::Release);

        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(live, Ordering::Relaxed);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        pt_trace!("alloc table slot {} level {} size {:#x}", index, level, 1u64 << lg2sz);
        Ok(NodeHandle(index))
    }

    /// Borrow a live node for the lifetime of a read side critical section
    pub fn table<'g>(&'g self, node: NodeHandle, _guard: &'g Guard<'_>) -> Option<TableRef<'g, W>> {
        let slot = self.slots.get(node.0 as usize)?;
        let mem = slot.mem.load(Ordering::Acquire);
        if mem.is_null() {
            return None;
        }
        let count = self.entry_count(node);
        // SAFETY: the block was created from a boxed slice of `count` cells and
        // is only released after a grace period that `_guard` holds open.
        let entries = unsafe { core::slice::from_raw_parts(mem as *const W::Atomic, count) };
        Some(TableRef {
            node,
            pa: self.pa_of(node),
            entries,
        })
    }

    /// Borrow the live node whose table starts at `pa`
    pub fn table_at<'g>(&'g self, pa: PhysAddr, guard: &'g Guard<'_>) -> Option<TableRef<'g, W>> {
        self.table(self.node_at(pa)?, guard)
    }

    /// Release a node immediately
    ///
    /// # Safety
    /// No reader may still reach the node: it was never published, it went
    /// through a grace period, or the caller owns the whole tree.
    pub(crate) unsafe fn release(&self, node: NodeHandle) {
        let slot = self.slot(node);
        let mem = slot.mem.swap(ptr::null_mut(), Ordering::AcqRel);
        if pt_warn_on!(mem.is_null()) {
            return;
        }
        let count = self.entry_count(node);
        if slot.meta.incoherent.swap(false, Ordering::AcqRel) {
            if let Some(dma) = &self.dma {
                dma.stop(self.pa_of(node), count << W::SIZE_LG2);
            }
        }
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(mem, count)));
        self.free_slots.lock().push(node.0);
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    /// Release every node of a list immediately
    ///
    /// # Safety
    /// Same contract as [`NodeArena::release`] for every node on the list.
    pub(crate) unsafe fn release_list(&self, list: &mut FreeList) {
        while let Some(node) = list.pop(self) {
            self.release(node);
        }
    }

    /// Enter a read side critical section
    pub fn pin(&self) -> Guard<'_> {
        self.reclaimer.pin()
    }

    /// Hand unlinked nodes to the reclaimer. Must not be called while pinned.
    pub fn retire(&self, mut list: FreeList) {
        while let Err(back) = self.reclaimer.retire(list) {
            list = back;
            if self.reclaim() == 0 {
                core::hint::spin_loop();
            }
        }
        self.reclaim();
    }

    /// Release every retired batch whose grace period has elapsed
    pub fn reclaim(&self) -> usize {
        let mut released = 0;
        while let Some(mut batch) = self.reclaimer.take_ready() {
            released += batch.len();
            // SAFETY: the reclaimer only returns batches no pinned reader can reach.
            unsafe { self.release_list(&mut batch) };
        }
        released
    }

    /// Wait until every retired node is released. Must not be called while pinned.
    pub fn synchronize(&self) {
        while self.reclaimer.pending() > 0 {
            if self.reclaim() == 0 {
                core::hint::spin_loop();
            }
        }
    }

    /// Register a node with the platform and push its whole content out.
    /// `still_flushing` marks a node that is about to be linked.
    pub fn start_incoherent(&self, table: &TableRef<'_, W>, still_flushing: bool) -> Result<()> {
        let dma = self.dma.as_ref().ok_or(Error::InvalidArgument)?;
        let meta = &self.slot(table.node).meta;
        dma.start(table.pa, table.len() << W::SIZE_LG2)?;
        meta.still_flushing.store(still_flushing, Ordering::Release);
        meta.incoherent.store(true, Ordering::Release);
        self.flush(table, 0, table.len() as u32);
        Ok(())
    }

    /// The link to the node is visible to the device
    pub fn done_incoherent_flush(&self, node: NodeHandle) {
        self.slot(node)
            .meta
            .still_flushing
            .store(false, Ordering::Release);
    }

    /// True while the link to the node may not be visible to the device yet
    pub fn still_flushing(&self, node: NodeHandle) -> bool {
        self.slot(node).meta.still_flushing.load(Ordering::Acquire)
    }

    /// True if the node is registered for incoherent access
    pub fn is_incoherent(&self, node: NodeHandle) -> bool {
        self.slot(node).meta.incoherent.load(Ordering::Acquire)
    }

    /// Push entries `start..end` of an incoherent table out to the device
    pub fn flush(&self, table: &TableRef<'_, W>, start: u32, end: u32) {
        if !self.is_incoherent(table.node) {
            return;
        }
        let Some(dma) = &self.dma else {
            return;
        };
        let mut index = start;
        while index < end {
            let chunk_start = index;
            let mut words: heapless::Vec<u64, FLUSH_CHUNK> = heapless::Vec::new();
            while index < end && !words.is_full() {
                let _ = words.push(table.load(index));
                index += 1;
            }
            let pa = table.pa + ((chunk_start as u64) << W::SIZE_LG2);
            dma.sync_for_device(pa, &words, W::SIZE_LG2);
        }
    }

    /// Snapshot of the allocation counters
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.slots.len() as u32,
            live: self.live.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl<W: PtWord> FreeLinks for NodeArena<W> {
    fn next_free(&self, index: u32) -> u32 {
        self.slots[index as usize].meta.free_next.load(Ordering::Relaxed)
    }

    fn set_next_free(&self, index: u32, next: u32) {
        self.slots[index as usize]
            .meta
            .free_next
            .store(next, Ordering::Relaxed)
    }
}

impl<W: PtWord> Drop for NodeArena<W> {
    fn drop(&mut self) {
        for index in 0..self.slots.len() as u32 {
            if !self.slots[index as usize].mem.get_mut().is_null() {
                // SAFETY: `&mut self` proves no reader or guard is left.
                unsafe { self.release(NodeHandle(index)) };
            }
        }
    }
}
