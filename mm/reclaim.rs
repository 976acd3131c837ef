//! Epoch based deferred reclamation
//!
//! Lockless walkers pin the current epoch for the duration of a walk.
//! Nodes unlinked from the tree are retired as a batch stamped with the
//! epoch in force when they were unlinked, and the epoch is bumped. A batch
//! may be released once every pinned reader announces a later epoch.
//!
//! Ordering contract: all epoch and reader slot accesses are `SeqCst`. A
//! reader re-reads the epoch after announcing it and re-announces until the
//! two agree, so either the reclaimer sees the announcement or the reader
//! sees the bump (and with it every unlink that preceded the bump).

use core::sync::atomic::{AtomicU64, Ordering};

use heapless::Deque;
use spin::Mutex;

use super::freelist::FreeList;

/// Number of concurrently pinned readers
pub const MAX_READERS: usize = 64;

/// Number of retired batches waiting for a grace period
pub const RETIRE_QUEUE_DEPTH: usize = 32;

const IDLE: u64 = 0;

#[derive(Debug)]
struct Retired {
    epoch: u64,
    nodes: FreeList,
}

/// Epoch state shared by all walkers of one table
pub struct Reclaimer {
    epoch: AtomicU64,
    readers: [AtomicU64; MAX_READERS],
    retired: Mutex<Deque<Retired, RETIRE_QUEUE_DEPTH>>,
}

/// Proof that the current thread is inside a read side critical section
pub struct Guard<'a> {
    reclaimer: &'a Reclaimer,
    slot: usize,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.reclaimer.readers[self.slot].store(IDLE, Ordering::SeqCst);
    }
}

impl Guard<'_> {
    /// Epoch announced by this guard
    pub fn epoch(&self) -> u64 {
        self.reclaimer.readers[self.slot].load(Ordering::SeqCst)
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reclaimer {
    /// Fresh reclaimer at epoch 1
    pub fn new() -> Self {
        Self {
            epoch: AtomicU64::new(1),
            readers: core::array::from_fn(|_| AtomicU64::new(IDLE)),
            retired: Mutex::new(Deque::new()),
        }
    }

    /// Enter a read side critical section
    pub fn pin(&self) -> Guard<'_> {
        loop {
            for (slot, cell) in self.readers.iter().enumerate() {
                let mut seen = self.epoch.load(Ordering::SeqCst);
                if cell
                    .compare_exchange(IDLE, seen, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
                loop {
                    let now = self.epoch.load(Ordering::SeqCst);
                    if now == seen {
                        break;
                    }
                    cell.store(now, Ordering::SeqCst);
                    seen = now;
                }
                return Guard {
                    reclaimer: self,
                    slot,
                };
            }
            core::hint::spin_loop();
        }
    }

    /// Current global epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Number of pinned readers
    pub fn active_readers(&self) -> usize {
        self.readers
            .iter()
            .filter(|cell| cell.load(Ordering::SeqCst) != IDLE)
            .count()
    }

    /// Number of batches waiting for a grace period
    pub fn pending(&self) -> usize {
        self.retired.lock().len()
    }

    /// Queue an unlinked batch. Hands the batch back when the queue is full.
    pub fn retire(&self, nodes: FreeList) -> core::result::Result<(), FreeList> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut retired = self.retired.lock();
        if retired.is_full() {
            return Err(nodes);
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);
        retired
            .push_back(Retired { epoch, nodes })
            .map_err(|batch| batch.nodes)
    }

    fn oldest_reader(&self) -> Option<u64> {
        self.readers
            .iter()
            .map(|cell| cell.load(Ordering::SeqCst))
            .filter(|&epoch| epoch != IDLE)
            .min()
    }

    /// Pop the oldest batch if no pinned reader can still reach it
    pub fn take_ready(&self) -> Option<FreeList> {
        let mut retired = self.retired.lock();
        let front = retired.front()?.epoch;
        match self.oldest_reader() {
            Some(oldest) if oldest <= front => None,
            _ => retired.pop_front().map(|batch| batch.nodes),
        }
    }
}
