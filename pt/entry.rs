//! Entry words
//!
//! Tables hold either 32-bit or 64-bit entries. Formats always see entries
//! widened to `u64`; [`PtWord`] narrows them on the way back into memory.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use num_traits::{AsPrimitive, PrimInt, Unsigned};

/// Decoded kind of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Not present
    Empty,
    /// Points to a table one level down
    Table,
    /// Leaf translating to an output address
    Oa,
}

/// Storage word of a table entry
pub trait PtWord: PrimInt + Unsigned + AsPrimitive<u64> + Send + Sync + 'static {
    /// Atomic cell holding one entry
    type Atomic: Send + Sync;

    /// log2 of the entry size in bytes
    const SIZE_LG2: u32;

    /// A zeroed entry cell
    fn new_atomic() -> Self::Atomic;

    /// Narrow a widened entry
    fn from_u64(value: u64) -> Self;

    /// Load an entry
    fn load(cell: &Self::Atomic, order: Ordering) -> u64;

    /// Store an entry
    fn store(cell: &Self::Atomic, value: u64, order: Ordering);

    /// Replace `old` with `new`, failing if another writer got there first
    fn compare_exchange(cell: &Self::Atomic, old: u64, new: u64) -> bool;

    /// Atomically AND `mask` into the entry, returning the previous value
    fn fetch_and(cell: &Self::Atomic, mask: u64) -> u64;

    /// Atomically OR `bits` into the entry, returning the previous value
    fn fetch_or(cell: &Self::Atomic, bits: u64) -> u64;
}

impl PtWord for u64 {
    type Atomic = AtomicU64;
    const SIZE_LG2: u32 = 3;

    fn new_atomic() -> AtomicU64 {
        AtomicU64::new(0)
    }

    fn from_u64(value: u64) -> u64 {
        value
    }

    fn load(cell: &AtomicU64, order: Ordering) -> u64 {
        cell.load(order)
    }

    fn store(cell: &AtomicU64, value: u64, order: Ordering) {
        cell.store(value, order)
    }

    fn compare_exchange(cell: &AtomicU64, old: u64, new: u64) -> bool {
        cell.compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn fetch_and(cell: &AtomicU64, mask: u64) -> u64 {
        cell.fetch_and(mask, Ordering::AcqRel)
    }

    fn fetch_or(cell: &AtomicU64, bits: u64) -> u64 {
        cell.fetch_or(bits, Ordering::AcqRel)
    }
}

impl PtWord for u32 {
    type Atomic = AtomicU32;
    const SIZE_LG2: u32 = 2;

    fn new_atomic() -> AtomicU32 {
        AtomicU32::new(0)
    }

    fn from_u64(value: u64) -> u32 {
        value as u32
    }

    fn load(cell: &AtomicU32, order: Ordering) -> u64 {
        cell.load(order).as_()
    }

    fn store(cell: &AtomicU32, value: u64, order: Ordering) {
        cell.store(<Self as PtWord>::from_u64(value), order)
    }

    fn compare_exchange(cell: &AtomicU32, old: u64, new: u64) -> bool {
        cell.compare_exchange(
            <Self as PtWord>::from_u64(old),
            <Self as PtWord>::from_u64(new),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
    }

    fn fetch_and(cell: &AtomicU32, mask: u64) -> u64 {
        cell.fetch_and(<Self as PtWord>::from_u64(mask), Ordering::AcqRel).as_()
    }

    fn fetch_or(cell: &AtomicU32, bits: u64) -> u64 {
        cell.fetch_or(<Self as PtWord>::from_u64(bits), Ordering::AcqRel).as_()
    }
}
