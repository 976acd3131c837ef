//! Memory management for table nodes
//!
//! The arena hands out table memory, the reclaimer defers freeing until no
//! lockless walker can still see a node, and the DMA hooks keep an
//! incoherent walker's view of the tables in sync.

pub mod arena;
pub mod dma;
pub mod freelist;
pub mod reclaim;

pub use arena::{ArenaStats, NodeArena, NodeHandle, TableRef};
pub use dma::DmaSync;
pub use freelist::FreeList;
pub use reclaim::{Guard, Reclaimer};

/// Physical address type
pub type PhysAddr = u64;

/// IO virtual address type
pub type IoVirtAddr = u64;
