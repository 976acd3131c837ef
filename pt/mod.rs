//! Format independent radix walker
//!
//! Ranges, per level cursors and page size selection shared by every
//! operation in `iommu`. Nothing here knows a bit layout; entries are
//! decoded through the [`crate::arch::PtFormat`] the walk is instantiated
//! with.

pub mod common;
pub mod entry;
pub mod pgsize;
pub mod range;
pub mod state;

pub use common::PtCommon;
pub use entry::{EntryType, PtWord};
pub use pgsize::compute_best_pgsize;
pub use range::{PtCtx, PtRange};
pub use state::PtState;
