//! Cache maintenance for DMA-incoherent walkers
//!
//! When the IOMMU cannot snoop CPU caches every table node is registered
//! with the platform before it becomes reachable, every entry write is
//! pushed out with [`DmaSync::sync_for_device`], and the registration is
//! dropped before the node memory is released.

use super::PhysAddr;
use crate::Result;

/// Platform cache maintenance and DMA mapping
pub trait DmaSync: Send + Sync {
    /// Register `len` bytes of table memory at `pa` for device access
    fn start(&self, pa: PhysAddr, len: usize) -> Result<()>;

    /// Make the CPU view of the entries starting at `pa` visible to the device.
    /// Entry `i` lives at `pa + (i << word_lg2)`; each value is zero extended.
    fn sync_for_device(&self, pa: PhysAddr, words: &[u64], word_lg2: u32);

    /// Drop the registration made by [`DmaSync::start`]
    fn stop(&self, pa: PhysAddr, len: usize);
}

/// Number of entries pushed to the platform per flush call
pub const FLUSH_CHUNK: usize = 64;
