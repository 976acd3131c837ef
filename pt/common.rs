//! Table wide state shared by every walker

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::PtGeometry;
use crate::config::PtFeatures;
use crate::mm::PhysAddr;

/// Bits of the packed root descriptor holding the level
pub const TOP_LEVEL_BITS: u32 = 3;
const TOP_LEVEL_MASK: u64 = (1 << TOP_LEVEL_BITS) - 1;

/// Geometry plus the root descriptor
///
/// The root table PA and its level are packed into one word so a lockless
/// reader always sees a matching pair. Table PAs are at least 8 byte
/// aligned, which leaves the low bits free for the level.
#[derive(Debug)]
pub struct PtCommon {
    features: PtFeatures,
    max_vasz_lg2: u32,
    max_oasz_lg2: u32,
    top_of_table: AtomicU64,
}

impl PtCommon {
    pub fn new(geo: &PtGeometry) -> Self {
        Self {
            features: geo.features,
            max_vasz_lg2: geo.max_vasz_lg2,
            max_oasz_lg2: geo.max_oasz_lg2,
            top_of_table: AtomicU64::new(0),
        }
    }

    /// Enabled features
    pub fn features(&self) -> PtFeatures {
        self.features
    }

    /// True if every bit of `f` is enabled
    pub fn has(&self, f: PtFeatures) -> bool {
        self.features.contains(f)
    }

    /// Widest VA the table can ever translate
    pub fn max_vasz_lg2(&self) -> u32 {
        self.max_vasz_lg2
    }

    /// Widest OA a leaf may carry
    pub fn max_oasz_lg2(&self) -> u32 {
        self.max_oasz_lg2
    }

    /// Pack a root PA and level
    pub const fn pack(pa: PhysAddr, level: u32) -> u64 {
        pa | level as u64
    }

    /// Split a packed root descriptor
    pub const fn unpack(top: u64) -> (PhysAddr, u32) {
        (top & !TOP_LEVEL_MASK, (top & TOP_LEVEL_MASK) as u32)
    }

    /// Capture the root descriptor
    pub fn top(&self) -> u64 {
        self.top_of_table.load(Ordering::Acquire)
    }

    /// Publish a new root; the caller serializes root changes
    pub fn set_top(&self, pa: PhysAddr, level: u32) {
        pt_warn_on!(pa & TOP_LEVEL_MASK != 0 || level as u64 > TOP_LEVEL_MASK);
        self.top_of_table
            .store(Self::pack(pa, level), Ordering::Release);
    }
}
