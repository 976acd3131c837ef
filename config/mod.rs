//! Configuration management
//!
//! Generic page table configuration shared by all formats. Each format adds
//! its own typed configuration next to its entry layout in `arch`.

pub mod features;

pub use features::{FmtFeatures, PtFeatures};

use crate::{Error, Result};

/// Default synthetic physical base of the table arena
pub const DEFAULT_TABLE_PA_BASE: u64 = 0x4000_0000;

/// Default number of table nodes the arena can hold
pub const DEFAULT_MAX_TABLES: u32 = 4096;

/// Generic page table configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtConfig {
    /// Requested universal features
    pub features: PtFeatures,
    /// Widest IOVA the IOMMU instance can issue
    pub hw_max_vasz_lg2: u32,
    /// Widest output address the IOMMU instance can emit
    pub hw_max_oasz_lg2: u32,
    /// Physical address of the first arena slot
    pub table_pa_base: u64,
    /// Number of arena slots
    pub max_tables: u32,
}

impl Default for PtConfig {
    fn default() -> Self {
        Self {
            features: PtFeatures::empty(),
            hw_max_vasz_lg2: 48,
            hw_max_oasz_lg2: 48,
            table_pa_base: DEFAULT_TABLE_PA_BASE,
            max_tables: DEFAULT_MAX_TABLES,
        }
    }
}

impl PtConfig {
    /// Configuration with the given address widths and no features
    pub fn new(hw_max_vasz_lg2: u32, hw_max_oasz_lg2: u32) -> Self {
        Self {
            hw_max_vasz_lg2,
            hw_max_oasz_lg2,
            ..Self::default()
        }
    }

    /// Add features
    pub fn with_features(mut self, features: PtFeatures) -> Self {
        self.features |= features;
        self
    }

    /// Move the table arena
    pub fn with_table_pa_base(mut self, base: u64) -> Self {
        self.table_pa_base = base;
        self
    }

    /// Resize the table arena
    pub fn with_max_tables(mut self, max_tables: u32) -> Self {
        self.max_tables = max_tables;
        self
    }

    /// Check the values that do not depend on the format
    pub fn validate(&self) -> Result<()> {
        if self.hw_max_vasz_lg2 == 0 || self.hw_max_vasz_lg2 > 64 {
            return Err(Error::InvalidArgument);
        }
        if self.hw_max_oasz_lg2 == 0 || self.hw_max_oasz_lg2 > 64 {
            return Err(Error::InvalidArgument);
        }
        // The root slot is always needed.
        if self.max_tables == 0 {
            return Err(Error::InvalidArgument);
        }
        if self.features.contains(PtFeatures::FULL_VA) {
            // Derived from the geometry, never requested.
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
