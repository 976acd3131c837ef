//! IOMMU page table formats
//!
//! Every hardware layout implements [`PtFormat`]: entry encode and decode,
//! per level geometry and the leaf and table install primitives. Formats
//! never walk the tree themselves; the generic walker in `pt` and the
//! operations in `iommu` drive them.
//!
//! Levels are numbered from the leaves up: level 0 always holds the
//! smallest page size.

use core::fmt::Debug;

use crate::config::{FmtFeatures, PtFeatures};
use crate::iommu::IommuProt;
use crate::mm::{PhysAddr, TableRef};
use crate::pt::entry::{EntryType, PtWord};
use crate::utils::log2;
use crate::Result;

pub mod amdv1;
pub mod armv7s;
pub mod armv8;
pub mod dart;
pub mod vtdss;
pub mod x86pae;

pub use amdv1::Amdv1;
pub use armv7s::Armv7s;
pub use armv8::Armv8;
pub use dart::Dart;
pub use vtdss::Vtdss;
pub use x86pae::X86Pae;

/// Table wide geometry negotiated at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtGeometry {
    /// Enabled universal features
    pub features: PtFeatures,
    /// Widest IOVA the table may translate
    pub max_vasz_lg2: u32,
    /// Widest output address leaves may encode
    pub max_oasz_lg2: u32,
    /// Level of the root table
    pub top_level: u32,
}

/// Root description in the form the hardware consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwInfo {
    /// Physical address of the root table
    pub root_pa: PhysAddr,
    /// Number of levels, AMD "mode" and x86 paging levels use this directly
    pub levels: u32,
}

/// Write attributes for formats whose attributes are a plain bit set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DescAttrs {
    /// Bits OR'd into every leaf entry
    pub descriptor_bits: u64,
}

/// A hardware page table layout
pub trait PtFormat: Sized + Send + Sync + 'static {
    /// Storage word of an entry
    type Word: PtWord;
    /// Leaf attributes produced by [`PtFormat::set_prot`]
    type Attrs: Copy + Debug + Default + PartialEq + Send + Sync;
    /// Format specific configuration
    type Config: Clone + Debug + Default;

    /// Short name used in logs
    const NAME: &'static str;
    /// Width of the format's VA word
    const VA_BITS: u32 = 64;

    /// Validate `cfg` and fill in the root level, adjusting `geo` where the
    /// format constrains it
    fn init(cfg: &Self::Config, geo: &mut PtGeometry) -> Result<Self>;

    /// Highest level a root table may sit at
    fn max_top_level(&self) -> u32;

    /// Widest IOVA the layout can express
    fn max_va_lg2(&self) -> u32;

    /// Widest output address a leaf can encode
    fn max_oa_lg2(&self) -> u32;

    /// Widest physical address a table pointer can encode
    fn max_table_pa_lg2(&self) -> u32 {
        self.max_oa_lg2()
    }

    /// Universal features the layout can honor
    fn supported_features(&self) -> PtFeatures;

    /// Extension features of this instance
    fn ext_features(&self) -> FmtFeatures;

    /// High VA bits every translated address must carry
    fn full_va_prefix(&self) -> u64 {
        0
    }

    /// True if entries at `level` may be leaves
    fn can_have_leaf(&self, level: u32) -> bool;

    /// True if entries at `level` may point to tables
    fn can_have_table(&self, level: u32) -> bool {
        level > 0
    }

    /// log2 of the VA span of one entry at `level`
    fn item_lg2sz(&self, level: u32) -> u32;

    /// log2 of the number of entries of a table at `level`
    fn num_items_lg2(&self, level: u32) -> u32;

    /// log2 of the number of entries a contiguous leaf at `level` spans
    fn contig_count_lg2(&self, _level: u32) -> u32 {
        0
    }

    /// Page sizes a leaf at `level` can express directly
    fn possible_sizes(&self, level: u32) -> u64 {
        if !self.can_have_leaf(level) {
            return 0;
        }
        let isz = self.item_lg2sz(level);
        let contig = isz + self.contig_count_lg2(level);
        log2::to_int(isz) | log2::to_int(contig)
    }

    /// Decode the kind of `entry`
    fn entry_type(&self, level: u32, entry: u64) -> EntryType;

    /// log2 of the number of entries the leaf `entry` spans
    fn entry_num_contig_lg2(&self, _level: u32, _entry: u64) -> u32 {
        0
    }

    /// Output address of the first byte of the whole leaf `entry` found at `index`
    fn entry_oa(&self, level: u32, index: u32, entry: u64) -> PhysAddr;

    /// Output address of the single item at `index` of a possibly contiguous leaf
    fn item_oa(&self, level: u32, index: u32, entry: u64) -> PhysAddr {
        let contig = self.entry_num_contig_lg2(level, entry);
        let offset = log2::rem(index as u64, contig);
        self.entry_oa(level, index, entry) | log2::mul(offset, self.item_lg2sz(level))
    }

    /// Physical address of the table the table entry `entry` points to
    fn table_pa(&self, level: u32, entry: u64) -> PhysAddr;

    /// Write a leaf of `2^oasz_lg2` bytes at `index`, returning the entry written there
    fn install_leaf(
        &self,
        table: &TableRef<'_, Self::Word>,
        level: u32,
        index: u32,
        oa: PhysAddr,
        oasz_lg2: u32,
        attrs: &Self::Attrs,
    ) -> u64;

    /// Point entry `index` at `table_pa` if it still holds `old`
    fn install_table(
        &self,
        table: &TableRef<'_, Self::Word>,
        level: u32,
        index: u32,
        table_pa: PhysAddr,
        old: u64,
    ) -> bool;

    /// Clear `2^num_contig_lg2` entries starting at `index`
    fn clear_entries(&self, table: &TableRef<'_, Self::Word>, index: u32, num_contig_lg2: u32) {
        for i in index..index + (1u32 << num_contig_lg2) {
            table.store(i, 0);
        }
    }

    /// Attributes that reproduce the leaf `entry` through [`PtFormat::install_leaf`]
    fn attr_from_entry(&self, level: u32, entry: u64) -> Self::Attrs;

    /// Translate a generic protection request
    fn set_prot(&self, prot: IommuProt) -> Result<Self::Attrs>;

    /// True if this instance tracks write-dirty state in hardware
    fn supports_dirty(&self) -> bool {
        false
    }

    /// True if the leaf at `index` has been written through
    fn entry_is_write_dirty(
        &self,
        _table: &TableRef<'_, Self::Word>,
        _level: u32,
        _index: u32,
        _entry: u64,
    ) -> bool {
        false
    }

    /// Clear the write-dirty state of the leaf at `index`
    fn entry_set_write_clean(
        &self,
        _table: &TableRef<'_, Self::Word>,
        _level: u32,
        _index: u32,
        _entry: u64,
    ) {
    }

    /// Mark the leaf at `index` dirty; false if the entry changed underneath
    fn entry_make_write_dirty(
        &self,
        _table: &TableRef<'_, Self::Word>,
        _level: u32,
        _index: u32,
        _entry: u64,
    ) -> bool {
        false
    }

    /// Root description for the hardware
    fn hw_info(&self, top_pa: PhysAddr, top_level: u32) -> HwInfo {
        HwInfo {
            root_pa: top_pa,
            levels: top_level + 1,
        }
    }
}
