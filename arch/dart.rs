//! Apple DART translation tables
//!
//! Leaves only exist at level 0; every level above holds table pointers.
//! The granule is picked from the page size bitmap the hardware reports.
//! With more VA than two levels cover, the root is the small table of
//! TTBRs (up to four) encoded as ordinary table entries.

use bitflags::bitflags;

use crate::arch::{DescAttrs, PtFormat, PtGeometry};
use crate::config::{FmtFeatures, PtFeatures};
use crate::iommu::IommuProt;
use crate::mm::{PhysAddr, TableRef};
use crate::pt::entry::EntryType;
use crate::utils::bits::{field_get, field_prep};
use crate::utils::log2;
use crate::{Error, Result};

/// Highest level, the TTBR table
pub const MAX_TOP_LEVEL: u32 = 2;
/// Up to four TTBRs
pub const NUM_TTBRS_LG2: u32 = 2;

bitflags! {
    /// DART extension features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DartFeatures: u32 {
        /// Second generation descriptor layout with 16K granules
        const V2 = 1 << 0;
    }
}

/// Descriptor bits
pub mod pte {
    use crate::utils::bits::{bit, genmask};

    pub const VALID: u64 = bit(0);
    pub const SUBPAGE_START: u64 = genmask(63, 52);
    pub const SUBPAGE_END: u64 = genmask(51, 40);

    /// v1 subpage protection disable
    pub const FMT1_SP_DIS: u64 = bit(1);
    pub const FMT1_NO_WRITE: u64 = bit(7);
    pub const FMT1_NO_READ: u64 = bit(8);
    /// v1 OA bits [35:12]
    pub const FMT1_OA: u64 = genmask(35, 12);

    pub const FMT2_NO_CACHE: u64 = bit(1);
    pub const FMT2_NO_WRITE: u64 = bit(2);
    pub const FMT2_NO_READ: u64 = bit(3);
    /// v2 OA bits [41:14] stored at [37:10]
    pub const FMT2_OA: u64 = genmask(37, 10);
}

/// DART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DartConfig {
    /// Extension features
    pub features: DartFeatures,
    /// Page sizes the hardware supports
    pub pgsize_bitmap: u64,
}

impl Default for DartConfig {
    fn default() -> Self {
        Self {
            features: DartFeatures::empty(),
            pgsize_bitmap: 1 << 12,
        }
    }
}

/// DART format instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dart {
    features: DartFeatures,
    granule_lg2: u32,
}

impl Dart {
    fn v2(&self) -> bool {
        self.features.contains(DartFeatures::V2)
    }

    fn make_oa(&self, oa: PhysAddr) -> u64 {
        if self.v2() {
            field_prep(pte::FMT2_OA, log2::div(oa, 14))
        } else {
            field_prep(pte::FMT1_OA, log2::div(oa, 12))
        }
    }

    fn oa(&self, entry: u64) -> PhysAddr {
        if self.v2() {
            log2::mul(field_get(pte::FMT2_OA, entry), 14)
        } else {
            log2::mul(field_get(pte::FMT1_OA, entry), 12)
        }
    }

    fn prot_mask(&self) -> u64 {
        if self.v2() {
            pte::FMT2_NO_CACHE | pte::FMT2_NO_WRITE | pte::FMT2_NO_READ
        } else {
            pte::FMT1_SP_DIS | pte::FMT1_NO_WRITE | pte::FMT1_NO_READ
        }
    }

    /// VA covered by the two levels below the TTBR table
    fn l2_va_lg2(&self) -> u32 {
        self.granule_lg2 + (self.granule_lg2 - 3) * 2
    }
}

impl PtFormat for Dart {
    type Word = u64;
    type Attrs = DescAttrs;
    type Config = DartConfig;

    const NAME: &'static str = "dart";

    fn init(cfg: &DartConfig, geo: &mut PtGeometry) -> Result<Self> {
        let vasz = geo.max_vasz_lg2;
        let oasz = geo.max_oasz_lg2;
        let mut pgsize_bitmap = cfg.pgsize_bitmap;
        // The v2 OA field cannot express less than 16K alignment.
        if cfg.features.contains(DartFeatures::V2) {
            pgsize_bitmap = log2::set_rem(pgsize_bitmap, 0, 14);
        }
        if (oasz != 36 && oasz != 42) || vasz > oasz || pgsize_bitmap & ((1 << 12) | (1 << 14)) == 0 {
            return Err(Error::Unsupported);
        }

        let dart = Dart {
            features: cfg.features,
            granule_lg2: log2::ffs(pgsize_bitmap),
        };
        if vasz <= dart.l2_va_lg2() {
            // Single TTBR, the root is TTBR[0]'s table.
            geo.top_level = 1;
        } else {
            if vasz - dart.l2_va_lg2() > NUM_TTBRS_LG2 {
                return Err(Error::Unsupported);
            }
            geo.top_level = 2;
        }
        Ok(dart)
    }

    fn max_top_level(&self) -> u32 {
        MAX_TOP_LEVEL
    }

    fn max_va_lg2(&self) -> u32 {
        self.l2_va_lg2() + NUM_TTBRS_LG2
    }

    fn max_oa_lg2(&self) -> u32 {
        // Width of the OA field plus the shift
        if self.v2() {
            (37 - 10 + 1) + 14
        } else {
            (35 - 12 + 1) + 12
        }
    }

    fn supported_features(&self) -> PtFeatures {
        PtFeatures::DMA_INCOHERENT
    }

    fn ext_features(&self) -> FmtFeatures {
        FmtFeatures::Dart(self.features)
    }

    fn can_have_leaf(&self, level: u32) -> bool {
        level == 0
    }

    fn item_lg2sz(&self, level: u32) -> u32 {
        self.granule_lg2 + (self.granule_lg2 - 3) * level
    }

    fn num_items_lg2(&self, level: u32) -> u32 {
        if level == MAX_TOP_LEVEL {
            NUM_TTBRS_LG2
        } else {
            self.granule_lg2 - 3
        }
    }

    fn entry_type(&self, level: u32, entry: u64) -> EntryType {
        if entry & pte::VALID == 0 {
            EntryType::Empty
        } else if level == 0 {
            EntryType::Oa
        } else {
            EntryType::Table
        }
    }

    fn entry_oa(&self, _level: u32, _index: u32, entry: u64) -> PhysAddr {
        self.oa(entry)
    }

    fn table_pa(&self, _level: u32, entry: u64) -> PhysAddr {
        self.oa(entry)
    }

    fn install_leaf(
        &self,
        table: &TableRef<'_, u64>,
        level: u32,
        index: u32,
        oa: PhysAddr,
        oasz_lg2: u32,
        attrs: &DescAttrs,
    ) -> u64 {
        pt_warn_on!(level != 0 || oasz_lg2 != self.granule_lg2);
        // Subpage protection always allows the whole page.
        let entry = pte::VALID
            | self.make_oa(oa)
            | attrs.descriptor_bits
            | field_prep(pte::SUBPAGE_START, 0)
            | field_prep(pte::SUBPAGE_END, 0xfff);
        table.store(index, entry);
        entry
    }

    fn install_table(
        &self,
        table: &TableRef<'_, u64>,
        _level: u32,
        index: u32,
        table_pa: PhysAddr,
        old: u64,
    ) -> bool {
        table.compare_exchange(index, old, pte::VALID | self.make_oa(table_pa))
    }

    fn attr_from_entry(&self, _level: u32, entry: u64) -> DescAttrs {
        DescAttrs {
            descriptor_bits: entry & self.prot_mask(),
        }
    }

    fn set_prot(&self, prot: IommuProt) -> Result<DescAttrs> {
        let mut bits = 0;
        if self.v2() {
            if !prot.contains(IommuProt::WRITE) {
                bits |= pte::FMT2_NO_WRITE;
            }
            if !prot.contains(IommuProt::READ) {
                bits |= pte::FMT2_NO_READ;
            }
            // Shares its bit with v1 SP_DIS, which is always set.
            bits |= pte::FMT2_NO_CACHE;
        } else {
            if !prot.contains(IommuProt::WRITE) {
                bits |= pte::FMT1_NO_WRITE;
            }
            if !prot.contains(IommuProt::READ) {
                bits |= pte::FMT1_NO_READ;
            }
            bits |= pte::FMT1_SP_DIS;
        }
        Ok(DescAttrs {
            descriptor_bits: bits,
        })
    }
}
