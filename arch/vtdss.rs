//! Intel VT-d second stage translation tables
//!
//! There is no present bit: an entry is present when any bit is set, so
//! every leaf carries R even when only write access was requested.

use crate::arch::{DescAttrs, PtFormat, PtGeometry};
use crate::config::{FmtFeatures, PtFeatures};
use crate::iommu::IommuProt;
use crate::mm::{PhysAddr, TableRef};
use crate::pt::entry::EntryType;
use crate::utils::bits::{field_get, field_prep};
use crate::utils::log2;
use crate::{Error, Result};

pub const MAX_OA_LG2: u32 = 52;
pub const MAX_VA_LG2: u32 = 57;
pub const MAX_TOP_LEVEL: u32 = 4;
pub const GRANULE_LG2SZ: u32 = 12;
pub const TABLEMEM_LG2SZ: u32 = 12;

/// Second stage entry bits
pub mod pte {
    use crate::utils::bits::{bit, genmask};

    pub const R: u64 = bit(0);
    pub const W: u64 = bit(1);
    /// Page size, leaf above level 0
    pub const PS: u64 = bit(7);
    pub const A: u64 = bit(8);
    pub const D: u64 = bit(9);
    /// Snoop behaviour
    pub const SNP: u64 = bit(11);
    pub const OA: u64 = genmask(51, 12);
}

/// VT-d second stage configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VtdssConfig {
    /// Set SNP in every leaf so DMA snoops the CPU caches
    pub force_snooping: bool,
}

/// VT-d second stage format instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vtdss {
    force_snooping: bool,
}

impl PtFormat for Vtdss {
    type Word = u64;
    type Attrs = DescAttrs;
    type Config = VtdssConfig;

    const NAME: &'static str = "vtdss";

    fn init(cfg: &VtdssConfig, geo: &mut PtGeometry) -> Result<Self> {
        geo.top_level = match geo.max_vasz_lg2 {
            39 => 2,
            48 => 3,
            57 => 4,
            _ => return Err(Error::InvalidArgument),
        };
        Ok(Vtdss {
            force_snooping: cfg.force_snooping,
        })
    }

    fn max_top_level(&self) -> u32 {
        MAX_TOP_LEVEL
    }

    fn max_va_lg2(&self) -> u32 {
        MAX_VA_LG2
    }

    fn max_oa_lg2(&self) -> u32 {
        MAX_OA_LG2
    }

    fn supported_features(&self) -> PtFeatures {
        PtFeatures::DMA_INCOHERENT | PtFeatures::OA_TABLE_XCHG
    }

    fn ext_features(&self) -> FmtFeatures {
        FmtFeatures::Vtdss
    }

    fn can_have_leaf(&self, level: u32) -> bool {
        level <= 2
    }

    fn item_lg2sz(&self, level: u32) -> u32 {
        GRANULE_LG2SZ + (TABLEMEM_LG2SZ - 3) * level
    }

    fn num_items_lg2(&self, _level: u32) -> u32 {
        TABLEMEM_LG2SZ - 3
    }

    fn entry_type(&self, level: u32, entry: u64) -> EntryType {
        if entry == 0 {
            EntryType::Empty
        } else if level == 0 || (self.can_have_leaf(level) && entry & pte::PS != 0) {
            EntryType::Oa
        } else {
            EntryType::Table
        }
    }

    fn entry_oa(&self, _level: u32, _index: u32, entry: u64) -> PhysAddr {
        log2::mul(field_get(pte::OA, entry), GRANULE_LG2SZ)
    }

    fn table_pa(&self, _level: u32, entry: u64) -> PhysAddr {
        log2::mul(field_get(pte::OA, entry), TABLEMEM_LG2SZ)
    }

    fn install_leaf(
        &self,
        table: &TableRef<'_, u64>,
        level: u32,
        index: u32,
        oa: PhysAddr,
        _oasz_lg2: u32,
        attrs: &DescAttrs,
    ) -> u64 {
        let mut entry = field_prep(pte::OA, log2::div(oa, GRANULE_LG2SZ)) | attrs.descriptor_bits;
        if level != 0 {
            entry |= pte::PS;
        }
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
        let entry = pte::R | pte::W | field_prep(pte::OA, log2::div(table_pa, GRANULE_LG2SZ));
        table.compare_exchange(index, old, entry)
    }

    fn attr_from_entry(&self, _level: u32, entry: u64) -> DescAttrs {
        DescAttrs {
            descriptor_bits: entry & (pte::R | pte::W | pte::SNP),
        }
    }

    fn set_prot(&self, prot: IommuProt) -> Result<DescAttrs> {
        if !prot.intersects(IommuProt::READ | IommuProt::WRITE) {
            return Err(Error::InvalidArgument);
        }
        let mut bits = pte::R;
        if prot.contains(IommuProt::WRITE) {
            bits |= pte::W;
        }
        if self.force_snooping {
            bits |= pte::SNP;
        }
        Ok(DescAttrs {
            descriptor_bits: bits,
        })
    }
}
