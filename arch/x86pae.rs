//! x86 PAE / long mode page tables as walked by the AMD v2 and Intel first
//! stage IOMMUs
//!
//! Four or five levels of 512 entries. Leaves above level 0 set PS.

use crate::arch::{DescAttrs, HwInfo, PtFormat, PtGeometry};
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

/// Entry bits
pub mod pte {
    use crate::utils::bits::{bit, genmask};

    /// Present
    pub const P: u64 = bit(0);
    pub const RW: u64 = bit(1);
    /// User
    pub const U: u64 = bit(2);
    /// Accessed
    pub const A: u64 = bit(5);
    /// Dirty
    pub const D: u64 = bit(6);
    /// Page size
    pub const PS: u64 = bit(7);
    pub const OA: u64 = genmask(51, 12);
    /// Execute disable
    pub const XD: u64 = bit(63);
}

/// x86 PAE configuration, the VA width picks the paging depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct X86PaeConfig;

/// x86 PAE format instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X86Pae;

impl PtFormat for X86Pae {
    type Word = u64;
    type Attrs = DescAttrs;
    type Config = X86PaeConfig;

    const NAME: &'static str = "x86pae";

    fn init(_cfg: &X86PaeConfig, geo: &mut PtGeometry) -> Result<Self> {
        geo.top_level = match geo.max_vasz_lg2 {
            39 => 2,
            48 => 3,
            57 => 4,
            _ => return Err(Error::InvalidArgument),
        };
        Ok(X86Pae)
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
        FmtFeatures::X86Pae
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
        if entry & pte::P == 0 {
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
        let mut entry = pte::P | field_prep(pte::OA, log2::div(oa, GRANULE_LG2SZ)) | attrs.descriptor_bits;
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
        let entry = pte::P | pte::RW | pte::U | pte::A | field_prep(pte::OA, log2::div(table_pa, GRANULE_LG2SZ));
        table.compare_exchange(index, old, entry)
    }

    fn attr_from_entry(&self, _level: u32, entry: u64) -> DescAttrs {
        DescAttrs {
            descriptor_bits: entry & (pte::RW | pte::U | pte::A | pte::D | pte::XD),
        }
    }

    fn set_prot(&self, prot: IommuProt) -> Result<DescAttrs> {
        let mut bits = pte::U | pte::A | pte::D;
        if prot.contains(IommuProt::WRITE) {
            bits |= pte::RW;
        }
        Ok(DescAttrs {
            descriptor_bits: bits,
        })
    }

    fn hw_info(&self, top_pa: PhysAddr, top_level: u32) -> HwInfo {
        pt_warn_on!(log2::rem(top_pa, 12) != 0);
        HwInfo {
            root_pa: top_pa,
            levels: top_level + 1,
        }
    }
}
