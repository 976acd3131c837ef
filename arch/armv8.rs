//! ARMv8 VMSA long descriptor translation tables
//!
//! Covers stage 1 and stage 2 tables with a 4K, 16K or 64K granule. Level
//! numbering is inverted from the ARM documents: ARM level 3 is level 0 here.
//!
//! Contiguous leaves use the CONTIG hint: every covered slot carries the
//! bit and the output address of its own item.

use bitflags::bitflags;

use crate::arch::{DescAttrs, HwInfo, PtFormat, PtGeometry};
use crate::config::{FmtFeatures, PtFeatures};
use crate::iommu::IommuProt;
use crate::mm::{PhysAddr, TableRef};
use crate::pt::entry::EntryType;
use crate::utils::bits::{field_get, field_prep};
use crate::utils::log2;
use crate::{Error, Result};

/// Widest IOVA
pub const MAX_VA_LG2: u32 = 48;

bitflags! {
    /// ARMv8 extension features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Armv8Features: u32 {
        /// Table is loaded into TTBR1; IOVAs carry all ones above the VA size
        const TTBR1 = 1 << 0;
        /// 52-bit output addresses with the 64K granule
        const LPA = 1 << 1;
        /// Stage 2 descriptor layout
        const S2 = 1 << 2;
        /// Hardware dirty bit management
        const DBM = 1 << 3;
        /// Stage 2 forced write back
        const S2FWB = 1 << 4;
        /// Non-secure tables and leaves
        const NS = 1 << 5;
    }
}

/// Translation granule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Armv8Granule {
    /// 4K pages, 512 entry tables
    #[default]
    Size4K,
    /// 16K pages, 2048 entry tables
    Size16K,
    /// 64K pages, 8192 entry tables
    Size64K,
}

impl Armv8Granule {
    /// log2 of the granule size
    pub const fn lg2(self) -> u32 {
        match self {
            Armv8Granule::Size4K => 12,
            Armv8Granule::Size16K => 14,
            Armv8Granule::Size64K => 16,
        }
    }
}

/// Descriptor bits and field codes
pub mod pte {
    use crate::utils::bits::{bit, genmask};

    pub const VALID: u64 = bit(0);
    /// Page at level 0, table above
    pub const PAGE: u64 = bit(1);
    pub const TABLE: u64 = bit(1);
    pub const NS: u64 = bit(5);
    /// Shareability
    pub const SH: u64 = genmask(9, 8);
    /// Access flag
    pub const AF: u64 = bit(10);
    /// OA bits [51:48] for the 64K granule
    pub const OA52: u64 = genmask(15, 12);
    pub const DBM: u64 = bit(51);
    pub const CONTIG: u64 = bit(52);
    pub const UXN: u64 = bit(53);
    pub const PXN: u64 = bit(54);
    pub const NSTABLE: u64 = bit(63);

    /// OA bits [47:granule]
    pub const fn oa48(granule_lg2: u32) -> u64 {
        genmask(47, granule_lg2)
    }

    // Stage 1
    pub const ATTRINDX: u64 = genmask(4, 2);
    pub const AP: u64 = genmask(7, 6);
    pub const NG: u64 = bit(11);

    pub const MAIR_ATTR_IDX_CACHE: u64 = 1;
    pub const MAIR_ATTR_IDX_DEV: u64 = 2;
    /// Inner shareable
    pub const SH_IS: u64 = 3;
    /// Outer shareable
    pub const SH_OS: u64 = 2;
    pub const AP_UNPRIV: u64 = 1;
    pub const AP_RDONLY: u64 = 2;

    // Stage 2
    pub const S2MEMATTR: u64 = genmask(5, 2);
    pub const S2AP: u64 = genmask(7, 6);

    /// Forced write back when S2FWB is on
    pub const MEMATTR_FWB_WB: u64 = 6;
    /// Outer and inner write back
    pub const MEMATTR_OIWB: u64 = 0xf;
    /// Normal non-cacheable
    pub const MEMATTR_NC: u64 = 5;
    /// Device-nGnRE
    pub const MEMATTR_DEV: u64 = 1;
    pub const S2AP_READ: u64 = 1;
    pub const S2AP_WRITE: u64 = 2;
}

const ATTR_MASK: u64 = pte::SH
    | pte::AF
    | pte::UXN
    | pte::PXN
    | pte::ATTRINDX
    | pte::AP
    | pte::NG
    | pte::S2MEMATTR
    | pte::S2AP
    | pte::NS
    | pte::DBM;

/// ARMv8 configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Armv8Config {
    /// Translation granule
    pub granule: Armv8Granule,
    /// Extension features
    pub features: Armv8Features,
}

/// ARMv8 format instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Armv8 {
    granule_lg2: u32,
    features: Armv8Features,
    top_level: u32,
    /// Stage 2 concatenated root tables folded into the top level
    concat_lg2: u32,
}

impl Armv8 {
    fn is_s2(&self) -> bool {
        self.features.contains(Armv8Features::S2)
    }

    fn oa48(&self) -> u64 {
        pte::oa48(self.granule_lg2)
    }

    fn is_64k(&self) -> bool {
        self.granule_lg2 == Armv8Granule::Size64K.lg2()
    }

    fn encode_oa(&self, oa: PhysAddr) -> u64 {
        let mut bits = field_prep(self.oa48(), log2::div(oa, self.granule_lg2));
        if self.is_64k() {
            bits |= field_prep(pte::OA52, oa >> 48);
        }
        bits
    }

    fn decode_oa(&self, entry: u64) -> PhysAddr {
        let mut oa = log2::mul(field_get(self.oa48(), entry), self.granule_lg2);
        if self.is_64k() {
            oa |= field_get(pte::OA52, entry) << 48;
        }
        oa
    }

    fn contig_range(&self, level: u32, index: u32, entry: u64) -> core::ops::Range<u32> {
        let num_contig_lg2 = self.entry_num_contig_lg2(level, entry);
        let start = log2::set_rem(index as u64, 0, num_contig_lg2) as u32;
        start..start + (1u32 << num_contig_lg2)
    }

    fn item_dirty(&self, entry: u64) -> bool {
        if self.is_s2() {
            let dirty = pte::DBM | field_prep(pte::S2AP, pte::S2AP_WRITE);
            entry & dirty == dirty
        } else {
            entry & (pte::DBM | field_prep(pte::AP, pte::AP_RDONLY)) == pte::DBM
        }
    }
}

impl PtFormat for Armv8 {
    type Word = u64;
    type Attrs = DescAttrs;
    type Config = Armv8Config;

    const NAME: &'static str = "armv8";

    fn init(cfg: &Armv8Config, geo: &mut PtGeometry) -> Result<Self> {
        let features = cfg.features;
        let g = cfg.granule.lg2();
        let vasz = geo.max_vasz_lg2;

        // Atomic dirty updates cannot be made visible through a cache flush.
        if features.contains(Armv8Features::DBM) && geo.features.contains(PtFeatures::DMA_INCOHERENT) {
            return Err(Error::Unsupported);
        }
        if features.contains(Armv8Features::NS | Armv8Features::S2) {
            return Err(Error::Unsupported);
        }
        if features.contains(Armv8Features::LPA) && cfg.granule != Armv8Granule::Size64K {
            return Err(Error::Unsupported);
        }
        if vasz <= g {
            return Err(Error::InvalidArgument);
        }

        let max_top = if cfg.granule == Armv8Granule::Size64K { 2 } else { 3 };
        let per_level = g - 3;
        let mut levels = (vasz - g).div_ceil(per_level);
        if levels > max_top + 1 {
            return Err(Error::InvalidArgument);
        }
        // A single stage 2 level needs FEAT_TTST.
        if features.contains(Armv8Features::S2) && cfg.granule == Armv8Granule::Size4K && levels == 1 {
            return Err(Error::InvalidArgument);
        }

        // Fold up to 16 stage 2 root tables into a concatenated lower level.
        let mut concat_lg2 = 0;
        if features.contains(Armv8Features::S2) && levels > 1 {
            let topsz_lg2 = vasz - (g + per_level * (levels - 1));
            if topsz_lg2 <= 4 {
                levels -= 1;
                concat_lg2 = topsz_lg2;
            }
        }

        geo.top_level = levels - 1;
        Ok(Armv8 {
            granule_lg2: g,
            features,
            top_level: levels - 1,
            concat_lg2,
        })
    }

    fn max_top_level(&self) -> u32 {
        if self.is_64k() {
            2
        } else {
            3
        }
    }

    fn max_va_lg2(&self) -> u32 {
        MAX_VA_LG2
    }

    fn max_oa_lg2(&self) -> u32 {
        if self.is_64k() && self.features.contains(Armv8Features::LPA) {
            52
        } else {
            48
        }
    }

    fn supported_features(&self) -> PtFeatures {
        PtFeatures::DMA_INCOHERENT | PtFeatures::OA_SIZE_CHANGE | PtFeatures::OA_TABLE_XCHG
    }

    fn ext_features(&self) -> FmtFeatures {
        FmtFeatures::Armv8(self.features)
    }

    fn full_va_prefix(&self) -> u64 {
        if self.features.contains(Armv8Features::TTBR1) {
            u64::MAX
        } else {
            0
        }
    }

    fn can_have_leaf(&self, level: u32) -> bool {
        match self.granule_lg2 {
            12 => level <= 2,
            14 => level <= 1,
            _ if self.features.contains(Armv8Features::LPA) => level <= 2,
            _ => level <= 1,
        }
    }

    fn item_lg2sz(&self, level: u32) -> u32 {
        self.granule_lg2 + (self.granule_lg2 - 3) * level
    }

    fn num_items_lg2(&self, level: u32) -> u32 {
        let base = self.granule_lg2 - 3;
        if level == self.top_level {
            base + self.concat_lg2
        } else {
            base
        }
    }

    fn contig_count_lg2(&self, level: u32) -> u32 {
        match (self.granule_lg2, level) {
            (12, _) => 4,
            (14, 1) => 5,
            (14, 0) => 7,
            (16, _) => 5,
            _ => 0,
        }
    }

    fn entry_type(&self, level: u32, entry: u64) -> EntryType {
        if entry & pte::VALID == 0 {
            return EntryType::Empty;
        }
        if level != 0 && entry & pte::TABLE != 0 {
            return EntryType::Table;
        }
        if !self.can_have_leaf(level) {
            return EntryType::Empty;
        }
        EntryType::Oa
    }

    fn entry_num_contig_lg2(&self, level: u32, entry: u64) -> u32 {
        if entry & pte::CONTIG != 0 {
            self.contig_count_lg2(level)
        } else {
            0
        }
    }

    fn entry_oa(&self, level: u32, _index: u32, entry: u64) -> PhysAddr {
        let lg2sz = self.item_lg2sz(level) + self.entry_num_contig_lg2(level, entry);
        log2::set_rem(self.decode_oa(entry), 0, lg2sz)
    }

    fn item_oa(&self, _level: u32, _index: u32, entry: u64) -> PhysAddr {
        self.decode_oa(entry)
    }

    fn table_pa(&self, _level: u32, entry: u64) -> PhysAddr {
        self.decode_oa(entry)
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
        let isz = self.item_lg2sz(level);
        pt_warn_on!(log2::rem(oa, oasz_lg2) != 0);

        let mut entry = pte::VALID | self.encode_oa(oa) | attrs.descriptor_bits;
        if level == 0 {
            entry |= pte::PAGE;
        }
        if oasz_lg2 == isz {
            table.store(index, entry);
            return entry;
        }

        let contig_lg2 = self.contig_count_lg2(level);
        pt_warn_on!(oasz_lg2 != isz + contig_lg2);
        pt_warn_on!(log2::rem(index as u64, contig_lg2) != 0);
        entry |= pte::CONTIG;
        let first = entry;
        let step = field_prep(self.oa48(), log2::to_int(isz - self.granule_lg2));
        for i in index..index + (1u32 << contig_lg2) {
            table.store(i, entry);
            entry += step;
        }
        pt_trace!("armv8 contig leaf L{} [{}] = {:#x}", level, index, first);
        first
    }

    fn install_table(
        &self,
        table: &TableRef<'_, u64>,
        _level: u32,
        index: u32,
        table_pa: PhysAddr,
        old: u64,
    ) -> bool {
        let mut entry = pte::VALID | pte::TABLE | self.encode_oa(table_pa);
        if self.features.contains(Armv8Features::NS) {
            entry |= pte::NSTABLE;
        }
        table.compare_exchange(index, old, entry)
    }

    fn attr_from_entry(&self, _level: u32, entry: u64) -> DescAttrs {
        DescAttrs {
            descriptor_bits: entry & ATTR_MASK,
        }
    }

    fn set_prot(&self, prot: IommuProt) -> Result<DescAttrs> {
        let mut bits;
        if !self.is_s2() {
            let mut ap = 0;
            if !prot.contains(IommuProt::WRITE) && prot.contains(IommuProt::READ) {
                ap |= pte::AP_RDONLY;
            }
            if !prot.contains(IommuProt::PRIV) {
                ap |= pte::AP_UNPRIV;
            }
            bits = pte::NG | field_prep(pte::AP, ap);
            if prot.contains(IommuProt::MMIO) {
                bits |= field_prep(pte::ATTRINDX, pte::MAIR_ATTR_IDX_DEV);
            } else if prot.contains(IommuProt::CACHE) {
                bits |= field_prep(pte::ATTRINDX, pte::MAIR_ATTR_IDX_CACHE);
            }
        } else {
            let mut s2ap = 0;
            if prot.contains(IommuProt::READ) {
                s2ap |= pte::S2AP_READ;
            }
            if prot.contains(IommuProt::WRITE) {
                s2ap |= pte::S2AP_WRITE;
            }
            bits = field_prep(pte::S2AP, s2ap);
            let memattr = if prot.contains(IommuProt::MMIO) {
                pte::MEMATTR_DEV
            } else if prot.contains(IommuProt::CACHE) && self.features.contains(Armv8Features::S2FWB) {
                pte::MEMATTR_FWB_WB
            } else if prot.contains(IommuProt::CACHE) {
                pte::MEMATTR_OIWB
            } else {
                pte::MEMATTR_NC
            };
            bits |= field_prep(pte::S2MEMATTR, memattr);
        }

        // Writable leaves start out dirty so the walker never has to set it.
        if self.features.contains(Armv8Features::DBM) && prot.contains(IommuProt::WRITE) {
            bits |= pte::DBM;
        }
        bits |= field_prep(
            pte::SH,
            if prot.contains(IommuProt::CACHE) {
                pte::SH_IS
            } else {
                pte::SH_OS
            },
        );
        if prot.contains(IommuProt::NOEXEC) {
            bits |= pte::UXN | pte::PXN;
        }
        if self.features.contains(Armv8Features::NS) {
            bits |= pte::NS;
        }
        bits |= pte::AF;
        Ok(DescAttrs {
            descriptor_bits: bits,
        })
    }

    fn supports_dirty(&self) -> bool {
        self.features.contains(Armv8Features::DBM)
    }

    fn entry_is_write_dirty(&self, table: &TableRef<'_, u64>, level: u32, index: u32, entry: u64) -> bool {
        self.contig_range(level, index, entry)
            .any(|i| self.item_dirty(table.load(i)))
    }

    fn entry_set_write_clean(&self, table: &TableRef<'_, u64>, level: u32, index: u32, entry: u64) {
        for i in self.contig_range(level, index, entry) {
            if self.is_s2() {
                table.fetch_and(i, !field_prep(pte::S2AP, pte::S2AP_WRITE));
            } else {
                table.fetch_or(i, field_prep(pte::AP, pte::AP_RDONLY));
            }
        }
    }

    fn entry_make_write_dirty(&self, table: &TableRef<'_, u64>, _level: u32, index: u32, entry: u64) -> bool {
        let dirty = if self.is_s2() {
            entry | field_prep(pte::S2AP, pte::S2AP_WRITE)
        } else {
            entry & !field_prep(pte::AP, pte::AP_RDONLY)
        };
        table.compare_exchange(index, entry, dirty)
    }

    fn hw_info(&self, top_pa: PhysAddr, top_level: u32) -> HwInfo {
        HwInfo {
            root_pa: top_pa,
            levels: top_level + 1,
        }
    }
}
