//! ARMv7 short descriptor translation tables
//!
//! Two levels of 32-bit entries. Level 1 maps 1M sections and 16M
//! supersections or points to a level 0 table of 256 entries, which maps 4K
//! small pages and 64K large pages. The root always covers the whole 32-bit
//! VA with 4096 entries.
//!
//! Each leaf type keeps its permission and memory type bits in different
//! places, so the attributes carry one pre-encoded word per leaf type.

use bitflags::bitflags;

use crate::arch::{HwInfo, PtFormat, PtGeometry};
use crate::config::{FmtFeatures, PtFeatures};
use crate::iommu::IommuProt;
use crate::mm::{PhysAddr, TableRef};
use crate::pt::entry::EntryType;
use crate::utils::bits::{field_get, field_prep};
use crate::utils::log2;
use crate::Result;

pub const MAX_OA_LG2: u32 = 40;
pub const MAX_VA_LG2: u32 = 32;
pub const TOP_LEVEL: u32 = 1;
pub const GRANULE_LG2SZ: u32 = 12;
/// Size of a level 0 table
pub const TABLEMEM_LG2SZ: u32 = 10;
/// Table pointers are 32-bit
pub const MAX_TABLE_PA_LG2: u32 = 32;
const CONTIG_LG2: u32 = 4;

bitflags! {
    /// ARMv7s extension features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Armv7sFeatures: u32 {
        /// Table is loaded into TTBR1
        const TTBR1 = 1 << 0;
        /// Non-secure tables and leaves
        const NS = 1 << 1;
    }
}

/// Descriptor bits
pub mod pte {
    use crate::utils::bits::{bit, genmask};

    pub const TYPE: u64 = genmask(1, 0);

    // Level 1
    pub const FMT1_TYPE_TABLE: u64 = 1;
    pub const FMT1_TYPE_SECTION: u64 = 2;
    /// Level 0 table address
    pub const FMT1_TTB: u64 = genmask(31, 10);
    pub const FMT1_B: u64 = bit(2);
    pub const FMT1_C: u64 = bit(3);
    pub const FMT1_XN: u64 = bit(4);
    pub const FMT1_AP0: u64 = bit(10);
    pub const FMT1_AP1: u64 = bit(11);
    pub const FMT1_TEX: u64 = genmask(14, 12);
    pub const FMT1_AP2: u64 = bit(15);
    pub const FMT1_S: u64 = bit(16);
    pub const FMT1_NG: u64 = bit(17);
    pub const FMT1_SUPER_SECTION: u64 = bit(18);
    pub const FMT1_NS: u64 = bit(19);
    /// Section OA bits [31:20]
    pub const FMT1S_OA: u64 = genmask(31, 20);
    /// Supersection OA bits [31:24]
    pub const FMT1SS_OA_A: u64 = genmask(31, 24);
    /// Supersection OA bits [35:32]
    pub const FMT1SS_OA_B: u64 = genmask(23, 20);
    /// Supersection OA bits [39:36]
    pub const FMT1SS_OA_C: u64 = genmask(8, 5);

    // Level 0
    pub const FMT2_TYPE_LARGE_PAGE: u64 = 1;
    pub const FMT2_TYPE_SMALL_PAGE: u64 = 2;
    pub const FMT2_SMALL_PAGE: u64 = bit(1);
    pub const FMT2_B: u64 = bit(2);
    pub const FMT2_C: u64 = bit(3);
    pub const FMT2_AP0: u64 = bit(4);
    pub const FMT2_AP1: u64 = bit(5);
    pub const FMT2_AP2: u64 = bit(9);
    pub const FMT2_S: u64 = bit(10);
    pub const FMT2_NG: u64 = bit(11);
    pub const FMT2S_XN: u64 = bit(0);
    pub const FMT2S_TEX: u64 = genmask(8, 6);
    pub const FMT2S_OA: u64 = genmask(31, 12);
    pub const FMT2L_XN: u64 = bit(15);
    pub const FMT2L_TEX: u64 = genmask(14, 12);
    pub const FMT2L_OA: u64 = genmask(31, 16);

    /// Non-secure table pointer
    pub const TABLE_NS: u64 = bit(3);
}

/// Leaf attributes, one encoding per leaf type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Armv7sAttrs {
    /// Sections and supersections
    pub pte1: u32,
    /// Small pages
    pub pte2: u32,
    /// Large pages
    pub pte2l: u32,
}

/// Memory type and permission fields common to every leaf type
#[derive(Debug, Clone, Copy, Default)]
struct LeafFields {
    ng: u64,
    s: u64,
    tex: u64,
    ap0: u64,
    ap1: u64,
    ap2: u64,
    xn: u64,
    b: u64,
    c: u64,
}

impl LeafFields {
    fn from_pte1(entry: u64) -> Self {
        Self {
            ng: field_get(pte::FMT1_NG, entry),
            s: field_get(pte::FMT1_S, entry),
            tex: field_get(pte::FMT1_TEX, entry),
            ap0: field_get(pte::FMT1_AP0, entry),
            ap1: field_get(pte::FMT1_AP1, entry),
            ap2: field_get(pte::FMT1_AP2, entry),
            xn: field_get(pte::FMT1_XN, entry),
            b: field_get(pte::FMT1_B, entry),
            c: field_get(pte::FMT1_C, entry),
        }
    }

    fn from_pte2(entry: u64) -> Self {
        let (tex, xn) = if entry & pte::FMT2_SMALL_PAGE != 0 {
            (field_get(pte::FMT2S_TEX, entry), field_get(pte::FMT2S_XN, entry))
        } else {
            (field_get(pte::FMT2L_TEX, entry), field_get(pte::FMT2L_XN, entry))
        };
        Self {
            ng: field_get(pte::FMT2_NG, entry),
            s: field_get(pte::FMT2_S, entry),
            tex,
            ap0: field_get(pte::FMT2_AP0, entry),
            ap1: field_get(pte::FMT2_AP1, entry),
            ap2: field_get(pte::FMT2_AP2, entry),
            xn,
            b: field_get(pte::FMT2_B, entry),
            c: field_get(pte::FMT2_C, entry),
        }
    }

    fn encode(&self, ns: bool) -> Armv7sAttrs {
        let common2 = field_prep(pte::FMT2_NG, self.ng)
            | field_prep(pte::FMT2_S, self.s)
            | field_prep(pte::FMT2_AP0, self.ap0)
            | field_prep(pte::FMT2_AP1, self.ap1)
            | field_prep(pte::FMT2_AP2, self.ap2)
            | field_prep(pte::FMT2_B, self.b)
            | field_prep(pte::FMT2_C, self.c);
        let mut pte1 = field_prep(pte::FMT1_NG, self.ng)
            | field_prep(pte::FMT1_S, self.s)
            | field_prep(pte::FMT1_TEX, self.tex)
            | field_prep(pte::FMT1_AP0, self.ap0)
            | field_prep(pte::FMT1_AP1, self.ap1)
            | field_prep(pte::FMT1_AP2, self.ap2)
            | field_prep(pte::FMT1_XN, self.xn)
            | field_prep(pte::FMT1_B, self.b)
            | field_prep(pte::FMT1_C, self.c);
        if ns {
            pte1 |= pte::FMT1_NS;
        }
        Armv7sAttrs {
            pte1: pte1 as u32,
            pte2: (common2 | field_prep(pte::FMT2S_TEX, self.tex) | field_prep(pte::FMT2S_XN, self.xn))
                as u32,
            pte2l: (common2 | field_prep(pte::FMT2L_TEX, self.tex) | field_prep(pte::FMT2L_XN, self.xn))
                as u32,
        }
    }
}

/// ARMv7s configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Armv7sConfig {
    /// Extension features
    pub features: Armv7sFeatures,
}

/// ARMv7s format instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Armv7s {
    features: Armv7sFeatures,
}

impl Armv7s {
    fn ns(&self) -> bool {
        self.features.contains(Armv7sFeatures::NS)
    }
}

impl PtFormat for Armv7s {
    type Word = u32;
    type Attrs = Armv7sAttrs;
    type Config = Armv7sConfig;

    const NAME: &'static str = "armv7s";
    const VA_BITS: u32 = 32;

    fn init(cfg: &Armv7sConfig, geo: &mut PtGeometry) -> Result<Self> {
        geo.top_level = TOP_LEVEL;
        Ok(Armv7s {
            features: cfg.features,
        })
    }

    fn max_top_level(&self) -> u32 {
        TOP_LEVEL
    }

    fn max_va_lg2(&self) -> u32 {
        MAX_VA_LG2
    }

    fn max_oa_lg2(&self) -> u32 {
        MAX_OA_LG2
    }

    fn max_table_pa_lg2(&self) -> u32 {
        MAX_TABLE_PA_LG2
    }

    fn supported_features(&self) -> PtFeatures {
        PtFeatures::DMA_INCOHERENT
            | PtFeatures::OA_SIZE_CHANGE
            | PtFeatures::OA_TABLE_XCHG
            | PtFeatures::FULL_VA
    }

    fn ext_features(&self) -> FmtFeatures {
        FmtFeatures::Armv7s(self.features)
    }

    fn full_va_prefix(&self) -> u64 {
        if self.features.contains(Armv7sFeatures::TTBR1) {
            u32::MAX as u64
        } else {
            0
        }
    }

    fn can_have_leaf(&self, _level: u32) -> bool {
        true
    }

    fn item_lg2sz(&self, level: u32) -> u32 {
        GRANULE_LG2SZ + (TABLEMEM_LG2SZ - 2) * level
    }

    fn num_items_lg2(&self, level: u32) -> u32 {
        if level == TOP_LEVEL {
            MAX_VA_LG2 - self.item_lg2sz(TOP_LEVEL)
        } else {
            TABLEMEM_LG2SZ - 2
        }
    }

    fn contig_count_lg2(&self, _level: u32) -> u32 {
        CONTIG_LG2
    }

    fn entry_type(&self, level: u32, entry: u64) -> EntryType {
        match field_get(pte::TYPE, entry) {
            0 => EntryType::Empty,
            pte::FMT1_TYPE_TABLE if level == TOP_LEVEL => EntryType::Table,
            _ => EntryType::Oa,
        }
    }

    fn entry_num_contig_lg2(&self, level: u32, entry: u64) -> u32 {
        let contig = if level == 0 {
            entry & pte::FMT2_SMALL_PAGE == 0
        } else {
            entry & pte::FMT1_SUPER_SECTION != 0
        };
        if contig {
            CONTIG_LG2
        } else {
            0
        }
    }

    fn entry_oa(&self, level: u32, _index: u32, entry: u64) -> PhysAddr {
        if level == 0 {
            if entry & pte::FMT2_SMALL_PAGE != 0 {
                return log2::mul(field_get(pte::FMT2S_OA, entry), GRANULE_LG2SZ);
            }
            return log2::mul(field_get(pte::FMT2L_OA, entry), 16);
        }
        if entry & pte::FMT1_SUPER_SECTION != 0 {
            return log2::mul(field_get(pte::FMT1SS_OA_A, entry), 24)
                | log2::mul(field_get(pte::FMT1SS_OA_B, entry), 32)
                | log2::mul(field_get(pte::FMT1SS_OA_C, entry), 36);
        }
        log2::mul(field_get(pte::FMT1S_OA, entry), 20)
    }

    fn table_pa(&self, _level: u32, entry: u64) -> PhysAddr {
        log2::mul(field_get(pte::FMT1_TTB, entry), TABLEMEM_LG2SZ)
    }

    fn install_leaf(
        &self,
        table: &TableRef<'_, u32>,
        level: u32,
        index: u32,
        oa: PhysAddr,
        oasz_lg2: u32,
        attrs: &Armv7sAttrs,
    ) -> u64 {
        let isz = self.item_lg2sz(level);
        pt_warn_on!(log2::rem(oa, oasz_lg2) != 0);

        if oasz_lg2 == isz {
            let entry = if level == 0 {
                field_prep(pte::TYPE, pte::FMT2_TYPE_SMALL_PAGE)
                    | field_prep(pte::FMT2S_OA, log2::div(oa, GRANULE_LG2SZ))
                    | u64::from(attrs.pte2)
            } else {
                field_prep(pte::TYPE, pte::FMT1_TYPE_SECTION)
                    | field_prep(pte::FMT1S_OA, log2::div(oa, 20))
                    | u64::from(attrs.pte1)
            };
            table.store(index, entry);
            return entry;
        }

        let entry = if level == 0 {
            field_prep(pte::TYPE, pte::FMT2_TYPE_LARGE_PAGE)
                | field_prep(pte::FMT2L_OA, log2::div(oa, 16))
                | u64::from(attrs.pte2l)
        } else {
            field_prep(pte::TYPE, pte::FMT1_TYPE_SECTION)
                | pte::FMT1_SUPER_SECTION
                | field_prep(pte::FMT1SS_OA_A, log2::div(oa, 24))
                | field_prep(pte::FMT1SS_OA_B, log2::div(oa, 32))
                | field_prep(pte::FMT1SS_OA_C, log2::div(oa, 36))
                | u64::from(attrs.pte1)
        };
        pt_warn_on!(oasz_lg2 != isz + CONTIG_LG2);
        pt_warn_on!(log2::rem(index as u64, CONTIG_LG2) != 0);
        for i in index..index + (1u32 << CONTIG_LG2) {
            table.store(i, entry);
        }
        entry
    }

    fn install_table(
        &self,
        table: &TableRef<'_, u32>,
        _level: u32,
        index: u32,
        table_pa: PhysAddr,
        old: u64,
    ) -> bool {
        let mut entry = field_prep(pte::TYPE, pte::FMT1_TYPE_TABLE)
            | field_prep(pte::FMT1_TTB, log2::div(table_pa, TABLEMEM_LG2SZ));
        if self.ns() {
            entry |= pte::TABLE_NS;
        }
        table.compare_exchange(index, old, entry)
    }

    fn attr_from_entry(&self, level: u32, entry: u64) -> Armv7sAttrs {
        let fields = if level == 0 {
            LeafFields::from_pte2(entry)
        } else {
            LeafFields::from_pte1(entry)
        };
        fields.encode(self.ns())
    }

    fn set_prot(&self, prot: IommuProt) -> Result<Armv7sAttrs> {
        // Simplified access permissions: AP0 is the access flag, AP1 allows
        // unprivileged access, AP2 makes the leaf read only.
        let mut fields = LeafFields {
            ng: 1,
            s: 1,
            ap0: 1,
            ..Default::default()
        };
        if !prot.contains(IommuProt::MMIO) {
            fields.tex = 1;
        }
        if !prot.contains(IommuProt::PRIV) {
            fields.ap1 = 1;
        }
        if !prot.contains(IommuProt::WRITE) {
            fields.ap2 = 1;
        }
        if prot.contains(IommuProt::NOEXEC) {
            fields.xn = 1;
        }
        if prot.contains(IommuProt::MMIO) {
            fields.b = 1;
        } else if prot.contains(IommuProt::CACHE) {
            fields.b = 1;
            fields.c = 1;
        }
        Ok(fields.encode(self.ns()))
    }

    fn hw_info(&self, top_pa: PhysAddr, _top_level: u32) -> HwInfo {
        HwInfo {
            root_pa: top_pa,
            levels: TOP_LEVEL + 1,
        }
    }
}
