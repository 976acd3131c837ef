//! AMD IOMMU v1 host page table
//!
//! Layout from "I/O Page Tables for Host Translations" of the AMD I/O
//! Virtualization Technology specification. Level 0 here is AMD mode 1.
//!
//! Sizes larger than one item are expressed by writing the same entry into
//! every covered slot with NextLevel = 7 and the size encoded as a run of
//! ones in the low bits of the address field.

use crate::arch::{DescAttrs, HwInfo, PtFormat, PtGeometry};
use crate::config::{FmtFeatures, PtFeatures};
use crate::iommu::IommuProt;
use crate::mm::{PhysAddr, TableRef};
use crate::pt::entry::EntryType;
use crate::utils::bits::{field_get, field_prep};
use crate::utils::log2;
use crate::{Error, Result};

/// Widest IOVA
pub const MAX_VA_LG2: u32 = 64;
/// Widest output address
pub const MAX_OA_LG2: u32 = 52;
/// Highest root level (AMD mode 6)
pub const MAX_TOP_LEVEL: u32 = 5;
/// Smallest page
pub const GRANULE_LG2SZ: u32 = 12;
/// Every table is one 4K page
pub const TABLEMEM_LG2SZ: u32 = 12;

/// Page table entry bits and masks
pub mod pte {
    use crate::utils::bits::{bit, genmask};

    /// Present
    pub const PR: u64 = bit(0);
    /// Dirty, set by the IOMMU on write
    pub const D: u64 = bit(6);
    /// Next level, or 7 for a leaf with encoded size
    pub const NEXT_LEVEL: u64 = genmask(11, 9);
    /// Output address bits [51:12]
    pub const OA: u64 = genmask(51, 12);
    /// Force coherent
    pub const FC: u64 = bit(60);
    /// Read permission
    pub const IR: u64 = bit(61);
    /// Write permission
    pub const IW: u64 = bit(62);

    /// NextLevel of a single item leaf
    pub const NL_DEFAULT: u64 = 0;
    /// NextLevel of a leaf whose size is encoded in the address field
    pub const NL_SIZE: u64 = 7;
}

/// AMD v1 configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amdv1Config {
    /// Level of the initial root, 1..=5
    pub starting_level: u32,
}

impl Default for Amdv1Config {
    fn default() -> Self {
        // Matches the 3-level layout the legacy driver starts from.
        Self { starting_level: 2 }
    }
}

/// AMD v1 format instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amdv1;

impl Amdv1 {
    fn write_run(table: &TableRef<'_, u64>, index: u32, num_contig_lg2: u32, entry: u64) {
        for i in index..index + (1u32 << num_contig_lg2) {
            table.store(i, entry);
        }
    }

    fn contig_base(&self, level: u32, index: u32, entry: u64) -> (u32, u32) {
        let num_contig_lg2 = self.entry_num_contig_lg2(level, entry);
        let start = log2::set_rem(index as u64, 0, num_contig_lg2) as u32;
        (start, start + (1u32 << num_contig_lg2))
    }
}

impl PtFormat for Amdv1 {
    type Word = u64;
    type Attrs = DescAttrs;
    type Config = Amdv1Config;

    const NAME: &'static str = "amdv1";

    fn init(cfg: &Amdv1Config, geo: &mut PtGeometry) -> Result<Self> {
        if cfg.starting_level == 0 || cfg.starting_level > MAX_TOP_LEVEL {
            return Err(Error::InvalidArgument);
        }
        geo.top_level = cfg.starting_level;
        Ok(Amdv1)
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
        PtFeatures::FULL_VA
            | PtFeatures::DYNAMIC_TOP
            | PtFeatures::OA_SIZE_CHANGE
            | PtFeatures::OA_TABLE_XCHG
    }

    fn ext_features(&self) -> FmtFeatures {
        FmtFeatures::Amdv1
    }

    fn can_have_leaf(&self, level: u32) -> bool {
        // The top most level cannot hold translations.
        level < MAX_TOP_LEVEL
    }

    fn item_lg2sz(&self, level: u32) -> u32 {
        GRANULE_LG2SZ + (TABLEMEM_LG2SZ - 3) * level
    }

    fn num_items_lg2(&self, _level: u32) -> u32 {
        TABLEMEM_LG2SZ - 3
    }

    fn possible_sizes(&self, level: u32) -> u64 {
        if !self.can_have_leaf(level) {
            return 0;
        }
        let isz = self.item_lg2sz(level);
        let high = (isz + self.num_items_lg2(level) - 1).min(51);
        // 512G pages are broken in hardware; every other power of two works.
        crate::utils::bits::genmask(high, isz) & !log2::to_int(39)
    }

    fn entry_type(&self, level: u32, entry: u64) -> EntryType {
        if entry & pte::PR == 0 {
            return EntryType::Empty;
        }
        let next_level = field_get(pte::NEXT_LEVEL, entry);
        if level == 0 || next_level == pte::NL_DEFAULT || next_level == pte::NL_SIZE {
            EntryType::Oa
        } else {
            EntryType::Table
        }
    }

    fn entry_num_contig_lg2(&self, level: u32, entry: u64) -> u32 {
        let next_level = field_get(pte::NEXT_LEVEL, entry);
        if next_level == pte::NL_DEFAULT {
            return 0;
        }
        pt_warn_on!(next_level != pte::NL_SIZE);
        // The run of ones in the address field starts at bit isz - 1 relative
        // to the entry once the granule offset is folded in.
        let code = (entry >> (self.item_lg2sz(level) - 1)) as u32;
        (!code).trailing_zeros()
    }

    fn entry_oa(&self, _level: u32, _index: u32, entry: u64) -> PhysAddr {
        let mut oa = field_get(pte::OA, entry);
        match field_get(pte::NEXT_LEVEL, entry) {
            pte::NL_SIZE => {
                let sz_bits = log2::ffz(oa);
                oa = log2::set_rem(oa, 0, sz_bits);
            }
            pte::NL_DEFAULT => {}
            _ => {
                pt_warn_on!(true);
                return 0;
            }
        }
        log2::mul(oa, GRANULE_LG2SZ)
    }

    fn table_pa(&self, _level: u32, entry: u64) -> PhysAddr {
        log2::mul(field_get(pte::OA, entry), GRANULE_LG2SZ)
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
        let mut entry = pte::PR
            | field_prep(pte::OA, log2::div(oa, GRANULE_LG2SZ))
            | attrs.descriptor_bits;

        if oasz_lg2 == isz {
            entry |= field_prep(pte::NEXT_LEVEL, pte::NL_DEFAULT);
            table.store(index, entry);
        } else {
            entry |= field_prep(pte::NEXT_LEVEL, pte::NL_SIZE)
                | field_prep(pte::OA, log2::to_int(oasz_lg2 - GRANULE_LG2SZ - 1) - 1);
            Self::write_run(table, index, oasz_lg2 - isz, entry);
        }
        pt_trace!("amdv1 leaf L{} [{}] = {:#x}", level, index, entry);
        entry
    }

    fn install_table(
        &self,
        table: &TableRef<'_, u64>,
        level: u32,
        index: u32,
        table_pa: PhysAddr,
        old: u64,
    ) -> bool {
        // IR and IW are ANDed down the walk; permissions are controlled from the leaf.
        let entry = pte::PR
            | field_prep(pte::NEXT_LEVEL, level as u64)
            | field_prep(pte::OA, log2::div(table_pa, GRANULE_LG2SZ))
            | pte::IR
            | pte::IW;
        table.compare_exchange(index, old, entry)
    }

    fn attr_from_entry(&self, _level: u32, entry: u64) -> DescAttrs {
        DescAttrs {
            descriptor_bits: entry & (pte::FC | pte::IR | pte::IW),
        }
    }

    fn set_prot(&self, prot: IommuProt) -> Result<DescAttrs> {
        let mut bits = pte::FC;
        if prot.contains(IommuProt::READ) {
            bits |= pte::IR;
        }
        if prot.contains(IommuProt::WRITE) {
            bits |= pte::IW;
        }
        Ok(DescAttrs {
            descriptor_bits: bits,
        })
    }

    fn supports_dirty(&self) -> bool {
        true
    }

    fn entry_is_write_dirty(&self, table: &TableRef<'_, u64>, level: u32, index: u32, entry: u64) -> bool {
        let (start, end) = self.contig_base(level, index, entry);
        (start..end).any(|i| table.load(i) & pte::D != 0)
    }

    fn entry_set_write_clean(&self, table: &TableRef<'_, u64>, level: u32, index: u32, entry: u64) {
        let (start, end) = self.contig_base(level, index, entry);
        for i in start..end {
            table.fetch_and(i, !pte::D);
        }
    }

    fn entry_make_write_dirty(&self, table: &TableRef<'_, u64>, _level: u32, index: u32, entry: u64) -> bool {
        table.compare_exchange(index, entry, entry | pte::D)
    }

    fn hw_info(&self, top_pa: PhysAddr, top_level: u32) -> HwInfo {
        pt_warn_on!(log2::rem(top_pa, 12) != 0);
        HwInfo {
            root_pa: top_pa,
            levels: top_level + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::testing::with_table;

    const RW: DescAttrs = DescAttrs {
        descriptor_bits: pte::FC | pte::IR | pte::IW,
    };

    #[test]
    fn test_geometry() {
        let fmt = Amdv1;
        assert_eq!(fmt.item_lg2sz(0), 12);
        assert_eq!(fmt.item_lg2sz(2), 30);
        assert_eq!(fmt.possible_sizes(0), 0x1f_f000);
        assert_eq!(fmt.possible_sizes(3) & (1 << 39), 0);
        assert_eq!(fmt.possible_sizes(4), crate::utils::bits::genmask(51, 48));
        assert_eq!(fmt.possible_sizes(5), 0);
    }

    #[test]
    fn test_single_leaf_encoding() {
        with_table::<u64>(12, |table| {
            let entry = Amdv1.install_leaf(table, 0, 3, 0x1234_5000, 12, &RW);
            assert_eq!(entry, pte::PR | 0x1234_5000 | pte::FC | pte::IR | pte::IW);
            assert_eq!(table.load(3), entry);
            assert_eq!(Amdv1.entry_type(0, entry), EntryType::Oa);
            assert_eq!(Amdv1.entry_num_contig_lg2(0, entry), 0);
            assert_eq!(Amdv1.entry_oa(0, 3, entry), 0x1234_5000);
        });
    }

    #[test]
    fn test_contiguous_leaf_encoding() {
        with_table::<u64>(12, |table| {
            // 64K at level 0 spans 16 slots
            let entry = Amdv1.install_leaf(table, 0, 16, 0x8_0000, 16, &RW);
            assert_eq!(field_get(pte::NEXT_LEVEL, entry), pte::NL_SIZE);
            assert_eq!(field_get(pte::OA, entry) & 0xf, 0x7);
            assert!((16..32).all(|i| table.load(i) == entry));
            assert_eq!(table.load(32), 0);
            assert_eq!(Amdv1.entry_num_contig_lg2(0, entry), 4);
            assert_eq!(Amdv1.entry_oa(0, 20, entry), 0x8_0000);
            assert_eq!(Amdv1.item_oa(0, 20, entry), 0x8_4000);
        });
    }

    #[test]
    fn test_contiguous_leaf_above_level_zero() {
        with_table::<u64>(12, |table| {
            // 8M at level 1 spans 4 slots of 2M
            let entry = Amdv1.install_leaf(table, 1, 4, 0x80_0000, 23, &RW);
            assert_eq!(Amdv1.entry_type(1, entry), EntryType::Oa);
            assert_eq!(Amdv1.entry_num_contig_lg2(1, entry), 2);
            assert_eq!(Amdv1.entry_oa(1, 5, entry), 0x80_0000);
        });
    }

    #[test]
    fn test_table_entry() {
        with_table::<u64>(12, |table| {
            assert!(Amdv1.install_table(table, 2, 7, 0x4000_3000, 0));
            let entry = table.load(7);
            assert_eq!(field_get(pte::NEXT_LEVEL, entry), 2);
            assert_eq!(Amdv1.entry_type(2, entry), EntryType::Table);
            assert_eq!(Amdv1.table_pa(2, entry), 0x4000_3000);
            assert!(!Amdv1.install_table(table, 2, 7, 0x4000_4000, 0));
        });
    }

    #[test]
    fn test_dirty_tracking_covers_whole_run() {
        with_table::<u64>(12, |table| {
            let entry = Amdv1.install_leaf(table, 0, 0, 0, 13, &RW);
            assert!(!Amdv1.entry_is_write_dirty(table, 0, 0, entry));
            table.fetch_or(1, pte::D);
            assert!(Amdv1.entry_is_write_dirty(table, 0, 0, entry));
            Amdv1.entry_set_write_clean(table, 0, 1, entry);
            assert!(!Amdv1.entry_is_write_dirty(table, 0, 0, entry));
            assert!(Amdv1.entry_make_write_dirty(table, 0, 0, entry));
            assert_eq!(table.load(0), entry | pte::D);
        });
    }

    #[test]
    fn test_prot() {
        let attrs = Amdv1.set_prot(IommuProt::READ).unwrap();
        assert_eq!(attrs.descriptor_bits, pte::FC | pte::IR);
        let entry = pte::PR | pte::D | attrs.descriptor_bits;
        assert_eq!(Amdv1.attr_from_entry(0, entry), attrs);
    }

    #[test]
    fn test_starting_level_bounds() {
        let mut geo = PtGeometry {
            features: PtFeatures::empty(),
            max_vasz_lg2: 64,
            max_oasz_lg2: 52,
            top_level: 0,
        };
        assert_eq!(Amdv1::init(&Amdv1Config { starting_level: 0 }, &mut geo), Err(Error::InvalidArgument));
        assert_eq!(Amdv1::init(&Amdv1Config { starting_level: 6 }, &mut geo), Err(Error::InvalidArgument));
        assert!(Amdv1::init(&Amdv1Config { starting_level: 3 }, &mut geo).is_ok());
        assert_eq!(geo.top_level, 3);
    }
}
