//! Behavior every format must share, plus bit-exact checks of the tables
//! each format builds against hand-encoded entries.

mod reference;

use std::sync::Arc;

use ferrovisor_iopt::arch::amdv1::{Amdv1, Amdv1Config};
use ferrovisor_iopt::arch::armv7s::{Armv7s, Armv7sConfig};
use ferrovisor_iopt::arch::armv8::{Armv8, Armv8Config, Armv8Features, Armv8Granule};
use ferrovisor_iopt::arch::dart::{Dart, DartConfig, DartFeatures};
use ferrovisor_iopt::arch::vtdss::{Vtdss, VtdssConfig};
use ferrovisor_iopt::arch::x86pae::{X86Pae, X86PaeConfig};
use ferrovisor_iopt::{
    Error, IommuDriverOps, IommuProt, PhysAddr, PtConfig, PtFeatures, PtFormat, PtHooks, PtIommu,
};
use test_case::test_case;

use reference::{table_at, RO, RW};

const PROT_RW: IommuProt = IommuProt::READ.union(IommuProt::WRITE);

fn x86pae(vasz: u32) -> PtIommu<X86Pae> {
    PtIommu::new(&X86PaeConfig, &PtConfig::new(vasz, 52), PtHooks::default()).unwrap()
}

fn vtdss(force_snooping: bool) -> PtIommu<Vtdss> {
    PtIommu::new(&VtdssConfig { force_snooping }, &PtConfig::new(48, 52), PtHooks::default()).unwrap()
}

fn amdv1(starting_level: u32, features: PtFeatures) -> PtIommu<Amdv1> {
    let cfg = PtConfig::new(64, 52).with_features(features);
    PtIommu::new(&Amdv1Config { starting_level }, &cfg, PtHooks::default()).unwrap()
}

fn armv8(features: PtFeatures) -> PtIommu<Armv8> {
    let cfg = PtConfig::new(48, 48).with_features(features);
    PtIommu::new(&Armv8Config::default(), &cfg, PtHooks::default()).unwrap()
}

fn armv8_granule(granule: Armv8Granule, features: Armv8Features, oasz: u32) -> PtIommu<Armv8> {
    let fmt_cfg = Armv8Config { granule, features };
    PtIommu::new(&fmt_cfg, &PtConfig::new(48, oasz), PtHooks::default()).unwrap()
}

fn armv8_16k() -> PtIommu<Armv8> {
    armv8_granule(Armv8Granule::Size16K, Armv8Features::empty(), 48)
}

fn armv8_64k() -> PtIommu<Armv8> {
    armv8_granule(Armv8Granule::Size64K, Armv8Features::empty(), 48)
}

fn armv8_64k_lpa() -> PtIommu<Armv8> {
    armv8_granule(Armv8Granule::Size64K, Armv8Features::LPA, 52)
}

fn armv7s(features: PtFeatures) -> PtIommu<Armv7s> {
    let cfg = PtConfig::new(32, 32).with_features(features);
    PtIommu::new(&Armv7sConfig::default(), &cfg, PtHooks::default()).unwrap()
}

fn dart() -> PtIommu<Dart> {
    PtIommu::new(&DartConfig::default(), &PtConfig::new(32, 36), PtHooks::default()).unwrap()
}

/// Version 2: 16K pages, four TTBRs covering 38 bits of VA, 42-bit OA
fn dart_v2() -> PtIommu<Dart> {
    let fmt_cfg = DartConfig {
        features: DartFeatures::V2,
        pgsize_bitmap: 1 << 14,
    };
    PtIommu::new(&fmt_cfg, &PtConfig::new(38, 42), PtHooks::default()).unwrap()
}

fn map<F: PtFormat>(table: &PtIommu<F>, iova: u64, paddr: u64, len: u64, prot: IommuProt) {
    let mut mapped = 0;
    table.map_range(iova, paddr, len, prot, &mut mapped).unwrap();
    assert_eq!(mapped, len);
}

/// Map every advertised page size once and translate inside it
fn check_every_page_size<F: PtFormat>(table: PtIommu<F>, oasz_lg2: u32) {
    let info = table.get_info();
    let vasz_lg2 = 64 - (info.aperture_end - info.aperture_start).leading_zeros();
    let mut checked = 0;
    for lg2 in 0..64 {
        if info.pgsize_bitmap & (1 << lg2) == 0 || lg2 + 1 >= vasz_lg2.min(oasz_lg2) {
            continue;
        }
        let size = 1u64 << lg2;
        let iova = info.aperture_start + size;
        let paddr = size;
        map(&table, iova, paddr, size, PROT_RW);
        assert_eq!(table.stats().leaves.get(&lg2), Some(&1), "{} {:#x}", F::NAME, size);
        for k in [0, size / 2 + 0x123, size - 1] {
            assert_eq!(table.iova_to_phys(iova + k), Some(paddr + k), "{} {:#x}+{:#x}", F::NAME, size, k);
        }
        assert_eq!(table.unmap_range(iova, size), Ok(size));
        assert_eq!(table.iova_to_phys(iova), None);
        assert_eq!(table.stats().mapped_bytes, 0);
        checked += 1;
    }
    assert!(checked > 0, "{} advertised nothing mappable", F::NAME);
}

#[test]
fn test_every_page_size_translates() {
    check_every_page_size(x86pae(48), 52);
    check_every_page_size(vtdss(false), 52);
    check_every_page_size(amdv1(2, PtFeatures::empty()), 52);
    check_every_page_size(armv8(PtFeatures::empty()), 48);
    check_every_page_size(armv7s(PtFeatures::empty()), 32);
    check_every_page_size(dart(), 36);
}

#[test]
fn test_every_page_size_translates_large_granules() {
    check_every_page_size(armv8_16k(), 48);
    check_every_page_size(armv8_64k(), 48);
    check_every_page_size(armv8_64k_lpa(), 52);
    check_every_page_size(dart_v2(), 42);
}

fn concrete_scenario<F: PtFormat>(table: PtIommu<F>) {
    let mut mapped = 0;
    table.map_range(0, 0x1000, 4096, PROT_RW, &mut mapped).unwrap();
    assert_eq!(table.iova_to_phys(0), Some(0x1000));
    assert_eq!(table.unmap_range(0, 4096), Ok(4096));
    assert_eq!(table.iova_to_phys(0), None);
}

#[test]
fn test_concrete_scenario_48_bit() {
    concrete_scenario(PtIommu::<X86Pae>::new(&X86PaeConfig, &PtConfig::new(48, 48), PtHooks::default()).unwrap());
    concrete_scenario(
        PtIommu::<Vtdss>::new(&VtdssConfig::default(), &PtConfig::new(48, 48), PtHooks::default()).unwrap(),
    );
    concrete_scenario(
        PtIommu::<Amdv1>::new(&Amdv1Config { starting_level: 3 }, &PtConfig::new(48, 48), PtHooks::default())
            .unwrap(),
    );
    concrete_scenario(armv8(PtFeatures::empty()));
}

/// Map then unmap twice; the second round must leave the tree exactly as
/// the first round left it
fn round_trip<F: PtFormat>(table: PtIommu<F>, iova: u64, len: u64) {
    map(&table, iova, 0x1000, len, PROT_RW);
    assert_eq!(table.unmap_range(iova, len), Ok(len));
    table.arena().synchronize();
    let before = table.snapshot().unwrap();
    let live = table.arena().stats().live;

    map(&table, iova, 0x1000, len, PROT_RW);
    assert!(table.arena().stats().live > live);
    assert_ne!(table.snapshot().unwrap(), before);
    assert_eq!(table.unmap_range(iova, len), Ok(len));
    table.arena().synchronize();
    assert_eq!(table.snapshot().unwrap(), before, "{}", F::NAME);
    assert_eq!(table.arena().stats().live, live);
}

#[test]
fn test_round_trip_leaves_no_trace() {
    round_trip(x86pae(48), 0x4000_0000, 0x40_0000);
    round_trip(vtdss(false), 0x4000_0000, 0x40_0000);
    round_trip(amdv1(3, PtFeatures::empty()), 0x4000_0000, 0x40_0000);
    round_trip(armv8(PtFeatures::empty()), 0x4000_0000, 0x40_0000);
    round_trip(armv7s(PtFeatures::empty()), 0x4000_0000, 0x20_0000);
    round_trip(dart(), 0x4000_0000, 0x40_0000);
}

fn partial_unmap<F: PtFormat>(table: PtIommu<F>, lg2: u32) {
    let size = 1u64 << lg2;
    map(&table, size, 2 * size, size, PROT_RW);
    assert_eq!(table.stats().leaves.get(&lg2), Some(&1));
    assert_eq!(table.unmap_range(size, 0x1000), Ok(size));
    assert_eq!(table.iova_to_phys(2 * size - 0x1000), None);
    assert_eq!(table.stats().mapped_bytes, 0);
}

#[test_case(21 ; "2M")]
#[test_case(30 ; "1G")]
fn test_partial_unmap_x86pae(lg2: u32) {
    partial_unmap(x86pae(48), lg2);
}

#[test_case(21 ; "2M")]
#[test_case(30 ; "1G")]
fn test_partial_unmap_vtdss(lg2: u32) {
    partial_unmap(vtdss(true), lg2);
}

#[test_case(14 ; "16K run")]
#[test_case(21 ; "2M")]
#[test_case(25 ; "32M run")]
fn test_partial_unmap_amdv1(lg2: u32) {
    partial_unmap(amdv1(3, PtFeatures::empty()), lg2);
}

#[test_case(16 ; "64K contiguous")]
#[test_case(21 ; "2M block")]
#[test_case(25 ; "32M contiguous")]
fn test_partial_unmap_armv8(lg2: u32) {
    partial_unmap(armv8(PtFeatures::empty()), lg2);
}

#[test_case(21 ; "2M contiguous")]
#[test_case(25 ; "32M block")]
#[test_case(30 ; "1G contiguous")]
fn test_partial_unmap_armv8_16k(lg2: u32) {
    partial_unmap(armv8_16k(), lg2);
}

#[test_case(21 ; "2M contiguous")]
#[test_case(29 ; "512M block")]
#[test_case(34 ; "16G contiguous")]
fn test_partial_unmap_armv8_64k(lg2: u32) {
    partial_unmap(armv8_64k(), lg2);
}

#[test]
fn test_partial_unmap_armv8_64k_lpa_4t() {
    partial_unmap(armv8_64k_lpa(), 42);
}

#[test_case(16 ; "large page")]
#[test_case(20 ; "section")]
#[test_case(24 ; "supersection")]
fn test_partial_unmap_armv7s(lg2: u32) {
    partial_unmap(armv7s(PtFeatures::empty()), lg2);
}

/// Cut `size` bytes at `iova` at `cut` and unmap both sides separately
fn cut_then_split<F: PtFormat>(table: PtIommu<F>, iova: u64, size: u64, cut: u64) {
    let paddr = 2 * size;
    map(&table, iova, paddr, size, PROT_RW);
    let end = iova + size;
    assert_eq!(table.unmap_range(cut, end - cut), Err(Error::InvalidRange));

    table.cut_mapping(cut).unwrap();
    assert_eq!(table.iova_to_phys(cut - 1), Some(paddr + (cut - 1 - iova)));
    assert_eq!(table.iova_to_phys(cut), Some(paddr + (cut - iova)));
    assert_eq!(table.stats().mapped_bytes, size);

    assert_eq!(table.unmap_range(iova, cut - iova), Ok(cut - iova), "{}", F::NAME);
    assert_eq!(table.iova_to_phys(cut), Some(paddr + (cut - iova)));
    assert_eq!(table.unmap_range(cut, end - cut), Ok(end - cut), "{}", F::NAME);
    assert_eq!(table.stats().mapped_bytes, 0);
}

#[test]
fn test_cut_splits_leaves_hitlessly() {
    let xchg = PtFeatures::OA_TABLE_XCHG;
    let both = PtFeatures::OA_TABLE_XCHG | PtFeatures::OA_SIZE_CHANGE;

    let table = PtIommu::<X86Pae>::new(&X86PaeConfig, &PtConfig::new(48, 52).with_features(xchg), PtHooks::default())
        .unwrap();
    cut_then_split(table, 0x4000_0000, 0x4000_0000, 0x4123_4000);

    let table = PtIommu::<Vtdss>::new(
        &VtdssConfig::default(),
        &PtConfig::new(48, 52).with_features(xchg),
        PtHooks::default(),
    )
    .unwrap();
    cut_then_split(table, 0x20_0000, 0x20_0000, 0x20_5000);

    cut_then_split(amdv1(3, both), 0x20_0000, 0x20_0000, 0x20_5000);
    cut_then_split(amdv1(3, both), 0x1_0000, 0x1_0000, 0x1_c000);
    cut_then_split(armv8(both), 0x20_0000, 0x20_0000, 0x2f_f000);
    cut_then_split(armv8(both), 0x1_0000, 0x1_0000, 0x1_3000);
    cut_then_split(armv7s(both), 0x100_0000, 0x100_0000, 0x150_0000);
    cut_then_split(armv7s(both), 0x10_0000, 0x10_0000, 0x10_3000);
    cut_then_split(armv7s(both), 0x1_0000, 0x1_0000, 0x1_f000);
}

#[test]
fn test_cut_without_capability_is_unsupported() {
    assert_eq!(x86pae(48).cut_mapping(0), Err(Error::Unsupported));
    assert_eq!(dart().cut_mapping(0), Err(Error::Unsupported));
    assert_eq!(
        armv7s(PtFeatures::OA_TABLE_XCHG).cut_mapping(0),
        Err(Error::Unsupported)
    );
}

#[test]
fn test_x86pae_entries() {
    let table = x86pae(48);
    map(&table, 0x4020_3000, 0x1_2345_6000, 0x1000, PROT_RW);
    map(&table, 0x80_0000_0000, 0x40_0000_0000, 0x4000_0000, IommuProt::READ);

    let root = table.snapshot().unwrap();
    let l2 = table_at(&root, &[0]);
    let l1 = table_at(&root, &[0, 1]);
    let l0 = table_at(&root, &[0, 1, 1]);
    assert_eq!(root.entries[0], reference::x86pae::table(l2.pa));
    assert_eq!(l2.entries[1], reference::x86pae::table(l1.pa));
    assert_eq!(l1.entries[1], reference::x86pae::table(l0.pa));
    assert_eq!(l0.entries[3], reference::x86pae::leaf(0x1_2345_6000, 0, RW));
    assert_eq!(l0.entries.iter().filter(|&&e| e != 0).count(), 1);

    let huge = table_at(&root, &[1]);
    assert_eq!(huge.entries[0], reference::x86pae::leaf(0x40_0000_0000, 2, RO));
    assert_eq!(table.hw_info().levels, 4);
    assert_eq!(table.hw_info().root_pa, root.pa);
}

#[test]
fn test_vtdss_entries() {
    let table = vtdss(true);
    map(&table, 0x4020_3000, 0x1_2345_6000, 0x1000, IommuProt::WRITE);
    map(&table, 0x4040_0000, 0x20_0000, 0x20_0000, IommuProt::READ);

    let root = table.snapshot().unwrap();
    let l1 = table_at(&root, &[0, 1]);
    let l0 = table_at(&root, &[0, 1, 1]);
    assert_eq!(table_at(&root, &[0]).entries[1], reference::vtdss::table(l1.pa));
    assert_eq!(l1.entries[1], reference::vtdss::table(l0.pa));
    assert_eq!(l0.entries[3], reference::vtdss::leaf(0x1_2345_6000, 0, RW, true));
    assert_eq!(l1.entries[2], reference::vtdss::leaf(0x20_0000, 1, RO, true));
}

#[test]
fn test_amdv1_entries() {
    let table = amdv1(3, PtFeatures::empty());
    map(&table, 0x4020_3000, 0x1_2345_6000, 0x1000, PROT_RW);
    // 32K, one leaf written into eight slots
    map(&table, 0x4020_8000, 0x10_0000, 0x8000, IommuProt::READ);

    let root = table.snapshot().unwrap();
    let l2 = table_at(&root, &[0]);
    let l1 = table_at(&root, &[0, 1]);
    let l0 = table_at(&root, &[0, 1, 1]);
    assert_eq!(root.entries[0], reference::amdv1::table(l2.pa, 3));
    assert_eq!(l2.entries[1], reference::amdv1::table(l1.pa, 2));
    assert_eq!(l1.entries[1], reference::amdv1::table(l0.pa, 1));
    assert_eq!(l0.entries[3], reference::amdv1::leaf(0x1_2345_6000, 0, 12, RW));
    for i in 8..16 {
        assert_eq!(l0.entries[i], reference::amdv1::leaf(0x10_0000, 0, 15, RO), "slot {i}");
    }
    assert_eq!(l0.entries[16], 0);
    assert_eq!(table.hw_info().levels, 4);
}

#[test]
fn test_armv8_entries() {
    let table = armv8(PtFeatures::empty());
    map(&table, 0x4020_3000, 0x1_2345_6000, 0x1000, PROT_RW);
    map(&table, 0x4021_0000, 0x5_0000, 0x1_0000, IommuProt::READ);
    map(&table, 0x4040_0000, 0x20_0000, 0x20_0000, PROT_RW);

    let root = table.snapshot().unwrap();
    let l2 = table_at(&root, &[0]);
    let l1 = table_at(&root, &[0, 1]);
    let l0 = table_at(&root, &[0, 1, 1]);
    assert_eq!(root.entries[0], reference::armv8::table(l2.pa));
    assert_eq!(l2.entries[1], reference::armv8::table(l1.pa));
    assert_eq!(l1.entries[1], reference::armv8::table(l0.pa));
    assert_eq!(l0.entries[3], reference::armv8::leaf(0x1_2345_6000, 0, RW));
    for i in 0..16 {
        assert_eq!(
            l0.entries[16 + i as usize],
            reference::armv8::contig_leaf(0x5_0000, 0, RO, i),
            "slot {i}"
        );
    }
    assert_eq!(l1.entries[2], reference::armv8::leaf(0x20_0000, 1, RW));
}

#[test]
fn test_armv8_16k_entries() {
    let table = armv8_16k();
    map(&table, 0x4000_4000, 0x1_2345_4000, 0x4000, PROT_RW);
    // 128 contiguous 16K pages
    map(&table, 0x4020_0000, 0x80_0000, 0x20_0000, IommuProt::READ);
    map(&table, 0x4200_0000, 0x200_0000, 0x200_0000, PROT_RW);

    // Two entry root at level 3, 2048 entries below it
    let root = table.snapshot().unwrap();
    assert_eq!(root.entries.len(), 2);
    let l2 = table_at(&root, &[0]);
    let l1 = table_at(&root, &[0, 0]);
    let l0 = table_at(&root, &[0, 0, 0x20]);
    assert_eq!(l0.entries.len(), 2048);
    assert_eq!(root.entries[0], reference::armv8::table(l2.pa));
    assert_eq!(l2.entries[0], reference::armv8::table(l1.pa));
    assert_eq!(l1.entries[0x20], reference::armv8::table(l0.pa));
    assert_eq!(l0.entries[1], reference::armv8::leaf(0x1_2345_4000, 0, RW));
    for i in 0..128 {
        assert_eq!(
            l0.entries[128 + i as usize],
            reference::armv8::granule_contig_leaf(0x80_0000, 14, 0, RO, i),
            "slot {i}"
        );
    }
    assert_eq!(l0.entries[256], 0);
    assert_eq!(l1.entries[0x21], reference::armv8::leaf(0x200_0000, 1, RW));

    assert_eq!(table.iova_to_phys(0x4000_7fff), Some(0x1_2345_7fff));
    assert_eq!(table.iova_to_phys(0x4021_2345), Some(0x81_2345));
    assert_eq!(table.hw_info().levels, 4);
}

#[test]
fn test_armv8_64k_lpa_entries() {
    let table = armv8_64k_lpa();
    let page = 0x000a_bcde_f001_0000;
    let block = 0x000a_0000_2000_0000;
    map(&table, 0x4001_0000, page, 0x1_0000, PROT_RW);
    map(&table, 0x6000_0000, block, 0x2000_0000, IommuProt::READ);

    let root = table.snapshot().unwrap();
    assert_eq!(root.entries.len(), 64);
    let l1 = table_at(&root, &[0]);
    let l0 = table_at(&root, &[0, 2]);
    assert_eq!(root.entries[0], reference::armv8::table(l1.pa));
    assert_eq!(l1.entries[2], reference::armv8::table(l0.pa));
    assert_eq!(l0.entries[1], reference::armv8::leaf(reference::armv8::lpa_oa(page), 0, RW));
    assert_eq!(l1.entries[3], reference::armv8::leaf(reference::armv8::lpa_oa(block), 1, RO));

    assert_eq!(table.iova_to_phys(0x4001_1234), Some(page + 0x1234));
    assert_eq!(table.iova_to_phys(0x7fff_ffff), Some(block + 0x1fff_ffff));
    assert_eq!(table.unmap_range(0x4001_0000, 0x1_0000), Ok(0x1_0000));
    assert_eq!(table.iova_to_phys(0x4001_1234), None);
    assert_eq!(table.hw_info().levels, 3);
}

#[test]
fn test_armv8_64k_without_lpa_stops_at_48_bits() {
    let table = armv8_64k();
    let mut mapped = 0;
    assert_eq!(
        table.map_range(0x1_0000, 1 << 48, 0x1_0000, PROT_RW, &mut mapped),
        Err(Error::InvalidRange)
    );
    assert_eq!(mapped, 0);
    map(&table, 0x1_0000, (1 << 48) - 0x1_0000, 0x1_0000, PROT_RW);
    assert_eq!(table.iova_to_phys(0x1_ffff), Some((1 << 48) - 1));
}

#[test]
fn test_armv7s_entries() {
    let table = armv7s(PtFeatures::empty());
    map(&table, 0x0123_4000, 0x8765_4000, 0x1000, PROT_RW);
    map(&table, 0x0200_0000, 0x8010_0000, 0x10_0000, IommuProt::READ);

    let root = table.snapshot().unwrap();
    assert_eq!(root.entries.len(), 4096);
    let l0 = table_at(&root, &[0x12]);
    assert_eq!(l0.entries.len(), 256);
    assert_eq!(root.entries[0x12], reference::armv7s::table(l0.pa));
    assert_eq!(l0.entries[0x34], reference::armv7s::small_page(0x8765_4000, RW));
    assert_eq!(root.entries[0x20], reference::armv7s::section(0x8010_0000, RO));
}

#[test]
fn test_dart_entries() {
    let table = dart();
    map(&table, 0x4020_3000, 0x8_1234_5000, 0x1000, PROT_RW);
    map(&table, 0x4020_4000, 0x4000, 0x1000, IommuProt::READ);

    let root = table.snapshot().unwrap();
    // The root is the table of four TTBRs
    assert_eq!(root.entries.len(), 4);
    let l1 = table_at(&root, &[1]);
    let l0 = table_at(&root, &[1, 1]);
    assert_eq!(root.entries[1], reference::dart::table(l1.pa));
    assert_eq!(l1.entries[1], reference::dart::table(l0.pa));
    assert_eq!(l0.entries[3], reference::dart::leaf(0x8_1234_5000, RW));
    assert_eq!(l0.entries[4], reference::dart::leaf(0x4000, RO));
}

#[test]
fn test_dart_v2_entries() {
    let table = dart_v2();
    map(&table, 0x10_4020_4000, 0x312_3456_4000, 0x4000, PROT_RW);
    map(&table, 0x10_4020_8000, 0x8000, 0x4000, IommuProt::READ);

    let root = table.snapshot().unwrap();
    assert_eq!(root.entries.len(), 4);
    let l1 = table_at(&root, &[1]);
    let l0 = table_at(&root, &[1, 0x20]);
    assert_eq!(l0.entries.len(), 2048);
    assert_eq!(root.entries[1], reference::dart::v2_table(l1.pa));
    assert_eq!(l1.entries[0x20], reference::dart::v2_table(l0.pa));
    assert_eq!(l0.entries[0x81], reference::dart::v2_leaf(0x312_3456_4000, RW));
    assert_eq!(l0.entries[0x82], reference::dart::v2_leaf(0x8000, RO));

    assert_eq!(table.iova_to_phys(0x10_4020_7abc), Some(0x312_3456_7abc));
    assert_eq!(table.unmap_range(0x10_4020_4000, 0x8000), Ok(0x8000));
    assert_eq!(table.stats().mapped_bytes, 0);
}

#[derive(Default)]
struct Driver {
    lock: spin::Mutex<()>,
}

impl IommuDriverOps for Driver {
    fn top_lock(&self) -> &spin::Mutex<()> {
        &self.lock
    }

    fn change_top(&self, _top_pa: PhysAddr, _top_level: u32) {}
}

#[test]
fn test_root_grows_one_level_per_step() {
    let cfg = PtConfig::new(64, 52).with_features(PtFeatures::DYNAMIC_TOP);
    let hooks = PtHooks::default().with_driver(Arc::new(Driver::default()));
    let table = PtIommu::<Amdv1>::new(&Amdv1Config { starting_level: 1 }, &cfg, hooks).unwrap();
    map(&table, 0x3000, 0x9000, 0x1000, PROT_RW);
    map(&table, 0x20_0000, 0x40_0000, 0x20_0000, IommuProt::READ);

    let mut level = table.top_level();
    loop {
        let old_root = table.hw_info().root_pa;
        match table.increase_top() {
            Ok(new_level) => {
                assert_eq!(new_level, level + 1);
                level = new_level;
            }
            Err(err) => {
                assert_eq!(err, Error::InvalidRange);
                break;
            }
        }
        let root = table.snapshot().unwrap();
        assert_eq!(root.level, level);
        assert_eq!(root.entries[0], reference::amdv1::table(old_root, level));
        assert_eq!(table.iova_to_phys(0x3000), Some(0x9000));
        assert_eq!(table.iova_to_phys(0x2f_f000), Some(0x4f_f000));
    }
    assert_eq!(level, 5);
    assert_eq!(table.hw_info().levels, 6);
}
