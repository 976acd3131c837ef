//! Page size selection

use crate::utils::log2;

/// Largest page size in `pgsz_bitmap` that can map `va..=last_va` at `oa`
///
/// The page must start at both `va` and `oa`, and must not extend past
/// `last_va`. Returns the page size as log2, or `None` when no size in the
/// bitmap fits.
pub fn compute_best_pgsize(pgsz_bitmap: u64, va: u64, last_va: u64, oa: u64) -> Option<u32> {
    if pt_warn_on!(va >= last_va) {
        return None;
    }
    let len = last_va.wrapping_sub(va).wrapping_add(1);

    // Alignment of both starts bounds the page from above.
    let mut mask = va | oa;
    // So does the largest power of two that fits in the length. A zero
    // length is the whole 64-bit space and imposes no bound.
    if len != 0 {
        mask |= log2::to_int(log2::fls(len) - 1);
    }
    let best_lg2 = log2::ffs(mask);

    let candidates = if best_lg2 < log2::WORD_BITS - 1 {
        log2::rem(pgsz_bitmap, best_lg2 + 1)
    } else {
        pgsz_bitmap
    };
    let fls = log2::fls(candidates);
    if fls == 0 {
        return None;
    }
    let pgsz_lg2 = fls - 1;
    pt_warn_on!(log2::rem(va, pgsz_lg2) != 0 || log2::rem(oa, pgsz_lg2) != 0);
    Some(pgsz_lg2)
}
