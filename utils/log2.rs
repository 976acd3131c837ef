//! Power-of-two arithmetic
//!
//! Sizes and alignments in the page table code are carried as their log2.
//! Every helper accepts `lg2 == 64` so that a table spanning the full
//! 64-bit VA space never needs a special case at the call site.

use static_assertions::const_assert_eq;

/// Width of the words these helpers operate on
pub const WORD_BITS: u32 = u64::BITS;

/// `2^lg2`, `lg2` must be below 64
#[inline]
pub const fn to_int(lg2: u32) -> u64 {
    1u64 << lg2
}

/// `2^lg2 - 1`, saturating to all ones at 64
#[inline]
pub const fn to_max_int(lg2: u32) -> u64 {
    if lg2 >= WORD_BITS {
        u64::MAX
    } else {
        (1u64 << lg2) - 1
    }
}

/// `a / 2^lg2`
#[inline]
pub const fn div(a: u64, lg2: u32) -> u64 {
    if lg2 >= WORD_BITS {
        0
    } else {
        a >> lg2
    }
}

/// `a / 2^lg2 == b / 2^lg2`
#[inline]
pub const fn div_eq(a: u64, b: u64, lg2: u32) -> bool {
    div(a ^ b, lg2) == 0
}

/// `a * 2^lg2`
#[inline]
pub const fn mul(a: u64, lg2: u32) -> u64 {
    if lg2 >= WORD_BITS {
        0
    } else {
        a << lg2
    }
}

/// `a % 2^lg2`
#[inline]
pub const fn rem(a: u64, lg2: u32) -> u64 {
    a & to_max_int(lg2)
}

/// `a % 2^lg2 == 2^lg2 - 1`
#[inline]
pub const fn rem_eq_max(a: u64, lg2: u32) -> bool {
    rem(a, lg2) == to_max_int(lg2)
}

/// Replace the low `lg2` bits of `a` with `val`
#[inline]
pub const fn set_rem(a: u64, val: u64, lg2: u32) -> u64 {
    (a & !to_max_int(lg2)) | val
}

/// Set the low `lg2` bits of `a`
#[inline]
pub const fn set_rem_max(a: u64, lg2: u32) -> u64 {
    a | to_max_int(lg2)
}

/// One based index of the most significant set bit, 0 for 0
#[inline]
pub const fn fls(a: u64) -> u32 {
    WORD_BITS - a.leading_zeros()
}

/// Zero based index of the least significant set bit, 64 for 0
#[inline]
pub const fn ffs(a: u64) -> u32 {
    a.trailing_zeros()
}

/// Zero based index of the least significant clear bit, 64 for all ones
#[inline]
pub const fn ffz(a: u64) -> u32 {
    (!a).trailing_zeros()
}

const_assert_eq!(to_max_int(64), u64::MAX);
const_assert_eq!(to_max_int(12), 0xfff);
const_assert_eq!(div(u64::MAX, 64), 0);
const_assert_eq!(set_rem(0xffff_f000, 0x123, 12), 0xffff_f123);
const_assert_eq!(fls(0x1000), 13);
const_assert_eq!(ffs(0x1000), 12);
const_assert_eq!(ffz(0xff), 8);
