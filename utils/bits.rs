//! Register style bit-field helpers
//!
//! Entry layouts are described as masks built with [`genmask`]; values are
//! moved in and out of a field with [`field_get`] and [`field_prep`].

/// Mask with bits `low..=high` set
#[inline]
pub const fn genmask(high: u32, low: u32) -> u64 {
    (u64::MAX >> (63 - high)) & (u64::MAX << low)
}

/// Single bit mask
#[inline]
pub const fn bit(n: u32) -> u64 {
    1u64 << n
}

/// Extract the field selected by `mask` from `value`
#[inline]
pub const fn field_get(mask: u64, value: u64) -> u64 {
    (value & mask) >> mask.trailing_zeros()
}

/// Shift `value` into the field selected by `mask`, dropping bits that do not fit
#[inline]
pub const fn field_prep(mask: u64, value: u64) -> u64 {
    (value << mask.trailing_zeros()) & mask
}
