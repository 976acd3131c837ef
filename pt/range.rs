//! Range descriptors
//!
//! A walk starts from a [`PtRange`]: the inclusive VA span being operated
//! on plus the root captured from the packed root descriptor when the range
//! was built. Later root growth never changes a range already in flight;
//! the old root stays linked below the new one.

use crate::arch::PtFormat;
use crate::config::PtFeatures;
use crate::mm::{Guard, NodeArena, PhysAddr, TableRef};
use crate::utils::log2;
use crate::{Error, Result};

use super::common::PtCommon;

/// Everything a walker borrows for the duration of one pinned walk
pub struct PtCtx<'g, F: PtFormat> {
    pub fmt: &'g F,
    pub common: &'g PtCommon,
    pub arena: &'g NodeArena<F::Word>,
    pub guard: &'g Guard<'g>,
}

impl<F: PtFormat> Clone for PtCtx<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: PtFormat> Copy for PtCtx<'_, F> {}

impl<'g, F: PtFormat> PtCtx<'g, F> {
    /// log2 of the VA span of a whole table at `level`, capped by the table VA width
    pub fn table_span_lg2(&self, level: u32) -> u32 {
        let span = self.fmt.num_items_lg2(level) + self.fmt.item_lg2sz(level);
        span.min(self.common.max_vasz_lg2())
    }

    /// log2 of the bytes of a root table at `level`
    pub fn top_table_lg2sz(&self, level: u32) -> u32 {
        top_table_lg2sz(self.fmt, self.common, level)
    }

    /// log2 of the bytes of an interior table at `level`
    pub fn table_lg2sz(&self, level: u32) -> u32 {
        self.fmt.num_items_lg2(level) + <F::Word as crate::pt::entry::PtWord>::SIZE_LG2
    }

    /// Resolve a table PA to the live node, warning if nothing lives there
    pub fn table(&self, pa: PhysAddr) -> Result<TableRef<'g, F::Word>> {
        match self.arena.table_at(pa, self.guard) {
            Some(table) => Ok(table),
            None => {
                pt_warn_on!(true);
                log::warn!("{}: no table node at {:#x}", F::NAME, pa);
                Err(Error::InconsistentState)
            }
        }
    }

    /// True if the table's writes must be pushed to the device
    pub fn incoherent(&self) -> bool {
        self.common.has(PtFeatures::DMA_INCOHERENT)
    }
}

/// Table bytes of a root at `level`
///
/// A growable root is sized like any interior table so it can later be
/// linked below a new root unchanged.
pub fn top_table_lg2sz<F: PtFormat>(fmt: &F, common: &PtCommon, level: u32) -> u32 {
    let mut num_items_lg2 = common.max_vasz_lg2().saturating_sub(fmt.item_lg2sz(level));
    if level != fmt.max_top_level() && common.has(PtFeatures::DYNAMIC_TOP) {
        num_items_lg2 = num_items_lg2.min(fmt.num_items_lg2(level));
    }
    num_items_lg2 + <F::Word as crate::pt::entry::PtWord>::SIZE_LG2
}

/// Inclusive VA span of a walk and the root it starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtRange {
    /// Walk cursor, starts at the first VA of the request
    pub va: u64,
    /// Last VA of the request, inclusive
    pub last_va: u64,
    /// Root table captured for this walk
    pub top_pa: PhysAddr,
    /// Level of the captured root
    pub top_level: u32,
    /// VA width the captured root can translate
    pub max_vasz_lg2: u32,
}

impl PtRange {
    /// The whole span of the root described by the packed descriptor `top`
    pub fn from_top<F: PtFormat>(fmt: &F, common: &PtCommon, top: u64) -> Self {
        let (top_pa, top_level) = PtCommon::unpack(top);
        let span = fmt.num_items_lg2(top_level) + fmt.item_lg2sz(top_level);
        let max_vasz_lg2 = span.min(common.max_vasz_lg2());
        let prefix = fmt.full_va_prefix();
        Self {
            va: log2::set_rem(prefix, 0, max_vasz_lg2),
            last_va: log2::set_rem_max(prefix, max_vasz_lg2),
            top_pa,
            top_level,
            max_vasz_lg2,
        }
    }

    /// `va..=last_va` against the root described by `top`, unchecked
    pub fn with_top<F: PtFormat>(fmt: &F, common: &PtCommon, top: u64, va: u64, last_va: u64) -> Self {
        Self {
            va,
            last_va,
            ..Self::from_top(fmt, common, top)
        }
    }

    /// `len` bytes at `iova` against the current root
    pub fn new<F: PtFormat>(fmt: &F, common: &PtCommon, iova: u64, len: u64) -> Result<Self> {
        let last_va = last_of(iova, len)?;
        let range = Self::with_top(fmt, common, common.top(), iova, last_va);
        range.check(fmt)?;
        Ok(range)
    }

    /// Both ends must carry the format's fixed high bits above the root span
    pub fn check<F: PtFormat>(&self, fmt: &F) -> Result<()> {
        check_span(fmt, self.va, self.last_va, self.max_vasz_lg2)
    }
}

/// Last byte of `len` bytes at `iova`
pub fn last_of(iova: u64, len: u64) -> Result<u64> {
    if len == 0 {
        return Err(Error::InvalidRange);
    }
    iova.checked_add(len - 1).ok_or(Error::InvalidRange)
}

/// True if `va..=last_va` fits in a `2^vasz_lg2` span carrying the format's prefix
pub fn check_span<F: PtFormat>(fmt: &F, va: u64, last_va: u64, vasz_lg2: u32) -> Result<()> {
    let prefix = fmt.full_va_prefix();
    if !log2::div_eq(va, prefix, vasz_lg2) || !log2::div_eq(last_va, prefix, vasz_lg2) {
        return Err(Error::InvalidRange);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::armv7s::{Armv7s, Armv7sConfig, Armv7sFeatures};
    use crate::arch::x86pae::{X86Pae, X86PaeConfig};
    use crate::arch::PtGeometry;

    fn x86(vasz: u32) -> (X86Pae, PtCommon) {
        let mut geo = PtGeometry {
            features: PtFeatures::empty(),
            max_vasz_lg2: vasz,
            max_oasz_lg2: 52,
            top_level: 0,
        };
        let fmt = X86Pae::init(&X86PaeConfig, &mut geo).unwrap();
        let common = PtCommon::new(&geo);
        common.set_top(0x4000_0000, geo.top_level);
        (fmt, common)
    }

    #[test]
    fn test_top_range_spans_root() {
        let (fmt, common) = x86(48);
        let range = PtRange::from_top(&fmt, &common, common.top());
        assert_eq!(range.va, 0);
        assert_eq!(range.last_va, (1 << 48) - 1);
        assert_eq!(range.top_level, 3);
        assert_eq!(range.max_vasz_lg2, 48);
    }

    #[test]
    fn test_range_bounds() {
        let (fmt, common) = x86(39);
        assert!(PtRange::new(&fmt, &common, 0, 0x1000).is_ok());
        assert_eq!(
            PtRange::new(&fmt, &common, 0, 0).map(|_| ()),
            Err(Error::InvalidRange)
        );
        assert_eq!(
            PtRange::new(&fmt, &common, u64::MAX, 2).map(|_| ()),
            Err(Error::InvalidRange)
        );
        assert_eq!(
            PtRange::new(&fmt, &common, (1 << 39) - 0x1000, 0x2000).map(|_| ()),
            Err(Error::InvalidRange)
        );
    }

    #[test]
    fn test_upper_half_prefix() {
        let mut geo = PtGeometry {
            features: PtFeatures::empty(),
            max_vasz_lg2: 32,
            max_oasz_lg2: 40,
            top_level: 0,
        };
        let cfg = Armv7sConfig {
            features: Armv7sFeatures::TTBR1,
        };
        let fmt = Armv7s::init(&cfg, &mut geo).unwrap();
        let common = PtCommon::new(&geo);
        common.set_top(0x4000_0000, geo.top_level);
        assert!(PtRange::new(&fmt, &common, 0x8000_0000, 0x1000).is_ok());
        assert_eq!(
            PtRange::new(&fmt, &common, 0x1_0000_0000, 0x1000).map(|_| ()),
            Err(Error::InvalidRange)
        );
    }
}
