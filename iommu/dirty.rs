//! Write-dirty tracking
//!
//! Formats that track hardware dirty state report it through
//! [`PtIommu::read_and_clear_dirty`]. Dirty leaves are reported whole: a
//! dirty 2M page marks all of its 2M even if the query only covered part
//! of it.

use bitflags::bitflags;

use crate::arch::PtFormat;
use crate::mm::IoVirtAddr;
use crate::pt::{EntryType, PtRange, PtState};
use crate::utils::bitmap::Bitmap;
use crate::utils::log2;
use crate::{Error, Result};

use super::PtIommu;

bitflags! {
    /// Options for [`PtIommu::read_and_clear_dirty`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u32 {
        /// Report dirty leaves without cleaning them
        const NO_CLEAR = 1 << 0;
    }
}

/// Sink for dirty ranges
pub trait DirtyRecorder {
    /// `len` bytes at `iova` were written since they were last cleaned
    fn record(&mut self, iova: IoVirtAddr, len: u64);
}

/// One bit per page of a fixed IOVA window
#[derive(Debug, Clone)]
pub struct IovaBitmap {
    base: IoVirtAddr,
    pgshift: u32,
    bits: Bitmap,
}

impl IovaBitmap {
    /// Track `len` bytes at `base` in pages of `2^pgshift` bytes
    pub fn new(base: IoVirtAddr, len: u64, pgshift: u32) -> Self {
        let pages = log2::div(len + log2::to_max_int(pgshift), pgshift);
        Self {
            base,
            pgshift,
            bits: Bitmap::new(pages as usize),
        }
    }

    /// True if the page holding `iova` was recorded
    pub fn is_dirty(&self, iova: IoVirtAddr) -> bool {
        match iova.checked_sub(self.base) {
            Some(offset) => self.bits.test(log2::div(offset, self.pgshift) as usize),
            None => false,
        }
    }

    /// Number of dirty pages
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// IOVAs of the dirty pages, ascending
    pub fn iter(&self) -> impl Iterator<Item = IoVirtAddr> + '_ {
        self.bits
            .iter_ones()
            .map(move |page| self.base + log2::mul(page as u64, self.pgshift))
    }

    pub fn clear(&mut self) {
        self.bits.clear_all();
    }
}

impl DirtyRecorder for IovaBitmap {
    fn record(&mut self, iova: IoVirtAddr, len: u64) {
        if len == 0 {
            return;
        }
        let last = iova.saturating_add(len - 1);
        let window_last = self.base + log2::mul(self.bits.len() as u64, self.pgshift).saturating_sub(1);
        if self.bits.is_empty() || last < self.base || iova > window_last {
            return;
        }
        let first = log2::div(iova.max(self.base) - self.base, self.pgshift);
        let last = log2::div(last.min(window_last) - self.base, self.pgshift);
        self.bits
            .set_range(first as usize, (last - first + 1) as usize);
    }
}

impl<F: PtFormat> PtIommu<F> {
    /// Report and clean every dirty leaf that intersects `len` bytes at `iova`
    ///
    /// Unmapped parts of the range are skipped. The IOTLB is not flushed;
    /// the caller does that before trusting the next read.
    pub fn read_and_clear_dirty(
        &self,
        iova: IoVirtAddr,
        len: u64,
        flags: DirtyFlags,
        dirty: &mut dyn DirtyRecorder,
    ) -> Result<()> {
        if !self.fmt.supports_dirty() {
            return Err(Error::Unsupported);
        }
        let range = PtRange::new(&self.fmt, &self.common, iova, len)?;
        self.with_ctx(|cx| {
            let mut st = PtState::top(cx, range)?;
            dirty_level(&mut st, flags, dirty)
        })
    }

    /// Mark the leaf translating `iova` dirty as if the device wrote it
    pub fn set_dirty(&self, iova: IoVirtAddr) -> Result<()> {
        if !self.fmt.supports_dirty() {
            return Err(Error::Unsupported);
        }
        let range = PtRange::new(&self.fmt, &self.common, iova, 1)?;
        self.with_ctx(|cx| {
            let fmt = cx.fmt;
            let mut st = PtState::top(cx, range)?;
            loop {
                match st.load() {
                    EntryType::Empty => return Err(Error::InconsistentState),
                    EntryType::Table => st = st.descend()?,
                    EntryType::Oa => {
                        if fmt.entry_make_write_dirty(&st.table, st.level, st.index, st.entry) {
                            st.flush(st.index, st.index + 1);
                            return Ok(());
                        }
                    }
                }
            }
        })
    }
}

fn dirty_level<F: PtFormat>(
    st: &mut PtState<'_, F>,
    flags: DirtyFlags,
    dirty: &mut dyn DirtyRecorder,
) -> Result<()> {
    let fmt = st.cx.fmt;
    let start_index = st.index;
    let mut cleaned = false;

    while st.valid() {
        match st.load() {
            EntryType::Empty => {}
            EntryType::Table => {
                let mut child = st.descend()?;
                dirty_level(&mut child, flags, dirty)?;
            }
            EntryType::Oa => {
                if fmt.entry_is_write_dirty(&st.table, st.level, st.index, st.entry) {
                    let lg2sz = st.entry_lg2sz();
                    dirty.record(log2::set_rem(st.range.va, 0, lg2sz), log2::to_int(lg2sz));
                    if !flags.contains(DirtyFlags::NO_CLEAR) {
                        fmt.entry_set_write_clean(&st.table, st.level, st.index, st.entry);
                        cleaned = true;
                    }
                }
            }
        }
        st.next();
    }

    if cleaned {
        st.flush(start_index, st.index.min(st.table.len() as u32));
    }
    Ok(())
}
