//! Lookups

use crate::arch::PtFormat;
use crate::mm::{IoVirtAddr, PhysAddr};
use crate::pt::{EntryType, PtRange, PtState};
use crate::utils::log2;

use super::PtIommu;

impl<F: PtFormat> PtIommu<F> {
    /// Output address `iova` translates to, `None` if nothing maps it
    pub fn iova_to_phys(&self, iova: IoVirtAddr) -> Option<PhysAddr> {
        let range = PtRange::new(&self.fmt, &self.common, iova, 1).ok()?;
        self.with_ctx(|cx| {
            let mut st = PtState::top(cx, range).ok()?;
            loop {
                match st.load() {
                    EntryType::Empty => return None,
                    EntryType::Table => st = st.descend().ok()?,
                    EntryType::Oa => return Some(st.item_oa() | log2::rem(iova, st.isz())),
                }
            }
        })
    }
}
