//! Removing translations

use crate::arch::PtFormat;
use crate::mm::{FreeList, IoVirtAddr};
use crate::pt::{EntryType, PtRange, PtState};
use crate::utils::log2;
use crate::{Error, Result};

use super::PtIommu;

struct UnmapArgs {
    unmapped: u64,
    free: FreeList,
}

impl<F: PtFormat> PtIommu<F> {
    /// Remove every translation in `len` bytes at `iova`
    ///
    /// Leaves are removed whole: a range ending inside a large page removes
    /// the entire page, and the returned byte count says so. A range may
    /// not start inside a leaf, and every item in it must be mapped. Both
    /// are checked before anything is cleared, so a rejected range leaves
    /// the table untouched. Tables whose whole span is unmapped are freed.
    pub fn unmap_range(&self, iova: IoVirtAddr, len: u64) -> Result<u64> {
        let range = PtRange::new(&self.fmt, &self.common, iova, len)?;
        let mut args = UnmapArgs {
            unmapped: 0,
            free: FreeList::new(),
        };
        let ret = self.with_ctx(|cx| {
            check_level(&mut PtState::top(cx, range)?)?;
            let mut st = PtState::top(cx, range)?;
            unmap_level(&mut st, &mut args)
        });
        if args.unmapped != 0 && args.free.is_empty() {
            self.flush_iotlb(iova, len.max(args.unmapped));
        }
        self.retire_tables(iova, len.max(args.unmapped), args.free);
        ret.map(|()| args.unmapped)
    }
}

/// Walk the range without writing and reject it the way `unmap_level` would
fn check_level<F: PtFormat>(st: &mut PtState<'_, F>) -> Result<()> {
    let start_index = st.index;
    while st.valid() {
        match st.load() {
            EntryType::Oa => {
                if st.index == start_index && log2::rem(st.range.va, st.entry_lg2sz()) != 0 {
                    log::warn!(
                        "{}: unmap at {:#x} starts inside a {:#x} byte page",
                        F::NAME,
                        st.range.va,
                        log2::to_int(st.entry_lg2sz())
                    );
                    return Err(Error::InvalidRange);
                }
            }
            EntryType::Table => check_level(&mut st.descend()?)?,
            EntryType::Empty => {
                log::warn!("{}: unmap of unmapped iova {:#x}", F::NAME, st.range.va);
                return Err(Error::InconsistentState);
            }
        }
        st.next();
    }
    Ok(())
}

fn unmap_level<F: PtFormat>(st: &mut PtState<'_, F>, args: &mut UnmapArgs) -> Result<()> {
    let fmt = st.cx.fmt;
    let start_index = st.index;
    let mut num_oas = 0u64;
    let mut ret = Ok(());

    while st.valid() {
        match st.load() {
            EntryType::Oa => {
                let inside = st.index == start_index && log2::rem(st.range.va, st.entry_lg2sz()) != 0;
                if pt_warn_on!(inside) {
                    ret = Err(Error::InvalidRange);
                    break;
                }
                let num_contig_lg2 = st.num_contig_lg2();
                fmt.clear_entries(&st.table, st.entry_start_index(), num_contig_lg2);
                num_oas += log2::to_int(num_contig_lg2);
            }
            EntryType::Table => {
                let fully_covered = st.fully_covered(st.isz());
                let mut child = match st.descend() {
                    Ok(child) => child,
                    Err(err) => {
                        ret = Err(err);
                        break;
                    }
                };
                if let Err(err) = unmap_level(&mut child, args) {
                    ret = Err(err);
                    break;
                }
                // The child is empty now; unlink it only after its leaves are gone.
                if fully_covered {
                    args.free.push(st.cx.arena, child.table.node());
                    fmt.clear_entries(&st.table, st.index, 0);
                }
            }
            EntryType::Empty => {
                // Changed under us since the check.
                pt_warn_on!(true);
                ret = Err(Error::InconsistentState);
                break;
            }
        }
        st.next();
    }

    args.unmapped += log2::mul(num_oas, st.isz());
    st.flush(start_index, st.index.min(st.table.len() as u32));
    ret
}
