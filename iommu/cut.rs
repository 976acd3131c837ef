//! Hitless splitting of large translations
//!
//! `cut_mapping` makes sure a leaf boundary exists at an IOVA without the
//! translation around it ever becoming non-present, so the two sides can
//! later be unmapped independently. Contiguous runs are re-expressed as
//! smaller leaves in place; a single item straddling the IOVA is exchanged
//! for a table of leaves with the same translation and attributes.

use crate::arch::PtFormat;
use crate::config::PtFeatures;
use crate::mm::{IoVirtAddr, PhysAddr};
use crate::pt::{compute_best_pgsize, EntryType, PtRange, PtState};
use crate::utils::log2;
use crate::{Error, Result};

use super::map::flush_if_still_flushing;
use super::PtIommu;

impl<F: PtFormat> PtIommu<F> {
    /// Split whatever leaf covers `iova` so a leaf starts exactly at `iova`
    ///
    /// Needs [`PtFeatures::OA_TABLE_XCHG`], and [`PtFeatures::OA_SIZE_CHANGE`]
    /// as well when the format has multi-item leaves. Cutting an unmapped
    /// IOVA or one that already starts a leaf does nothing.
    pub fn cut_mapping(&self, iova: IoVirtAddr) -> Result<()> {
        if !self.common.has(PtFeatures::OA_TABLE_XCHG)
            || (self.has_contig_leaves() && !self.common.has(PtFeatures::OA_SIZE_CHANGE))
        {
            return Err(Error::Unsupported);
        }
        if log2::rem(iova, log2::ffs(self.pgsize_bitmap)) != 0 {
            return Err(Error::InvalidRange);
        }
        let range = PtRange::new(&self.fmt, &self.common, iova, 1)?;
        self.with_ctx(|cx| {
            let mut st = PtState::top(cx, range)?;
            cut_level(&mut st)
        })
    }

    fn has_contig_leaves(&self) -> bool {
        (0..=self.fmt.max_top_level()).any(|level| {
            let single = log2::to_int(self.fmt.item_lg2sz(level));
            self.fmt.possible_sizes(level) & !single != 0
        })
    }
}

fn cut_level<F: PtFormat>(st: &mut PtState<'_, F>) -> Result<()> {
    let va = st.range.va;
    loop {
        match st.load() {
            EntryType::Empty => return Ok(()),
            EntryType::Table => {
                let mut child = st.descend()?;
                let ret = cut_level(&mut child);
                flush_if_still_flushing(st, &child);
                return ret;
            }
            EntryType::Oa => {
                if log2::rem(va, st.entry_lg2sz()) == 0 {
                    return Ok(());
                }
                if st.num_contig_lg2() != 0 {
                    split_contig(st);
                    continue;
                }
                if pt_warn_on!(st.level == 0) {
                    return Err(Error::InvalidRange);
                }
                match leaf_to_table(st) {
                    // Either way the item changed; look again.
                    Ok(()) | Err(Error::TryAgain) => continue,
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

/// Rewrite the contiguous run under the cursor as smaller leaves with a
/// boundary at the start of the item holding the cursor VA
fn split_contig<F: PtFormat>(st: &PtState<'_, F>) {
    let fmt = st.cx.fmt;
    let isz = st.isz();
    let run_lg2 = st.entry_lg2sz();
    let run_index = st.entry_start_index();
    let run_va = log2::set_rem(st.range.va, 0, run_lg2);
    let run_oa = st.entry_oa();
    let run_last = log2::set_rem_max(st.range.va, run_lg2);
    let cut_va = log2::set_rem(st.range.va, 0, isz);
    let attrs = fmt.attr_from_entry(st.level, st.entry);
    let was_dirty = fmt.supports_dirty() && fmt.entry_is_write_dirty(&st.table, st.level, st.index, st.entry);
    let sizes = fmt.possible_sizes(st.level) & !log2::to_int(run_lg2);

    let mut pieces = [(run_va, cut_va.wrapping_sub(1)), (cut_va, run_last)];
    if cut_va == run_va {
        pieces[0] = (1, 0);
    }
    for (first, last) in pieces {
        let mut va = first;
        while va <= last && va >= first {
            let oa: PhysAddr = run_oa + (va - run_va);
            let Some(lg2) = compute_best_pgsize(sizes, va, last, oa) else {
                pt_warn_on!(true);
                return;
            };
            let index = run_index + log2::div(va - run_va, isz) as u32;
            let entry = fmt.install_leaf(&st.table, st.level, index, oa, lg2, &attrs);
            if was_dirty {
                fmt.entry_make_write_dirty(&st.table, st.level, index, entry);
            }
            va = va.wrapping_add(log2::to_int(lg2));
        }
    }
    st.flush(run_index, run_index + (1u32 << (run_lg2 - isz)));
    log::debug!(
        "{}: split {:#x} byte run at {:#x} at {:#x}",
        F::NAME,
        log2::to_int(run_lg2),
        run_va,
        cut_va
    );
}

/// Exchange the single item leaf under the cursor for a table of leaves
/// translating the same way
fn leaf_to_table<F: PtFormat>(st: &PtState<'_, F>) -> Result<()> {
    let cx = st.cx;
    let fmt = cx.fmt;
    let level = st.level - 1;
    let attrs = fmt.attr_from_entry(st.level, st.entry);
    let was_dirty = fmt.supports_dirty() && fmt.entry_is_write_dirty(&st.table, st.level, st.index, st.entry);
    let item_oa = st.item_oa();

    let node = cx.arena.alloc(cx.table_lg2sz(level), level)?;
    let Some(child) = cx.arena.table(node, cx.guard) else {
        pt_warn_on!(true);
        return Err(Error::InconsistentState);
    };
    let child_isz = fmt.item_lg2sz(level);
    for index in 0..(1u32 << fmt.num_items_lg2(level)) {
        let oa = item_oa + log2::mul(index as u64, child_isz);
        let entry = fmt.install_leaf(&child, level, index, oa, child_isz, &attrs);
        if was_dirty {
            fmt.entry_make_write_dirty(&child, level, index, entry);
        }
    }

    if cx.common.has(PtFeatures::DMA_INCOHERENT) {
        if let Err(err) = cx.arena.start_incoherent(&child, true) {
            // SAFETY: never linked.
            unsafe { cx.arena.release(node) };
            return Err(err);
        }
    }
    if !fmt.install_table(&st.table, st.level, st.index, child.pa(), st.entry) {
        // SAFETY: the exchange lost, nothing links the node.
        unsafe { cx.arena.release(node) };
        return Err(Error::TryAgain);
    }
    st.flush(st.index, st.index + 1);
    if cx.common.has(PtFeatures::DMA_INCOHERENT) {
        cx.arena.done_incoherent_flush(node);
    }
    log::debug!(
        "{}: {:#x} byte leaf at {:#x} now a level {} table",
        F::NAME,
        log2::to_int(st.isz()),
        log2::set_rem(st.range.va, 0, st.isz()),
        level
    );
    Ok(())
}
