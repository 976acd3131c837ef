//! Installing translations

use crate::arch::PtFormat;
use crate::config::PtFeatures;
use crate::mm::{FreeList, IoVirtAddr, PhysAddr};
use crate::pt::range::last_of;
use crate::pt::{compute_best_pgsize, EntryType, PtState};
use crate::utils::log2;
use crate::{Error, Result};

use super::collect::collect_tables;
use super::{IommuProt, PtIommu};

struct MapArgs<A> {
    oa: PhysAddr,
    attrs: A,
    pgsize_bitmap: u64,
    /// Empty subtrees displaced by large leaves
    free: FreeList,
    mapped: u64,
}

impl<F: PtFormat> PtIommu<F> {
    /// Map `len` bytes at `iova` to `paddr`
    ///
    /// `iova`, `paddr` and `len` must be multiples of the smallest page
    /// size. Each step installs the largest page the alignment of both
    /// addresses and the remaining length allow. Existing translations are
    /// never replaced, and a large page only replaces empty tables when
    /// `OA_TABLE_XCHG` is set. `mapped` grows by every byte installed, including on
    /// failure, so the caller can unmap the prefix that did go in.
    pub fn map_range(
        &self,
        iova: IoVirtAddr,
        paddr: PhysAddr,
        len: u64,
        prot: IommuProt,
        mapped: &mut u64,
    ) -> Result<()> {
        let attrs = self.fmt.set_prot(prot)?;
        let min_lg2 = log2::ffs(self.pgsize_bitmap);
        if log2::rem(iova | paddr | len, min_lg2) != 0 {
            log::debug!(
                "{}: map {:#x}+{:#x} -> {:#x} not aligned to {:#x}",
                F::NAME,
                iova,
                len,
                paddr,
                log2::to_int(min_lg2)
            );
            return Err(Error::InvalidRange);
        }
        let last_va = last_of(iova, len)?;
        let last_oa = last_of(paddr, len)?;
        if log2::div(last_oa, self.common.max_oasz_lg2()) != 0 {
            return Err(Error::InvalidRange);
        }

        let range = self.map_range_top(iova, last_va)?;
        let mut args = MapArgs {
            oa: paddr,
            attrs,
            pgsize_bitmap: self.pgsize_bitmap,
            free: FreeList::new(),
            mapped: 0,
        };
        let ret = self.with_ctx(|cx| {
            let mut st = PtState::top(cx, range)?;
            map_level(&mut st, &mut args)
        });
        *mapped += args.mapped;
        self.retire_tables(iova, len, args.free);
        if let Err(err) = ret {
            log::debug!(
                "{}: map {:#x}+{:#x} failed after {:#x} bytes: {}",
                F::NAME,
                iova,
                len,
                args.mapped,
                err
            );
        }
        ret
    }
}

fn map_level<F: PtFormat>(st: &mut PtState<'_, F>, args: &mut MapArgs<F::Attrs>) -> Result<()> {
    let fmt = st.cx.fmt;
    while st.valid() {
        let ty = st.load();
        let sizes = fmt.possible_sizes(st.level) & args.pgsize_bitmap;
        let leaf = match sizes {
            0 => None,
            _ => compute_best_pgsize(sizes, st.range.va, st.range.last_va, args.oa),
        };
        if let Some(oasz_lg2) = leaf {
            install_leaf(st, args, oasz_lg2)?;
            continue;
        }

        match ty {
            EntryType::Oa => return Err(Error::AddressInUse),
            EntryType::Empty => {
                if pt_warn_on!(st.level == 0) {
                    return Err(Error::InvalidRange);
                }
                match new_table(st) {
                    // Reload; the item is a table now, ours or a racing one's.
                    Ok(()) | Err(Error::TryAgain) => continue,
                    Err(err) => return Err(err),
                }
            }
            EntryType::Table => {
                let mut child = st.descend()?;
                let ret = map_level(&mut child, args);
                flush_if_still_flushing(st, &child);
                ret?;
            }
        }
        st.next();
    }
    Ok(())
}

/// Install a leaf of `2^oasz_lg2` bytes at the cursor
///
/// Tables under the new leaf are only displaced with `OA_TABLE_XCHG`.
fn install_leaf<F: PtFormat>(
    st: &mut PtState<'_, F>,
    args: &mut MapArgs<F::Attrs>,
    oasz_lg2: u32,
) -> Result<()> {
    let cx = st.cx;
    let num_contig_lg2 = oasz_lg2 - st.isz();
    let start = st.index;
    let end = start + (1u32 << num_contig_lg2);

    // Check every item first; nothing is written unless the whole run is free.
    let mut displaced = FreeList::new();
    for index in start..end {
        let entry = st.table.load(index);
        match cx.fmt.entry_type(st.level, entry) {
            EntryType::Empty => {}
            EntryType::Oa => return Err(Error::AddressInUse),
            EntryType::Table => {
                if !cx.common.has(PtFeatures::OA_TABLE_XCHG) {
                    return Err(Error::AddressInUse);
                }
                let mut child = st.child_at(index, entry)?;
                displaced.push(cx.arena, child.table.node());
                collect_tables(&mut child, &mut displaced, false)?;
            }
        }
    }

    cx.fmt
        .install_leaf(&st.table, st.level, start, args.oa, oasz_lg2, &args.attrs);
    st.flush(start, end);
    if !displaced.is_empty() {
        log::debug!(
            "{}: {:#x} byte leaf at {:#x} displaced {} empty tables",
            F::NAME,
            log2::to_int(oasz_lg2),
            st.range.va,
            displaced.len()
        );
        args.free.append(cx.arena, &mut displaced);
    }

    let size = log2::to_int(oasz_lg2);
    args.oa += size;
    args.mapped += size;
    st.advance(num_contig_lg2);
    Ok(())
}

/// Link a fresh child table at the cursor
///
/// The child is registered and flushed before it is published, and the
/// parent entry is flushed before `still_flushing` is cleared. Losing the
/// install race frees the child and reports `TryAgain`.
pub(super) fn new_table<F: PtFormat>(st: &PtState<'_, F>) -> Result<()> {
    let cx = st.cx;
    let level = st.level - 1;
    let node = cx.arena.alloc(cx.table_lg2sz(level), level)?;
    let Some(child) = cx.arena.table(node, cx.guard) else {
        pt_warn_on!(true);
        return Err(Error::InconsistentState);
    };

    if cx.common.has(PtFeatures::DMA_INCOHERENT) {
        if let Err(err) = cx.arena.start_incoherent(&child, true) {
            // SAFETY: never linked.
            unsafe { cx.arena.release(node) };
            return Err(err);
        }
    }
    if !cx
        .fmt
        .install_table(&st.table, st.level, st.index, child.pa(), st.entry)
    {
        // SAFETY: the install lost, nothing links the node.
        unsafe { cx.arena.release(node) };
        return Err(Error::TryAgain);
    }
    st.flush(st.index, st.index + 1);
    if cx.common.has(PtFeatures::DMA_INCOHERENT) {
        cx.arena.done_incoherent_flush(node);
    }

    #[cfg(feature = "debug")]
    {
        let linked = cx.fmt.table_pa(st.level, st.table.load(st.index));
        pt_warn_on!(linked != child.pa());
    }
    log::debug!(
        "{}: level {} table at {:#x} for iova {:#x}",
        F::NAME,
        level,
        child.pa(),
        st.range.va
    );
    Ok(())
}

/// Re-flush the parent entry of a child whose link may not be visible yet
pub(super) fn flush_if_still_flushing<F: PtFormat>(parent: &PtState<'_, F>, child: &PtState<'_, F>) {
    if parent.cx.common.has(PtFeatures::DMA_INCOHERENT)
        && parent.cx.arena.still_flushing(child.table.node())
    {
        parent.flush(parent.index, parent.index + 1);
    }
}
