//! Tree introspection for tests and debugging

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::arch::PtFormat;
use crate::mm::PhysAddr;
use crate::pt::{EntryType, PtRange, PtState};
use crate::utils::log2;
use crate::Result;

use super::PtIommu;

/// Raw image of one table and everything below it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub level: u32,
    pub pa: PhysAddr,
    /// Every entry as stored, widened to 64 bits
    pub entries: Vec<u64>,
    /// Decoded kind of each entry
    pub types: Vec<EntryType>,
    /// Child tables keyed by the index of the entry pointing at them
    pub children: Vec<(u32, TableSnapshot)>,
}

impl TableSnapshot {
    /// Child linked from entry `index`
    pub fn child(&self, index: u32) -> Option<&TableSnapshot> {
        self.children
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, child)| child)
    }
}

/// Shape of the tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtStats {
    /// Table nodes reachable from the root, the root included
    pub tables: u64,
    /// Leaf count per leaf size; a contiguous run counts once
    pub leaves: BTreeMap<u32, u64>,
    pub mapped_bytes: u64,
}

impl<F: PtFormat> PtIommu<F> {
    /// Copy out the whole tree
    pub fn snapshot(&self) -> Result<TableSnapshot> {
        self.with_ctx(|cx| {
            let range = PtRange::from_top(cx.fmt, cx.common, cx.common.top());
            let mut st = PtState::top(cx, range)?;
            snapshot_level(&mut st)
        })
    }

    /// Count tables and leaves
    pub fn stats(&self) -> PtStats {
        let mut stats = PtStats::default();
        let ret = self.with_ctx(|cx| {
            let range = PtRange::from_top(cx.fmt, cx.common, cx.common.top());
            let mut st = PtState::top(cx, range)?;
            stats.tables += 1;
            stats_level(&mut st, &mut stats)
        });
        pt_warn_on!(ret.is_err());
        stats
    }
}

fn snapshot_level<F: PtFormat>(st: &mut PtState<'_, F>) -> Result<TableSnapshot> {
    let entries: Vec<u64> = (0..st.table.len() as u32).map(|i| st.table.load(i)).collect();
    let types = entries
        .iter()
        .map(|&entry| st.cx.fmt.entry_type(st.level, entry))
        .collect();
    let mut children = Vec::new();
    while st.valid() {
        if st.load() == EntryType::Table {
            let mut child = st.descend()?;
            children.push((st.index, snapshot_level(&mut child)?));
        }
        st.next();
    }
    Ok(TableSnapshot {
        level: st.level,
        pa: st.table.pa(),
        entries,
        types,
        children,
    })
}

fn stats_level<F: PtFormat>(st: &mut PtState<'_, F>, stats: &mut PtStats) -> Result<()> {
    while st.valid() {
        match st.load() {
            EntryType::Empty => {}
            EntryType::Table => {
                stats.tables += 1;
                let mut child = st.descend()?;
                stats_level(&mut child, stats)?;
            }
            EntryType::Oa => {
                let lg2sz = st.entry_lg2sz();
                *stats.leaves.entry(lg2sz).or_default() += 1;
                stats.mapped_bytes += log2::to_int(lg2sz);
            }
        }
        st.next();
    }
    Ok(())
}
