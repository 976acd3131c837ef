//! Per level iteration
//!
//! A [`PtState`] is the cursor of one table level: the table, the index
//! window that intersects the walk and the decoded entry under the cursor.
//! Operations drive it with
//!
//! ```ignore
//! while st.valid() {
//!     match st.load() { /* ... */ }
//!     st.next();
//! }
//! ```
//!
//! and call [`PtState::descend`] on table entries to get the cursor of the
//! child table, which starts at the parent's current VA.

use crate::arch::PtFormat;
use crate::mm::{PhysAddr, TableRef};
use crate::utils::log2;
use crate::{Error, Result};

use super::entry::EntryType;
use super::range::{PtCtx, PtRange};

/// Cursor over one table
pub struct PtState<'g, F: PtFormat> {
    pub cx: PtCtx<'g, F>,
    /// Walk bounds; `range.va` is the VA of the item under the cursor, or
    /// the start of the walk for the first item
    pub range: PtRange,
    pub table: TableRef<'g, F::Word>,
    pub level: u32,
    pub index: u32,
    pub end_index: u32,
    /// Raw entry as of the last [`PtState::load`]
    pub entry: u64,
    pub ty: EntryType,
}

impl<'g, F: PtFormat> PtState<'g, F> {
    /// Cursor over the part of `table` at `level` that intersects `range`
    pub fn new(cx: PtCtx<'g, F>, range: PtRange, table: TableRef<'g, F::Word>, level: u32) -> Self {
        let mut st = Self {
            cx,
            range,
            table,
            level,
            index: 0,
            end_index: 0,
            entry: 0,
            ty: EntryType::Empty,
        };
        st.index = st.va_to_index(range.va);
        st.end_index = if range.va == range.last_va {
            st.index + 1
        } else if level == range.top_level
            || log2::div_eq(range.va, range.last_va, st.num_items_lg2() + st.isz())
        {
            st.va_to_index(range.last_va) + 1
        } else {
            1u32 << st.num_items_lg2()
        };
        st
    }

    /// Cursor over the root captured by `range`
    pub fn top(cx: PtCtx<'g, F>, range: PtRange) -> Result<Self> {
        let table = cx.table(range.top_pa)?;
        Ok(Self::new(cx, range, table, range.top_level))
    }

    fn va_to_index(&self, va: u64) -> u32 {
        let isz = self.isz();
        if self.level == self.range.top_level {
            log2::div(log2::rem(va, self.range.max_vasz_lg2), isz) as u32
        } else {
            log2::rem(log2::div(va, isz), self.num_items_lg2()) as u32
        }
    }

    /// log2 of the VA span of one item at this level
    pub fn isz(&self) -> u32 {
        self.cx.fmt.item_lg2sz(self.level)
    }

    pub fn num_items_lg2(&self) -> u32 {
        self.cx.fmt.num_items_lg2(self.level)
    }

    /// True while the cursor is inside the walk
    pub fn valid(&self) -> bool {
        self.index < self.end_index
    }

    /// Read and decode the entry under the cursor
    pub fn load(&mut self) -> EntryType {
        self.entry = self.table.load(self.index);
        self.ty = self.cx.fmt.entry_type(self.level, self.entry);
        self.ty
    }

    /// log2 of the number of items the loaded leaf spans
    pub fn num_contig_lg2(&self) -> u32 {
        match self.ty {
            EntryType::Oa => self.cx.fmt.entry_num_contig_lg2(self.level, self.entry),
            _ => 0,
        }
    }

    /// log2 of the bytes the loaded leaf spans
    pub fn entry_lg2sz(&self) -> u32 {
        self.isz() + self.num_contig_lg2()
    }

    /// Index of the first item of the loaded leaf
    pub fn entry_start_index(&self) -> u32 {
        log2::set_rem(self.index as u64, 0, self.num_contig_lg2()) as u32
    }

    /// Output address of the item under the cursor
    pub fn item_oa(&self) -> PhysAddr {
        self.cx.fmt.item_oa(self.level, self.index, self.entry)
    }

    /// Output address of the first byte of the loaded leaf
    pub fn entry_oa(&self) -> PhysAddr {
        self.cx.fmt.entry_oa(self.level, self.index, self.entry)
    }

    /// Move past `2^n` aligned items and recompute the cursor VA
    pub fn advance(&mut self, n: u32) {
        let next = self.index as u64 + log2::to_int(n);
        self.index = log2::set_rem(next, 0, n) as u32;
        self.index_to_va();
    }

    /// Move past the loaded entry
    pub fn next(&mut self) {
        self.advance(self.num_contig_lg2());
    }

    fn index_to_va(&mut self) {
        let item_va = log2::mul(self.index as u64, self.isz());
        self.range.va = log2::set_rem(self.range.va, item_va, self.cx.table_span_lg2(self.level));
    }

    /// True if the walk covers the whole `2^oasz_lg2` block under the cursor
    pub fn fully_covered(&self, oasz_lg2: u32) -> bool {
        let va = self.range.va;
        let last_va = self.range.last_va;
        if log2::rem(va, oasz_lg2) != 0 {
            return false;
        }
        if !log2::div_eq(va, last_va, oasz_lg2) {
            return true;
        }
        log2::rem_eq_max(last_va, oasz_lg2)
    }

    /// The child table the loaded table entry points at
    pub fn child_table(&self) -> Result<TableRef<'g, F::Word>> {
        if pt_warn_on!(self.ty != EntryType::Table || self.level == 0) {
            return Err(Error::InconsistentState);
        }
        self.cx.table(self.cx.fmt.table_pa(self.level, self.entry))
    }

    /// Cursor over the child of the loaded table entry
    pub fn descend(&self) -> Result<PtState<'g, F>> {
        let table = self.child_table()?;
        Ok(PtState::new(self.cx, self.range, table, self.level - 1))
    }

    /// Cursor over the whole child of the table entry `entry` found at `index`
    pub fn child_at(&self, index: u32, entry: u64) -> Result<PtState<'g, F>> {
        if pt_warn_on!(self.level == 0) {
            return Err(Error::InconsistentState);
        }
        let table = self.cx.table(self.cx.fmt.table_pa(self.level, entry))?;
        let isz = self.isz();
        let item_va = log2::mul(index as u64, isz);
        let va = log2::set_rem(self.range.va, item_va, self.cx.table_span_lg2(self.level));
        let range = PtRange {
            va,
            last_va: log2::set_rem_max(va, isz),
            ..self.range
        };
        Ok(PtState::new(self.cx, range, table, self.level - 1))
    }

    /// Push entries `start..end` of this table to an incoherent walker
    pub fn flush(&self, start: u32, end: u32) {
        if self.cx.incoherent() {
            self.cx.arena.flush(&self.table, start, end);
        }
    }
}
