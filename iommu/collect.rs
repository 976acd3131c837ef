//! Gathering subtrees for freeing

use crate::arch::PtFormat;
use crate::mm::FreeList;
use crate::pt::{EntryType, PtState};
use crate::{Error, Result};

/// Queue every table below the cursor on `list`
///
/// Fails with `AddressInUse` on the first leaf unless `ignore_mapped`, in
/// which case leaves are skipped and only the table nodes are gathered.
pub(crate) fn collect_tables<F: PtFormat>(
    st: &mut PtState<'_, F>,
    list: &mut FreeList,
    ignore_mapped: bool,
) -> Result<()> {
    if ignore_mapped && !st.cx.fmt.can_have_table(st.level) {
        return Ok(());
    }
    while st.valid() {
        match st.load() {
            EntryType::Table => {
                let mut child = st.descend()?;
                list.push(st.cx.arena, child.table.node());
                collect_tables(&mut child, list, ignore_mapped)?;
            }
            EntryType::Oa if !ignore_mapped => return Err(Error::AddressInUse),
            _ => {}
        }
        st.next();
    }
    Ok(())
}
