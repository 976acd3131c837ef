//! Intrusive list of table nodes
//!
//! The link lives in the node's arena slot, so queueing a node for
//! freeing never allocates.

use super::arena::NodeHandle;

/// Link value terminating a list
pub const NIL: u32 = u32::MAX;

/// Storage for the per-node link
pub trait FreeLinks {
    /// Read the link of node `index`
    fn next_free(&self, index: u32) -> u32;
    /// Write the link of node `index`
    fn set_next_free(&self, index: u32, next: u32);
}

/// Singly linked list of nodes waiting to be released
#[derive(Debug, PartialEq, Eq)]
pub struct FreeList {
    head: u32,
    tail: u32,
    len: u32,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    /// Empty list
    pub const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    /// Number of queued nodes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a node
    pub fn push<L: FreeLinks>(&mut self, links: &L, node: NodeHandle) {
        let index = node.index();
        links.set_next_free(index, NIL);
        if self.tail == NIL {
            self.head = index;
        } else {
            links.set_next_free(self.tail, index);
        }
        self.tail = index;
        self.len += 1;
    }

    /// Move every node of `other` to the end of this list
    pub fn append<L: FreeLinks>(&mut self, links: &L, other: &mut FreeList) {
        if other.is_empty() {
            return;
        }
        if self.tail == NIL {
            self.head = other.head;
        } else {
            links.set_next_free(self.tail, other.head);
        }
        self.tail = other.tail;
        self.len += other.len;
        *other = FreeList::new();
    }

    /// Iterate the queued nodes front to back
    pub fn iter<'l, L: FreeLinks>(&self, links: &'l L) -> impl Iterator<Item = NodeHandle> + 'l {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let index = cur;
            cur = links.next_free(index);
            Some(NodeHandle::from_index(index))
        })
    }

    /// Remove the first node
    pub fn pop<L: FreeLinks>(&mut self, links: &L) -> Option<NodeHandle> {
        if self.head == NIL {
            return None;
        }
        let index = self.head;
        self.head = links.next_free(index);
        if self.head == NIL {
            self.tail = NIL;
        }
        self.len -= 1;
        links.set_next_free(index, NIL);
        Some(NodeHandle::from_index(index))
    }
}
