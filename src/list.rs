// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Intrusive doubly-linked list primitive, kernel `list_head` style.
// Nodes are embedded in payload structures (buddy free chunks overlay
// a `ListNode` on their own payload bytes while free); the list owns no
// allocations of its own and every operation is O(1) except iteration.

use std::ptr;

/// An intrusive doubly-linked list node. Embedded (via pointer cast) inside
/// whatever structure is being linked; carries no back-pointer to the list
/// head it belongs to.
#[repr(C)]
pub(crate) struct ListNode {
    pub prev: *mut ListNode,
    pub next: *mut ListNode,
}

impl ListNode {
    /// Initialise `head` as an empty list (points to itself both ways).
    ///
    /// # Safety
    /// `head` must be a valid, writable pointer to a `ListNode`.
    pub unsafe fn init(head: *mut ListNode) {
        (*head).prev = head;
        (*head).next = head;
    }

    /// Whether `head` has no linked nodes.
    ///
    /// # Safety
    /// `head` must be a valid, initialised list head.
    pub unsafe fn is_empty(head: *mut ListNode) -> bool {
        (*head).next == head
    }

    /// Insert `node` at the tail of the list rooted at `head`.
    ///
    /// # Safety
    /// `head` must be a valid, initialised list head; `node` must not
    /// already be linked into any list.
    pub unsafe fn add_tail(head: *mut ListNode, node: *mut ListNode) {
        let last = (*head).prev;
        (*node).prev = last;
        (*node).next = head;
        (*last).next = node;
        (*head).prev = node;
    }

    /// Unlink `node` from whatever list it currently sits on. Does not
    /// clear `node`'s own `prev`/`next` fields — callers that repurpose the
    /// memory (e.g. turning a free chunk back into a busy one) overwrite
    /// them anyway.
    ///
    /// # Safety
    /// `node` must currently be linked into some list (including possibly
    /// being its own head, which would corrupt that list — callers never
    /// pass a head here).
    pub unsafe fn del(node: *mut ListNode) {
        let prev = (*node).prev;
        let next = (*node).next;
        (*prev).next = next;
        (*next).prev = prev;
    }

    /// The first linked node after `head`, or `head` itself if the list is
    /// empty (callers must check `is_empty` first).
    ///
    /// # Safety
    /// `head` must be a valid, initialised list head.
    pub unsafe fn first(head: *mut ListNode) -> *mut ListNode {
        (*head).next
    }
}

/// Forward iterator over a list rooted at `head`. Stops when it returns to
/// `head`; does not tolerate mutation of the list mid-iteration.
pub(crate) struct Iter {
    head: *mut ListNode,
    cur: *mut ListNode,
}

/// Build a forward iterator over the list rooted at `head`.
///
/// # Safety
/// `head` must be a valid, initialised list head that outlives the iterator.
pub(crate) unsafe fn iter(head: *mut ListNode) -> Iter {
    Iter {
        head,
        cur: (*head).next,
    }
}

impl Iterator for Iter {
    type Item = *mut ListNode;

    fn next(&mut self) -> Option<*mut ListNode> {
        if ptr::eq(self.cur, self.head) {
            return None;
        }
        let node = self.cur;
        self.cur = unsafe { (*node).next };
        Some(node)
    }
}
