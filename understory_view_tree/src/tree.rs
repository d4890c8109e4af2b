// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core tree implementation: structure, placement, and backend lookups.

use alloc::vec::Vec;

use crate::arena::Arena;
use crate::types::{BackendHandle, NodeId, NodeKind};

/// Structural tree mirroring what exists in an external visual backend.
///
/// Every node has exactly one parent except the synthetic root, which is
/// created with the tree and never removed. Each node carries a payload `T`
/// that higher layers use for back-links.
///
/// ## Example
///
/// ```rust
/// use understory_view_tree::{NodeKind, ViewTree};
///
/// let mut tree = ViewTree::new(());
/// let root = tree.root();
/// let a = tree.insert(root, 0, NodeKind::Host, ());
/// let b = tree.insert(root, 1, NodeKind::Host, ());
///
/// // Move `b` in front of `a`.
/// tree.place(b, root, 0);
/// assert_eq!(tree.children_of(root), &[b, a]);
/// ```
pub struct ViewTree<T> {
    nodes: Arena<NodeId, Node<T>>,
    root: NodeId,
}

impl<T> core::fmt::Debug for ViewTree<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ViewTree")
            .field("nodes", &self.nodes)
            .field("root", &self.root)
            .finish()
    }
}

struct Node<T> {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    handle: Option<BackendHandle>,
    data: T,
}

impl<T> ViewTree<T> {
    /// Create a tree holding only its root node.
    pub fn new(root_data: T) -> Self {
        let mut nodes = Arena::new();
        let root = nodes.insert(Node {
            kind: NodeKind::Root,
            parent: None,
            children: Vec::new(),
            handle: None,
            data: root_data,
        });
        Self { nodes, root }
    }

    /// The synthetic root node.
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, root included.
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is never removed.
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a new node under `parent` at child position `index`.
    ///
    /// `index` is clamped to the number of children.
    pub fn insert(&mut self, parent: NodeId, index: usize, kind: NodeKind, data: T) -> NodeId {
        let id = self.nodes.insert(Node {
            kind,
            parent: None,
            children: Vec::new(),
            handle: None,
            data,
        });
        self.link(id, parent, index);
        id
    }

    /// Move `id` to child position `index` under `parent`.
    ///
    /// Works both for reordering among siblings and for reparenting. Stale ids
    /// and attempts to move the root are ignored.
    pub fn place(&mut self, id: NodeId, parent: NodeId, index: usize) {
        if id == self.root || !self.is_alive(id) || !self.is_alive(parent) {
            return;
        }
        self.detach(id);
        self.link(id, parent, index);
    }

    /// Unlink `id` from its parent, leaving it parentless.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent_of(id) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|c| *c != id);
        }
        if let Some(n) = self.nodes.get_mut(id) {
            n.parent = None;
        }
    }

    /// Remove a single node and return its payload.
    ///
    /// Children are detached, not removed: callers tear subtrees down node by
    /// node so that reused descendants can be re-placed elsewhere.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        if id == self.root || !self.is_alive(id) {
            return None;
        }
        self.detach(id);
        let node = self.nodes.remove(id)?;
        for child in node.children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = None;
            }
        }
        Some(node.data)
    }

    /// Returns true if `id` refers to a live node.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Returns the kind of a live node.
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(|n| n.kind)
    }

    /// Returns the parent of a node if live, or `None` for the root, detached nodes or stale ids.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    /// Get the children of a node, or empty slice if node is stale.
    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map(|n| &n.children[..]).unwrap_or(&[])
    }

    /// Position of `id` among its parent's children.
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent_of(id)?;
        self.children_of(parent).iter().position(|c| *c == id)
    }

    /// Payload of a live node.
    pub fn data(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id).map(|n| &n.data)
    }

    /// Mutable payload of a live node.
    pub fn data_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(id).map(|n| &mut n.data)
    }

    /// Backend handle recorded for a live node.
    pub fn handle(&self, id: NodeId) -> Option<BackendHandle> {
        self.nodes.get(id).and_then(|n| n.handle)
    }

    /// Record (or clear) the backend handle of a live node.
    pub fn set_handle(&mut self, id: NodeId, handle: Option<BackendHandle>) {
        if let Some(n) = self.nodes.get_mut(id) {
            n.handle = handle;
        }
    }

    /// Get the next node in depth-first traversal order.
    ///
    /// Returns `None` if no next node exists or if the current node is stale.
    pub fn next_depth_first(&self, current: NodeId) -> Option<NodeId> {
        if !self.is_alive(current) {
            return None;
        }
        if let Some(&first_child) = self.children_of(current).first() {
            return Some(first_child);
        }
        let mut node = current;
        while let Some(parent) = self.parent_of(node) {
            if let Some(next_sibling) = self.next_sibling(node) {
                return Some(next_sibling);
            }
            node = parent;
        }
        None
    }

    /// All nodes below `id` in depth-first order, `id` excluded.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children_of(id).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children_of(n).iter().rev().copied());
        }
        out
    }

    /// All nodes reachable from the root in depth-first order, root included.
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.root);
        out.extend(self.descendants(self.root));
        out
    }

    /// Nearest ancestor that is not transparent: the node whose backend
    /// element receives `id`'s backend content.
    pub fn host_parent(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.parent_of(id)?;
        loop {
            match self.kind(current)? {
                k if k.is_transparent() => current = self.parent_of(current)?,
                _ => return Some(current),
            }
        }
    }

    /// First in-flow node with a backend handle at or below `id`, following
    /// the first-child chain through transparent nodes.
    pub fn first_live_host(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id)?;
        match node.kind {
            k if k.is_in_flow() => node.handle.map(|_| id),
            k if k.is_transparent() => node
                .children
                .iter()
                .find_map(|&c| self.first_live_host(c)),
            _ => None,
        }
    }

    /// Nearest following in-flow node that already has a backend handle.
    ///
    /// Walks next siblings (descending through transparent nodes) and climbs
    /// out of transparent parents. A backend inserts `id`'s content before the
    /// returned node, or appends to [`ViewTree::host_parent`] when `None`.
    pub fn insertion_point(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            let parent = self.parent_of(current)?;
            let siblings = self.children_of(parent);
            let pos = siblings.iter().position(|c| *c == current)?;
            if let Some(found) = siblings[pos + 1..]
                .iter()
                .find_map(|&s| self.first_live_host(s))
            {
                return Some(found);
            }
            if !self.kind(parent)?.is_transparent() {
                return None;
            }
            current = parent;
        }
    }

    /// Topmost in-flow and portal nodes at or below `id`.
    ///
    /// Removing a transparent node means removing exactly these from the backend.
    pub fn top_hosts(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = alloc::vec![id];
        while let Some(n) = stack.pop() {
            match self.kind(n) {
                Some(k) if k.is_transparent() || k == NodeKind::Root => {
                    stack.extend(self.children_of(n).iter().rev().copied());
                }
                Some(_) => out.push(n),
                None => {}
            }
        }
        out
    }

    // --- internals ---

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent_of(node)?;
        let siblings = self.children_of(parent);
        let pos = siblings.iter().position(|&id| id == node)?;
        siblings.get(pos + 1).copied()
    }

    fn link(&mut self, id: NodeId, parent: NodeId, index: usize) {
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return;
        };
        let index = index.min(parent_node.children.len());
        parent_node.children.insert(index, id);
        self.nodes[id].parent = Some(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn insert_place_and_order() {
        let mut tree = ViewTree::new(0_u32);
        let root = tree.root();
        let a = tree.insert(root, 0, NodeKind::Host, 1);
        let b = tree.insert(root, 5, NodeKind::Host, 2);
        assert_eq!(tree.children_of(root), &[a, b], "index is clamped");

        tree.place(b, root, 0);
        assert_eq!(tree.children_of(root), &[b, a]);
        assert_eq!(tree.index_in_parent(a), Some(1));

        // Reparent under `a`.
        tree.place(b, a, 0);
        assert_eq!(tree.children_of(root), &[a]);
        assert_eq!(tree.parent_of(b), Some(a));
    }

    #[test]
    fn remove_detaches_children_without_removing_them() {
        let mut tree = ViewTree::new(());
        let root = tree.root();
        let a = tree.insert(root, 0, NodeKind::Host, ());
        let b = tree.insert(a, 0, NodeKind::Host, ());
        assert!(tree.remove(a).is_some());
        assert!(!tree.is_alive(a));
        assert!(tree.is_alive(b));
        assert_eq!(tree.parent_of(b), None, "no dangling parent reference");
        assert!(tree.children_of(root).is_empty());
        assert!(tree.remove(root).is_none(), "root is never removed");
    }

    #[test]
    fn depth_first_order() {
        let mut tree = ViewTree::new(());
        let root = tree.root();
        let a = tree.insert(root, 0, NodeKind::Host, ());
        let a1 = tree.insert(a, 0, NodeKind::Host, ());
        let b = tree.insert(root, 1, NodeKind::Host, ());
        assert_eq!(tree.depth_first(), vec![root, a, a1, b]);
        assert_eq!(tree.next_depth_first(a1), Some(b));
        assert_eq!(tree.next_depth_first(b), None);
    }

    #[test]
    fn insertion_point_descends_and_climbs_transparent_nodes() {
        let mut tree = ViewTree::new(());
        let root = tree.root();
        // root: [boundary: [x], landing: [marker: [y]], z]
        let boundary = tree.insert(root, 0, NodeKind::Boundary, ());
        let x = tree.insert(boundary, 0, NodeKind::Host, ());
        let landing = tree.insert(root, 1, NodeKind::Landing, ());
        let marker = tree.insert(landing, 0, NodeKind::ContextMarker, ());
        let y = tree.insert(marker, 0, NodeKind::Host, ());
        let z = tree.insert(root, 2, NodeKind::Host, ());
        tree.set_handle(y, Some(BackendHandle(2)));
        tree.set_handle(z, Some(BackendHandle(3)));

        // `x` climbs out of its boundary and finds `y` through two transparent levels.
        assert_eq!(tree.insertion_point(x), Some(y));
        // `y` climbs out of marker and landing and finds `z`.
        assert_eq!(tree.insertion_point(y), Some(z));
        assert_eq!(tree.insertion_point(z), None);
        assert_eq!(tree.host_parent(y), Some(root));
    }

    #[test]
    fn insertion_point_skips_nodes_without_handles_and_portals() {
        let mut tree = ViewTree::new(());
        let root = tree.root();
        let host = tree.insert(root, 0, NodeKind::Host, ());
        let a = tree.insert(host, 0, NodeKind::Host, ());
        let pending = tree.insert(host, 1, NodeKind::Host, ());
        let portal = tree.insert(host, 2, NodeKind::Portal, ());
        let b = tree.insert(host, 3, NodeKind::Host, ());
        tree.set_handle(portal, Some(BackendHandle(9)));
        tree.set_handle(b, Some(BackendHandle(4)));
        assert_eq!(tree.insertion_point(a), Some(b));
        assert_eq!(tree.insertion_point(pending), Some(b));
        // Climbing stops at a non-transparent parent.
        assert_eq!(tree.insertion_point(b), None);
    }

    #[test]
    fn top_hosts_of_transparent_subtree() {
        let mut tree = ViewTree::new(());
        let root = tree.root();
        let boundary = tree.insert(root, 0, NodeKind::Boundary, ());
        let a = tree.insert(boundary, 0, NodeKind::Host, ());
        let _a1 = tree.insert(a, 0, NodeKind::Host, ());
        let landing = tree.insert(boundary, 1, NodeKind::Landing, ());
        let b = tree.insert(landing, 0, NodeKind::Host, ());
        let p = tree.insert(boundary, 2, NodeKind::Portal, ());
        assert_eq!(tree.top_hosts(boundary), vec![a, b, p]);
        assert_eq!(tree.top_hosts(a), vec![a]);
    }
}
