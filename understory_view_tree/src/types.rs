// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public types for the view tree: node identifiers, kinds, and backend handles.

crate::arena_id! {
    /// Identifier for a node in the tree (generational).
    pub struct NodeId;
}

/// Opaque handle of the node the external backend created for a tree node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub u64);

/// What a tree node stands for in the external backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The synthetic root of a tree. Never removed.
    Root,
    /// A backend element: host element, text, or wrapped foreign element.
    Host,
    /// Container whose children are inserted into an external target.
    Portal,
    /// A component instance.
    Boundary,
    /// The place where forwarded content is grounded.
    Landing,
    /// A named-context provider marker.
    ContextMarker,
    /// The attachment point of a nested engine.
    Nested,
}

impl NodeKind {
    /// Transparent kinds have no backend node of their own; their children are
    /// inserted directly into the nearest non-transparent ancestor.
    pub const fn is_transparent(self) -> bool {
        matches!(self, Self::Boundary | Self::Landing | Self::ContextMarker)
    }

    /// Kinds that occupy a position among their host siblings.
    ///
    /// Portals are anchored elsewhere, so they never serve as insertion points.
    pub const fn is_in_flow(self) -> bool {
        matches!(self, Self::Host | Self::Nested)
    }
}
