// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Applied definitions: the engine's persistent record of what is committed.

use alloc::vec::Vec;

use understory_view_tree::{NodeId, NodeKind};

use crate::boundary::BoundaryId;
use crate::def::{Def, Key, SearchTag};

understory_view_tree::arena_id! {
    /// Identifies an applied definition.
    pub(crate) struct AppliedId;
}

/// How an applied definition fared in the latest pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    /// Allocated in this pass.
    Mounted,
    /// Reused at a different position or under a different parent.
    Moved,
    /// Reused in place.
    Updated,
}

/// A committed definition.
///
/// Persists across passes as long as it keeps being paired with a target
/// definition. `node` and the node's back-link always point at each other.
#[derive(Debug)]
pub(crate) struct Applied {
    /// Latest target definition applied.
    pub(crate) def: Def,
    pub(crate) tag: SearchTag,
    pub(crate) key: Option<Key>,
    pub(crate) action: Action,
    pub(crate) parent: Option<AppliedId>,
    pub(crate) children: Vec<AppliedId>,
    pub(crate) node: Option<NodeId>,
    /// Child boundary of a component, or content boundary of a forward marker.
    pub(crate) boundary: Option<BoundaryId>,
}

impl Applied {
    pub(crate) fn new(def: Def, parent: Option<AppliedId>) -> Self {
        Self {
            tag: def.search_tag(),
            key: def.key().cloned(),
            def,
            action: Action::Mounted,
            parent,
            children: Vec::new(),
            node: None,
            boundary: None,
        }
    }

    /// Root of a pass: a fragment paired with the whole target.
    pub(crate) fn root() -> Self {
        Self::new(Def::empty(), None)
    }
}

/// Tree node kind owned by an applied definition of this kind, if any.
pub(crate) fn node_kind(def: &Def) -> Option<NodeKind> {
    match def {
        Def::Element(_) | Def::Text(_) | Def::Foreign(_) => Some(NodeKind::Host),
        Def::Portal(_) => Some(NodeKind::Portal),
        Def::Component(_) => Some(NodeKind::Boundary),
        Def::Forward(_) | Def::ForwardCopy(_) => Some(NodeKind::Landing),
        Def::Provider(_) => Some(NodeKind::ContextMarker),
        Def::Nested(_) => Some(NodeKind::Nested),
        Def::Fragment(_) => None,
    }
}
