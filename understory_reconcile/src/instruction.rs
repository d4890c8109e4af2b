// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The render-instruction stream consumed by an external backend.
//!
//! Each [`Instruction`] names one tree node and a [`Change`] set. Within one
//! batch, instructions for the same node are merged so the backend sees at
//! most one record per node:
//!
//! - a creation followed by a removal cancels out entirely,
//! - a creation absorbs later changes (the latest definition is created),
//! - a removal replaces every earlier change.

use alloc::vec::Vec;

use hashbrown::HashMap;
use smallvec::SmallVec;
use understory_view_tree::{BackendHandle, NodeId, NodeKind, ViewTree};

use crate::boundary::BoundaryId;
use crate::def::Def;
use crate::value::PropDiff;

bitflags::bitflags! {
    /// What happened to a tree node.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Change: u8 {
        /// Remove the node's backend content.
        const REMOVE  = 0b0000_0001;
        /// Create the backend node.
        const CREATE  = 0b0000_0010;
        /// Re-insert at the node's current position.
        const MOVE    = 0b0000_0100;
        /// Apply a property diff.
        const UPDATE  = 0b0000_1000;
        /// Replace text content.
        const CONTENT = 0b0001_0000;
        /// Swap the wrapped foreign element.
        const SWAP    = 0b0010_0000;
        /// Re-target a portal or reattach a nested engine.
        const REFRESH = 0b0100_0000;
    }
}

impl Change {
    /// Bits a node of `kind` may carry.
    pub const fn legal_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Root => Self::empty(),
            NodeKind::Host => Self::REMOVE
                .union(Self::CREATE)
                .union(Self::MOVE)
                .union(Self::UPDATE)
                .union(Self::CONTENT)
                .union(Self::SWAP),
            NodeKind::Portal => Self::REMOVE.union(Self::CREATE).union(Self::REFRESH),
            NodeKind::Nested => Self::REMOVE
                .union(Self::CREATE)
                .union(Self::MOVE)
                .union(Self::REFRESH),
            NodeKind::Boundary | NodeKind::Landing | NodeKind::ContextMarker => {
                Self::REMOVE.union(Self::MOVE)
            }
        }
    }

    /// Returns true if this combination may be sent for a node of `kind`.
    ///
    /// A removal never travels with any other bit.
    pub fn is_legal_for(self, kind: NodeKind) -> bool {
        !self.is_empty()
            && Self::legal_for(kind).contains(self)
            && (!self.contains(Self::REMOVE) || self == Self::REMOVE)
    }
}

/// One record of the instruction stream.
#[derive(Clone, Debug)]
pub struct Instruction {
    /// The node concerned. Dead already for removals.
    pub node: NodeId,
    /// Kind of the node.
    pub kind: NodeKind,
    /// What changed.
    pub change: Change,
    /// Latest definition applied to the node, for creations and updates.
    pub def: Option<Def>,
    /// Property changes for [`Change::UPDATE`].
    pub diff: Option<PropDiff>,
    /// Backend handle: the node's own for removals, the new one for swaps,
    /// the target for portals.
    pub handle: Option<BackendHandle>,
    /// Backend nodes to detach or re-insert for transparent nodes.
    pub hosts: SmallVec<[BackendHandle; 2]>,
}

impl Instruction {
    pub(crate) fn new(node: NodeId, kind: NodeKind, change: Change) -> Self {
        Self {
            node,
            kind,
            change,
            def: None,
            diff: None,
            handle: None,
            hosts: SmallVec::new(),
        }
    }

    pub(crate) fn with_def(mut self, def: impl Into<Def>) -> Self {
        self.def = Some(def.into());
        self
    }

    fn merge(&mut self, later: Self) {
        if later.change.contains(Change::REMOVE) {
            if self.change.contains(Change::CREATE) {
                self.change = Change::empty();
            } else {
                *self = later;
            }
            return;
        }
        if self.change.is_empty() || self.change.contains(Change::REMOVE) {
            return;
        }
        if later.def.is_some() {
            self.def = later.def;
        }
        if later.handle.is_some() {
            self.handle = later.handle;
        }
        if self.change.contains(Change::CREATE) {
            return;
        }
        self.change |= later.change;
        if let Some(more) = later.diff {
            if let Some(diff) = &mut self.diff {
                diff.merge(more);
            } else {
                self.diff = Some(more);
            }
        }
    }
}

/// Consumer of the instruction stream.
///
/// Instructions arrive removals first, then moves in reverse tree order, then
/// everything else in tree order. For creations the backend finds the
/// insertion point with [`ViewTree::insertion_point`] and the container with
/// [`ViewTree::host_parent`].
pub trait Renderer {
    /// Apply one instruction. Returning a handle records it on the node.
    fn apply(
        &mut self,
        instruction: &Instruction,
        tree: &ViewTree<NodeData>,
    ) -> Option<BackendHandle>;
}

/// Payload of every tree node: back-links into the engine.
#[derive(Clone, Debug, Default)]
pub struct NodeData {
    pub(crate) applied: Option<crate::applied::AppliedId>,
    pub(crate) source: Option<BoundaryId>,
}

impl NodeData {
    /// The source boundary whose definitions produced this node.
    pub fn source(&self) -> Option<BoundaryId> {
        self.source
    }
}

/// Pending instructions, at most one per node.
#[derive(Debug, Default)]
pub(crate) struct InstructionBatch {
    records: Vec<Instruction>,
    index: HashMap<NodeId, usize>,
}

impl InstructionBatch {
    pub(crate) fn push(&mut self, instruction: Instruction) {
        debug_assert!(
            instruction.change.is_legal_for(instruction.kind),
            "illegal change {:?} for {:?}",
            instruction.change,
            instruction.kind
        );
        match self.index.get(&instruction.node) {
            Some(&i) => self.records[i].merge(instruction),
            None => {
                self.index.insert(instruction.node, self.records.len());
                self.records.push(instruction);
            }
        }
    }

    /// Drop whatever is pending for a node removed together with an ancestor.
    pub(crate) fn forget(&mut self, node: NodeId) {
        if let Some(i) = self.index.remove(&node) {
            self.records[i].change = Change::empty();
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.iter().all(|r| r.change.is_empty())
    }

    pub(crate) fn take(&mut self) -> Vec<Instruction> {
        self.index.clear();
        let mut records = core::mem::take(&mut self.records);
        records.retain(|r| !r.change.is_empty());
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeId {
        let mut tree = ViewTree::new(());
        let root = tree.root();
        tree.insert(root, 0, NodeKind::Host, ())
    }

    #[test]
    fn create_then_remove_cancels() {
        let n = node();
        let mut batch = InstructionBatch::default();
        batch.push(Instruction::new(n, NodeKind::Host, Change::CREATE).with_def(Def::text("a")));
        batch.push(Instruction::new(n, NodeKind::Host, Change::CONTENT).with_def(Def::text("b")));
        batch.push(Instruction::new(n, NodeKind::Host, Change::REMOVE));
        assert!(batch.is_empty());
        assert!(batch.take().is_empty());
    }

    #[test]
    fn create_absorbs_later_changes_with_latest_def() {
        let n = node();
        let mut batch = InstructionBatch::default();
        batch.push(Instruction::new(n, NodeKind::Host, Change::CREATE).with_def(Def::text("a")));
        batch.push(
            Instruction::new(n, NodeKind::Host, Change::CONTENT | Change::MOVE)
                .with_def(Def::text("b")),
        );
        let out = batch.take();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change, Change::CREATE);
        assert!(matches!(&out[0].def, Some(Def::Text(t)) if &*t.text == "b"));
    }

    #[test]
    fn removal_replaces_updates() {
        let n = node();
        let mut batch = InstructionBatch::default();
        batch.push(Instruction::new(n, NodeKind::Host, Change::UPDATE | Change::MOVE));
        batch.push(Instruction::new(n, NodeKind::Host, Change::REMOVE));
        let out = batch.take();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].change, Change::REMOVE);
    }

    #[test]
    fn legal_combinations_per_kind() {
        assert!(Change::MOVE.is_legal_for(NodeKind::Boundary));
        assert!(!Change::CREATE.is_legal_for(NodeKind::Landing));
        assert!(!(Change::REMOVE | Change::UPDATE).is_legal_for(NodeKind::Host));
        assert!(Change::REFRESH.is_legal_for(NodeKind::Portal));
        assert!(!Change::MOVE.is_legal_for(NodeKind::Portal));
        assert!(Change::legal_for(NodeKind::Root).is_empty());
    }
}
