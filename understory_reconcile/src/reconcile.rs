// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Definition pairing: the pass that turns a target tree into instructions.
//!
//! A pass runs over one boundary's applied subtree in four steps:
//!
//! 1. Index the current applied definitions: every entry starts unused, keyed
//!    entries are also indexed by tag, key and key region.
//! 2. Pair target definitions with unused entries in tree order. Keyed
//!    definitions look among their siblings first, then, where wide matching
//!    applies, through the whole region. Unkeyed definitions only look among
//!    their siblings. Anything unmatched is allocated fresh.
//! 3. Discard what stayed unused, so removals precede everything else.
//! 4. Walk the paired tree: place nodes, diff properties, ground components,
//!    forwarded content, providers and nested engines.
//!
//! Pairing never fails. Nested boundaries are not indexed: their rendered
//! content hangs off their own inner root and is paired by their own pass.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use understory_view_tree::{BackendHandle, NodeId, NodeKind};

use crate::applied::{Action, Applied, AppliedId, node_kind};
use crate::boundary::{Boundary, BoundaryId, Incoming};
use crate::def::{ComponentDef, Def, FragmentDef, Key, NestedDef, SearchTag};
use crate::engine::{Engine, NestedEngine};
use crate::error::{Diagnostic, Error};
use crate::instruction::{Change, Instruction, NodeData};
use crate::settings::{ArrayWideKeys, Force, UnkeyedReuse};

/// Innermost array fragment enclosing an entry; `None` for the pass root region.
type Region = Option<AppliedId>;

/// Phase 0 result.
#[derive(Debug, Default)]
struct ScopeIndex {
    unused: HashSet<AppliedId>,
    keyed: HashMap<(SearchTag, Key, Region), Vec<AppliedId>>,
    /// Parent and sibling index before the pass.
    origin: HashMap<AppliedId, (AppliedId, usize)>,
    /// Preorder, for cleanup.
    order: Vec<AppliedId>,
}

impl ScopeIndex {
    fn build(engine: &Engine, root: AppliedId) -> Self {
        let mut index = Self::default();
        let mut stack: Vec<(AppliedId, Region)> = vec![(root, None)];
        while let Some((id, region)) = stack.pop() {
            let Some(applied) = engine.applied.get(id) else {
                continue;
            };
            if id != root {
                index.unused.insert(id);
                index.order.push(id);
                if let Some(key) = &applied.key {
                    index
                        .keyed
                        .entry((applied.tag.clone(), key.clone(), region))
                        .or_default()
                        .push(id);
                }
            }
            let inner = if id != root && applied.def.is_array() {
                Some(id)
            } else {
                region
            };
            for (i, child) in applied.children.iter().enumerate().rev() {
                index.origin.insert(*child, (id, i));
                stack.push((*child, inner));
            }
        }
        index
    }

    fn take(&mut self, id: AppliedId) {
        self.unused.remove(&id);
    }
}

/// A reused entry whose latest pass failed before reaching it.
#[derive(Debug)]
pub(crate) struct Unapplied {
    /// Definition the backend last saw.
    def: Def,
    /// A move is still owed.
    moved: bool,
}

/// One parent whose target children still have to be paired.
#[derive(Debug)]
struct PairFrame {
    parent: AppliedId,
    region: Region,
    /// Number of array fragments enclosing `parent`'s children.
    array_depth: u32,
}

/// One step of the apply walk.
#[derive(Copy, Clone, Debug)]
struct Visit {
    id: AppliedId,
    /// Index into the node frames: where this entry's node goes.
    frame: usize,
    /// An enclosing fragment moved.
    inherited_move: bool,
}

impl Engine {
    /// Pair a boundary's fresh render output with what it rendered before.
    pub(crate) fn apply_render(
        &mut self,
        b: BoundaryId,
        output: Def,
        force: Force,
    ) -> Result<(), Error> {
        let target = Def::Fragment(FragmentDef {
            key: None,
            array: false,
            children: Rc::from(vec![output]),
        });
        self.apply_pass(b, target, force)
    }

    /// Run a full pass for `b`: pair `target` against `b`'s inner root, clean
    /// up, then apply.
    pub(crate) fn apply_pass(&mut self, b: BoundaryId, target: Def, force: Force) -> Result<(), Error> {
        let Some(boundary) = self.boundaries.get(b) else {
            return Ok(());
        };
        let root = boundary.inner;
        let container = boundary.node;
        if !self.applied.contains(root) {
            return Ok(());
        }

        let mut index = ScopeIndex::build(self, root);
        let mut previous = self.pair(&mut index, root, target);
        previous.remove(&root);
        let reused = previous.len();

        let mut discarded = 0_usize;
        for id in &index.order {
            if index.unused.contains(id) {
                self.discard_one(*id);
                discarded += 1;
            }
        }

        let mut nested = Vec::new();
        let walked = self.apply_walk(b, root, container, &mut previous, force, &mut nested);
        // Kept even when a nested render failed half way.
        if let Some(boundary) = self.boundaries.get_mut(b) {
            boundary.nested = nested;
        }
        if walked.is_err() {
            // Entries the walk never reached still show their old definition
            // in the backend; the next pass diffs against that.
            for (id, def) in previous {
                let Some(applied) = self.applied.get(id) else {
                    continue;
                };
                let moved = applied.action == Action::Moved;
                let entry = self.unapplied.entry(id).or_insert(Unapplied { def, moved });
                entry.moved |= moved;
            }
        }
        walked?;
        tracing::trace!(
            boundary = ?b,
            reused,
            discarded,
            "pass applied"
        );
        Ok(())
    }

    /// Phase 1. Returns, for reused entries, the definition last applied to
    /// the backend.
    fn pair(&mut self, index: &mut ScopeIndex, root: AppliedId, target: Def) -> HashMap<AppliedId, Def> {
        let mut previous = HashMap::new();
        if let Some(applied) = self.applied.get_mut(root) {
            let replaced = mem::replace(&mut applied.def, target);
            let before = self.unapplied.remove(&root).map_or(replaced, |u| u.def);
            previous.insert(root, before);
        }

        let mut written: Vec<(AppliedId, Vec<AppliedId>)> = Vec::new();
        let mut stack = vec![PairFrame {
            parent: root,
            region: None,
            array_depth: 0,
        }];
        while let Some(frame) = stack.pop() {
            let Some(parent) = self.applied.get(frame.parent) else {
                continue;
            };
            let targets = match parent.def.scope_children() {
                Some(children) => children.clone(),
                None => continue,
            };
            let siblings = parent.children.clone();
            let mut children = Vec::with_capacity(targets.len());
            let mut pushed = Vec::new();

            for (i, def) in targets.iter().enumerate() {
                let found = self.find_match(index, &siblings, i, def, frame.region, frame.array_depth);
                let id = match found {
                    Some(id) => {
                        index.take(id);
                        let carried = self.unapplied.remove(&id);
                        let moved = index.origin.get(&id) != Some(&(frame.parent, i))
                            || carried.as_ref().is_some_and(|u| u.moved);
                        if let Some(applied) = self.applied.get_mut(id) {
                            applied.parent = Some(frame.parent);
                            applied.action = if moved { Action::Moved } else { Action::Updated };
                            let replaced = mem::replace(&mut applied.def, def.clone());
                            previous.insert(id, carried.map_or(replaced, |u| u.def));
                        }
                        id
                    }
                    None => self
                        .applied
                        .insert(Applied::new(def.clone(), Some(frame.parent))),
                };
                children.push(id);
                if def.scope_children().is_some() {
                    let array = def.is_array();
                    pushed.push(PairFrame {
                        parent: id,
                        region: if array { Some(id) } else { frame.region },
                        array_depth: frame.array_depth + u32::from(array),
                    });
                }
            }
            written.push((frame.parent, children));
            stack.extend(pushed.into_iter().rev());
        }

        for (parent, children) in written {
            if let Some(applied) = self.applied.get_mut(parent) {
                applied.children = children;
            }
        }
        previous
    }

    /// Whether a keyed definition may match outside its siblings.
    fn wide_allowed(&self, array_depth: u32) -> bool {
        match (array_depth, self.settings.array_wide_keys) {
            (0, _) => self.settings.wide_keys,
            (_, ArrayWideKeys::Never) => false,
            (depth, ArrayWideKeys::OuterOnly) => depth == 1,
            (_, ArrayWideKeys::All) => true,
        }
    }

    fn find_match(
        &self,
        index: &ScopeIndex,
        siblings: &[AppliedId],
        position: usize,
        def: &Def,
        region: Region,
        array_depth: u32,
    ) -> Option<AppliedId> {
        let tag = def.search_tag();
        let usable = |id: &AppliedId| index.unused.contains(id);

        if let Some(key) = def.key() {
            let sibling = siblings.iter().copied().filter(usable).find(|id| {
                self.applied
                    .get(*id)
                    .is_some_and(|a| a.tag == tag && a.key.as_ref() == Some(key))
            });
            if sibling.is_some() || !self.wide_allowed(array_depth) {
                return sibling;
            }
            return index
                .keyed
                .get(&(tag, key.clone(), region))
                .and_then(|ids| ids.iter().copied().find(usable));
        }

        let same_position_only =
            tag.is_component() && self.settings.unkeyed_reuse == UnkeyedReuse::SamePositionForComponents;
        let matches = |id: &AppliedId| {
            usable(id)
                && self
                    .applied
                    .get(*id)
                    .is_some_and(|a| a.tag == tag && a.key.is_none())
        };
        if same_position_only {
            return siblings.get(position).copied().filter(matches);
        }
        siblings.iter().copied().find(matches)
    }

    /// Phase 4. Collects the boundaries nested directly in this pass, in tree order.
    fn apply_walk(
        &mut self,
        b: BoundaryId,
        root: AppliedId,
        container: NodeId,
        previous: &mut HashMap<AppliedId, Def>,
        force: Force,
        nested: &mut Vec<BoundaryId>,
    ) -> Result<(), Error> {
        let source = self.author(b);
        let mut frames: Vec<(NodeId, usize)> = vec![(container, 0)];
        let mut stack: Vec<Visit> = Vec::new();
        self.push_visits(&mut stack, root, 0, false);

        while let Some(visit) = stack.pop() {
            let Some(applied) = self.applied.get(visit.id) else {
                continue;
            };
            let def = applied.def.clone();
            let moved = visit.inherited_move || applied.action == Action::Moved;
            let replaced = previous.remove(&visit.id);
            let Some(kind) = node_kind(&def) else {
                self.push_visits(&mut stack, visit.id, visit.frame, moved);
                continue;
            };

            let (parent, position) = frames[visit.frame];
            frames[visit.frame].1 += 1;
            let (node, created) = self.place_node(visit.id, source, kind, &def, parent, position, moved);
            let before = if created { None } else { replaced.as_ref() };

            match &def {
                Def::Element(_) | Def::Text(_) | Def::Foreign(_) | Def::Portal(_) => {
                    if let Some(before) = before {
                        self.diff_host(node, kind, before, &def);
                    }
                }
                Def::Component(component) => {
                    let (child, fresh) = self.boundary_for(b, visit.id, node, component, moved);
                    nested.push(child);
                    self.hand_over(child, component, fresh, force)?;
                }
                Def::Forward(_) | Def::ForwardCopy(_) => {
                    let copy = matches!(def, Def::ForwardCopy(_));
                    if let Some(landing) = self.content_grounded(b, visit.id, node, copy, force)? {
                        nested.push(landing);
                    }
                }
                Def::Provider(provider) => {
                    let before = match before {
                        Some(Def::Provider(p)) => Some(&p.value),
                        _ => None,
                    };
                    self.provide(node, provider, before)?;
                }
                Def::Nested(inner) => self.attach_nested(node, inner)?,
                Def::Fragment(_) => {}
            }

            if def.scope_children().is_some_and(|c| !c.is_empty()) {
                frames.push((node, 0));
                let frame = frames.len() - 1;
                self.push_visits(&mut stack, visit.id, frame, false);
            }
        }
        Ok(())
    }

    fn push_visits(&self, stack: &mut Vec<Visit>, id: AppliedId, frame: usize, inherited_move: bool) {
        if let Some(applied) = self.applied.get(id) {
            stack.extend(applied.children.iter().rev().map(|&child| Visit {
                id: child,
                frame,
                inherited_move,
            }));
        }
    }

    /// Create or position the node of an applied entry, emitting creation or
    /// move instructions. Returns the node and whether it was created.
    fn place_node(
        &mut self,
        id: AppliedId,
        source: Option<BoundaryId>,
        kind: NodeKind,
        def: &Def,
        parent: NodeId,
        position: usize,
        moved: bool,
    ) -> (NodeId, bool) {
        let existing = self
            .applied
            .get(id)
            .and_then(|a| a.node)
            .filter(|n| self.tree.is_alive(*n));
        if let Some(node) = existing {
            if self.tree.parent_of(node) != Some(parent) || self.tree.index_in_parent(node) != Some(position) {
                self.tree.place(node, parent, position);
            }
            if moved && Change::legal_for(kind).contains(Change::MOVE) {
                self.host
                    .instructions
                    .push(Instruction::new(node, kind, Change::MOVE));
            }
            return (node, false);
        }

        let node = self.tree.insert(
            parent,
            position,
            kind,
            NodeData {
                applied: Some(id),
                source,
            },
        );
        if let Some(applied) = self.applied.get_mut(id) {
            applied.node = Some(node);
        }
        if Change::legal_for(kind).contains(Change::CREATE) {
            let mut instruction = Instruction::new(node, kind, Change::CREATE).with_def(def.clone());
            instruction.handle = match def {
                Def::Foreign(f) => Some(f.handle),
                Def::Portal(p) => Some(p.target),
                _ => None,
            };
            self.host.instructions.push(instruction);
        }
        (node, true)
    }

    fn diff_host(&mut self, node: NodeId, kind: NodeKind, before: &Def, after: &Def) {
        let mut instruction = Instruction::new(node, kind, Change::empty());
        match (before, after) {
            (Def::Element(a), Def::Element(b)) => {
                if !a.props.ptr_eq(&b.props) {
                    let diff = a.props.diff(&b.props);
                    if !diff.is_empty() {
                        instruction.change |= Change::UPDATE;
                        instruction.diff = Some(diff);
                    }
                }
            }
            (Def::Text(a), Def::Text(b)) => {
                if a.text != b.text {
                    instruction.change |= Change::CONTENT;
                }
            }
            (Def::Foreign(a), Def::Foreign(b)) => {
                if a.handle != b.handle {
                    instruction.change |= Change::SWAP;
                    instruction.handle = Some(b.handle);
                }
                if !a.props.ptr_eq(&b.props) {
                    let diff = a.props.diff(&b.props);
                    if !diff.is_empty() {
                        instruction.change |= Change::UPDATE;
                        instruction.diff = Some(diff);
                    }
                }
            }
            (Def::Portal(a), Def::Portal(b)) => {
                if a.target != b.target {
                    instruction.change |= Change::REFRESH;
                    instruction.handle = Some(b.target);
                }
            }
            _ => {}
        }
        if !instruction.change.is_empty() {
            self.host.instructions.push(instruction.with_def(after.clone()));
        }
    }

    /// Instantiate the child boundary of a component entry, or reuse it.
    fn boundary_for(
        &mut self,
        b: BoundaryId,
        id: AppliedId,
        node: NodeId,
        def: &ComponentDef,
        moved: bool,
    ) -> (BoundaryId, bool) {
        let existing = self
            .applied
            .get(id)
            .and_then(|a| a.boundary)
            .filter(|c| self.boundaries.contains(*c));
        let (child, fresh) = match existing {
            Some(child) => (child, false),
            None => {
                let inner = self.applied.insert(Applied::root());
                let child = self.boundaries.insert(Boundary::source(
                    &def.component,
                    def.props.clone(),
                    inner,
                    Some(b),
                    node,
                    Some(id),
                ));
                if let Some(applied) = self.applied.get_mut(id) {
                    applied.boundary = Some(child);
                }
                if let Some(data) = self.tree.data_mut(node) {
                    data.source = Some(child);
                }
                tracing::trace!(
                    parent = ?b,
                    boundary = ?child,
                    component = &**def.component.name(),
                    "boundary created"
                );
                (child, true)
            }
        };
        if let Some(boundary) = self.boundaries.get_mut(child) {
            boundary.parent = Some(b);
            boundary.moved |= moved && !fresh;
        }
        (child, fresh)
    }

    /// Hand a child boundary its properties and children, update it, then
    /// refresh the landings of its children that are still pending.
    fn hand_over(
        &mut self,
        child: BoundaryId,
        def: &ComponentDef,
        fresh: bool,
        force: Force,
    ) -> Result<(), Error> {
        let content_before = self.closure_pre_refresh(child, def.children.clone())?;
        let incoming = (!fresh).then(|| Incoming {
            props: def.props.clone(),
            content_before,
        });
        self.update_boundary(child, force, incoming)?;
        self.closure_apply_refresh(child, force)
    }

    fn attach_nested(&mut self, node: NodeId, def: &NestedDef) -> Result<(), Error> {
        let visible = self.visible_contexts(node);
        let Ok(mut inner) = def.engine.try_borrow_mut() else {
            tracing::debug!(node = ?node, "nested engine busy, attachment skipped");
            self.diagnostics.push(Diagnostic::NestedEngineBusy { node });
            return Ok(());
        };
        if inner.attachment.is_some_and(|previous| previous != node) {
            self.host
                .instructions
                .push(Instruction::new(node, NodeKind::Nested, Change::REFRESH).with_def(def.clone()));
        }
        inner.attachment = Some(node);
        if inner.settings.inherit_outer_contexts {
            inner.set_outer_contexts(visible)?;
        }
        Ok(())
    }

    /// Discard one applied entry: its node, then whatever it owns.
    ///
    /// Callers discard in preorder, so nodes under an already removed node
    /// are dropped without an instruction of their own.
    fn discard_one(&mut self, id: AppliedId) {
        let Some(applied) = self.applied.remove(id) else {
            return;
        };
        self.unapplied.remove(&id);
        if let Some(node) = applied.node {
            self.remove_node(node);
        }
        match &applied.def {
            Def::Component(_) => {
                if let Some(child) = applied.boundary {
                    self.destroy_boundary(child);
                }
            }
            Def::Forward(_) | Def::ForwardCopy(_) => {
                if let Some(landing) = applied.boundary {
                    self.content_ungrounded(id, landing);
                }
            }
            Def::Provider(provider) => {
                if let Some(node) = applied.node {
                    self.contexts.withdraw(&provider.name, node);
                    self.notify_context(&provider.name);
                }
            }
            Def::Nested(nested) => detach_nested(&nested.engine, applied.node),
            _ => {}
        }
    }

    /// Discard an applied entry and everything below it, in preorder.
    pub(crate) fn discard_subtree(&mut self, id: AppliedId) {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(applied) = self.applied.get(current) {
                order.push(current);
                stack.extend(applied.children.iter().rev().copied());
            }
        }
        for current in order {
            self.discard_one(current);
        }
    }

    /// Remove a node from the tree and emit its removal.
    ///
    /// A node already cut loose by the removal of an ancestor goes with that
    /// ancestor's backend content. Portals are the exception: their content
    /// lives in the target container.
    pub(crate) fn remove_node(&mut self, node: NodeId) {
        let Some(kind) = self.tree.kind(node) else {
            return;
        };
        if kind == NodeKind::Root {
            return;
        }
        if self.tree.parent_of(node).is_none() && kind != NodeKind::Portal {
            self.host.instructions.forget(node);
            self.tree.remove(node);
            return;
        }
        let mut instruction = Instruction::new(node, kind, Change::REMOVE);
        instruction.handle = self.tree.handle(node);
        if kind.is_transparent() {
            instruction.hosts = self.in_flow_handles(node);
        }
        self.host.instructions.push(instruction);
        self.tree.remove(node);
    }

    /// Backend handles of the topmost in-flow nodes at or below a transparent node.
    pub(crate) fn in_flow_handles(&self, node: NodeId) -> SmallVec<[BackendHandle; 2]> {
        self.tree
            .top_hosts(node)
            .into_iter()
            .filter(|n| self.tree.kind(*n).is_some_and(NodeKind::is_in_flow))
            .filter_map(|n| self.tree.handle(n))
            .collect()
    }
}

fn detach_nested(engine: &NestedEngine, node: Option<NodeId>) {
    let Ok(mut inner) = engine.try_borrow_mut() else {
        return;
    };
    if inner.attachment.is_some() && inner.attachment == node {
        inner.attachment = None;
    }
}
