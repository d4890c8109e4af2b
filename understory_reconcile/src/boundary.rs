// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Boundaries: the lifecycle-owning wrappers around renderable units.
//!
//! A source boundary wraps a component instance. A content boundary is the
//! transparent landing point of forwarded children. Both move through
//! [`MountState`] once: unmounted, mounted, destroyed. A destroyed boundary is
//! gone from the arena, so later requests naming it are silently ignored.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::mem;

use smallvec::SmallVec;
use understory_view_tree::NodeId;

use crate::applied::AppliedId;
use crate::closure::ContentClosure;
use crate::component::{ChangeSet, Component, ComponentType, ContextSnapshot, RenderCx};
use crate::def::{Children, Def, children_equal};
use crate::engine::Engine;
use crate::error::{Diagnostic, Error};
use crate::scheduler::LifecycleCall;
use crate::settings::{CompareModes, Force};
use crate::value::{Comparison, Props, Value};

understory_view_tree::arena_id! {
    /// Identifies a boundary.
    pub struct BoundaryId;
}

/// Lifecycle state of a boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MountState {
    /// Created, never rendered.
    Unmounted,
    /// Rendered at least once.
    Mounted,
    /// Terminal.
    Destroyed,
}

/// Pending update request, merged across requests until the boundary updates.
#[derive(Clone, Debug, Default)]
pub(crate) struct UpdateBag {
    pub(crate) force: Force,
    /// Earliest known state before the pending changes.
    pub(crate) state: Option<Props>,
    pub(crate) context: bool,
    /// Producer's forwarded children: earliest before, latest after.
    pub(crate) forwarded: Option<(Children, Children)>,
}

impl UpdateBag {
    pub(crate) fn forced(force: Force) -> Self {
        Self {
            force,
            ..Self::default()
        }
    }

    pub(crate) fn merge(&mut self, later: Self) {
        self.force = self.force.max(later.force);
        if self.state.is_none() {
            self.state = later.state;
        }
        self.context |= later.context;
        self.forwarded = match (self.forwarded.take(), later.forwarded) {
            (Some((before, _)), Some((_, after))) => Some((before, after)),
            (earlier, later) => earlier.or(later),
        };
    }
}

/// What the parent's pass hands to a child boundary.
#[derive(Debug)]
pub(crate) struct Incoming {
    pub(crate) props: Props,
    /// Forwarded children before this pass, if the envelope existed.
    pub(crate) content_before: Option<Children>,
}

pub(crate) struct SourceParts {
    pub(crate) component: ComponentType,
    /// Taken out while one of its methods runs.
    pub(crate) instance: Option<Box<dyn Component>>,
    pub(crate) props: Props,
    pub(crate) state: Props,
    pub(crate) contexts: ContextSnapshot,
    pub(crate) closure: ContentClosure,
    pub(crate) rerender_requested: bool,
    pub(crate) reads_content: bool,
}

#[derive(Debug)]
pub(crate) struct ContentParts {
    /// Source boundary whose closure this landing grounds.
    pub(crate) producer: BoundaryId,
    pub(crate) marker: AppliedId,
    /// False for the true landing, which shares the producer's envelope.
    pub(crate) copy: bool,
}

pub(crate) enum BoundaryKind {
    Source(Box<SourceParts>),
    Content(ContentParts),
}

pub(crate) struct Boundary {
    pub(crate) state: MountState,
    pub(crate) kind: BoundaryKind,
    /// Applied definition that created this boundary.
    pub(crate) outer: Option<AppliedId>,
    /// Root of the applied definitions this boundary renders into.
    pub(crate) inner: AppliedId,
    /// Boundary whose pass created this one.
    pub(crate) parent: Option<BoundaryId>,
    /// Directly nested boundaries in tree order, as of the latest pass.
    pub(crate) nested: Vec<BoundaryId>,
    pub(crate) node: NodeId,
    pub(crate) pending: UpdateBag,
    pub(crate) dirty: bool,
    pub(crate) moved: bool,
}

impl Boundary {
    pub(crate) fn source(
        component: &ComponentType,
        props: Props,
        inner: AppliedId,
        parent: Option<BoundaryId>,
        node: NodeId,
        outer: Option<AppliedId>,
    ) -> Self {
        let instance = component.instantiate(&props);
        Self::new(
            BoundaryKind::Source(Box::new(SourceParts {
                component: component.clone(),
                instance: Some(instance),
                props,
                state: Props::new(),
                contexts: ContextSnapshot::new(),
                closure: ContentClosure::default(),
                rerender_requested: false,
                reads_content: false,
            })),
            inner,
            parent,
            node,
            outer,
        )
    }

    pub(crate) fn content(
        parts: ContentParts,
        inner: AppliedId,
        parent: BoundaryId,
        node: NodeId,
    ) -> Self {
        let outer = Some(parts.marker);
        Self::new(BoundaryKind::Content(parts), inner, Some(parent), node, outer)
    }

    fn new(
        kind: BoundaryKind,
        inner: AppliedId,
        parent: Option<BoundaryId>,
        node: NodeId,
        outer: Option<AppliedId>,
    ) -> Self {
        Self {
            state: MountState::Unmounted,
            kind,
            outer,
            inner,
            parent,
            nested: Vec::new(),
            node,
            pending: UpdateBag::default(),
            dirty: false,
            moved: false,
        }
    }
}

/// Sort key placing ancestors before descendants and siblings in tree order.
pub(crate) type SortKey = SmallVec<[u32; 8]>;

fn content_equal(mode: Comparison, a: &Children, b: &Children) -> bool {
    mode.depth().is_some_and(|d| children_equal(a, b, d))
}

fn context_equal(mode: Comparison, a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => mode.depth().is_some_and(|d| a.equal_at(b, d)),
        _ => false,
    }
}

impl Engine {
    /// The update routine.
    ///
    /// Consumes the boundary's pending bag, folds in what the parent's pass
    /// handed over, and decides whether to render. Unmounted boundaries always
    /// render; mounted ones render when forced, when the component says so, or
    /// when an aspect changed under its comparison mode.
    pub(crate) fn update_boundary(
        &mut self,
        b: BoundaryId,
        force: Force,
        incoming: Option<Incoming>,
    ) -> Result<(), Error> {
        let Some(boundary) = self.boundaries.get_mut(b) else {
            return Ok(());
        };
        if boundary.state == MountState::Destroyed {
            return Ok(());
        }
        let bag = mem::take(&mut boundary.pending);
        boundary.dirty = false;
        let force = force.max(bag.force);
        let moved = mem::take(&mut boundary.moved);
        let mounted = boundary.state == MountState::Mounted;
        let is_content = matches!(boundary.kind, BoundaryKind::Content(_));
        self.host.summary.boundaries_updated += 1;

        if is_content {
            return self.refresh_content(b, force);
        }

        let changes = self.collect_changes(b, incoming, bag);
        let render = !mounted || force != Force::None || self.consult_should_update(b, &changes);
        if !render {
            if moved {
                self.host.lifecycle.push((b, LifecycleCall::Moved));
            }
            return Ok(());
        }

        if mounted {
            self.with_instance(b, |instance| instance.before_update(&changes));
        }
        let output = self.render_loop(b)?;
        self.apply_render(b, output, force.descend())?;

        let call = match (mounted, moved) {
            (false, _) => LifecycleCall::Mount,
            (true, false) => LifecycleCall::Update(changes),
            (true, true) => LifecycleCall::UpdateMoved(changes),
        };
        self.host.lifecycle.push((b, call));
        if let Some(boundary) = self.boundaries.get_mut(b) {
            boundary.state = MountState::Mounted;
        }
        Ok(())
    }

    /// Comparison modes of a source boundary: instance, then type, then engine.
    pub(crate) fn compare_modes(&self, b: BoundaryId) -> CompareModes {
        self.source_parts(b)
            .and_then(|parts| {
                parts
                    .instance
                    .as_ref()
                    .and_then(|instance| instance.compare_modes())
                    .or_else(|| parts.component.compare())
            })
            .unwrap_or(self.settings.compare)
    }

    /// Apply bookkeeping and report what changed.
    fn collect_changes(
        &mut self,
        b: BoundaryId,
        incoming: Option<Incoming>,
        bag: UpdateBag,
    ) -> ChangeSet {
        let modes = self.compare_modes(b);
        let mut changes = ChangeSet::default();
        let subscribed: Vec<(Rc<str>, Option<Value>)> = self
            .source_parts(b)
            .map(|parts| {
                parts
                    .contexts
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for (name, before) in subscribed {
            let now = self.resolve_context(b, &name);
            if !context_equal(modes.context, before.as_ref(), now.as_ref()) {
                changes.context.push((name, before, now));
            }
        }

        let Some(parts) = self.source_parts_mut(b) else {
            return changes;
        };
        if let Some(incoming) = incoming {
            let before = mem::replace(&mut parts.props, incoming.props);
            if !modes.props.props_equal(&before, &parts.props) {
                changes.props = Some((before, parts.props.clone()));
            }
            if let (Some(before), Some(after), true) = (
                incoming.content_before,
                parts.closure.children(),
                parts.reads_content,
            ) {
                if !content_equal(modes.content, &before, &after) {
                    changes.content = Some((before, after));
                }
            }
        }
        if let Some(before) = bag.state {
            if !modes.state.props_equal(&before, &parts.state) {
                changes.state = Some((before, parts.state.clone()));
            }
        }
        if parts.reads_content {
            changes.forwarded = bag.forwarded;
        }
        changes
    }

    fn consult_should_update(&mut self, b: BoundaryId, changes: &ChangeSet) -> bool {
        self.with_instance(b, |instance| instance.should_update(changes))
            .flatten()
            .unwrap_or(!changes.is_empty())
    }

    /// Run `f` on the component instance, outside the arena borrow.
    pub(crate) fn with_instance<R>(
        &mut self,
        b: BoundaryId,
        f: impl FnOnce(&mut (dyn Component + 'static)) -> R,
    ) -> Option<R> {
        let mut instance = self.source_parts_mut(b)?.instance.take()?;
        let out = f(&mut *instance);
        if let Some(parts) = self.source_parts_mut(b) {
            parts.instance = Some(instance);
        }
        Some(out)
    }

    /// Render, then render again while the component keeps re-dirtying itself,
    /// up to the bound. Past the bound the last output is kept.
    fn render_loop(&mut self, b: BoundaryId) -> Result<Def, Error> {
        let default_bound = self.settings.max_rerenders;
        let Some(parts) = self.source_parts_mut(b) else {
            return Ok(Def::empty());
        };
        let bound = parts.component.max_rerenders().unwrap_or(default_bound);
        let previous_reads = mem::take(&mut parts.contexts);

        let mut renders = 0_u32;
        let output = loop {
            renders += 1;
            if let Some(parts) = self.source_parts_mut(b) {
                parts.rerender_requested = false;
            }
            let def = self.render_once(b)?;
            self.host.summary.renders += 1;
            let Some(parts) = self.source_parts_mut(b) else {
                break def;
            };
            if !parts.rerender_requested {
                break def;
            }
            if renders > bound {
                parts.rerender_requested = false;
                let component = parts.component.name().clone();
                tracing::warn!(
                    boundary = ?b,
                    component = &*component,
                    renders,
                    "render loop exceeded its bound; keeping the last output"
                );
                self.diagnostics.push(Diagnostic::RenderLoop {
                    boundary: b,
                    component,
                    renders,
                });
                break def;
            }
        };

        let dropped: Vec<Rc<str>> = match self.source_parts(b) {
            Some(parts) => previous_reads
                .into_keys()
                .filter(|name| !parts.contexts.contains_key(name))
                .collect(),
            None => Vec::new(),
        };
        for name in dropped {
            self.contexts.unsubscribe(&name, b);
        }
        Ok(output)
    }

    fn render_once(&mut self, b: BoundaryId) -> Result<Def, Error> {
        let Some(parts) = self.source_parts_mut(b) else {
            return Ok(Def::empty());
        };
        let component = parts.component.name().clone();
        let Some(mut instance) = parts.instance.take() else {
            return Ok(Def::empty());
        };
        let mut cx = RenderCx::new(self, b);
        let result = instance.render(&mut cx);
        let read_children = cx.read_children;
        let declared = instance.reads_content();
        if let Some(parts) = self.source_parts_mut(b) {
            parts.instance = Some(instance);
            parts.reads_content = read_children || declared;
        }
        result.map_err(|source| Error::Render { component, source })
    }

    /// Tear a boundary down: unmount hook, subscriptions, then everything it
    /// rendered. Tree nodes are removed by whoever owns the boundary's node.
    pub(crate) fn destroy_boundary(&mut self, b: BoundaryId) {
        let Some(boundary) = self.boundaries.get_mut(b) else {
            return;
        };
        if boundary.state == MountState::Destroyed {
            return;
        }
        boundary.state = MountState::Destroyed;
        boundary.dirty = false;
        let inner = boundary.inner;
        let keep_root = matches!(
            boundary.kind,
            BoundaryKind::Content(ContentParts { copy: false, .. })
        );

        self.with_instance(b, |instance| instance.before_unmount());
        let subscribed: Vec<Rc<str>> = self
            .source_parts(b)
            .map(|parts| parts.contexts.keys().cloned().collect())
            .unwrap_or_default();
        for name in subscribed {
            self.contexts.unsubscribe(&name, b);
        }

        if keep_root {
            // The envelope root belongs to the producer's closure.
            let children = self
                .applied
                .get_mut(inner)
                .map(|root| mem::take(&mut root.children))
                .unwrap_or_default();
            for child in children {
                self.discard_subtree(child);
            }
        } else {
            self.discard_subtree(inner);
        }

        let envelope = self
            .source_parts_mut(b)
            .and_then(|parts| parts.closure.envelope.take());
        if let Some(envelope) = envelope {
            self.discard_subtree(envelope.applied);
        }
        self.boundaries.remove(b);
        tracing::trace!(boundary = ?b, "boundary destroyed");
    }

    /// Source boundary that wrote the definitions rendered by `b`.
    ///
    /// A content boundary renders children written by whoever rendered its
    /// producer, which may itself be a content boundary.
    pub(crate) fn author(&self, b: BoundaryId) -> Option<BoundaryId> {
        let mut current = b;
        loop {
            match &self.boundaries.get(current)?.kind {
                BoundaryKind::Source(_) => return Some(current),
                BoundaryKind::Content(parts) => {
                    current = self.boundaries.get(parts.producer)?.parent?;
                }
            }
        }
    }

    pub(crate) fn sort_key(&self, b: BoundaryId) -> SortKey {
        let mut key = SortKey::new();
        let mut current = b;
        while let Some(parent) = self.boundaries.get(current).and_then(|x| x.parent) {
            let position = self
                .boundaries
                .get(parent)
                .and_then(|p| p.nested.iter().position(|n| *n == current))
                .map_or(u32::MAX, |i| u32::try_from(i).unwrap_or(u32::MAX));
            key.push(position);
            current = parent;
        }
        key.reverse();
        key
    }
}
