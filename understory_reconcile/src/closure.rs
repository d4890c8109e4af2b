// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Content closures: carrying forwarded children to wherever they are grounded.
//!
//! Every source boundary owns a closure. When its parent's pass hands it
//! children, the closure records them as an *envelope*: a persistent applied
//! root plus the latest target. Forward markers rendered anywhere below
//! resolve to the closure of the boundary that wrote them and ground the
//! envelope there.
//!
//! The first identity-preserving marker to ground becomes the *true* landing:
//! its content boundary renders directly into the envelope's applied root, so
//! component state inside forwarded children survives as long as that landing
//! does. Every other landing is a *copy*: a content boundary with its own
//! applied root. Pairing never looks past the root of a pass, so copies stay
//! independent of the true landing and of each other.

use alloc::rc::Rc;
use alloc::vec::Vec;

use understory_view_tree::NodeId;

use crate::applied::{Applied, AppliedId};
use crate::boundary::{Boundary, BoundaryId, BoundaryKind, ContentParts, UpdateBag};
use crate::def::{Children, Def, FragmentDef, children_equal};
use crate::engine::Engine;
use crate::error::{Diagnostic, Error};
use crate::settings::Force;

/// Forwarded children of one source boundary.
#[derive(Debug)]
pub(crate) struct Envelope {
    /// Persistent root the true landing renders into.
    pub(crate) applied: AppliedId,
    /// Fragment of the latest forwarded children.
    pub(crate) target: Def,
}

/// A grounded marker.
#[derive(Debug)]
pub(crate) struct Landing {
    pub(crate) marker: AppliedId,
    pub(crate) boundary: BoundaryId,
    pub(crate) node: NodeId,
    /// False for the true landing.
    pub(crate) copy: bool,
    /// Still to be refreshed in the current pass.
    pub(crate) pending: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ContentClosure {
    pub(crate) envelope: Option<Envelope>,
    pub(crate) landings: Vec<Landing>,
}

impl ContentClosure {
    /// Latest forwarded children.
    pub(crate) fn children(&self) -> Option<Children> {
        match &self.envelope.as_ref()?.target {
            Def::Fragment(fragment) => Some(fragment.children.clone()),
            _ => None,
        }
    }

    fn has_true_landing(&self) -> bool {
        self.landings.iter().any(|l| !l.copy)
    }
}

/// A grounded landing, as reported by [`Engine::landings_of`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LandingInfo {
    /// The content boundary.
    pub boundary: BoundaryId,
    /// Its landing node.
    pub node: NodeId,
    /// False for the single identity-preserving landing.
    pub copy: bool,
}

impl Engine {
    /// Record new forwarded children for `p` and mark its landings for refresh.
    ///
    /// Boundaries between a landing and `p` that read forwarded content are
    /// scheduled so they update in this pass. Returns the children before the
    /// change, if `p` already had an envelope.
    pub(crate) fn closure_pre_refresh(
        &mut self,
        p: BoundaryId,
        children: Children,
    ) -> Result<Option<Children>, Error> {
        let content_mode = self.compare_modes(p).content;
        if !self.boundaries.contains(p) {
            return Ok(None);
        }
        let needs_root = self
            .source_parts(p)
            .is_some_and(|parts| parts.closure.envelope.is_none());
        let fresh_root = needs_root.then(|| self.applied.insert(Applied::root()));

        let target = Def::Fragment(FragmentDef {
            key: None,
            array: false,
            children: children.clone(),
        });
        let Some(parts) = self.source_parts_mut(p) else {
            return Ok(None);
        };
        let before = match (&mut parts.closure.envelope, fresh_root) {
            (Some(envelope), _) => {
                let before = parts_children(&envelope.target);
                envelope.target = target;
                before
            }
            (None, Some(applied)) => {
                parts.closure.envelope = Some(Envelope { applied, target });
                None
            }
            (None, None) => None,
        };

        let unchanged = before.as_ref().is_some_and(|before| {
            content_mode
                .depth()
                .is_some_and(|d| children_equal(before, &children, d))
        });
        if unchanged || parts.closure.landings.is_empty() {
            return Ok(before);
        }
        let Some(snapshot) = before.clone() else {
            return Ok(before);
        };
        let mut landing_boundaries = Vec::with_capacity(parts.closure.landings.len());
        for landing in &mut parts.closure.landings {
            landing.pending = true;
            landing_boundaries.push(landing.boundary);
        }

        let mut interested = Vec::new();
        for landing in landing_boundaries {
            let mut current = self.boundaries.get(landing).and_then(|b| b.parent);
            while let Some(c) = current {
                if c == p {
                    break;
                }
                if self.source_parts(c).is_some_and(|parts| parts.reads_content) {
                    interested.push(c);
                }
                current = self.boundaries.get(c).and_then(|b| b.parent);
            }
        }
        for b in interested {
            self.add_to_updates(
                b,
                UpdateBag {
                    forwarded: Some((snapshot.clone(), children.clone())),
                    ..UpdateBag::default()
                },
            )?;
        }
        Ok(before)
    }

    /// Ground a forward marker owned by the pass of `x`.
    ///
    /// Re-entry for an already grounded marker only refreshes under a subtree
    /// force; its node placement is handled by the pass itself. A marker with
    /// nothing to forward renders nothing.
    pub(crate) fn content_grounded(
        &mut self,
        x: BoundaryId,
        marker: AppliedId,
        node: NodeId,
        copy_requested: bool,
        force: Force,
    ) -> Result<Option<BoundaryId>, Error> {
        let existing = self
            .applied
            .get(marker)
            .and_then(|a| a.boundary)
            .filter(|l| self.boundaries.contains(*l));
        if let Some(l) = existing {
            if force == Force::SubtreeAll {
                self.update_boundary(l, force, None)?;
            }
            return Ok(Some(l));
        }

        let producer = self.author(x).filter(|p| {
            self.source_parts(*p)
                .is_some_and(|parts| parts.closure.envelope.is_some())
        });
        let Some(p) = producer else {
            tracing::debug!(boundary = ?x, "forward marker without content");
            self.diagnostics
                .push(Diagnostic::MissingContent { boundary: x });
            return Ok(None);
        };
        let Some(parts) = self.source_parts(p) else {
            return Ok(None);
        };
        let Some(envelope_root) = parts.closure.envelope.as_ref().map(|e| e.applied) else {
            return Ok(None);
        };
        let is_true = !copy_requested && !parts.closure.has_true_landing();

        let (inner, copy) = if is_true {
            (envelope_root, false)
        } else {
            (self.applied.insert(Applied::root()), true)
        };
        let l = self.boundaries.insert(Boundary::content(
            ContentParts {
                producer: p,
                marker,
                copy,
            },
            inner,
            x,
            node,
        ));
        if let Some(applied) = self.applied.get_mut(marker) {
            applied.boundary = Some(l);
        }
        if let Some(parts) = self.source_parts_mut(p) {
            parts.closure.landings.push(Landing {
                marker,
                boundary: l,
                node,
                copy,
                pending: false,
            });
        }
        tracing::trace!(producer = ?p, landing = ?l, copy, "content grounded");
        self.update_boundary(l, force, None)?;
        Ok(Some(l))
    }

    /// Release the landing of a marker that is no longer reachable.
    pub(crate) fn content_ungrounded(&mut self, marker: AppliedId, landing: BoundaryId) {
        let producer = match self.boundaries.get(landing).map(|b| &b.kind) {
            Some(BoundaryKind::Content(parts)) => parts.producer,
            _ => return,
        };
        if let Some(parts) = self.source_parts_mut(producer) {
            parts.closure.landings.retain(|l| l.marker != marker);
        }
        self.destroy_boundary(landing);
    }

    /// Refresh the landings of `p` still pending in this pass.
    pub(crate) fn closure_apply_refresh(&mut self, p: BoundaryId, force: Force) -> Result<(), Error> {
        let pending: Vec<BoundaryId> = match self.source_parts_mut(p) {
            Some(parts) => parts
                .closure
                .landings
                .iter_mut()
                .filter(|l| l.pending)
                .map(|l| {
                    l.pending = false;
                    l.boundary
                })
                .collect(),
            None => return Ok(()),
        };
        for l in pending {
            self.update_boundary(l, force, None)?;
        }
        Ok(())
    }

    /// Render a content boundary: the producer's envelope, or nothing once
    /// the producer has no envelope.
    pub(crate) fn refresh_content(&mut self, l: BoundaryId, force: Force) -> Result<(), Error> {
        let Some(boundary) = self.boundaries.get(l) else {
            return Ok(());
        };
        let BoundaryKind::Content(parts) = &boundary.kind else {
            return Ok(());
        };
        let producer = parts.producer;
        let target = match self.source_parts_mut(producer) {
            Some(parts) => {
                for landing in &mut parts.closure.landings {
                    if landing.boundary == l {
                        landing.pending = false;
                    }
                }
                parts.closure.envelope.as_ref().map(|e| e.target.clone())
            }
            None => None,
        };
        self.apply_pass(l, target.unwrap_or_else(Def::empty), force)?;
        if let Some(boundary) = self.boundaries.get_mut(l) {
            boundary.state = crate::boundary::MountState::Mounted;
        }
        Ok(())
    }

    /// Landings currently grounded for the closure of `p`.
    pub fn landings_of(&self, p: BoundaryId) -> Vec<LandingInfo> {
        self.source_parts(p)
            .map(|parts| {
                parts
                    .closure
                    .landings
                    .iter()
                    .map(|l| LandingInfo {
                        boundary: l.boundary,
                        node: l.node,
                        copy: l.copy,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn parts_children(target: &Def) -> Option<Children> {
    match target {
        Def::Fragment(fragment) => Some(Rc::clone(&fragment.children)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use core::cell::{Cell, RefCell};

    use super::*;
    use crate::component::{ChangeSet, Component, ComponentType, Effects, RenderCx, Rendered};
    use crate::error::RenderError;
    use crate::instruction::Change;
    use crate::settings::Settings;
    use crate::value::Value;
    use understory_view_tree::NodeKind;

    /// Passes its children on to `inner` without reading them.
    fn pass_through(name: &str, inner: Option<ComponentType>) -> ComponentType {
        ComponentType::function(name, move |_| {
            Ok(Rendered::tree(match &inner {
                Some(inner) => Def::from(Def::component(inner).children([Def::forward()])),
                None => Def::from(Def::element("frame").children([Def::forward()])),
            }))
        })
    }

    fn created_hosts(engine: &mut Engine) -> Vec<alloc::rc::Rc<str>> {
        engine
            .take_flushed()
            .into_iter()
            .filter(|i| i.change == Change::CREATE && i.kind == NodeKind::Host)
            .filter_map(|i| match i.def {
                Some(Def::Element(e)) => Some(e.tag),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn deep_forwarding_grounds_like_one_level() {
        let leaf = pass_through("leaf", None);
        let mut chain = leaf.clone();
        for _ in 0..3 {
            chain = pass_through("mid", Some(chain));
        }
        let content = || [Def::element("a"), Def::element("b")];

        let mut shallow = Engine::new(Settings::synchronous());
        shallow
            .render(Def::component(&leaf).children(content()))
            .unwrap();
        let mut deep = Engine::new(Settings::synchronous());
        deep.render(Def::component(&chain).children(content()))
            .unwrap();

        assert_eq!(created_hosts(&mut shallow), created_hosts(&mut deep));
        let producer = deep.boundaries_of(&chain)[0];
        let landings = deep.landings_of(producer);
        assert_eq!(landings.len(), 1);
        assert!(!landings[0].copy);
    }

    #[test]
    fn one_true_landing_and_independent_copies() {
        let renders = Rc::new(Cell::new(0_u32));
        let r = renders.clone();
        let counter = ComponentType::function("counter", move |_| {
            r.set(r.get() + 1);
            Ok(Rendered::tree(Def::element("count")))
        });
        let twice = ComponentType::function("twice", |_| {
            Ok(Rendered::tree(Def::fragment([
                Def::forward(),
                Def::forward_copy(),
                Def::forward(),
            ])))
        });

        let mut engine = Engine::new(Settings::synchronous());
        engine
            .render(Def::component(&twice).children([Def::component(&counter)]))
            .unwrap();
        let producer = engine.boundaries_of(&twice)[0];
        let landings = engine.landings_of(producer);
        assert_eq!(landings.len(), 3);
        assert_eq!(landings.iter().filter(|l| !l.copy).count(), 1, "one true landing");
        let counters = engine.boundaries_of(&counter);
        assert_eq!(counters.len(), 3, "each landing owns its own instance");
        assert_eq!(renders.get(), 3);

        // Bump the state of one copy: the others do not render.
        engine
            .set_state(counters[1], crate::Props::new().with("n", 1))
            .unwrap();
        assert_eq!(renders.get(), 4);
        assert_eq!(engine.boundaries_of(&counter), counters);
    }

    #[test]
    fn true_landing_keeps_forwarded_state_across_producer_renders() {
        let wrapper = ComponentType::function("wrapper", |_| {
            Ok(Rendered::tree(Def::element("box").children([Def::forward()])))
        });
        let leaf = ComponentType::function("leaf", |_| Ok(Rendered::tree(Def::text("leaf"))));
        let mut engine = Engine::new(Settings::synchronous());
        let tree = |label: &str| {
            Def::component(&wrapper)
                .prop("label", label)
                .children([Def::component(&leaf)])
        };
        engine.render(tree("a")).unwrap();
        let first = engine.boundaries_of(&leaf);
        engine.take_flushed();
        engine.render(tree("b")).unwrap();
        assert_eq!(engine.boundaries_of(&leaf), first, "same instance");
        assert!(
            engine
                .take_flushed()
                .iter()
                .all(|i| !i.change.intersects(Change::CREATE | Change::REMOVE))
        );
    }

    #[test]
    fn forward_without_producer_renders_nothing() {
        let mut engine = Engine::new(Settings::synchronous());
        engine
            .render(Def::element("div").children([Def::forward()]))
            .unwrap();
        assert!(matches!(
            engine.diagnostics(),
            [Diagnostic::MissingContent { .. }]
        ));
        let hosts = created_hosts(&mut engine);
        assert_eq!(hosts, vec![Rc::from("div")]);
    }

    #[test]
    fn removing_the_marker_destroys_forwarded_instances() {
        let leaf = ComponentType::function("leaf", |_| Ok(Rendered::tree(Def::text("x"))));
        let toggle = ComponentType::function("toggle", |cx| {
            let show = matches!(cx.props().get("show"), Some(Value::Bool(true)));
            Ok(Rendered::tree(if show { Def::forward() } else { Def::empty() }))
        });
        let mut engine = Engine::new(Settings::synchronous());
        let tree = |show: bool| {
            Def::component(&toggle)
                .prop("show", show)
                .children([Def::component(&leaf)])
        };
        engine.render(tree(true)).unwrap();
        assert_eq!(engine.boundaries_of(&leaf).len(), 1);
        let producer = engine.boundaries_of(&toggle)[0];

        engine.render(tree(false)).unwrap();
        assert!(engine.boundaries_of(&leaf).is_empty());
        assert!(engine.landings_of(producer).is_empty());

        // Grounding again starts fresh and claims the true landing.
        engine.render(tree(true)).unwrap();
        let landings = engine.landings_of(producer);
        assert_eq!(landings.len(), 1);
        assert!(!landings[0].copy);
    }

    /// Reads its forwarded children and lands them under a frame.
    struct Reader {
        renders: Rc<Cell<u32>>,
        updates: Rc<RefCell<Vec<ChangeSet>>>,
    }

    impl Component for Reader {
        fn render(&mut self, cx: &mut RenderCx<'_>) -> Result<Def, RenderError> {
            self.renders.set(self.renders.get() + 1);
            cx.children();
            Ok(Def::element("frame").children([Def::forward()]).into())
        }

        fn on_update(&mut self, changes: &ChangeSet, _: &mut Effects) {
            self.updates.borrow_mut().push(changes.clone());
        }
    }

    fn reader(renders: &Rc<Cell<u32>>, updates: &Rc<RefCell<Vec<ChangeSet>>>) -> ComponentType {
        let (renders, updates) = (renders.clone(), updates.clone());
        ComponentType::stateful("reader", move |_| Reader {
            renders: renders.clone(),
            updates: updates.clone(),
        })
    }

    fn label(color: &str) -> Def {
        Def::element("label").prop("color", color).into()
    }

    fn color_of(children: &Children) -> Option<&str> {
        match children.first() {
            Some(Def::Element(e)) => match e.props.get("color") {
                Some(Value::Str(color)) => Some(&**color),
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn reader_between_producer_and_landing_renders_once_per_content_change() {
        let renders = Rc::new(Cell::new(0_u32));
        let updates = Rc::new(RefCell::new(Vec::new()));
        let producer = pass_through("producer", Some(reader(&renders, &updates)));
        let tree = |color: &str| Def::component(&producer).children([label(color)]);

        let mut engine = Engine::new(Settings::synchronous());
        engine.render(tree("red")).unwrap();
        assert_eq!(renders.get(), 1);
        engine.take_flushed();

        engine.render(tree("blue")).unwrap();
        assert_eq!(renders.get(), 2);
        let out = engine.take_flushed();
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].kind, out[0].change), (NodeKind::Host, Change::UPDATE));
        assert!(matches!(&out[0].def, Some(Def::Element(e)) if &*e.tag == "label"));

        // The reader sees the producer's children, not its own marker.
        let updates = updates.borrow();
        assert_eq!(updates.len(), 1);
        let (before, after) = updates[0].forwarded.as_ref().unwrap();
        assert_eq!((color_of(before), color_of(after)), (Some("red"), Some("blue")));
        assert!(updates[0].content.is_none());

        // Same children again: nothing renders.
        drop(updates);
        engine.render(tree("blue")).unwrap();
        assert_eq!(renders.get(), 2);
        assert!(engine.take_flushed().is_empty());
    }

    #[test]
    fn own_forwarded_children_reach_on_update() {
        let renders = Rc::new(Cell::new(0_u32));
        let updates = Rc::new(RefCell::new(Vec::new()));
        let reader = reader(&renders, &updates);
        let tree = |color: &str| Def::component(&reader).children([label(color)]);

        let mut engine = Engine::new(Settings::synchronous());
        engine.render(tree("red")).unwrap();
        engine.render(tree("blue")).unwrap();
        assert_eq!(renders.get(), 2);

        let updates = updates.borrow();
        assert_eq!(updates.len(), 1);
        let (before, after) = updates[0].content.as_ref().unwrap();
        assert_eq!((color_of(before), color_of(after)), (Some("red"), Some("blue")));
        assert!(updates[0].props.is_none());
    }

    #[test]
    fn copies_pair_keys_only_within_their_own_landing() {
        let twice = ComponentType::function("twice", |_| {
            Ok(Rendered::tree(Def::fragment([
                Def::from(Def::element("left").children([Def::forward()])),
                Def::from(Def::element("right").children([Def::forward_copy()])),
            ])))
        });
        let tree = |keys: [&str; 2]| {
            Def::component(&twice).children(keys.map(|k| Def::from(Def::element("item").key(k))))
        };
        let mut engine = Engine::new(Settings::synchronous());
        engine.render(tree(["a", "b"])).unwrap();
        let producer = engine.boundaries_of(&twice)[0];
        let landings = engine.landings_of(producer);
        assert_eq!(landings.len(), 2);
        assert_eq!(created_hosts(&mut engine).len(), 6);
        let nodes = engine.view().len();

        engine.render(tree(["b", "a"])).unwrap();
        let out = engine.take_flushed();
        assert!(out.iter().all(|i| !i.change.intersects(Change::CREATE | Change::REMOVE)));
        assert!(out.iter().any(|i| i.change.contains(Change::MOVE)));
        assert_eq!(engine.view().len(), nodes);
        assert_eq!(engine.landings_of(producer), landings);
    }
}
