// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Named contexts: provider registrations and subscriber interest.
//!
//! Providers are context-marker nodes in the tree. A boundary reading a
//! context resolves it by walking up from its own node to the nearest marker
//! of that name, falling back to the values handed in from an outer engine.
//! Reading subscribes the boundary by name; a provider appearing, changing or
//! going away schedules every subscriber of that name, and each one then
//! re-resolves and compares under its own context comparison mode.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};
use understory_view_tree::{NodeId, NodeKind};

use crate::boundary::{BoundaryId, UpdateBag};
use crate::def::{Def, NestedDef, ProviderDef};
use crate::engine::Engine;
use crate::error::Error;
use crate::value::Value;

/// Per-engine registry of providers and subscribers.
#[derive(Debug, Default)]
pub(crate) struct ContextRegistry {
    providers: HashMap<Rc<str>, Vec<NodeId>>,
    subscribers: HashMap<Rc<str>, HashSet<BoundaryId>>,
}

impl ContextRegistry {
    pub(crate) fn register(&mut self, name: &Rc<str>, node: NodeId) {
        let nodes = self.providers.entry(name.clone()).or_default();
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }

    pub(crate) fn withdraw(&mut self, name: &str, node: NodeId) {
        if let Some(nodes) = self.providers.get_mut(name) {
            nodes.retain(|n| *n != node);
            if nodes.is_empty() {
                self.providers.remove(name);
            }
        }
    }

    pub(crate) fn subscribe(&mut self, name: &Rc<str>, b: BoundaryId) {
        self.subscribers.entry(name.clone()).or_default().insert(b);
    }

    pub(crate) fn unsubscribe(&mut self, name: &str, b: BoundaryId) {
        if let Some(set) = self.subscribers.get_mut(name) {
            set.remove(&b);
            if set.is_empty() {
                self.subscribers.remove(name);
            }
        }
    }

    pub(crate) fn subscribers(&self, name: &str) -> Vec<BoundaryId> {
        self.subscribers
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn providers(&self, name: &str) -> &[NodeId] {
        self.providers.get(name).map_or(&[], |nodes| &nodes[..])
    }
}

impl Engine {
    /// Value of `name` as seen from boundary `b`.
    pub(crate) fn resolve_context(&self, b: BoundaryId, name: &str) -> Option<Value> {
        let mut current = self.boundaries.get(b)?.node;
        while let Some(parent) = self.tree.parent_of(current) {
            if let Some(provider) = self.provider_at(parent) {
                if &*provider.name == name {
                    return Some(provider.value.clone());
                }
            }
            current = parent;
        }
        self.outer_contexts.get(name).cloned()
    }

    fn provider_at(&self, node: NodeId) -> Option<&ProviderDef> {
        if self.tree.kind(node) != Some(NodeKind::ContextMarker) {
            return None;
        }
        match self.def_of(node)? {
            Def::Provider(provider) => Some(provider),
            _ => None,
        }
    }

    /// Every context visible at `node`, the innermost provider winning.
    pub(crate) fn visible_contexts(&self, node: NodeId) -> BTreeMap<Rc<str>, Value> {
        let mut visible = BTreeMap::new();
        let mut current = node;
        while let Some(parent) = self.tree.parent_of(current) {
            if let Some(provider) = self.provider_at(parent) {
                visible
                    .entry(provider.name.clone())
                    .or_insert_with(|| provider.value.clone());
            }
            current = parent;
        }
        for (name, value) in &self.outer_contexts {
            visible
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        visible
    }

    /// Register a provider marker and notify subscribers if it is new or its
    /// value changed.
    pub(crate) fn provide(
        &mut self,
        node: NodeId,
        provider: &ProviderDef,
        before: Option<&Value>,
    ) -> Result<(), Error> {
        let changed = match before {
            None => {
                self.contexts.register(&provider.name, node);
                true
            }
            Some(before) => !self
                .settings
                .compare
                .context
                .depth()
                .is_some_and(|d| before.equal_at(&provider.value, d)),
        };
        if !changed {
            return Ok(());
        }
        tracing::trace!(context = &*provider.name, node = ?node, "context provided");
        self.notify_context(&provider.name);
        if before.is_some() {
            self.refresh_nested_below(node)?;
        }
        Ok(())
    }

    /// Schedule every subscriber of `name`.
    pub(crate) fn notify_context(&mut self, name: &str) {
        for b in self.contexts.subscribers(name) {
            self.queue_update(
                b,
                UpdateBag {
                    context: true,
                    ..UpdateBag::default()
                },
            );
        }
    }

    /// Hand the contexts visible at attachment points below `node` to their
    /// nested engines again.
    fn refresh_nested_below(&mut self, node: NodeId) -> Result<(), Error> {
        let attachments: Vec<(NodeId, NestedDef)> = self
            .tree
            .descendants(node)
            .into_iter()
            .filter(|n| self.tree.kind(*n) == Some(NodeKind::Nested))
            .filter_map(|n| match self.def_of(n)? {
                Def::Nested(nested) => Some((n, nested.clone())),
                _ => None,
            })
            .collect();
        for (at, nested) in attachments {
            let visible = self.visible_contexts(at);
            let Ok(mut inner) = nested.engine.try_borrow_mut() else {
                continue;
            };
            if inner.settings.inherit_outer_contexts {
                inner.set_outer_contexts(visible)?;
            }
        }
        Ok(())
    }

    /// Replace the contexts this engine sees from outside its own tree.
    ///
    /// Subscribers of every name whose value changed are scheduled.
    pub fn set_outer_contexts(&mut self, contexts: BTreeMap<Rc<str>, Value>) -> Result<(), Error> {
        let mut changed: Vec<Rc<str>> = Vec::new();
        for (name, value) in &contexts {
            let same = self
                .outer_contexts
                .get(name)
                .is_some_and(|old| old.equal_at(value, u32::MAX));
            if !same {
                changed.push(name.clone());
            }
        }
        for name in self.outer_contexts.keys() {
            if !contexts.contains_key(name) {
                changed.push(name.clone());
            }
        }
        self.outer_contexts = contexts;
        for name in changed {
            self.notify_context(&name);
        }
        self.kick()
    }

    /// Provider nodes currently registered under `name`.
    pub fn providers_of(&self, name: &str) -> &[NodeId] {
        self.contexts.providers(name)
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};

    use super::*;
    use crate::component::{ComponentType, Rendered};
    use crate::engine::NestedEngine;
    use crate::settings::Settings;

    fn reader(seen: &Rc<RefCell<Vec<Option<Value>>>>) -> ComponentType {
        let seen = seen.clone();
        ComponentType::function("reader", move |cx| {
            seen.borrow_mut().push(cx.context("theme"));
            Ok(Rendered::tree(Def::empty()))
        })
    }

    #[test]
    fn provider_change_updates_subscribers_only() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let read = reader(&seen);
        let bystander_renders = Rc::new(Cell::new(0_u32));
        let b = bystander_renders.clone();
        let bystander = ComponentType::function("bystander", move |_| {
            b.set(b.get() + 1);
            Ok(Rendered::tree(Def::empty()))
        });
        // Keeps its subtree stable so only the context reaches the reader.
        let shell = ComponentType::function("shell", {
            let read = read.clone();
            let bystander = bystander.clone();
            move |_| {
                Ok(Rendered::tree(Def::fragment([
                    Def::component(&read),
                    Def::component(&bystander),
                ])))
            }
        });
        let tree = |theme: &str| Def::provider("theme", theme).children([Def::component(&shell)]);

        let mut engine = Engine::new(Settings::synchronous());
        engine.render(tree("dark")).unwrap();
        assert_eq!(engine.providers_of("theme").len(), 1);
        engine.render(tree("light")).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2, "the reader rendered again for the new value");
        assert!(matches!(&seen[1], Some(Value::Str(s)) if &**s == "light"));
        assert_eq!(bystander_renders.get(), 1);
    }

    #[test]
    fn innermost_provider_wins_and_removal_falls_back() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let read = reader(&seen);
        let mut engine = Engine::new(Settings::synchronous());
        engine
            .render(Def::provider("theme", "outer").children([
                Def::provider("theme", "inner").children([Def::component(&read)]),
            ]))
            .unwrap();
        engine
            .render(Def::provider("theme", "outer").children([Def::component(&read)]))
            .unwrap();
        let seen = seen.borrow();
        assert!(matches!(&seen[0], Some(Value::Str(s)) if &**s == "inner"));
        assert!(matches!(seen.last(), Some(Some(Value::Str(s))) if &**s == "outer"));
    }

    #[test]
    fn nested_engine_sees_contexts_around_its_attachment() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let read = reader(&seen);
        let nested = NestedEngine::new(Engine::new(Settings::synchronous()));
        nested.engine_mut().render(Def::component(&read)).unwrap();
        assert!(matches!(seen.borrow().last(), Some(None)));

        let mut outer = Engine::new(Settings::synchronous());
        outer
            .render(Def::provider("theme", "dark").children([Def::nested(&nested)]))
            .unwrap();
        assert!(matches!(seen.borrow().last(), Some(Some(Value::Str(s))) if &**s == "dark"));
        assert!(nested.engine().attachment().is_some());

        outer
            .render(Def::provider("theme", "light").children([Def::nested(&nested)]))
            .unwrap();
        assert!(matches!(seen.borrow().last(), Some(Some(Value::Str(s))) if &**s == "light"));

        outer.render(Def::empty()).unwrap();
        assert!(nested.engine().attachment().is_none());
    }

    #[test]
    fn nested_engine_can_opt_out_of_outer_contexts() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let read = reader(&seen);
        let mut settings = Settings::synchronous();
        settings.inherit_outer_contexts = false;
        let nested = NestedEngine::new(Engine::new(settings));
        nested.engine_mut().render(Def::component(&read)).unwrap();

        let mut outer = Engine::new(Settings::synchronous());
        outer
            .render(Def::provider("theme", "dark").children([Def::nested(&nested)]))
            .unwrap();
        assert!(seen.borrow().iter().all(Option::is_none));
    }
}
