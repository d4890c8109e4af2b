// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The component contract.
//!
//! A [`ComponentType`] is either a pure function of its render context or a
//! factory for stateful [`Component`] objects. Both render into a [`Def`] tree.
//! Hooks that run after the backend has been updated receive [`Effects`] to
//! request further work; the engine routes those requests through its
//! scheduler once the hook returns.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::boundary::{BoundaryId, BoundaryKind};
use crate::def::{Children, Def};
use crate::engine::Engine;
use crate::error::RenderError;
use crate::settings::{CompareModes, Force};
use crate::value::{Props, Value};

/// Render function of a function component.
pub type RenderFn = Rc<dyn Fn(&mut RenderCx<'_>) -> Result<Rendered, RenderError>>;

/// What a function component returns.
pub enum Rendered {
    /// A definition tree.
    Tree(Def),
    /// A replacement render function, called immediately and on every later
    /// render.
    Lazy(RenderFn),
}

impl Rendered {
    /// Wrap anything that converts into a definition.
    pub fn tree(def: impl Into<Def>) -> Self {
        Self::Tree(def.into())
    }

    /// Wrap a replacement render function.
    pub fn lazy(f: impl Fn(&mut RenderCx<'_>) -> Result<Self, RenderError> + 'static) -> Self {
        Self::Lazy(Rc::new(f))
    }
}

impl From<Def> for Rendered {
    fn from(def: Def) -> Self {
        Self::Tree(def)
    }
}

impl fmt::Debug for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree(def) => f.debug_tuple("Tree").field(def).finish(),
            Self::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

/// What changed since a boundary last rendered, with before and after values.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    /// Properties from the parent.
    pub props: Option<(Props, Props)>,
    /// Internal state.
    pub state: Option<(Props, Props)>,
    /// Context values read during the last render: name, before, after.
    pub context: Vec<(Rc<str>, Option<Value>, Option<Value>)>,
    /// Forwarded children, reported only to components that read them.
    pub content: Option<(Children, Children)>,
    /// A producer's forwarded children, before and after, when content
    /// grounded below this boundary changed.
    pub forwarded: Option<(Children, Children)>,
}

impl ChangeSet {
    /// Returns true if no aspect changed.
    pub fn is_empty(&self) -> bool {
        self.props.is_none()
            && self.state.is_none()
            && self.context.is_empty()
            && self.content.is_none()
            && self.forwarded.is_none()
    }
}

/// A stateful component instance.
///
/// Only [`Component::render`] is required. Hooks default to doing nothing.
pub trait Component {
    /// Produce the definition tree for the current properties and state.
    fn render(&mut self, cx: &mut RenderCx<'_>) -> Result<Def, RenderError>;

    /// Veto (`Some(false)`) or force (`Some(true)`) a render of a mounted
    /// instance. `None` defers to the comparison result.
    fn should_update(&mut self, changes: &ChangeSet) -> Option<bool> {
        let _ = changes;
        None
    }

    /// Called synchronously right before a mounted instance re-renders.
    fn before_update(&mut self, changes: &ChangeSet) {
        let _ = changes;
    }

    /// Called after the first render reached the backend.
    fn on_mount(&mut self, fx: &mut Effects) {
        let _ = fx;
    }

    /// Called after a re-render reached the backend.
    fn on_update(&mut self, changes: &ChangeSet, fx: &mut Effects) {
        let _ = (changes, fx);
    }

    /// Called after the instance moved among its siblings.
    fn on_moved(&mut self, fx: &mut Effects) {
        let _ = fx;
    }

    /// Called instead of the two separate hooks when a re-render and a move
    /// happened in the same pass.
    fn on_update_and_move(&mut self, changes: &ChangeSet, fx: &mut Effects) {
        self.on_update(changes, fx);
        self.on_moved(fx);
    }

    /// Called synchronously when the instance is destroyed.
    fn before_unmount(&mut self) {}

    /// Comparison modes for this instance. `None` defers to the component
    /// type, then to the engine settings.
    fn compare_modes(&self) -> Option<CompareModes> {
        None
    }

    /// Whether changes of the forwarded children warrant a render even when
    /// the instance never calls [`RenderCx::children`].
    fn reads_content(&self) -> bool {
        false
    }
}

/// Adapter giving function components the [`Component`] interface.
///
/// The first render may return [`Rendered::Lazy`]: the function is replaced
/// and called again immediately. A second lazy result renders nothing.
struct FunctionComponent {
    render: RenderFn,
}

impl Component for FunctionComponent {
    fn render(&mut self, cx: &mut RenderCx<'_>) -> Result<Def, RenderError> {
        match (self.render)(cx)? {
            Rendered::Tree(def) => Ok(def),
            Rendered::Lazy(next) => {
                self.render = next;
                match (self.render)(cx)? {
                    Rendered::Tree(def) => Ok(def),
                    Rendered::Lazy(_) => {
                        tracing::debug!("lazy render function returned another function");
                        Ok(Def::empty())
                    }
                }
            }
        }
    }
}

type Factory = Rc<dyn Fn(&Props) -> Box<dyn Component>>;

#[derive(Clone)]
enum Kind {
    Function(RenderFn),
    Stateful(Factory),
}

#[derive(Clone)]
struct ComponentSpec {
    name: Rc<str>,
    kind: Kind,
    compare: Option<CompareModes>,
    max_rerenders: Option<u32>,
}

/// A component type: what [`Def::component`] instantiates.
///
/// Identity is the shared allocation: clones are the same type, two calls to
/// a constructor are different types even with the same name.
#[derive(Clone)]
pub struct ComponentType(Rc<ComponentSpec>);

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentType").field(&self.0.name).finish()
    }
}

impl ComponentType {
    /// A function component.
    pub fn function(
        name: &str,
        render: impl Fn(&mut RenderCx<'_>) -> Result<Rendered, RenderError> + 'static,
    ) -> Self {
        Self::from_kind(name, Kind::Function(Rc::new(render)))
    }

    /// A stateful component built by `factory` from its initial properties.
    pub fn stateful<C: Component + 'static>(
        name: &str,
        factory: impl Fn(&Props) -> C + 'static,
    ) -> Self {
        Self::from_kind(
            name,
            Kind::Stateful(Rc::new(move |props| Box::new(factory(props)))),
        )
    }

    fn from_kind(name: &str, kind: Kind) -> Self {
        Self(Rc::new(ComponentSpec {
            name: name.into(),
            kind,
            compare: None,
            max_rerenders: None,
        }))
    }

    /// Override the engine-wide comparison modes for this type.
    #[must_use]
    pub fn with_compare(self, modes: CompareModes) -> Self {
        let mut spec = (*self.0).clone();
        spec.compare = Some(modes);
        Self(Rc::new(spec))
    }

    /// Override the engine-wide re-render bound for this type.
    #[must_use]
    pub fn with_max_rerenders(self, bound: u32) -> Self {
        let mut spec = (*self.0).clone();
        spec.max_rerenders = Some(bound);
        Self(Rc::new(spec))
    }

    /// Component name, used in diagnostics and errors.
    pub fn name(&self) -> &Rc<str> {
        &self.0.name
    }

    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }

    pub(crate) fn compare(&self) -> Option<CompareModes> {
        self.0.compare
    }

    pub(crate) fn max_rerenders(&self) -> Option<u32> {
        self.0.max_rerenders
    }

    pub(crate) fn instantiate(&self, props: &Props) -> Box<dyn Component> {
        match &self.0.kind {
            Kind::Function(render) => Box::new(FunctionComponent {
                render: render.clone(),
            }),
            Kind::Stateful(factory) => factory(props),
        }
    }
}

/// Access to the engine while a component renders.
pub struct RenderCx<'a> {
    pub(crate) engine: &'a mut Engine,
    pub(crate) boundary: BoundaryId,
    pub(crate) read_children: bool,
}

impl fmt::Debug for RenderCx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCx")
            .field("boundary", &self.boundary)
            .finish_non_exhaustive()
    }
}

impl<'a> RenderCx<'a> {
    pub(crate) fn new(engine: &'a mut Engine, boundary: BoundaryId) -> Self {
        Self {
            engine,
            boundary,
            read_children: false,
        }
    }

    /// The rendering boundary.
    pub fn id(&self) -> BoundaryId {
        self.boundary
    }

    /// Current properties.
    pub fn props(&self) -> Props {
        self.engine
            .source_parts(self.boundary)
            .map(|s| s.props.clone())
            .unwrap_or_default()
    }

    /// Forwarded children as handed in by the parent.
    ///
    /// Reading them makes later changes of the forwarded children a reason to
    /// render again.
    pub fn children(&mut self) -> Children {
        self.read_children = true;
        self.engine
            .source_parts(self.boundary)
            .and_then(|s| s.closure.children())
            .unwrap_or_else(|| Rc::from(Vec::new()))
    }

    /// Current internal state.
    pub fn state(&self) -> Props {
        self.engine
            .source_parts(self.boundary)
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    /// Replace the internal state and render again within this update call.
    pub fn set_state(&mut self, state: Props) {
        if let Some(parts) = self.engine.source_parts_mut(self.boundary) {
            parts.state = state;
            parts.rerender_requested = true;
        }
    }

    /// Render again within this update call.
    pub fn request_update(&mut self) {
        if let Some(parts) = self.engine.source_parts_mut(self.boundary) {
            parts.rerender_requested = true;
        }
    }

    /// Read a named context and subscribe to its changes.
    pub fn context(&mut self, name: &str) -> Option<Value> {
        let name: Rc<str> = name.into();
        let value = self.engine.resolve_context(self.boundary, &name);
        self.engine.contexts.subscribe(&name, self.boundary);
        if let Some(parts) = self.engine.source_parts_mut(self.boundary) {
            parts.contexts.insert(name, value.clone());
        }
        value
    }
}

/// Requests collected from a lifecycle hook.
#[derive(Debug, Default)]
pub struct Effects {
    pub(crate) state: Option<Props>,
    pub(crate) update: Option<Force>,
}

impl Effects {
    /// Replace the instance's state; schedules an update.
    pub fn set_state(&mut self, state: Props) {
        self.state = Some(state);
    }

    /// Schedule a forced update of the instance.
    pub fn request_update(&mut self) {
        self.request_forced_update(Force::All);
    }

    /// Schedule an update with the given force.
    pub fn request_forced_update(&mut self, force: Force) {
        self.update = Some(self.update.map_or(force, |f| f.max(force)));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.is_none() && self.update.is_none()
    }
}

/// Context snapshot of a source boundary: values read during its last render.
pub(crate) type ContextSnapshot = BTreeMap<Rc<str>, Option<Value>>;

impl Engine {
    pub(crate) fn source_parts(&self, b: BoundaryId) -> Option<&crate::boundary::SourceParts> {
        match &self.boundaries.get(b)?.kind {
            BoundaryKind::Source(parts) => Some(parts),
            BoundaryKind::Content(_) => None,
        }
    }

    pub(crate) fn source_parts_mut(
        &mut self,
        b: BoundaryId,
    ) -> Option<&mut crate::boundary::SourceParts> {
        match &mut self.boundaries.get_mut(b)?.kind {
            BoundaryKind::Source(parts) => Some(parts),
            BoundaryKind::Content(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use core::cell::Cell;

    #[test]
    fn lazy_function_renders_twice_then_reuses_replacement() {
        let outer_calls = Rc::new(Cell::new(0_u32));
        let inner_calls = Rc::new(Cell::new(0_u32));
        let (o, i) = (outer_calls.clone(), inner_calls.clone());
        let lazy = ComponentType::function("lazy", move |_| {
            o.set(o.get() + 1);
            let i = i.clone();
            Ok(Rendered::lazy(move |_| {
                i.set(i.get() + 1);
                Ok(Rendered::tree(Def::text("hi")))
            }))
        });

        let mut engine = Engine::new(Settings::synchronous());
        engine.render(Def::component(&lazy)).unwrap();
        assert_eq!((outer_calls.get(), inner_calls.get()), (1, 1));

        let b = engine.boundaries_of(&lazy)[0];
        engine.request_update(b, Force::All).unwrap();
        assert_eq!(
            (outer_calls.get(), inner_calls.get()),
            (1, 2),
            "the replacement renders from now on"
        );
    }

    #[test]
    fn type_identity_is_the_allocation() {
        let a = ComponentType::function("same", |_| Ok(Rendered::tree(Def::empty())));
        let b = ComponentType::function("same", |_| Ok(Rendered::tree(Def::empty())));
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
        let bounded = a.with_max_rerenders(3);
        assert_eq!(bounded.max_rerenders(), Some(3));
        assert_eq!(&**bounded.name(), "same");
    }

    #[test]
    fn effects_keep_the_strongest_force() {
        let mut fx = Effects::default();
        assert!(fx.is_empty());
        fx.request_forced_update(Force::SubtreeAll);
        fx.request_update();
        assert_eq!(fx.update, Some(Force::SubtreeAll));
    }
}
