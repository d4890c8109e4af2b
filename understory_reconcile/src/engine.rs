// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The engine: one root boundary, its tree, and everything that hangs off it.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{BorrowMutError, Ref, RefCell, RefMut};
use core::fmt;
use core::mem;

use hashbrown::HashMap;
use understory_view_tree::{Arena, NodeId, NodeKind, ViewTree};

use crate::applied::{Applied, AppliedId};
use crate::boundary::{Boundary, BoundaryId, BoundaryKind, MountState, UpdateBag};
use crate::component::{ComponentType, Rendered};
use crate::context::ContextRegistry;
use crate::def::Def;
use crate::error::{Diagnostic, Error};
use crate::instruction::{Instruction, NodeData, Renderer};
use crate::reconcile::Unapplied;
use crate::scheduler::{Clock, HostServices, ManualClock};
use crate::settings::{Force, Settings, SettingsPatch};
use crate::value::{Props, Value};

/// A reconciliation engine.
///
/// Owns a [`ViewTree`] whose synthetic root holds the node of a root
/// boundary. [`Engine::render`] hands that boundary a new definition tree;
/// the scheduler then computes updates and delivers instructions according to
/// [`Settings::update_timing`] and [`Settings::render_timing`].
///
/// ## Example
///
/// ```rust
/// use understory_reconcile::{Change, Def, Engine, Settings};
///
/// let mut engine = Engine::new(Settings::synchronous());
/// engine
///     .render(Def::element("ul").children([Def::element("li").key("a")]))
///     .unwrap();
/// let created = engine.take_flushed();
/// assert_eq!(created.len(), 2);
/// assert!(created.iter().all(|i| i.change == Change::CREATE));
/// ```
pub struct Engine {
    pub(crate) settings: Settings,
    pub(crate) tree: ViewTree<NodeData>,
    pub(crate) applied: Arena<AppliedId, Applied>,
    pub(crate) boundaries: Arena<BoundaryId, Boundary>,
    /// Reused entries a failed pass paired but never applied.
    pub(crate) unapplied: HashMap<AppliedId, Unapplied>,
    pub(crate) host: HostServices,
    pub(crate) contexts: ContextRegistry,
    /// Contexts handed in from outside, typically by an outer engine.
    pub(crate) outer_contexts: BTreeMap<Rc<str>, Value>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) root: BoundaryId,
    /// What the root boundary renders.
    pub(crate) root_def: Def,
    root_type: ComponentType,
    /// Node of the outer engine this engine is attached at.
    pub(crate) attachment: Option<NodeId>,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) renderer: Option<Box<dyn Renderer>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("tree", &self.tree)
            .field("applied", &self.applied)
            .field("boundaries", &self.boundaries)
            .field("unapplied", &self.unapplied.len())
            .field("host", &self.host)
            .field("contexts", &self.contexts)
            .field("outer_contexts", &self.outer_contexts)
            .field("diagnostics", &self.diagnostics)
            .field("root", &self.root)
            .field("attachment", &self.attachment)
            .finish_non_exhaustive()
    }
}

fn root_component() -> ComponentType {
    ComponentType::function("root", |cx| {
        Ok(Rendered::tree(cx.engine.root_def.clone()))
    })
}

/// Insert a fresh root boundary under the tree root.
fn install_root(
    tree: &mut ViewTree<NodeData>,
    applied: &mut Arena<AppliedId, Applied>,
    boundaries: &mut Arena<BoundaryId, Boundary>,
    root_type: &ComponentType,
) -> BoundaryId {
    let parent = tree.root();
    let node = tree.insert(parent, 0, NodeKind::Boundary, NodeData::default());
    let inner = applied.insert(Applied::root());
    let root = boundaries.insert(Boundary::source(
        root_type,
        Props::new(),
        inner,
        None,
        node,
        None,
    ));
    if let Some(data) = tree.data_mut(node) {
        data.source = Some(root);
    }
    root
}

impl Engine {
    /// An engine whose timers read a [`ManualClock`] that stays at zero
    /// unless advanced through a clone passed to [`Engine::with_clock`].
    pub fn new(settings: Settings) -> Self {
        Self::with_clock(settings, Rc::new(ManualClock::new()))
    }

    /// An engine driven by `clock`.
    pub fn with_clock(settings: Settings, clock: Rc<dyn Clock>) -> Self {
        let mut tree = ViewTree::new(NodeData::default());
        let mut applied = Arena::new();
        let mut boundaries = Arena::new();
        let root_type = root_component();
        let root = install_root(&mut tree, &mut applied, &mut boundaries, &root_type);
        Self {
            settings,
            tree,
            applied,
            boundaries,
            unapplied: HashMap::new(),
            host: HostServices::default(),
            contexts: ContextRegistry::default(),
            outer_contexts: BTreeMap::new(),
            diagnostics: Vec::new(),
            root,
            root_def: Def::empty(),
            root_type,
            attachment: None,
            clock,
            renderer: None,
        }
    }

    /// Render `def` at the root.
    ///
    /// The root always re-renders; everything below is reconciled against
    /// what the previous call rendered.
    pub fn render(&mut self, def: impl Into<Def>) -> Result<(), Error> {
        self.root_def = def.into();
        let root = self.root;
        self.add_to_updates(root, UpdateBag::forced(Force::All))
    }

    /// Tear the whole tree down and start over with an empty root.
    pub fn unmount(&mut self) -> Result<(), Error> {
        let root = self.root;
        if let Some(node) = self.boundaries.get(root).map(|b| b.node) {
            self.remove_node(node);
        }
        self.destroy_boundary(root);
        self.root_def = Def::empty();
        self.root = install_root(
            &mut self.tree,
            &mut self.applied,
            &mut self.boundaries,
            &self.root_type,
        );
        tracing::debug!("engine unmounted");
        self.schedule_render()
    }

    /// Send instructions to `renderer` from now on.
    pub fn set_renderer(&mut self, renderer: impl Renderer + 'static) {
        self.renderer = Some(Box::new(renderer));
    }

    /// Instructions delivered while no renderer was set.
    pub fn take_flushed(&mut self) -> Vec<Instruction> {
        mem::take(&mut self.host.flushed)
    }

    /// Non-fatal anomalies recorded so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Drain the recorded diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        mem::take(&mut self.diagnostics)
    }

    /// The engine's settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Apply loosely typed overrides to the settings. Invalid values fall
    /// back to the defaults.
    pub fn apply_settings(&mut self, patch: &SettingsPatch) {
        self.settings.apply_patch(patch);
    }

    /// The tree mirroring the backend.
    pub fn view(&self) -> &ViewTree<NodeData> {
        &self.tree
    }

    /// The root boundary.
    pub fn root_boundary(&self) -> BoundaryId {
        self.root
    }

    /// Live boundaries instantiating `component`, in tree order.
    pub fn boundaries_of(&self, component: &ComponentType) -> Vec<BoundaryId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(b) = stack.pop() {
            let Some(boundary) = self.boundaries.get(b) else {
                continue;
            };
            if let BoundaryKind::Source(parts) = &boundary.kind {
                if parts.component.id() == component.id() {
                    out.push(b);
                }
            }
            stack.extend(boundary.nested.iter().rev().copied());
        }
        out
    }

    /// Lifecycle state of a boundary; `None` once destroyed.
    pub fn boundary_state(&self, b: BoundaryId) -> Option<MountState> {
        self.boundaries.get(b).map(|x| x.state)
    }

    /// Tree node of a boundary.
    pub fn boundary_node(&self, b: BoundaryId) -> Option<NodeId> {
        self.boundaries.get(b).map(|x| x.node)
    }

    /// Boundary whose pass created `b`.
    pub fn boundary_parent(&self, b: BoundaryId) -> Option<BoundaryId> {
        self.boundaries.get(b)?.parent
    }

    /// Current properties of a source boundary.
    pub fn props_of(&self, b: BoundaryId) -> Option<Props> {
        self.source_parts(b).map(|parts| parts.props.clone())
    }

    /// Current state of a source boundary.
    pub fn state_of(&self, b: BoundaryId) -> Option<Props> {
        self.source_parts(b).map(|parts| parts.state.clone())
    }

    /// Latest definition applied to a tree node.
    pub fn def_of(&self, node: NodeId) -> Option<&Def> {
        let id = self.tree.data(node)?.applied?;
        self.applied.get(id).map(|a| &a.def)
    }

    /// Node of the outer engine this engine is attached at, if nested.
    pub fn attachment(&self) -> Option<NodeId> {
        self.attachment
    }
}

/// A shared engine that can be attached inside another engine's tree with
/// [`Def::nested`].
#[derive(Clone)]
pub struct NestedEngine(Rc<RefCell<Engine>>);

impl fmt::Debug for NestedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(engine) => f
                .debug_struct("NestedEngine")
                .field("attachment", &engine.attachment)
                .finish_non_exhaustive(),
            Err(_) => f.write_str("NestedEngine(<borrowed>)"),
        }
    }
}

impl NestedEngine {
    /// Wrap an engine for nesting.
    pub fn new(engine: Engine) -> Self {
        Self(Rc::new(RefCell::new(engine)))
    }

    /// Shared access.
    ///
    /// # Panics
    ///
    /// If the engine is mutably borrowed.
    pub fn engine(&self) -> Ref<'_, Engine> {
        self.0.borrow()
    }

    /// Exclusive access.
    ///
    /// # Panics
    ///
    /// If the engine is borrowed.
    pub fn engine_mut(&self) -> RefMut<'_, Engine> {
        self.0.borrow_mut()
    }

    pub(crate) fn try_borrow_mut(&self) -> Result<RefMut<'_, Engine>, BorrowMutError> {
        self.0.try_borrow_mut()
    }

    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}
