// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_reconcile --heading-base-level=0

//! Understory Reconcile: a retained-mode reconciliation engine.
//!
//! Applications describe what they want as immutable [`Def`] trees. The
//! [`Engine`] pairs each new tree with what it committed last time, keeps the
//! committed state in a [`ViewTree`], and emits the difference as a stream of
//! [`Instruction`]s for a backend [`Renderer`].
//!
//! ## Pieces
//!
//! - Definitions ([`Def`]): elements, text, foreign elements, portals,
//!   component instances, forwarded-content markers, context providers,
//!   fragments, arrays, and nested engines.
//! - Boundaries: every component instance owns one. A boundary re-renders
//!   when its properties, state, forwarded children, or a context it read
//!   change under its [`CompareModes`], unless [`Component::should_update`]
//!   vetoes. Re-renders requested while rendering are bounded per update.
//! - Content forwarding: children handed to a component land wherever its
//!   output places [`Def::forward`], at any depth of pass-through components.
//!   The first landing carries the committed state; later ones are copies.
//! - Scheduling: updates are deduplicated, processed ancestors first, and
//!   delivered in batches on two timers ([`Settings::update_timing`] and
//!   [`Settings::render_timing`]) driven by a [`Clock`].
//! - Contexts: named values provided by [`Def::provider`] and read through
//!   [`RenderCx::context`]. A [`NestedEngine`] attached in the tree sees the
//!   contexts around its attachment point.
//!
//! ## Instruction order
//!
//! Within one delivery, removals come first, then moves in reverse tree
//! order, then creations and updates in tree order. Each creation can thus
//! find its insertion point among nodes that already exist in the backend.
//!
//! ## Example
//!
//! ```rust
//! use understory_reconcile::{Change, ComponentType, Def, Engine, Rendered, Settings};
//!
//! let greeting = ComponentType::function("greeting", |cx| {
//!     let name = cx.props().get("name").cloned();
//!     Ok(Rendered::tree(Def::element("p").children([Def::forward()]).prop(
//!         "title",
//!         name.unwrap_or_else(|| "nobody".into()),
//!     )))
//! });
//!
//! let mut engine = Engine::new(Settings::synchronous());
//! engine
//!     .render(Def::component(&greeting).prop("name", "Ada").children([Def::text("hi")]))
//!     .unwrap();
//! let first = engine.take_flushed();
//! assert_eq!(first.iter().filter(|i| i.change == Change::CREATE).count(), 2);
//!
//! // Same definitions again: nothing to do.
//! engine
//!     .render(Def::component(&greeting).prop("name", "Ada").children([Def::text("hi")]))
//!     .unwrap();
//! assert!(engine.take_flushed().is_empty());
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod applied;
mod boundary;
mod closure;
mod component;
mod context;
mod def;
mod engine;
mod error;
mod instruction;
mod reconcile;
mod scheduler;
mod settings;
mod value;

#[cfg(test)]
mod testing;

pub use boundary::{BoundaryId, MountState};
pub use closure::LandingInfo;
pub use component::{
    ChangeSet, Component, ComponentType, Effects, RenderCx, RenderFn, Rendered,
};
pub use def::{
    Children, ComponentDef, Def, ElementDef, ForeignDef, ForwardDef, FragmentDef, Key, NestedDef,
    PortalDef, ProviderDef, TextDef,
};
pub use engine::{Engine, NestedEngine};
pub use error::{Diagnostic, Error, RenderError};
pub use instruction::{Change, Instruction, NodeData, Renderer};
pub use scheduler::{Clock, DelayedTask, ManualClock, UpdateSummary};
pub use settings::{
    ArrayWideKeys, CompareModes, Force, MAX_RERENDER_LIMIT, Settings, SettingsPatch, Timing,
    UnkeyedReuse,
};
pub use value::{Callback, Comparison, PropDiff, Props, Value};

pub use understory_view_tree::{BackendHandle, NodeId, NodeKind, ViewTree};
