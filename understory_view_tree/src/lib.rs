// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_view_tree --heading-base-level=0

//! Understory View Tree: the structural node graph behind a retained UI.
//!
//! A reconciliation engine keeps a parallel structure that mirrors what exists in an
//! external visual backend (a DOM, a scene graph, a terminal buffer). This crate
//! provides that structure and nothing else.
//!
//! - [`Arena`]: a generational slot arena. Identifiers go stale when their slot is
//!   freed, so back-links between arenas never dangle silently.
//! - [`ViewTree`]: ordered parent/child links over [`NodeId`]s with a per-node payload,
//!   a [`NodeKind`], and an optional [`BackendHandle`].
//!
//! ## Transparent nodes
//!
//! Component boundaries, content landings and context markers have no backend
//! element of their own ([`NodeKind::is_transparent`]). Their children are inserted
//! into the nearest non-transparent ancestor. The lookups a backend needs follow
//! from that:
//!
//! - [`ViewTree::host_parent`]: where the content goes.
//! - [`ViewTree::insertion_point`]: the nearest following sibling that already exists
//!   in the backend, found by walking next siblings, descending into transparent
//!   nodes along their first-child chain and climbing out of transparent parents.
//! - [`ViewTree::top_hosts`]: what to detach when a transparent node is removed.
//!
//! ## Not a renderer
//!
//! Nothing here talks to a backend. Higher layers emit instructions naming
//! [`NodeId`]s and record the handles the backend returns.
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod arena;
mod tree;
mod types;

pub use arena::{Arena, ArenaId, RawId};
pub use tree::ViewTree;
pub use types::{BackendHandle, NodeId, NodeKind};
