// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors and non-fatal diagnostics.

use alloc::rc::Rc;
use alloc::string::String;

use understory_view_tree::NodeId;

use crate::boundary::BoundaryId;

/// Error raised by component code.
///
/// Component errors are never swallowed: they abort the current flush and
/// surface at the call that triggered it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RenderError {
    message: String,
}

impl RenderError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned by engine entry points.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A component's render function failed.
    #[error("component `{component}` failed to render")]
    Render {
        /// Name of the failing component type.
        component: Rc<str>,
        /// What the component reported.
        source: RenderError,
    },
}

/// A non-fatal anomaly observed while reconciling.
///
/// None of these interrupt a pass; they are recorded and logged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// A component kept re-dirtying itself while rendering; the last output was kept.
    RenderLoop {
        /// The looping boundary.
        boundary: BoundaryId,
        /// Its component name.
        component: Rc<str>,
        /// Renders performed in that update call.
        renders: u32,
    },
    /// A forwarded-content marker with no content to forward rendered nothing.
    MissingContent {
        /// The boundary whose output contained the marker.
        boundary: BoundaryId,
    },
    /// A nested engine was already borrowed when its attachment point was applied.
    NestedEngineBusy {
        /// The attachment node in this engine's tree.
        node: NodeId,
    },
}
