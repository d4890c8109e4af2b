// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration.
//!
//! [`Settings`] is a plain struct with sensible defaults. Loosely typed input
//! (for example values read from a host configuration file) goes through
//! [`SettingsPatch`]; invalid entries fall back to the defaults instead of
//! failing.

use crate::value::Comparison;

/// Upper limit accepted for [`Settings::max_rerenders`] through a patch.
pub const MAX_RERENDER_LIMIT: u32 = 64;

/// When a scheduled phase runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timing {
    /// Run synchronously at the point of request.
    Sync,
    /// Run once the given number of milliseconds elapsed. Zero means "as soon
    /// as the host event loop gets control back".
    After(u32),
}

impl Timing {
    /// Convert a loosely typed delay: negative means synchronous, values that
    /// do not fit fall back to `default`.
    pub fn from_millis(ms: i64, default: Self) -> Self {
        if ms < 0 {
            return Self::Sync;
        }
        u32::try_from(ms).map(Self::After).unwrap_or(default)
    }
}

/// Comparison mode per changed aspect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CompareModes {
    /// Properties handed down by the parent.
    pub props: Comparison,
    /// Internal state.
    pub state: Comparison,
    /// Values read from named contexts.
    pub context: Comparison,
    /// Forwarded children.
    pub content: Comparison,
}

impl Default for CompareModes {
    fn default() -> Self {
        Self {
            props: Comparison::Shallow,
            state: Comparison::Shallow,
            context: Comparison::Shallow,
            content: Comparison::Deep,
        }
    }
}

/// Whether unkeyed component definitions may be paired with an unkeyed
/// sibling at a different position.
///
/// Host elements are always reusable across positions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum UnkeyedReuse {
    /// Reuse the first unused sibling with the same tag.
    #[default]
    AnyPosition,
    /// Components only reuse the sibling that sat at the same index.
    SamePositionForComponents,
}

/// Wide (scope-wide) key matching inside array fragments.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ArrayWideKeys {
    /// Arrays are always an isolated key scope.
    #[default]
    Never,
    /// Only arrays that are not nested inside another array match widely.
    OuterOnly,
    /// Every array matches widely.
    All,
}

/// Engine settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// When dirty boundaries are computed.
    pub update_timing: Timing,
    /// When accumulated instructions and lifecycle calls are flushed to the backend.
    pub render_timing: Timing,
    /// Additional renders allowed within one update call when rendering
    /// re-dirties the boundary.
    pub max_rerenders: u32,
    /// Default comparison modes.
    pub compare: CompareModes,
    /// Unkeyed sibling reuse policy.
    pub unkeyed_reuse: UnkeyedReuse,
    /// Search the whole scope for keyed matches outside arrays.
    pub wide_keys: bool,
    /// Wide matching inside arrays.
    pub array_wide_keys: ArrayWideKeys,
    /// Let a nested engine see the contexts provided around its attachment point.
    pub inherit_outer_contexts: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_timing: Timing::After(0),
            render_timing: Timing::After(0),
            max_rerenders: 1,
            compare: CompareModes::default(),
            unkeyed_reuse: UnkeyedReuse::default(),
            wide_keys: true,
            array_wide_keys: ArrayWideKeys::default(),
            inherit_outer_contexts: true,
        }
    }
}

impl Settings {
    /// Settings with both phases synchronous.
    pub fn synchronous() -> Self {
        Self {
            update_timing: Timing::Sync,
            render_timing: Timing::Sync,
            ..Self::default()
        }
    }

    /// Apply loosely typed overrides. Invalid values silently fall back to the defaults.
    pub fn apply_patch(&mut self, patch: &SettingsPatch) {
        let defaults = Self::default();
        if let Some(ms) = patch.update_delay_ms {
            self.update_timing = Timing::from_millis(ms, defaults.update_timing);
        }
        if let Some(ms) = patch.render_delay_ms {
            self.render_timing = Timing::from_millis(ms, defaults.render_timing);
        }
        if let Some(n) = patch.max_rerenders {
            self.max_rerenders = match u32::try_from(n) {
                Ok(n) if n <= MAX_RERENDER_LIMIT => n,
                _ => {
                    tracing::debug!(value = n, "invalid max_rerenders, using default");
                    defaults.max_rerenders
                }
            };
        }
        if let Some(wide) = patch.wide_keys {
            self.wide_keys = wide;
        }
        if let Some(inherit) = patch.inherit_outer_contexts {
            self.inherit_outer_contexts = inherit;
        }
    }
}

/// Loosely typed settings overrides.
#[derive(Clone, Debug, Default)]
pub struct SettingsPatch {
    /// Compute-phase delay; negative means synchronous.
    pub update_delay_ms: Option<i64>,
    /// Flush-phase delay; negative means synchronous.
    pub render_delay_ms: Option<i64>,
    /// Re-render bound; out-of-range values fall back to the default.
    pub max_rerenders: Option<i64>,
    /// See [`Settings::wide_keys`].
    pub wide_keys: Option<bool>,
    /// See [`Settings::inherit_outer_contexts`].
    pub inherit_outer_contexts: Option<bool>,
}

/// Forced update scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Force {
    /// Render only if something changed.
    #[default]
    None,
    /// Render this boundary regardless of changes.
    All,
    /// Render this boundary and every nested boundary.
    SubtreeAll,
}

impl Force {
    /// Force passed on to nested boundaries.
    pub const fn descend(self) -> Self {
        match self {
            Self::SubtreeAll => Self::SubtreeAll,
            _ => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_patch_values_fall_back() {
        let mut settings = Settings::synchronous();
        settings.apply_patch(&SettingsPatch {
            update_delay_ms: Some(i64::MAX),
            render_delay_ms: Some(-1),
            max_rerenders: Some(-3),
            ..SettingsPatch::default()
        });
        assert_eq!(settings.update_timing, Settings::default().update_timing);
        assert_eq!(settings.render_timing, Timing::Sync);
        assert_eq!(settings.max_rerenders, 1);

        settings.apply_patch(&SettingsPatch {
            max_rerenders: Some(i64::from(MAX_RERENDER_LIMIT) + 1),
            update_delay_ms: Some(16),
            ..SettingsPatch::default()
        });
        assert_eq!(settings.max_rerenders, 1);
        assert_eq!(settings.update_timing, Timing::After(16));
    }

    #[test]
    fn force_descends_only_for_subtree() {
        assert_eq!(Force::All.descend(), Force::None);
        assert_eq!(Force::SubtreeAll.descend(), Force::SubtreeAll);
        assert!(Force::SubtreeAll > Force::All);
    }
}
