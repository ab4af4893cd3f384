// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C4 — pane capability resolver: turns a runtime hint into the built-in
//! [`CapabilityRecord`] profile (spec §4.4 table), then shallow-merges any
//! `injectionCapabilities.{runtimes,panes}` override onto it.
//!
//! Grounded on the teacher's `driver/mod.rs` profile-table-to-driver-context
//! builders, generalized from "build a driver" to "resolve a capability
//! record", and on `bus.rs`'s JSON-merge style for applying the override —
//! shallow here (spec: "overrides apply as a shallow merge"), not the deep
//! merge `update_state` uses for pane state vectors.

use std::collections::HashMap;

use serde_json::Value;

use crate::pane::{CapabilityRecord, PaneId, RuntimeKind};

/// Resolves capability records for panes, honoring the
/// `injectionCapabilities.runtimes.<kind>` and `injectionCapabilities.panes.<id>`
/// settings overlays (spec §6.2).
pub struct CapabilityResolver {
    gemini_enter_delay_ms: u64,
    runtime_overrides: HashMap<&'static str, Value>,
    pane_overrides: HashMap<PaneId, Value>,
}

impl CapabilityResolver {
    pub fn new(gemini_enter_delay_ms: u64) -> Self {
        Self { gemini_enter_delay_ms, runtime_overrides: HashMap::new(), pane_overrides: HashMap::new() }
    }

    fn runtime_key(runtime: RuntimeKind) -> &'static str {
        match runtime {
            RuntimeKind::Claude => "claude",
            RuntimeKind::Codex => "codex",
            RuntimeKind::Gemini => "gemini",
            RuntimeKind::Generic | RuntimeKind::Unknown => "generic",
        }
    }

    /// Register (or replace) the override patch for a runtime-wide profile.
    /// `patch` must be a JSON object; non-object patches are ignored with a
    /// warning since a shallow merge has no meaning otherwise.
    pub fn set_runtime_override(&mut self, runtime: RuntimeKind, patch: Value) {
        if !patch.is_object() {
            tracing::warn!(runtime = Self::runtime_key(runtime), "ignoring non-object runtime capability override");
            return;
        }
        self.runtime_overrides.insert(Self::runtime_key(runtime), patch);
    }

    /// Register (or replace) the override patch for one specific pane.
    pub fn set_pane_override(&mut self, pane_id: impl Into<PaneId>, patch: Value) {
        let pane_id = pane_id.into();
        if !patch.is_object() {
            tracing::warn!(pane_id, "ignoring non-object pane capability override");
            return;
        }
        self.pane_overrides.insert(pane_id, patch);
    }

    /// Resolve the effective, immutable capability record for `pane_id`
    /// attached to `runtime`. Runtime overrides apply first, then pane
    /// overrides, so a pane-specific patch wins over a runtime-wide one.
    pub fn resolve(&self, pane_id: &PaneId, runtime: RuntimeKind) -> CapabilityRecord {
        let base = CapabilityRecord::for_runtime(runtime, self.gemini_enter_delay_ms);
        let mut value = match serde_json::to_value(&base) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(pane_id, %err, "capability record failed to serialize for override merge");
                return base;
            }
        };

        if let Some(patch) = self.runtime_overrides.get(Self::runtime_key(runtime)) {
            shallow_merge(&mut value, patch);
        }
        if let Some(patch) = self.pane_overrides.get(pane_id) {
            shallow_merge(&mut value, patch);
        }

        match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(pane_id, %err, "capability override produced an invalid record; using base profile");
                base
            }
        }
    }
}

fn shallow_merge(target: &mut Value, patch: &Value) {
    let (Value::Object(target_map), Value::Object(patch_map)) = (target, patch) else {
        return;
    };
    for (k, v) in patch_map {
        target_map.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
#[path = "capability_tests.rs"]
mod tests;
