// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core pane data model (spec §3 `Pane`, `CapabilityRecord`).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// Stable string identifier for a pane.
pub type PaneId = String;

/// Runtime kind a pane's attached process is believed to be, drives
/// capability resolution (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Claude,
    Codex,
    Gemini,
    Generic,
    Unknown,
}

/// Injection mode: interactive PTY keystrokes, or a non-interactive
/// request/response bridge (spec §3, §4.6 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InjectionMode {
    Pty,
    CodexExec,
}

/// How a synthetic Enter keypress is submitted (spec §3, §4.6 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnterMethod {
    Trusted,
    Pty,
    None,
}

/// Sanitize transform applied to outgoing text before write (spec §3, §4.6
/// step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SanitizeTransform {
    None,
    GeminiSanitize,
    SanitizeMultiline,
}

/// Immutable capability record resolved once per pane (spec §4.4).
///
/// Serialized camelCase so the `injectionCapabilities.{runtimes,panes}`
/// settings overlay (see `capability.rs`) can patch it with the same field
/// names the spec's table uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    pub mode: InjectionMode,
    pub bypass_global_lock: bool,
    pub apply_compaction_gate: bool,
    pub requires_focus_for_enter: bool,
    pub enter_method: EnterMethod,
    pub enter_delay_ms: u64,
    pub sanitize_multiline: bool,
    pub clear_line_before_write: bool,
    pub use_chunked_write: bool,
    pub home_reset_before_write: bool,
    pub verify_submit_accepted: bool,
    pub defer_submit_while_pane_active: bool,
    pub typing_guard_when_bypassing: bool,
    pub sanitize_transform: SanitizeTransform,
    pub submit_method: String,
    pub enter_failure_reason: Option<String>,
}

impl CapabilityRecord {
    /// Built-in profile for the `claude`-like runtime (spec §4.4 table).
    pub fn claude() -> Self {
        Self {
            mode: InjectionMode::Pty,
            bypass_global_lock: false,
            apply_compaction_gate: true,
            requires_focus_for_enter: true,
            enter_method: EnterMethod::Trusted,
            enter_delay_ms: 50,
            sanitize_multiline: false,
            clear_line_before_write: true,
            use_chunked_write: true,
            home_reset_before_write: true,
            verify_submit_accepted: true,
            defer_submit_while_pane_active: true,
            typing_guard_when_bypassing: false,
            sanitize_transform: SanitizeTransform::None,
            submit_method: "trusted-enter".to_string(),
            enter_failure_reason: None,
        }
    }

    /// Built-in profile for the `codex`-like runtime.
    pub fn codex() -> Self {
        Self {
            mode: InjectionMode::CodexExec,
            bypass_global_lock: true,
            apply_compaction_gate: false,
            requires_focus_for_enter: false,
            enter_method: EnterMethod::None,
            enter_delay_ms: 0,
            sanitize_multiline: false,
            clear_line_before_write: false,
            use_chunked_write: false,
            home_reset_before_write: false,
            verify_submit_accepted: false,
            defer_submit_while_pane_active: false,
            typing_guard_when_bypassing: false,
            sanitize_transform: SanitizeTransform::None,
            submit_method: "codex-exec".to_string(),
            enter_failure_reason: None,
        }
    }

    /// Built-in profile for the `gemini`-like runtime. `enter_delay_ms` is
    /// filled in by the resolver from `GEMINI_ENTER_DELAY` settings.
    pub fn gemini(enter_delay_ms: u64) -> Self {
        Self {
            mode: InjectionMode::Pty,
            bypass_global_lock: true,
            apply_compaction_gate: false,
            requires_focus_for_enter: false,
            enter_method: EnterMethod::Pty,
            enter_delay_ms,
            sanitize_multiline: false,
            clear_line_before_write: true,
            use_chunked_write: false,
            home_reset_before_write: false,
            verify_submit_accepted: false,
            defer_submit_while_pane_active: false,
            typing_guard_when_bypassing: false,
            sanitize_transform: SanitizeTransform::GeminiSanitize,
            submit_method: "pty-enter".to_string(),
            enter_failure_reason: None,
        }
    }

    /// Built-in profile for unknown/generic runtimes.
    pub fn generic() -> Self {
        Self {
            mode: InjectionMode::Pty,
            bypass_global_lock: true,
            apply_compaction_gate: false,
            requires_focus_for_enter: false,
            enter_method: EnterMethod::Pty,
            enter_delay_ms: 50,
            sanitize_multiline: true,
            clear_line_before_write: true,
            use_chunked_write: true,
            home_reset_before_write: true,
            verify_submit_accepted: true,
            defer_submit_while_pane_active: true,
            typing_guard_when_bypassing: true,
            sanitize_transform: SanitizeTransform::SanitizeMultiline,
            submit_method: "pty-enter".to_string(),
            enter_failure_reason: None,
        }
    }

    pub fn for_runtime(kind: RuntimeKind, gemini_enter_delay_ms: u64) -> Self {
        match kind {
            RuntimeKind::Claude => Self::claude(),
            RuntimeKind::Codex => Self::codex(),
            RuntimeKind::Gemini => Self::gemini(gemini_enter_delay_ms),
            RuntimeKind::Generic | RuntimeKind::Unknown => Self::generic(),
        }
    }
}

/// Current lifecycle/activity status of a pane, tracked with lock-free
/// atomics since every component (C2 through C7) reads these hot fields
/// independently.
#[derive(Debug)]
pub struct PaneActivity {
    pub last_output_ms: AtomicI64,
    pub last_typed_ms: AtomicI64,
    pub last_inject_requested_ms: AtomicI64,
    /// Programmatic writes allowed by default; keyboard blocked (spec §3).
    pub locked: AtomicBool,
}

impl Default for PaneActivity {
    fn default() -> Self {
        Self {
            last_output_ms: AtomicI64::new(0),
            last_typed_ms: AtomicI64::new(0),
            last_inject_requested_ms: AtomicI64::new(i64::MIN),
            locked: AtomicBool::new(true),
        }
    }
}

impl PaneActivity {
    pub fn note_output(&self, now_ms: i64) {
        self.last_output_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn note_typed(&self, now_ms: i64) {
        self.last_typed_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn note_inject_requested(&self, now_ms: i64) {
        self.last_inject_requested_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn user_is_typing(&self, now_ms: i64, typing_guard_ms: i64) -> bool {
        now_ms - self.last_typed_ms.load(Ordering::Relaxed) < typing_guard_ms
    }

    pub fn is_idle_enough(&self, now_ms: i64, idle_threshold_ms: i64, typing_guard_ms: i64) -> bool {
        let since_output = now_ms - self.last_output_ms.load(Ordering::Relaxed);
        let since_typed = now_ms - self.last_typed_ms.load(Ordering::Relaxed);
        since_output >= idle_threshold_ms && since_typed >= typing_guard_ms
    }

    pub fn had_recent_causation(&self, now_ms: i64, window_ms: i64) -> bool {
        now_ms - self.last_inject_requested_ms.load(Ordering::Relaxed) < window_ms
    }
}

/// A pane record owned exclusively by the Coordinator (spec §3 Ownership).
pub struct Pane {
    pub id: PaneId,
    pub role: String,
    pub runtime: RuntimeKind,
    pub capability: CapabilityRecord,
    pub locked: bool,
    pub activity: PaneActivity,
}

impl Pane {
    pub fn new(id: PaneId, role: impl Into<String>, runtime: RuntimeKind, capability: CapabilityRecord) -> Self {
        Self { id, role: role.into(), runtime, capability, locked: true, activity: PaneActivity::default() }
    }
}

#[cfg(test)]
#[path = "pane_tests.rs"]
mod tests;
