// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn claude_profile_matches_capability_table() {
    let cap = CapabilityRecord::claude();
    assert_eq!(cap.mode, InjectionMode::Pty);
    assert!(!cap.bypass_global_lock);
    assert!(cap.apply_compaction_gate);
    assert!(cap.requires_focus_for_enter);
    assert_eq!(cap.enter_method, EnterMethod::Trusted);
    assert_eq!(cap.enter_delay_ms, 50);
}

#[test]
fn codex_profile_bypasses_lock_and_skips_enter() {
    let cap = CapabilityRecord::codex();
    assert_eq!(cap.mode, InjectionMode::CodexExec);
    assert!(cap.bypass_global_lock);
    assert!(!cap.apply_compaction_gate);
    assert_eq!(cap.enter_method, EnterMethod::None);
}

#[test]
fn gemini_profile_uses_configured_enter_delay() {
    let cap = CapabilityRecord::gemini(120);
    assert_eq!(cap.enter_delay_ms, 120);
    assert_eq!(cap.sanitize_transform, SanitizeTransform::GeminiSanitize);
}

#[test]
fn activity_idle_requires_both_output_and_typing_quiesced() {
    let activity = PaneActivity::default();
    activity.note_output(1_000);
    activity.note_typed(1_000);
    // Not idle yet: only 500ms elapsed against a 2000ms threshold.
    assert!(!activity.is_idle_enough(1_500, 2_000, 2_000));
    // Idle once both thresholds clear.
    assert!(activity.is_idle_enough(4_000, 2_000, 2_000));
}

#[test]
fn activity_causation_window_expires() {
    let activity = PaneActivity::default();
    activity.note_inject_requested(1_000);
    assert!(activity.had_recent_causation(5_000, 10_000));
    assert!(!activity.had_recent_causation(12_000, 10_000));
}
