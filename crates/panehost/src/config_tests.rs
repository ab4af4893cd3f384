// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::Settings;

fn parse(args: &[&str]) -> Settings {
    Settings::parse_from(args)
}

#[test]
fn defaults_are_correct() {
    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws"]);
    assert!(settings.auto_spawn);
    assert!(!settings.autonomy_consent_given);
    assert!(settings.terminal_webgl);
    assert_eq!(settings.max_confirmed_ms, 30_000);
    assert_eq!(settings.gemini_enter_delay_ms, 1_000);
    assert_eq!(settings.log_format, "json");
    assert_eq!(settings.log_level, "info");
}

#[test]
fn validate_rejects_unknown_log_format() {
    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws", "--log-format", "xml"]);
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("log-format"));
}

#[test]
fn validate_rejects_zero_max_confirmed_ms() {
    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws", "--max-confirmed-ms", "0"]);
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("max-confirmed-ms"));
}

#[test]
fn validate_rejects_missing_pane_commands_file() {
    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws", "--pane-commands-file", "/nonexistent/pane-commands.json"]);
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("pane-commands-file"));
}

#[test]
fn handoff_and_intent_paths_are_derived_from_workspace_dir() {
    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws"]);
    assert_eq!(settings.handoff_path(), std::path::PathBuf::from("/tmp/ws/handoffs/session.md"));
    assert_eq!(settings.intent_path("p1"), std::path::PathBuf::from("/tmp/ws/intent/p1.json"));
}

#[test]
fn load_pane_commands_defaults_to_empty_without_a_file() {
    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws"]);
    let commands = settings.load_pane_commands().expect("should load empty table");
    assert!(commands.is_empty());
}

#[test]
fn load_pane_commands_reads_json_map_from_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("pane-commands.json");
    std::fs::write(&path, r#"{"p1": "claude"}"#).expect("write pane commands file");

    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws", "--pane-commands-file", path.to_str().expect("utf8 path")]);
    let commands = settings.load_pane_commands().expect("should parse file");
    assert_eq!(commands.get("p1").map(String::as_str), Some("claude"));
}

#[test]
fn build_capability_resolver_applies_overrides_from_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("capability-overrides.json");
    std::fs::write(&path, r#"{"runtimes": {"claude": {"bypassGlobalLock": true}}, "panes": {}}"#).expect("write overrides file");

    let settings = parse(&["panehost", "--workspace-dir", "/tmp/ws", "--capability-overrides-file", path.to_str().expect("utf8 path")]);
    let resolver = settings.build_capability_resolver().expect("should build resolver");
    let record = resolver.resolve(&"p1".to_string(), crate::pane::RuntimeKind::Claude);
    assert!(record.bypass_global_lock);
}
