// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ambient settings surface (spec §6.2), modeled on the teacher's
//! `Config` (`clap::Parser`, `env = "..."` per field, `validate()` run once
//! after parsing).

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;

use crate::capability::CapabilityResolver;
use crate::pane::RuntimeKind;

/// Per-pane terminal command overrides loaded from `--pane-commands-file`
/// (spec §6.2 `paneCommands`).
pub type PaneCommands = HashMap<String, String>;

/// Raw shape of `--capability-overrides-file` (spec §6.2
/// `injectionCapabilities.{panes,runtimes}`): two optional maps of JSON
/// patch objects, applied shallow onto the built-in capability profile.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CapabilityOverridesFile {
    #[serde(default)]
    pub runtimes: HashMap<String, Value>,
    #[serde(default)]
    pub panes: HashMap<String, Value>,
}

/// Pane-host coordinator settings.
#[derive(Debug, Parser)]
#[command(name = "panehost", version, about)]
pub struct Settings {
    /// Root directory for persisted state: handoffs, intent files.
    #[arg(long, env = "PANEHOST_WORKSPACE_DIR")]
    pub workspace_dir: PathBuf,

    /// JSON file mapping pane id to the terminal command it runs.
    #[arg(long, env = "PANEHOST_PANE_COMMANDS_FILE")]
    pub pane_commands_file: Option<PathBuf>,

    /// JSON file with `{runtimes: {...}, panes: {...}}` capability patches.
    #[arg(long, env = "PANEHOST_CAPABILITY_OVERRIDES_FILE")]
    pub capability_overrides_file: Option<PathBuf>,

    /// Whether empty/missing panes on a `daemon-connected` payload are
    /// auto-spawned (spec §4.9).
    #[arg(long, env = "PANEHOST_AUTO_SPAWN", default_value = "true")]
    pub auto_spawn: bool,

    /// Whether the operator has granted autonomy consent; autospawn is
    /// suppressed unconditionally without it (spec §4.9).
    #[arg(long, env = "PANEHOST_AUTONOMY_CONSENT_GIVEN", default_value = "false")]
    pub autonomy_consent_given: bool,

    /// Whether the renderer uses a WebGL backend (affects scrollback
    /// trimming behavior the renderer applies on reattach).
    #[arg(long, env = "PANEHOST_TERMINAL_WEBGL", default_value = "true")]
    pub terminal_webgl: bool,

    /// Safety bound on confirmed-compaction duration (spec §9 open
    /// question: bound preserved, exposed as configurable).
    #[arg(long, env = "PANEHOST_MAX_CONFIRMED_MS", default_value = "30000")]
    pub max_confirmed_ms: u64,

    /// Gemini's extra post-Enter delay (spec §4.4 capability table).
    #[arg(long, env = "PANEHOST_GEMINI_ENTER_DELAY_MS", default_value = "1000")]
    pub gemini_enter_delay_ms: u64,

    /// Legacy per-pane handoff mirror path, written alongside the
    /// canonical document when set (spec §4.8 atomic write rule).
    #[arg(long, env = "PANEHOST_LEGACY_HANDOFF_PATH")]
    pub legacy_handoff_path: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "PANEHOST_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PANEHOST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Settings {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_format != "json" && self.log_format != "text" {
            anyhow::bail!("--log-format must be 'json' or 'text', got '{}'", self.log_format);
        }
        if self.max_confirmed_ms == 0 {
            anyhow::bail!("--max-confirmed-ms must be greater than zero");
        }
        if let Some(ref path) = self.pane_commands_file {
            if !path.exists() {
                anyhow::bail!("--pane-commands-file {} does not exist", path.display());
            }
        }
        if let Some(ref path) = self.capability_overrides_file {
            if !path.exists() {
                anyhow::bail!("--capability-overrides-file {} does not exist", path.display());
            }
        }
        Ok(())
    }

    pub fn handoff_path(&self) -> PathBuf {
        self.workspace_dir.join("handoffs").join("session.md")
    }

    pub fn intent_path(&self, pane_id: &str) -> PathBuf {
        self.workspace_dir.join("intent").join(format!("{pane_id}.json"))
    }

    /// Load `paneCommands` (spec §6.2), or an empty table if unset.
    pub fn load_pane_commands(&self) -> anyhow::Result<PaneCommands> {
        let Some(ref path) = self.pane_commands_file else { return Ok(PaneCommands::new()) };
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load `injectionCapabilities.{runtimes,panes}` (spec §6.2), or an
    /// empty table if unset.
    pub fn load_capability_overrides(&self) -> anyhow::Result<CapabilityOverridesFile> {
        let Some(ref path) = self.capability_overrides_file else { return Ok(CapabilityOverridesFile::default()) };
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Build a resolver seeded from this pane's Gemini delay and register
    /// every loaded override onto it.
    pub fn build_capability_resolver(&self) -> anyhow::Result<CapabilityResolver> {
        let mut resolver = CapabilityResolver::new(self.gemini_enter_delay_ms);
        let overrides = self.load_capability_overrides()?;
        for (runtime_name, patch) in overrides.runtimes {
            if let Some(runtime) = parse_runtime_kind(&runtime_name) {
                resolver.set_runtime_override(runtime, patch);
            } else {
                tracing::warn!(runtime = runtime_name, "ignoring capability override for unknown runtime kind");
            }
        }
        for (pane_id, patch) in overrides.panes {
            resolver.set_pane_override(pane_id, patch);
        }
        Ok(resolver)
    }
}

fn parse_runtime_kind(name: &str) -> Option<RuntimeKind> {
    match name.to_lowercase().as_str() {
        "claude" => Some(RuntimeKind::Claude),
        "codex" => Some(RuntimeKind::Codex),
        "gemini" => Some(RuntimeKind::Gemini),
        "generic" => Some(RuntimeKind::Generic),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
