// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C7 — recovery controller: tracks panes that may be stuck (a send
//! completed without verification and produced no further output), sweeps
//! them periodically, and walks an escalation ladder from a gentle nudge up
//! to tearing down and re-spawning every pane.
//!
//! Grounded on the teacher's `driver/grace.rs` (`IdleGraceTimer` — trigger a
//! timer, invalidate it on activity, check elapsed-and-unchanged) for the
//! mark/clear/grace-elapsed shape, and `profile.rs`'s `RotateOutcome`/
//! `schedule_retry` (classify the current state, then act and advance) for
//! the escalation step itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::event::{Event, EventType};
use crate::injection::Clock;
use crate::pane::PaneId;
use crate::pty::PtyTransport;

pub const SWEEPER_INTERVAL_MS: u64 = 10_000;
/// Implementation choice: spec names only the ≈10 s sweeper cadence, not a
/// separate stuck-confirmation grace; reusing the sweeper interval as the
/// minimum dwell time between escalation steps keeps the two concepts
/// aligned without inventing an unstated second constant.
pub const STUCK_GRACE_MS: i64 = 10_000;
pub const AGGRESSIVE_NUDGE_GAP_MS: u64 = 150;

/// Collaborators outside C7's own bookkeeping: everything beyond a raw PTY
/// byte write that the escalation ladder's higher rungs need.
pub trait RecoveryTarget: Send + Sync {
    /// Dispatch a synthetic ESC keydown+keyup through the renderer's
    /// textarea (spec §4.7 step 3) — distinct from a raw PTY write.
    fn send_unstick(&self, pane_id: &PaneId);
    /// Kill with an exit-ignore window, reinitialize, re-spawn, and reset
    /// codex-identity memoization for one pane (spec §4.7 step 4).
    fn restart_pane(&self, pane_id: &PaneId);
    /// Confirm, kill every PTY, teardown every pane, recreate, and
    /// re-spawn (spec §4.7 step 5).
    fn fresh_start_all(&self);
}

struct StuckEntry {
    first_stuck_at: i64,
    last_action_at: i64,
    escalation_level: u8,
}

/// C7 — see module docs.
pub struct RecoveryController<P: PtyTransport, T: RecoveryTarget> {
    pty: P,
    target: T,
    bus: Arc<crate::bus::EventBus>,
    clock: Arc<dyn Clock>,
    stuck: Mutex<HashMap<PaneId, StuckEntry>>,
}

impl<P: PtyTransport + 'static, T: RecoveryTarget + 'static> RecoveryController<P, T> {
    pub fn new(pty: P, target: T, bus: Arc<crate::bus::EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self { pty, target, bus, clock, stuck: Mutex::new(HashMap::new()) }
    }

    /// Mark a pane as potentially stuck (spec §4.7 "mark"). A no-op if
    /// already marked — the original `firstStuckAt` is preserved.
    pub fn mark(&self, pane_id: &PaneId) {
        let now = self.clock.now_ms();
        let mut stuck = self.stuck.lock().unwrap_or_else(|e| e.into_inner());
        let is_new = !stuck.contains_key(pane_id);
        stuck.entry(pane_id.clone()).or_insert_with(|| StuckEntry { first_stuck_at: now, last_action_at: now, escalation_level: 0 });
        drop(stuck);
        if is_new {
            self.emit(pane_id, EventType::RecoveryStuckMarked, serde_json::Value::Null);
        }
    }

    /// Clear a pane's stuck state on any meaningful output (spec §4.7
    /// "clear"), resetting its escalation level to 0.
    pub fn clear(&self, pane_id: &PaneId) {
        let removed = self.stuck.lock().unwrap_or_else(|e| e.into_inner()).remove(pane_id).is_some();
        if removed {
            self.emit(pane_id, EventType::RecoveryStuckCleared, serde_json::Value::Null);
        }
    }

    pub fn escalation_level(&self, pane_id: &PaneId) -> u8 {
        self.stuck.lock().unwrap_or_else(|e| e.into_inner()).get(pane_id).map(|e| e.escalation_level).unwrap_or(0)
    }

    pub fn is_marked(&self, pane_id: &PaneId) -> bool {
        self.stuck.lock().unwrap_or_else(|e| e.into_inner()).contains_key(pane_id)
    }

    /// Pane teardown cancellation (spec §5): drop bookkeeping without
    /// running any escalation step.
    pub fn forget(&self, pane_id: &PaneId) {
        self.stuck.lock().unwrap_or_else(|e| e.into_inner()).remove(pane_id);
    }

    /// One sweep: escalate every pane whose last action is past
    /// `STUCK_GRACE_MS` (spec §4.7 "sweeper runs periodically").
    pub async fn sweep_once(&self) {
        let due: Vec<PaneId> = {
            let now = self.clock.now_ms();
            let stuck = self.stuck.lock().unwrap_or_else(|e| e.into_inner());
            stuck.iter().filter(|(_, e)| now - e.last_action_at >= STUCK_GRACE_MS).map(|(id, _)| id.clone()).collect()
        };
        for pane_id in due {
            self.escalate(&pane_id).await;
        }
    }

    /// Spawn the periodic sweeper task; the returned handle is owned by the
    /// caller so pane-independent shutdown can abort it.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(SWEEPER_INTERVAL_MS));
            loop {
                interval.tick().await;
                self.sweep_once().await;
            }
        })
    }

    async fn escalate(&self, pane_id: &PaneId) {
        let level = {
            let mut stuck = self.stuck.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = stuck.get_mut(pane_id) else { return };
            entry.escalation_level = entry.escalation_level.saturating_add(1);
            entry.last_action_at = self.clock.now_ms();
            entry.escalation_level
        };

        let status = match level {
            1 => {
                self.pty.write(pane_id, b"\r");
                "nudged"
            }
            2 => {
                self.pty.write(pane_id, b"\x1B");
                tokio::time::sleep(Duration::from_millis(AGGRESSIVE_NUDGE_GAP_MS)).await;
                self.pty.write(pane_id, b"\r");
                "aggressive_nudged"
            }
            3 => {
                self.target.send_unstick(pane_id);
                "unstuck"
            }
            4 => {
                self.target.restart_pane(pane_id);
                "restarted"
            }
            _ => {
                self.target.fresh_start_all();
                self.stuck.lock().unwrap_or_else(|e| e.into_inner()).clear();
                "fresh_start_all"
            }
        };

        self.emit(pane_id, EventType::RecoveryEscalated, serde_json::json!({ "level": level, "status": status }));
    }

    fn emit(&self, pane_id: &PaneId, event_type: EventType, payload: serde_json::Value) {
        self.bus.emit(Event {
            event_type,
            pane_id: pane_id.clone(),
            ts_ms: self.clock.now_ms() as u64,
            correlation_id: None,
            causation_id: None,
            payload,
            source: "recovery".to_string(),
        });
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
