// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two independent "journal" concerns this crate touches:
//!
//! - The comms journal domain model (`CommsRow`, `Claim`, and the read-only
//!   seams the Handoff Materializer projects from) — immutable input owned
//!   by an external producer, spec §4.8.
//! - [`EventJournal`], an append-only JSONL sink for bus events, independent
//!   of the in-memory ring in `bus.rs`, so an operator can reconstruct a
//!   pane's full history after a restart (a supplemental ambient concern,
//!   not named by the comms journal itself).
//!
//! Grounded on the teacher's `event_log.rs` (file-backed, append-only,
//! pure read-and-filter style, no in-memory buffer) for both: the comms
//! journal reader is the read half of that shape pointed at an externally
//! produced file, and `EventJournal` is the write half reused almost
//! verbatim for this crate's own bus events.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::pane::PaneId;

/// Direction of a comms-journal row relative to the pane that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Delivery channel a row traveled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Pty,
    Broker,
}

/// Delivery status recorded for an outbound row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Recorded,
    Routed,
    Brokered,
    Failed,
}

/// One immutable row in the chronologically ordered comms journal (spec
/// §4.8 input). Produced entirely outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommsRow {
    pub id: String,
    pub ts_ms: i64,
    pub pane_id: PaneId,
    pub role: String,
    pub direction: Direction,
    pub channel: Channel,
    pub body: String,
    pub status: DeliveryStatus,
    /// Present on brokered rows; matched case-insensitively against
    /// `pending|queue|unverified|accepted|routed|processing|inflight` to
    /// decide "pending delivery" membership (spec §4.8).
    pub ack_status: Option<String>,
}

/// Status of an unresolved claim (spec §4.8 "Unresolved Claims" table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Contested,
    PendingProof,
    Proposed,
}

impl ClaimStatus {
    /// Priority order used by the Handoff Materializer's sort (spec §4.8:
    /// "sort by status-priority then confidence desc then id asc").
    fn priority(self) -> u8 {
        match self {
            Self::Contested => 0,
            Self::PendingProof => 1,
            Self::Proposed => 2,
        }
    }
}

/// A claim surfaced by the unresolved-claims reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub status: ClaimStatus,
    pub confidence: f64,
    pub statement: String,
}

impl Claim {
    pub(crate) fn sort_key(&self) -> (u8, i64, &str) {
        // Negated, scaled confidence so ascending sort gives "highest
        // confidence first" without pulling in a total-order float crate.
        let confidence_rank = -(self.confidence * 1_000_000.0) as i64;
        (self.status.priority(), confidence_rank, self.id.as_str())
    }
}

/// Read-only access to the externally owned comms journal.
pub trait CommsJournalReader: Send + Sync {
    /// All rows with `ts_ms` in `[window_start, window_end]`, chronological.
    fn rows_in_window(&self, window_start: i64, window_end: i64) -> Vec<CommsRow>;
}

/// Read-only access to the externally owned claims store.
pub trait ClaimsReader: Send + Sync {
    fn unresolved_claims(&self) -> Vec<Claim>;
}

/// Append-only JSONL sink for bus events (SPEC_FULL §B.2 supplemental
/// ambient concern), independent of `EventBus`'s in-memory ring.
pub struct EventJournal {
    path: Option<PathBuf>,
}

impl EventJournal {
    /// `session_dir: None` disables persistence (tests/attach mode) —
    /// `append` becomes a no-op, matching the teacher's `EventLog::new`.
    pub fn new(session_dir: Option<&Path>) -> Self {
        let path = session_dir.map(|dir| {
            let _ = std::fs::create_dir_all(dir);
            dir.join("events.jsonl")
        });
        Self { path }
    }

    pub fn append(&self, event: &Event) {
        let Some(ref path) = self.path else { return };
        let Ok(mut line) = serde_json::to_string(event) else { return };
        line.push('\n');
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) else { return };
        let _ = file.write_all(line.as_bytes());
    }

    /// Read back every event ever appended, in file order.
    pub fn read_all(&self) -> Vec<Event> {
        let Some(ref path) = self.path else { return Vec::new() };
        let Ok(contents) = std::fs::read_to_string(path) else { return Vec::new() };
        contents.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
