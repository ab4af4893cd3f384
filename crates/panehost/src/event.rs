// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types carried on the bus (C1) and the signal surface used by the
//! Recovery Controller (C7) and `Coordinator::teardown`.

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pane::PaneId;

/// Correlation/causation context threaded end-to-end for an injected
/// message (spec §3, §8 "TraceId continuity").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: Option<String>,
    pub parent_event_id: Option<String>,
    pub event_id: Option<String>,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self { trace_id: Some(trace_id.into()), parent_event_id: None, event_id: None }
    }

    /// `correlationId = traceId` per spec §3.
    pub fn correlation_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// `causationId = parentEventId` per spec §3.
    pub fn causation_id(&self) -> Option<&str> {
        self.parent_event_id.as_deref()
    }
}

/// Event types required by spec §4.1 (minimum set) plus the handful this
/// crate's components need to emit their own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InjectRouteReceived,
    InjectRouteDispatched,
    InjectRequested,
    InjectQueued,
    InjectApplied,
    InjectSubmitRequested,
    InjectSubmitSent,
    TypingActivity,
    TypingIdle,
    FocusChanged,
    ResizeStarted,
    ResizeCompleted,
    PtyResizeRequested,
    FitSkipped,
    CliCompactionSuspected,
    CliCompactionStarted,
    CliCompactionEnded,
    RecoveryStuckMarked,
    RecoveryStuckCleared,
    RecoveryEscalated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InjectRouteReceived => "inject.route.received",
            Self::InjectRouteDispatched => "inject.route.dispatched",
            Self::InjectRequested => "inject.requested",
            Self::InjectQueued => "inject.queued",
            Self::InjectApplied => "inject.applied",
            Self::InjectSubmitRequested => "inject.submit.requested",
            Self::InjectSubmitSent => "inject.submit.sent",
            Self::TypingActivity => "typing.activity",
            Self::TypingIdle => "typing.idle",
            Self::FocusChanged => "focus.changed",
            Self::ResizeStarted => "resize.started",
            Self::ResizeCompleted => "resize.completed",
            Self::PtyResizeRequested => "pty.resize.requested",
            Self::FitSkipped => "fit.skipped",
            Self::CliCompactionSuspected => "cli.compaction.suspected",
            Self::CliCompactionStarted => "cli.compaction.started",
            Self::CliCompactionEnded => "cli.compaction.ended",
            Self::RecoveryStuckMarked => "recovery.stuck.marked",
            Self::RecoveryStuckCleared => "recovery.stuck.cleared",
            Self::RecoveryEscalated => "recovery.escalated",
        }
    }
}

/// A single event on the bus (spec §3 `Event`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub pane_id: PaneId,
    pub ts_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub payload: Value,
    pub source: String,
}

/// Named POSIX signals deliverable to a pane's child process group
/// (spec §6.1 `sendTrustedEnter`'s sibling, process lifecycle control used
/// by the Recovery Controller's `restartPane` step).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtySignal {
    Hup,
    Int,
    Quit,
    Kill,
    Term,
    Cont,
    Stop,
    Tstp,
    Winch,
}

impl PtySignal {
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_uppercase();
        let bare: &str = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "HUP" | "1" => Some(Self::Hup),
            "INT" | "2" => Some(Self::Int),
            "QUIT" | "3" => Some(Self::Quit),
            "KILL" | "9" => Some(Self::Kill),
            "TERM" | "15" => Some(Self::Term),
            "CONT" | "18" => Some(Self::Cont),
            "STOP" | "19" => Some(Self::Stop),
            "TSTP" | "20" => Some(Self::Tstp),
            "WINCH" | "28" => Some(Self::Winch),
            _ => None,
        }
    }

    pub fn to_nix(self) -> Signal {
        match self {
            Self::Hup => Signal::SIGHUP,
            Self::Int => Signal::SIGINT,
            Self::Quit => Signal::SIGQUIT,
            Self::Kill => Signal::SIGKILL,
            Self::Term => Signal::SIGTERM,
            Self::Cont => Signal::SIGCONT,
            Self::Stop => Signal::SIGSTOP,
            Self::Tstp => Signal::SIGTSTP,
            Self::Winch => Signal::SIGWINCH,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
