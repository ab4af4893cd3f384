// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use thiserror::Error;

/// Crate-level error type for operations that can genuinely fail
/// (construction, settings parsing, handoff I/O, PTY transport failures
/// surfaced by the external collaborator).
///
/// Distinct from [`crate::injection::InjectReason`], which is a terminal
/// pipeline *outcome* reported through `on_complete`, never raised as an
/// `Err` — see spec §7.
#[derive(Debug, Error)]
pub enum PaneHostError {
    #[error("pane {0:?} not found")]
    UnknownPane(crate::pane::PaneId),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("pty transport error on pane {pane:?}: {detail}")]
    Transport { pane: crate::pane::PaneId, detail: String },

    #[error("handoff I/O error: {0}")]
    Handoff(#[from] std::io::Error),

    #[error("coordinator is in SDK mode; PTY operations are disabled")]
    SdkModeActive,
}

pub type Result<T> = std::result::Result<T, PaneHostError>;

/// Closed set of error codes surfaced on the outcome channel (§6.5) and in
/// structured logs. Mirrors the teacher's `ErrorCode` shape: a small enum
/// with a stable wire string and a `Display` projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PaneGone,
    FocusFailed,
    EnterFailed,
    PtyEnterFailed,
    SubmitNotAccepted,
    CompactionDeferredTimeout,
    QueueCapacityExceeded,
    MissingInjectionController,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaneGone => "pane_gone",
            Self::FocusFailed => "focus_failed",
            Self::EnterFailed => "enter_failed",
            Self::PtyEnterFailed => "pty_enter_failed",
            Self::SubmitNotAccepted => "submit_not_accepted",
            Self::CompactionDeferredTimeout => "compaction_deferred_timeout",
            Self::QueueCapacityExceeded => "queue_capacity_exceeded",
            Self::MissingInjectionController => "missing_injection_controller",
        }
    }

    /// Per spec §7: `pane_gone` and `queue_capacity_exceeded` are fatal for
    /// the item; the rest may be retried once before surfacing.
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::PaneGone | Self::QueueCapacityExceeded)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
