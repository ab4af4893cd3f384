// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External PTY transport facade (spec §6.1). The actual process/PTY layer
//! is an out-of-scope collaborator; this crate only depends on the seam.
//!
//! Grounded on the teacher's `session/run.rs` backend abstraction — a thin
//! trait wrapping spawn/write/resize/kill so the coordinator never touches
//! the real PTY handle directly.

use std::path::Path;

use crate::event::{PtySignal, TraceContext};
use crate::pane::PaneId;

/// Handle returned by a subscription method; drop or call to unsubscribe.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Everything the coordinator needs from the attached PTY/process layer.
pub trait PtyTransport: Send + Sync {
    /// Allocate the pane's PTY rooted at `cwd`, without running anything in
    /// it yet. Distinct from [`PtyTransport::spawn`], which execs a command
    /// into an already-created PTY.
    fn create(&self, pane_id: &PaneId, cwd: &Path) -> crate::error::Result<()>;

    /// Raw byte write to the pane's PTY (keystrokes, control sequences).
    fn write(&self, pane_id: &PaneId, data: &[u8]);

    /// Advisory producer pause, driven by the flow-controlled writer's
    /// high-watermark crossing (spec §4.2).
    fn pause(&self, pane_id: &PaneId);

    /// Advisory producer resume, driven by the flow-controlled writer's
    /// low-watermark crossing (spec §4.2).
    fn resume(&self, pane_id: &PaneId);

    /// Request OS-level keyboard focus for the pane; returns whether it
    /// succeeded.
    fn focus(&self, pane_id: &PaneId) -> bool;

    /// Resize the pane's PTY.
    fn resize(&self, pane_id: &PaneId, cols: u16, rows: u16);

    /// Spawn a new child process attached to `pane_id`'s PTY.
    fn spawn(&self, pane_id: &PaneId, command: &str) -> crate::error::Result<()>;

    /// Deliver a POSIX signal to the pane's child process group.
    fn kill(&self, pane_id: &PaneId, signal: PtySignal);

    fn is_process_running(&self, pane_id: &PaneId) -> bool;

    /// Current terminal column width, used to chunk writes (spec §4.6 step 5).
    fn column_width(&self, pane_id: &PaneId) -> u16;

    /// Non-interactive request/response bridge for Codex-class runtimes;
    /// returns whether the request was accepted.
    fn codex_exec(&self, pane_id: &PaneId, text: &str, meta: &TraceContext) -> bool;

    /// Marks a synthetic Enter keypress with the trusted-event bypass token
    /// observed by the renderer's key handler (spec §4.6 step 6, `trusted`).
    fn send_trusted_enter(&self, pane_id: &PaneId);

    /// Subscribe to raw output chunks read off the pane's PTY. The returned
    /// disposer unsubscribes; callers must call it on pane teardown.
    fn on_data(&self, pane_id: &PaneId, callback: Box<dyn Fn(&[u8]) + Send + Sync>) -> Disposer;

    /// Subscribe to the pane's child process exit, firing at most once.
    fn on_exit(&self, pane_id: &PaneId, callback: Box<dyn FnOnce(i32) + Send>) -> Disposer;
}
