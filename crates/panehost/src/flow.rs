// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C2 — flow-controlled terminal writer: serialized, bytes-in-flight-bounded
//! writes to the renderer, with watermark-driven PTY pause/resume.
//!
//! Grounded on the teacher's `ring.rs` byte-accounting style (`total_written`
//! bookkeeping), adapted from a circular replay buffer to a drain queue since
//! spec §4.2 wants backpressure, not replay.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;

use crate::pane::PaneId;

/// 2 MiB — spec §3 `WriteFlowState` invariant ceiling.
pub const TERMINAL_QUEUE_MAX_BYTES: usize = 2 * 1024 * 1024;
/// 500 KiB — crossing this pauses the PTY producer.
pub const HIGH_WATERMARK: usize = 500 * 1024;
/// 50 KiB — dropping below this while paused resumes the producer.
pub const LOW_WATERMARK: usize = 50 * 1024;

/// Callback surface the renderer must provide (spec §4.2, out-of-scope
/// collaborator — only the write contract is specified here).
pub trait Renderer: Send + Sync {
    /// Write `data` for `pane_id`; `on_flushed` must be invoked exactly once
    /// when the bytes have been accepted by the renderer.
    fn write(&self, pane_id: &PaneId, data: Bytes, on_flushed: Box<dyn FnOnce() + Send>);
}

/// Advisory PTY producer pause/resume surface (spec §6.1).
pub trait PtyFlowControl: Send + Sync {
    fn pause(&self, pane_id: &PaneId);
    fn resume(&self, pane_id: &PaneId);
}

struct QueueItem {
    data: Bytes,
    byte_len: usize,
}

struct PaneQueue {
    queue: VecDeque<QueueItem>,
    writing: bool,
    watermark_bytes: usize,
    producer_paused: bool,
}

impl Default for PaneQueue {
    fn default() -> Self {
        Self { queue: VecDeque::new(), writing: false, watermark_bytes: 0, producer_paused: false }
    }
}

/// Per-pane flow-controlled writer state, shared by the coordinator.
pub struct FlowWriter<R: Renderer, P: PtyFlowControl> {
    renderer: R,
    pty: P,
    panes: Mutex<HashMap<PaneId, PaneQueue>>,
}

impl<R: Renderer, P: PtyFlowControl> FlowWriter<R, P> {
    pub fn new(renderer: R, pty: P) -> Self {
        Self { renderer, pty, panes: Mutex::new(HashMap::new()) }
    }

    /// Current queued (not-yet-flushed) bytes for a pane.
    pub fn watermark_bytes(&self, pane_id: &PaneId) -> usize {
        let panes = self.panes.lock().unwrap_or_else(|e| e.into_inner());
        panes.get(pane_id).map(|p| p.watermark_bytes).unwrap_or(0)
    }

    pub fn producer_paused(&self, pane_id: &PaneId) -> bool {
        let panes = self.panes.lock().unwrap_or_else(|e| e.into_inner());
        panes.get(pane_id).map(|p| p.producer_paused).unwrap_or(false)
    }

    /// Enqueue `data` for writing to `pane_id` (spec §4.2 algorithm).
    pub fn write(self: &std::sync::Arc<Self>, pane_id: &PaneId, data: Bytes)
    where
        R: 'static,
        P: 'static,
    {
        let byte_len = data.len();
        let mut should_start_drain = false;
        let mut should_pause = false;
        {
            let mut panes = self.panes.lock().unwrap_or_else(|e| e.into_inner());
            let state = panes.entry(pane_id.clone()).or_default();

            if state.watermark_bytes + byte_len > TERMINAL_QUEUE_MAX_BYTES {
                if state.queue.is_empty() {
                    tracing::warn!(pane_id, byte_len, "dropping incoming chunk: queue empty but over cap");
                    return;
                }
                while !state.queue.is_empty() && state.watermark_bytes + byte_len > TERMINAL_QUEUE_MAX_BYTES {
                    if let Some(dropped) = state.queue.pop_front() {
                        state.watermark_bytes -= dropped.byte_len;
                        tracing::warn!(pane_id, dropped_bytes = dropped.byte_len, "dropping oldest queued chunk over cap");
                    }
                }
            }

            state.watermark_bytes += byte_len;
            state.queue.push_back(QueueItem { data, byte_len });

            if !state.producer_paused && state.watermark_bytes > HIGH_WATERMARK {
                state.producer_paused = true;
                should_pause = true;
            }

            if !state.writing {
                state.writing = true;
                should_start_drain = true;
            }
        }

        if should_pause {
            self.pty.pause(pane_id);
        }
        if should_start_drain {
            Self::drain(std::sync::Arc::clone(self), pane_id.clone());
        }
    }

    /// Pop and write one queued item, scheduling itself again via
    /// `on_flushed` until the pane's queue runs dry.
    fn drain(this: std::sync::Arc<Self>, pane_id: PaneId)
    where
        R: 'static,
        P: 'static,
    {
        let item = {
            let mut panes = this.panes.lock().unwrap_or_else(|e| e.into_inner());
            let Some(state) = panes.get_mut(&pane_id) else { return };
            match state.queue.pop_front() {
                Some(item) => Some(item),
                None => {
                    state.writing = false;
                    None
                }
            }
        };
        let Some(item) = item else { return };

        let byte_len = item.byte_len;
        let cb_this = std::sync::Arc::clone(&this);
        let cb_pane = pane_id.clone();
        let on_flushed = Box::new(move || {
            let mut should_resume = false;
            {
                let mut panes = cb_this.panes.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(state) = panes.get_mut(&cb_pane) {
                    state.watermark_bytes = state.watermark_bytes.saturating_sub(byte_len);
                    if state.producer_paused && state.watermark_bytes < LOW_WATERMARK {
                        state.producer_paused = false;
                        should_resume = true;
                    }
                }
            }
            if should_resume {
                cb_this.pty.resume(&cb_pane);
            }
            Self::drain(std::sync::Arc::clone(&cb_this), cb_pane.clone());
        });

        this.renderer.write(&pane_id, item.data, on_flushed);
    }
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
