// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C5 — throttle queue: a per-pane FIFO ahead of the injection controller,
//! capping queued items and pacing sends with a minimum inter-send delay.
//!
//! Grounded on the teacher's `session/run.rs` backend-output pump (pop one,
//! await completion, continue) generalized from a byte stream to a message
//! queue, with the pacing delay modeled after `driver/grace.rs`'s
//! sleep-then-recheck idiom.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::oneshot;

use crate::event::TraceContext;
use crate::pane::PaneId;

pub const MAX_ITEMS: usize = 200;
pub const MAX_BYTES: usize = 512 * 1024;
pub const MIN_DELAY_MS: u64 = 100;

/// Result of a single `sendToPane` attempt, reported back through the
/// completion channel (spec §4.5 processor step).
pub struct SendOutcome {
    pub accepted: bool,
    pub verified: bool,
    pub status: &'static str,
    pub reason: Option<String>,
}

impl SendOutcome {
    fn not_accepted(reason: impl Into<String>) -> Self {
        Self { accepted: false, verified: false, status: "not_accepted", reason: Some(reason.into()) }
    }
}

/// The collaborators the throttle processor dispatches into: C6 for normal
/// sends, C7 for the two special command strings.
pub trait ThrottleTarget: Send + Sync {
    fn send_unstick(&self, pane_id: &PaneId);
    fn aggressive_nudge(&self, pane_id: &PaneId);
    fn send_to_pane(
        &self,
        pane_id: &PaneId,
        message: String,
        trace: TraceContext,
        on_complete: Box<dyn FnOnce(SendOutcome) + Send>,
    );
}

/// Outward outcome channel (spec §6.5): exactly one of `ack`/`outcome` is
/// published per queued item.
pub trait OutcomePublisher: Send + Sync {
    fn ack(&self, delivery_id: &str, pane_id: &PaneId);
    fn outcome(&self, delivery_id: &str, pane_id: &PaneId, accepted: bool, verified: bool, status: &str, reason: Option<&str>);
}

struct ThrottleItem {
    message: String,
    delivery_id: String,
    trace: TraceContext,
    byte_len: usize,
}

struct PaneQueue {
    queue: VecDeque<ThrottleItem>,
    queue_bytes: usize,
    processing: bool,
}

impl Default for PaneQueue {
    fn default() -> Self {
        Self { queue: VecDeque::new(), queue_bytes: 0, processing: false }
    }
}

/// Per-pane message throttle ahead of the injection controller.
pub struct ThrottleQueue<T: ThrottleTarget, O: OutcomePublisher> {
    target: T,
    outcomes: O,
    panes: Mutex<HashMap<PaneId, PaneQueue>>,
}

impl<T: ThrottleTarget + 'static, O: OutcomePublisher + 'static> ThrottleQueue<T, O> {
    pub fn new(target: T, outcomes: O) -> Self {
        Self { target, outcomes, panes: Mutex::new(HashMap::new()) }
    }

    pub fn queue_len(&self, pane_id: &PaneId) -> usize {
        let panes = self.panes.lock().unwrap_or_else(|e| e.into_inner());
        panes.get(pane_id).map(|p| p.queue.len()).unwrap_or(0)
    }

    /// Enqueue one message for `pane_id` (spec §4.5 `enqueue`).
    pub fn enqueue(self: &Arc<Self>, pane_id: &PaneId, message: String, delivery_id: String, trace: TraceContext) {
        let byte_len = message.len();
        if byte_len > MAX_BYTES {
            tracing::warn!(pane_id, delivery_id, byte_len, "dropping throttle item: exceeds MAX_BYTES");
            self.outcomes.outcome(&delivery_id, pane_id, false, false, "queue_capacity_exceeded", Some("message exceeds MAX_BYTES"));
            return;
        }

        let mut should_start = false;
        let mut evicted_ids: Vec<String> = Vec::new();
        {
            let mut panes = self.panes.lock().unwrap_or_else(|e| e.into_inner());
            let state = panes.entry(pane_id.clone()).or_default();

            while state.queue.len() + 1 > MAX_ITEMS || state.queue_bytes + byte_len > MAX_BYTES {
                match state.queue.pop_front() {
                    Some(evicted) => {
                        state.queue_bytes -= evicted.byte_len;
                        tracing::warn!(pane_id, delivery_id = evicted.delivery_id, "dropping queued throttle item: queue capacity exceeded");
                        evicted_ids.push(evicted.delivery_id);
                    }
                    None => break,
                }
            }

            state.queue_bytes += byte_len;
            state.queue.push_back(ThrottleItem { message, delivery_id, trace, byte_len });

            if !state.processing {
                state.processing = true;
                should_start = true;
            }
        }

        for evicted_id in evicted_ids {
            self.outcomes.outcome(&evicted_id, pane_id, false, false, "queue_capacity_exceeded", Some("evicted: queue capacity exceeded"));
        }

        if should_start {
            tokio::spawn(Self::run_processor(Arc::clone(self), pane_id.clone()));
        }
    }

    async fn run_processor(self: Arc<Self>, pane_id: PaneId) {
        loop {
            let item = {
                let mut panes = self.panes.lock().unwrap_or_else(|e| e.into_inner());
                let Some(state) = panes.get_mut(&pane_id) else { return };
                match state.queue.pop_front() {
                    Some(item) => {
                        state.queue_bytes = state.queue_bytes.saturating_sub(item.byte_len);
                        Some(item)
                    }
                    None => {
                        state.processing = false;
                        None
                    }
                }
            };
            let Some(item) = item else { return };

            self.process_one(&pane_id, item).await;
            tokio::time::sleep(Duration::from_millis(MIN_DELAY_MS)).await;
        }
    }

    async fn process_one(&self, pane_id: &PaneId, item: ThrottleItem) {
        let trimmed = item.message.trim();
        if trimmed == "(UNSTICK)" {
            self.target.send_unstick(pane_id);
            return;
        }
        if trimmed == "(AGGRESSIVE_NUDGE)" {
            self.target.aggressive_nudge(pane_id);
            return;
        }

        let stripped = strip_routing_wrappers(&item.message);
        let (tx, rx) = oneshot::channel();
        self.target.send_to_pane(pane_id, stripped, item.trace, Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        let outcome = rx.await.unwrap_or_else(|_| SendOutcome::not_accepted("sender dropped without completing"));

        if !outcome.accepted {
            self.outcomes.outcome(&item.delivery_id, pane_id, false, false, outcome.status, outcome.reason.as_deref());
        } else if outcome.verified {
            self.outcomes.ack(&item.delivery_id, pane_id);
        } else {
            self.outcomes.outcome(&item.delivery_id, pane_id, true, false, "accepted.unverified", None);
        }
    }
}

fn agent_msg_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[AGENT MSG[^\]]*\]\s*").unwrap_or_else(|e| unreachable!("static routing prefix pattern must compile: {e}"))
    })
}

fn msg_from_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[MSG from[^\]]*\]:\s*").unwrap_or_else(|e| unreachable!("static routing prefix pattern must compile: {e}"))
    })
}

/// Strip at most one `[AGENT MSG ...]` prefix, then up to three
/// `[MSG from ...]:` prefixes (spec §4.5 processor step).
fn strip_routing_wrappers(message: &str) -> String {
    let mut text = message;
    if let Some(m) = agent_msg_prefix_regex().find(text) {
        text = &text[m.end()..];
    }
    for _ in 0..3 {
        match msg_from_prefix_regex().find(text) {
            Some(m) => text = &text[m.end()..],
            None => break,
        }
    }
    text.to_string()
}

#[cfg(test)]
#[path = "throttle_tests.rs"]
mod tests;
