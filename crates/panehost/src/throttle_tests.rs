// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;

struct RecordingTarget {
    calls: mpsc::UnboundedSender<String>,
    accepted: bool,
    verified: bool,
}

impl ThrottleTarget for RecordingTarget {
    fn send_unstick(&self, pane_id: &PaneId) {
        let _ = self.calls.send(format!("unstick:{pane_id}"));
    }

    fn aggressive_nudge(&self, pane_id: &PaneId) {
        let _ = self.calls.send(format!("nudge:{pane_id}"));
    }

    fn send_to_pane(
        &self,
        pane_id: &PaneId,
        message: String,
        _trace: TraceContext,
        on_complete: Box<dyn FnOnce(SendOutcome) + Send>,
    ) {
        let _ = self.calls.send(format!("send:{pane_id}:{message}"));
        let status = if self.accepted { "accepted.unverified" } else { "not_accepted" };
        on_complete(SendOutcome { accepted: self.accepted, verified: self.verified, status, reason: None });
    }
}

struct RecordingOutcomes {
    events: mpsc::UnboundedSender<(String, bool, bool, String)>,
}

impl OutcomePublisher for RecordingOutcomes {
    fn ack(&self, delivery_id: &str, _pane_id: &PaneId) {
        let _ = self.events.send((delivery_id.to_string(), true, true, "ack".to_string()));
    }

    fn outcome(&self, delivery_id: &str, _pane_id: &PaneId, accepted: bool, verified: bool, status: &str, _reason: Option<&str>) {
        let _ = self.events.send((delivery_id.to_string(), accepted, verified, status.to_string()));
    }
}

#[derive(Default)]
struct BlockingTarget {
    captured: Mutex<Vec<Box<dyn FnOnce(SendOutcome) + Send>>>,
}

impl ThrottleTarget for BlockingTarget {
    fn send_unstick(&self, _pane_id: &PaneId) {}
    fn aggressive_nudge(&self, _pane_id: &PaneId) {}

    fn send_to_pane(&self, _pane_id: &PaneId, _message: String, _trace: TraceContext, on_complete: Box<dyn FnOnce(SendOutcome) + Send>) {
        self.captured.lock().unwrap_or_else(|e| e.into_inner()).push(on_complete);
    }
}

struct NullOutcomes;
impl OutcomePublisher for NullOutcomes {
    fn ack(&self, _delivery_id: &str, _pane_id: &PaneId) {}
    fn outcome(&self, _delivery_id: &str, _pane_id: &PaneId, _accepted: bool, _verified: bool, _status: &str, _reason: Option<&str>) {}
}

#[tokio::test]
async fn oversized_message_is_dropped_before_queueing() {
    let target = RecordingTarget { calls: mpsc::unbounded_channel().0, accepted: true, verified: true };
    let outcomes = NullOutcomes;
    let queue = Arc::new(ThrottleQueue::new(target, outcomes));

    let huge = "x".repeat(MAX_BYTES + 1);
    queue.enqueue(&"pane-1".to_string(), huge, "d1".to_string(), TraceContext::default());

    assert_eq!(queue.queue_len(&"pane-1".to_string()), 0);
}

#[tokio::test]
async fn verified_delivery_emits_ack() {
    let (calls_tx, _calls_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let target = RecordingTarget { calls: calls_tx, accepted: true, verified: true };
    let outcomes = RecordingOutcomes { events: events_tx };
    let queue = Arc::new(ThrottleQueue::new(target, outcomes));

    queue.enqueue(&"pane-1".to_string(), "hello".to_string(), "d1".to_string(), TraceContext::default());

    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv()).await.expect("ack did not arrive in time");
    let (delivery_id, accepted, verified, status) = event.expect("channel closed");
    assert_eq!(delivery_id, "d1");
    assert!(accepted);
    assert!(verified);
    assert_eq!(status, "ack");
}

#[tokio::test]
async fn accepted_but_unverified_delivery_emits_unverified_outcome() {
    let (calls_tx, _calls_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let target = RecordingTarget { calls: calls_tx, accepted: true, verified: false };
    let outcomes = RecordingOutcomes { events: events_tx };
    let queue = Arc::new(ThrottleQueue::new(target, outcomes));

    queue.enqueue(&"pane-1".to_string(), "hello".to_string(), "d1".to_string(), TraceContext::default());

    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv()).await.expect("outcome did not arrive in time");
    let (_, accepted, verified, status) = event.expect("channel closed");
    assert!(accepted);
    assert!(!verified);
    assert_eq!(status, "accepted.unverified");
}

#[tokio::test]
async fn rejected_delivery_emits_not_accepted_outcome() {
    let (calls_tx, _calls_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let target = RecordingTarget { calls: calls_tx, accepted: false, verified: false };
    let outcomes = RecordingOutcomes { events: events_tx };
    let queue = Arc::new(ThrottleQueue::new(target, outcomes));

    queue.enqueue(&"pane-1".to_string(), "hello".to_string(), "d1".to_string(), TraceContext::default());

    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv()).await.expect("outcome did not arrive in time");
    let (_, accepted, verified, status) = event.expect("channel closed");
    assert!(!accepted);
    assert!(!verified);
    assert_eq!(status, "not_accepted");
}

#[tokio::test]
async fn unstick_and_aggressive_nudge_commands_bypass_normal_send() {
    let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
    let target = RecordingTarget { calls: calls_tx, accepted: true, verified: true };
    let outcomes = NullOutcomes;
    let queue = Arc::new(ThrottleQueue::new(target, outcomes));

    queue.enqueue(&"pane-1".to_string(), "(UNSTICK)".to_string(), "d1".to_string(), TraceContext::default());
    let call = tokio::time::timeout(Duration::from_secs(1), calls_rx.recv()).await.expect("call did not arrive");
    assert_eq!(call, Some("unstick:pane-1".to_string()));
}

#[tokio::test]
async fn queue_evicts_oldest_when_processor_is_stalled() {
    let target = BlockingTarget::default();
    let outcomes = NullOutcomes;
    let queue = Arc::new(ThrottleQueue::new(target, outcomes));
    let pane = "pane-1".to_string();

    // First item gets popped into the stalled processor immediately, leaving
    // the queue empty; everything after that stacks up and is subject to
    // MAX_ITEMS/MAX_BYTES eviction.
    queue.enqueue(&pane, "seed".to_string(), "d0".to_string(), TraceContext::default());
    tokio::task::yield_now().await;

    // Each item is half MAX_BYTES, so only two can coexist in the queue;
    // pushing a third must evict the oldest to stay within MAX_BYTES.
    let big = "x".repeat(MAX_BYTES / 2);
    for i in 0..4 {
        queue.enqueue(&pane, big.clone(), format!("d{i}"), TraceContext::default());
    }

    assert_eq!(queue.queue_len(&pane), 2);
}

#[test]
fn strip_routing_wrappers_removes_agent_and_msg_from_prefixes() {
    let stripped = strip_routing_wrappers("[AGENT MSG id=1][MSG from alice]: [MSG from bob]: hello there");
    assert_eq!(stripped, "hello there");
}

#[test]
fn strip_routing_wrappers_caps_msg_from_at_three() {
    let input = "[MSG from a]: [MSG from b]: [MSG from c]: [MSG from d]: payload";
    let stripped = strip_routing_wrappers(input);
    assert_eq!(stripped, "[MSG from d]: payload");
}
