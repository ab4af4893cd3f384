// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C6 — injection controller: the per-pane idle queue, focus arbitration,
//! sanitize/write/submit/verify pipeline, and the process-wide stale-lock-
//! aware mutex that serializes injections across panes whose capability
//! does not `bypass_global_lock`.
//!
//! Grounded on the teacher's `session/run.rs` (the `tokio::select!`
//! multiplexer that drives one session's backend/detector/timer events
//! through a single mutable loop) generalized to one `tokio::spawn`ed
//! processor per pane queue, and `session/transition.rs`'s
//! `process_detected_state` step pipeline for the pre-check / focus /
//! sanitize / write / verify shape. The global mutex is built on
//! `tokio::sync::Semaphore` rather than a hand-rolled spinlock because a
//! single-permit semaphore is already FIFO-fair among waiters, which is
//! exactly the ordering guarantee this lock needs to provide.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::detector::CompactionState;
use crate::error::ErrorCode;
use crate::event::{Event, EventType, TraceContext};
use crate::pane::{CapabilityRecord, EnterMethod, InjectionMode, PaneId, SanitizeTransform};
use crate::pty::PtyTransport;

pub const IDLE_THRESHOLD_MS: i64 = 2_000;
pub const TYPING_GUARD_MS: i64 = 2_000;
pub const INJECTION_LOCK_TIMEOUT_MS: u64 = 2_000;
pub const FOCUS_MAX_RETRIES: u32 = 3;

/// Implementation choices not pinned down by spec text: spacing between
/// idle-queue retries, focus retries, and submit-acceptance polling, the
/// item cap on a pane's idle queue, and how long a compaction-gated item
/// may be held before it is surfaced as a timeout rather than silently
/// dropped. Recorded as Open Question decisions.
pub const QUEUE_RETRY_MS: u64 = 250;
pub const FOCUS_RETRY_DELAY_MS: u64 = 100;
pub const SUBMIT_ACCEPT_MAX_ATTEMPTS: u32 = 5;
pub const SUBMIT_POLL_INTERVAL_MS: u64 = 100;
pub const COMPACTION_GATE_GRACE_MS: i64 = 2_000;
pub const IDLE_QUEUE_MAX_ITEMS: usize = 200;

/// Terminal result of one `sendToPane` call (spec §4.6 step 8). Never
/// raised as an `Err` — see [`crate::error::PaneHostError`] for the
/// distinction.
#[derive(Debug, Clone)]
pub struct InjectOutcome {
    pub success: bool,
    pub verified: bool,
    pub reason: Option<ErrorCode>,
}

impl InjectOutcome {
    fn failed(reason: ErrorCode) -> Self {
        Self { success: false, verified: false, reason: Some(reason) }
    }

    fn ok(verified: bool) -> Self {
        Self { success: true, verified, reason: None }
    }

    fn ok_unverified(reason: ErrorCode) -> Self {
        Self { success: true, verified: false, reason: Some(reason) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub priority: bool,
    pub immediate: bool,
    pub trace: TraceContext,
    pub hm_send_fast_enter: bool,
}

/// Everything the controller needs to know about a pane that it does not
/// own itself; backed by the Coordinator's pane table.
pub trait PaneRegistry: Send + Sync {
    fn exists(&self, pane_id: &PaneId) -> bool;
    fn role(&self, pane_id: &PaneId) -> String;
    fn capability(&self, pane_id: &PaneId) -> Option<CapabilityRecord>;
    fn is_idle_enough(&self, pane_id: &PaneId, now_ms: i64) -> bool;
    fn user_is_typing(&self, pane_id: &PaneId, now_ms: i64) -> bool;
    fn note_inject_requested(&self, pane_id: &PaneId, now_ms: i64);
    fn compaction_gate(&self, pane_id: &PaneId) -> CompactionState;
    /// Best-effort check for submit-acceptance evidence (prompt cleared or
    /// echo observed) since the last call; polled by the verify step.
    fn poll_submit_accepted(&self, pane_id: &PaneId) -> bool;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64
    }
}

struct QueuedItem {
    message: String,
    options: SendOptions,
    on_complete: Option<Box<dyn FnOnce(InjectOutcome) + Send>>,
    compaction_deferred_since: Option<i64>,
}

#[derive(Default)]
struct PaneQueueState {
    queue: VecDeque<QueuedItem>,
    processing: bool,
}

/// Process-wide mutex guarding injections for panes with
/// `bypass_global_lock=false`. A stale holder (one that never completes
/// within `INJECTION_LOCK_TIMEOUT_MS`) is forced open by minting an extra
/// permit; the original holder's permit, if it ever returns, simply makes
/// the semaphore briefly over-subscribed rather than jamming every waiter
/// forever. `release` only clears bookkeeping used by pane teardown to
/// recognize its own stale hold — the permit itself is released by being
/// dropped at the end of the pipeline call that acquired it.
struct GlobalLock {
    semaphore: Arc<Semaphore>,
    holder: Mutex<Option<PaneId>>,
}

impl GlobalLock {
    fn new() -> Self {
        Self { semaphore: Arc::new(Semaphore::new(1)), holder: Mutex::new(None) }
    }

    async fn acquire(&self, pane_id: &PaneId) -> OwnedSemaphorePermit {
        let sem = Arc::clone(&self.semaphore);
        let permit = match tokio::time::timeout(Duration::from_millis(INJECTION_LOCK_TIMEOUT_MS), sem.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                tracing::warn!(pane_id, "forcing open a stale global injection lock");
                self.semaphore.add_permits(1);
                match self.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => unreachable!("global injection semaphore is never closed"),
                }
            }
        };
        *self.holder.lock().unwrap_or_else(|e| e.into_inner()) = Some(pane_id.clone());
        permit
    }

    fn release(&self, pane_id: &PaneId) {
        let mut holder = self.holder.lock().unwrap_or_else(|e| e.into_inner());
        if holder.as_deref() == Some(pane_id.as_str()) {
            *holder = None;
        }
    }
}

/// C6 — see module docs.
pub struct InjectionController<P: PtyTransport, R: PaneRegistry> {
    pty: P,
    registry: R,
    bus: Arc<crate::bus::EventBus>,
    clock: Arc<dyn Clock>,
    queues: Mutex<HashMap<PaneId, PaneQueueState>>,
    lock: GlobalLock,
    codex_identity_sent: Mutex<HashSet<PaneId>>,
}

impl<P: PtyTransport + 'static, R: PaneRegistry + 'static> InjectionController<P, R> {
    pub fn new(pty: P, registry: R, bus: Arc<crate::bus::EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pty,
            registry,
            bus,
            clock,
            queues: Mutex::new(HashMap::new()),
            lock: GlobalLock::new(),
            codex_identity_sent: Mutex::new(HashSet::new()),
        }
    }

    /// Reset codex-identity memoization for a pane (spec §4.7 `restartPane`).
    pub fn forget_codex_identity(&self, pane_id: &PaneId) {
        self.codex_identity_sent.lock().unwrap_or_else(|e| e.into_inner()).remove(pane_id);
    }

    pub fn queue_len(&self, pane_id: &PaneId) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(pane_id).map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Enqueue one message on `pane_id`'s idle queue (spec §4.6 `sendToPane`).
    pub fn send_to_pane(
        self: &Arc<Self>,
        pane_id: &PaneId,
        message: impl Into<String>,
        options: SendOptions,
        on_complete: Option<Box<dyn FnOnce(InjectOutcome) + Send>>,
    ) {
        let message = message.into();
        let priority = options.priority;
        let trace = options.trace.clone();

        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let state = queues.entry(pane_id.clone()).or_default();

        if state.queue.len() >= IDLE_QUEUE_MAX_ITEMS {
            drop(queues);
            if let Some(cb) = on_complete {
                cb(InjectOutcome::failed(ErrorCode::QueueCapacityExceeded));
            }
            return;
        }

        let item = QueuedItem { message, options, on_complete, compaction_deferred_since: None };
        if priority {
            state.queue.push_front(item);
        } else {
            state.queue.push_back(item);
        }
        let should_start = !state.processing;
        state.processing = true;
        drop(queues);

        self.bus.emit(Event {
            event_type: EventType::InjectQueued,
            pane_id: pane_id.clone(),
            ts_ms: self.clock.now_ms() as u64,
            correlation_id: trace.correlation_id().map(str::to_string),
            causation_id: trace.causation_id().map(str::to_string),
            payload: serde_json::Value::Null,
            source: "injection".to_string(),
        });

        if should_start {
            tokio::spawn(Self::process_idle_queue(Arc::clone(self), pane_id.clone()));
        }
    }

    /// `broadcast` (spec §4.6) — priority + immediate delivery to pane "1".
    pub fn broadcast(self: &Arc<Self>, message: impl Into<String>) {
        self.send_to_pane(&"1".to_string(), message, SendOptions { priority: true, immediate: true, ..Default::default() }, None);
    }

    /// Drop every queued item for a torn-down pane with `pane_gone`, and
    /// release the global lock if this pane still appears to be holding it
    /// (spec §5 cancellation).
    pub fn teardown(&self, pane_id: &PaneId) {
        self.drain_pane_gone(pane_id);
        self.lock.release(pane_id);
    }

    fn drain_pane_gone(&self, pane_id: &PaneId) {
        let mut items: Vec<QueuedItem> = {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            match queues.get_mut(pane_id) {
                Some(state) => {
                    state.processing = false;
                    state.queue.drain(..).collect()
                }
                None => Vec::new(),
            }
        };
        for mut item in items.drain(..) {
            self.complete(pane_id, &mut item, InjectOutcome::failed(ErrorCode::PaneGone));
        }
    }

    fn complete(&self, pane_id: &PaneId, item: &mut QueuedItem, outcome: InjectOutcome) {
        self.bus.emit(Event {
            event_type: EventType::InjectApplied,
            pane_id: pane_id.clone(),
            ts_ms: self.clock.now_ms() as u64,
            correlation_id: item.options.trace.correlation_id().map(str::to_string),
            causation_id: item.options.trace.causation_id().map(str::to_string),
            payload: serde_json::json!({
                "success": outcome.success,
                "verified": outcome.verified,
                "reason": outcome.reason.map(|r| r.as_str()),
            }),
            source: "injection".to_string(),
        });
        if let Some(cb) = item.on_complete.take() {
            cb(outcome);
        }
    }

    async fn process_idle_queue(self: Arc<Self>, pane_id: PaneId) {
        loop {
            let now = self.clock.now_ms();

            let Some(cap) = self.registry.capability(&pane_id) else {
                self.drain_pane_gone(&pane_id);
                return;
            };
            if !self.registry.exists(&pane_id) {
                self.drain_pane_gone(&pane_id);
                return;
            }

            enum Readiness {
                Wait,
                GateTimedOut,
                Go,
            }

            let readiness = {
                let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
                let Some(state) = queues.get_mut(&pane_id) else { return };
                let Some(item) = state.queue.front_mut() else {
                    state.processing = false;
                    return;
                };

                if !item.options.immediate && !self.registry.is_idle_enough(&pane_id, now) {
                    Readiness::Wait
                } else if cap.defer_submit_while_pane_active
                    && matches!(self.registry.compaction_gate(&pane_id), CompactionState::Confirmed | CompactionState::Suspected)
                {
                    let since = *item.compaction_deferred_since.get_or_insert(now);
                    if now - since > COMPACTION_GATE_GRACE_MS {
                        Readiness::GateTimedOut
                    } else {
                        Readiness::Wait
                    }
                } else {
                    Readiness::Go
                }
            };

            match readiness {
                Readiness::Wait => {
                    tokio::time::sleep(Duration::from_millis(QUEUE_RETRY_MS)).await;
                    continue;
                }
                Readiness::GateTimedOut => {
                    let popped = {
                        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
                        queues.get_mut(&pane_id).and_then(|s| s.queue.pop_front())
                    };
                    if let Some(mut item) = popped {
                        self.complete(&pane_id, &mut item, InjectOutcome::failed(ErrorCode::CompactionDeferredTimeout));
                    }
                    continue;
                }
                Readiness::Go => {}
            }

            let mut item = {
                let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
                let Some(state) = queues.get_mut(&pane_id) else { return };
                match state.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        state.processing = false;
                        return;
                    }
                }
            };

            self.registry.note_inject_requested(&pane_id, now);
            let outcome = self.run_pipeline(&pane_id, &cap, &mut item).await;
            self.complete(&pane_id, &mut item, outcome);
        }
    }

    /// Retry-once wrapper (spec §4.6 error taxonomy: all codes except
    /// `pane_gone`/`queue_capacity_exceeded` may be retried once per item).
    async fn run_pipeline(&self, pane_id: &PaneId, cap: &CapabilityRecord, item: &mut QueuedItem) -> InjectOutcome {
        let first = self.run_pipeline_once(pane_id, cap, item).await;
        if first.success {
            return first;
        }
        match first.reason {
            Some(reason) if reason.retryable() => {
                tracing::warn!(pane_id, reason = %reason, "retrying injection once");
                self.run_pipeline_once(pane_id, cap, item).await
            }
            _ => first,
        }
    }

    async fn run_pipeline_once(&self, pane_id: &PaneId, cap: &CapabilityRecord, item: &mut QueuedItem) -> InjectOutcome {
        if !self.registry.exists(pane_id) {
            return InjectOutcome::failed(ErrorCode::PaneGone);
        }

        let now = self.clock.now_ms();
        if cap.typing_guard_when_bypassing && self.registry.user_is_typing(pane_id, now) {
            tokio::time::sleep(Duration::from_millis(QUEUE_RETRY_MS)).await;
        }

        let _permit: Option<OwnedSemaphorePermit> = if cap.bypass_global_lock { None } else { Some(self.lock.acquire(pane_id).await) };

        let outcome = self.deliver(pane_id, cap, item).await;

        if _permit.is_some() {
            self.lock.release(pane_id);
        }
        outcome
    }

    async fn deliver(&self, pane_id: &PaneId, cap: &CapabilityRecord, item: &mut QueuedItem) -> InjectOutcome {
        if cap.requires_focus_for_enter && !self.focus_with_retry(pane_id, FOCUS_MAX_RETRIES, FOCUS_RETRY_DELAY_MS).await {
            return InjectOutcome::failed(ErrorCode::FocusFailed);
        }

        let text = sanitize(&item.message, cap.sanitize_transform);

        if cap.mode == InjectionMode::CodexExec {
            self.bus.emit(Event {
                event_type: EventType::InjectSubmitRequested,
                pane_id: pane_id.clone(),
                ts_ms: self.clock.now_ms() as u64,
                correlation_id: item.options.trace.correlation_id().map(str::to_string),
                causation_id: item.options.trace.causation_id().map(str::to_string),
                payload: serde_json::Value::Null,
                source: "injection".to_string(),
            });
            let payload = self.with_codex_identity(pane_id, &text);
            let accepted = self.pty.codex_exec(pane_id, &payload, &item.options.trace);
            if accepted {
                self.bus.emit(Event {
                    event_type: EventType::InjectSubmitSent,
                    pane_id: pane_id.clone(),
                    ts_ms: self.clock.now_ms() as u64,
                    correlation_id: item.options.trace.correlation_id().map(str::to_string),
                    causation_id: item.options.trace.causation_id().map(str::to_string),
                    payload: serde_json::Value::Null,
                    source: "injection".to_string(),
                });
                return InjectOutcome::ok(true);
            }
            return InjectOutcome::failed(ErrorCode::EnterFailed);
        }

        if cap.clear_line_before_write {
            self.pty.write(pane_id, b"\x15");
        }
        if cap.home_reset_before_write {
            self.pty.write(pane_id, b"\x01");
        }

        if cap.use_chunked_write {
            let width = self.pty.column_width(pane_id).max(1) as usize;
            for chunk in text.as_bytes().chunks(width) {
                self.pty.write(pane_id, chunk);
                tokio::task::yield_now().await;
            }
        } else {
            self.pty.write(pane_id, text.as_bytes());
        }

        self.bus.emit(Event {
            event_type: EventType::InjectSubmitRequested,
            pane_id: pane_id.clone(),
            ts_ms: self.clock.now_ms() as u64,
            correlation_id: item.options.trace.correlation_id().map(str::to_string),
            causation_id: item.options.trace.causation_id().map(str::to_string),
            payload: serde_json::Value::Null,
            source: "injection".to_string(),
        });

        match cap.enter_method {
            EnterMethod::Trusted => self.pty.send_trusted_enter(pane_id),
            EnterMethod::Pty => {
                if cap.enter_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(cap.enter_delay_ms)).await;
                }
                self.pty.write(pane_id, b"\r");
            }
            EnterMethod::None => {}
        }

        self.bus.emit(Event {
            event_type: EventType::InjectSubmitSent,
            pane_id: pane_id.clone(),
            ts_ms: self.clock.now_ms() as u64,
            correlation_id: item.options.trace.correlation_id().map(str::to_string),
            causation_id: item.options.trace.causation_id().map(str::to_string),
            payload: serde_json::Value::Null,
            source: "injection".to_string(),
        });

        if !cap.verify_submit_accepted {
            return InjectOutcome::ok(false);
        }

        if self.observe_submit_accepted(pane_id).await {
            InjectOutcome::ok(true)
        } else {
            InjectOutcome::ok_unverified(ErrorCode::SubmitNotAccepted)
        }
    }

    async fn observe_submit_accepted(&self, pane_id: &PaneId) -> bool {
        for _ in 0..SUBMIT_ACCEPT_MAX_ATTEMPTS {
            if self.registry.poll_submit_accepted(pane_id) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(SUBMIT_POLL_INTERVAL_MS)).await;
        }
        false
    }

    /// `focusWithRetry` (spec §4.6 public surface).
    pub async fn focus_with_retry(&self, pane_id: &PaneId, max_retries: u32, retry_delay_ms: u64) -> bool {
        for attempt in 0..=max_retries {
            if self.pty.focus(pane_id) {
                return true;
            }
            if attempt < max_retries {
                tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
            }
        }
        false
    }

    fn with_codex_identity(&self, pane_id: &PaneId, text: &str) -> String {
        let mut sent = self.codex_identity_sent.lock().unwrap_or_else(|e| e.into_inner());
        if sent.insert(pane_id.clone()) {
            let today = chrono::Utc::now().format("%Y-%m-%d");
            format!("# HIVEMIND SESSION: {} - Started {today}\n{text}", self.registry.role(pane_id))
        } else {
            text.to_string()
        }
    }
}

fn sanitize(text: &str, transform: SanitizeTransform) -> String {
    match transform {
        SanitizeTransform::None => text.to_string(),
        SanitizeTransform::GeminiSanitize => text.split_whitespace().collect::<Vec<_>>().join(" "),
        SanitizeTransform::SanitizeMultiline => text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .collect::<Vec<_>>()
            .join("\\n"),
    }
}

fn prompt_ready_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(?:[$>]\s*$|^>\s*$)").unwrap_or_else(|e| unreachable!("static prompt-ready pattern must compile: {e}"))
    })
}

/// `isPromptReady` (spec §4.6 helper). Deliberately a separate regex from
/// the compaction detector's own prompt-ready check — see the Open
/// Question decision recorded for the detector.
pub fn is_prompt_ready(tail: &str) -> bool {
    prompt_ready_regex().is_match(tail)
}

#[cfg(test)]
#[path = "injection_tests.rs"]
mod tests;
