// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::event::PtySignal;
use crate::pane::{CapabilityRecord, EnterMethod, InjectionMode, SanitizeTransform};

struct FakePty {
    focus_ok: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    codex_calls: Mutex<Vec<String>>,
    codex_accept: AtomicBool,
    trusted_enter_calls: AtomicUsize,
}

impl Default for FakePty {
    fn default() -> Self {
        Self {
            focus_ok: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
            codex_calls: Mutex::new(Vec::new()),
            codex_accept: AtomicBool::new(true),
            trusted_enter_calls: AtomicUsize::new(0),
        }
    }
}

impl PtyTransport for FakePty {
    fn create(&self, _pane_id: &PaneId, _cwd: &std::path::Path) -> crate::error::Result<()> {
        Ok(())
    }
    fn write(&self, _pane_id: &PaneId, data: &[u8]) {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).push(data.to_vec());
    }
    fn pause(&self, _pane_id: &PaneId) {}
    fn resume(&self, _pane_id: &PaneId) {}
    fn focus(&self, _pane_id: &PaneId) -> bool {
        self.focus_ok.load(Ordering::Relaxed)
    }
    fn resize(&self, _pane_id: &PaneId, _cols: u16, _rows: u16) {}
    fn spawn(&self, _pane_id: &PaneId, _command: &str) -> crate::error::Result<()> {
        Ok(())
    }
    fn kill(&self, _pane_id: &PaneId, _signal: PtySignal) {}
    fn is_process_running(&self, _pane_id: &PaneId) -> bool {
        true
    }
    fn column_width(&self, _pane_id: &PaneId) -> u16 {
        80
    }
    fn codex_exec(&self, _pane_id: &PaneId, text: &str, _meta: &TraceContext) -> bool {
        self.codex_calls.lock().unwrap_or_else(|e| e.into_inner()).push(text.to_string());
        self.codex_accept.load(Ordering::Relaxed)
    }
    fn send_trusted_enter(&self, _pane_id: &PaneId) {
        self.trusted_enter_calls.fetch_add(1, Ordering::Relaxed);
    }
    fn on_data(&self, _pane_id: &PaneId, _callback: Box<dyn Fn(&[u8]) + Send + Sync>) -> crate::pty::Disposer {
        Box::new(|| {})
    }
    fn on_exit(&self, _pane_id: &PaneId, _callback: Box<dyn FnOnce(i32) + Send>) -> crate::pty::Disposer {
        Box::new(|| {})
    }
}

struct FakeRegistry {
    exists: AtomicBool,
    capability: CapabilityRecord,
    idle: AtomicBool,
    typing: AtomicBool,
    gate: Mutex<CompactionState>,
    submit_accepted: AtomicBool,
    role: String,
}

impl FakeRegistry {
    fn new(capability: CapabilityRecord) -> Self {
        Self {
            exists: AtomicBool::new(true),
            capability,
            idle: AtomicBool::new(true),
            typing: AtomicBool::new(false),
            gate: Mutex::new(CompactionState::None),
            submit_accepted: AtomicBool::new(true),
            role: "worker".to_string(),
        }
    }
}

impl PaneRegistry for FakeRegistry {
    fn exists(&self, _pane_id: &PaneId) -> bool {
        self.exists.load(Ordering::Relaxed)
    }
    fn role(&self, _pane_id: &PaneId) -> String {
        self.role.clone()
    }
    fn capability(&self, _pane_id: &PaneId) -> Option<CapabilityRecord> {
        Some(self.capability.clone())
    }
    fn is_idle_enough(&self, _pane_id: &PaneId, _now_ms: i64) -> bool {
        self.idle.load(Ordering::Relaxed)
    }
    fn user_is_typing(&self, _pane_id: &PaneId, _now_ms: i64) -> bool {
        self.typing.load(Ordering::Relaxed)
    }
    fn note_inject_requested(&self, _pane_id: &PaneId, _now_ms: i64) {}
    fn compaction_gate(&self, _pane_id: &PaneId) -> CompactionState {
        *self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }
    fn poll_submit_accepted(&self, _pane_id: &PaneId) -> bool {
        self.submit_accepted.load(Ordering::Relaxed)
    }
}

struct TestClock(AtomicI64);
impl Clock for TestClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

fn minimal_pty_capability() -> CapabilityRecord {
    CapabilityRecord {
        mode: InjectionMode::Pty,
        bypass_global_lock: true,
        apply_compaction_gate: false,
        requires_focus_for_enter: false,
        enter_method: EnterMethod::None,
        enter_delay_ms: 0,
        sanitize_multiline: false,
        clear_line_before_write: false,
        use_chunked_write: false,
        home_reset_before_write: false,
        verify_submit_accepted: false,
        defer_submit_while_pane_active: false,
        typing_guard_when_bypassing: false,
        sanitize_transform: SanitizeTransform::None,
        submit_method: "pty-enter".to_string(),
        enter_failure_reason: None,
    }
}

fn controller<F: PaneRegistry + 'static>(pty: FakePty, registry: F) -> Arc<InjectionController<FakePty, F>> {
    let bus = Arc::new(crate::bus::EventBus::new(64));
    let clock = Arc::new(TestClock(AtomicI64::new(0)));
    Arc::new(InjectionController::new(pty, registry, bus, clock))
}

#[tokio::test]
async fn missing_pane_aborts_with_pane_gone() {
    let pty = FakePty::default();
    let registry = FakeRegistry::new(minimal_pty_capability());
    registry.exists.store(false, Ordering::Relaxed);
    let ctrl = controller(pty, registry);

    let (tx, mut rx) = mpsc::unbounded_channel();
    ctrl.send_to_pane(&"p1".to_string(), "hello", SendOptions::default(), Some(Box::new(move |o| {
        let _ = tx.send(o);
    })));

    let outcome = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap_or(None).expect("outcome");
    assert!(!outcome.success);
    assert!(matches!(outcome.reason, Some(ErrorCode::PaneGone)));
}

#[tokio::test]
async fn queue_capacity_exceeded_rejects_synchronously() {
    let pty = FakePty::default();
    let registry = FakeRegistry::new(minimal_pty_capability());
    registry.idle.store(false, Ordering::Relaxed);
    let ctrl = controller(pty, registry);

    for i in 0..IDLE_QUEUE_MAX_ITEMS {
        ctrl.send_to_pane(&"p1".to_string(), format!("m{i}"), SendOptions::default(), None);
    }
    assert_eq!(ctrl.queue_len(&"p1".to_string()), IDLE_QUEUE_MAX_ITEMS);

    let (tx, mut rx) = mpsc::unbounded_channel();
    ctrl.send_to_pane(&"p1".to_string(), "overflow", SendOptions::default(), Some(Box::new(move |o| {
        let _ = tx.send(o);
    })));

    let outcome = rx.recv().await.expect("rejection outcome");
    assert!(!outcome.success);
    assert!(matches!(outcome.reason, Some(ErrorCode::QueueCapacityExceeded)));
    assert_eq!(ctrl.queue_len(&"p1".to_string()), IDLE_QUEUE_MAX_ITEMS);
}

#[tokio::test]
async fn verified_pty_delivery_writes_text_and_trusted_enter() {
    let pty = FakePty::default();
    let registry = FakeRegistry::new(CapabilityRecord::claude());
    let ctrl = controller(pty, registry);

    let (tx, mut rx) = mpsc::unbounded_channel();
    ctrl.send_to_pane(&"p1".to_string(), "do the thing", SendOptions::default(), Some(Box::new(move |o| {
        let _ = tx.send(o);
    })));

    let outcome = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap_or(None).expect("outcome");
    assert!(outcome.success);
    assert!(outcome.verified);
    assert_eq!(ctrl.pty.trusted_enter_calls.load(Ordering::Relaxed), 1);
    let writes = ctrl.pty.writes.lock().unwrap_or_else(|e| e.into_inner());
    assert!(writes.iter().any(|w| w == b"\x15"));
    assert!(writes.iter().any(|w| w == b"\x01"));
    assert!(writes.iter().any(|w| w.as_slice() == b"do the thing"));
}

#[tokio::test]
async fn codex_exec_path_prepends_identity_only_once() {
    let pty = FakePty::default();
    let registry = FakeRegistry::new(CapabilityRecord::codex());
    let ctrl = controller(pty, registry);

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    ctrl.send_to_pane(&"p1".to_string(), "first", SendOptions::default(), Some(Box::new(move |o| {
        let _ = tx1.send(o);
    })));
    let outcome1 = tokio::time::timeout(Duration::from_secs(1), rx1.recv()).await.unwrap_or(None).expect("outcome1");
    assert!(outcome1.success && outcome1.verified);

    let (tx2, mut rx2) = mpsc::unbounded_channel();
    ctrl.send_to_pane(&"p1".to_string(), "second", SendOptions::default(), Some(Box::new(move |o| {
        let _ = tx2.send(o);
    })));
    let outcome2 = tokio::time::timeout(Duration::from_secs(1), rx2.recv()).await.unwrap_or(None).expect("outcome2");
    assert!(outcome2.success && outcome2.verified);

    let calls = ctrl.pty.codex_calls.lock().unwrap_or_else(|e| e.into_inner());
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("# HIVEMIND SESSION: worker - Started"));
    assert_eq!(calls[1], "second");
}

#[tokio::test]
async fn focus_failure_surfaces_as_focus_failed_after_retry() {
    let pty = FakePty::default();
    pty.focus_ok.store(false, Ordering::Relaxed);
    let registry = FakeRegistry::new(CapabilityRecord::claude());
    let ctrl = controller(pty, registry);

    let (tx, mut rx) = mpsc::unbounded_channel();
    ctrl.send_to_pane(&"p1".to_string(), "hi", SendOptions::default(), Some(Box::new(move |o| {
        let _ = tx.send(o);
    })));

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap_or(None).expect("outcome");
    assert!(!outcome.success);
    assert!(matches!(outcome.reason, Some(ErrorCode::FocusFailed)));
}

#[tokio::test]
async fn priority_item_runs_before_an_already_queued_normal_item() {
    let pty = FakePty::default();
    let registry = FakeRegistry::new(minimal_pty_capability());
    registry.idle.store(false, Ordering::Relaxed);
    let ctrl = controller(pty, registry);

    ctrl.send_to_pane(&"p1".to_string(), "normal", SendOptions::default(), None);
    ctrl.send_to_pane(&"p1".to_string(), "urgent", SendOptions { priority: true, ..Default::default() }, None);

    ctrl.registry.idle.store(true, Ordering::Relaxed);

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if ctrl.queue_len(&"p1".to_string()) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("queue drained");

    let writes = ctrl.pty.writes.lock().unwrap_or_else(|e| e.into_inner());
    let first_text = writes.iter().find(|w| *w == b"urgent" || *w == b"normal").expect("first message write");
    assert_eq!(first_text.as_slice(), b"urgent");
}

#[test]
fn sanitize_gemini_collapses_newlines_and_whitespace() {
    let out = sanitize("line one\nline   two\n\nline three", SanitizeTransform::GeminiSanitize);
    assert_eq!(out, "line one line two line three");
}

#[test]
fn sanitize_multiline_escapes_newlines_and_strips_cr() {
    let out = sanitize("first\r\nsecond\nthird", SanitizeTransform::SanitizeMultiline);
    assert_eq!(out, "first\\nsecond\\nthird");
}

#[test]
fn prompt_ready_matches_trailing_shell_prompt() {
    assert!(is_prompt_ready("some output\n$ "));
    assert!(!is_prompt_ready("still working..."));
}
