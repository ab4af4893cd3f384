// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::*;
use crate::bus::EventQuery;
use crate::event::PtySignal;

struct FakePty {
    writes: Mutex<Vec<Vec<u8>>>,
}

impl Default for FakePty {
    fn default() -> Self {
        Self { writes: Mutex::new(Vec::new()) }
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
        true
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
    fn codex_exec(&self, _pane_id: &PaneId, _text: &str, _meta: &crate::event::TraceContext) -> bool {
        true
    }
    fn send_trusted_enter(&self, _pane_id: &PaneId) {}
    fn on_data(&self, _pane_id: &PaneId, _callback: Box<dyn Fn(&[u8]) + Send + Sync>) -> crate::pty::Disposer {
        Box::new(|| {})
    }
    fn on_exit(&self, _pane_id: &PaneId, _callback: Box<dyn FnOnce(i32) + Send>) -> crate::pty::Disposer {
        Box::new(|| {})
    }
}

#[derive(Default)]
struct FakeTarget {
    unstick_calls: AtomicUsize,
    restart_calls: AtomicUsize,
    fresh_start_calls: AtomicUsize,
}

impl RecoveryTarget for FakeTarget {
    fn send_unstick(&self, _pane_id: &PaneId) {
        self.unstick_calls.fetch_add(1, Ordering::Relaxed);
    }
    fn restart_pane(&self, _pane_id: &PaneId) {
        self.restart_calls.fetch_add(1, Ordering::Relaxed);
    }
    fn fresh_start_all(&self) {
        self.fresh_start_calls.fetch_add(1, Ordering::Relaxed);
    }
}

struct TestClock(AtomicI64);
impl Clock for TestClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}
impl TestClock {
    fn advance(&self, by_ms: i64) {
        self.0.fetch_add(by_ms, Ordering::Relaxed);
    }
}

fn make() -> (Arc<RecoveryController<FakePty, FakeTarget>>, Arc<crate::bus::EventBus>, Arc<TestClock>) {
    let bus = Arc::new(crate::bus::EventBus::new(64));
    let clock = Arc::new(TestClock(AtomicI64::new(0)));
    let ctrl = Arc::new(RecoveryController::new(FakePty::default(), FakeTarget::default(), Arc::clone(&bus), clock.clone() as Arc<dyn Clock>));
    (ctrl, bus, clock)
}

#[test]
fn mark_is_idempotent_and_clear_emits_cleared_event() {
    let (ctrl, bus, _clock) = make();
    let pane = "p1".to_string();

    ctrl.mark(&pane);
    ctrl.mark(&pane);
    assert!(ctrl.is_marked(&pane));

    let marked = bus.query(&EventQuery { event_type: Some(EventType::RecoveryStuckMarked), ..Default::default() });
    assert_eq!(marked.len(), 1);

    ctrl.clear(&pane);
    assert!(!ctrl.is_marked(&pane));
    let cleared = bus.query(&EventQuery { event_type: Some(EventType::RecoveryStuckCleared), ..Default::default() });
    assert_eq!(cleared.len(), 1);
}

#[test]
fn forget_drops_bookkeeping_without_emitting_cleared() {
    let (ctrl, bus, _clock) = make();
    let pane = "p1".to_string();
    ctrl.mark(&pane);

    ctrl.forget(&pane);
    assert!(!ctrl.is_marked(&pane));
    let cleared = bus.query(&EventQuery { event_type: Some(EventType::RecoveryStuckCleared), ..Default::default() });
    assert!(cleared.is_empty());
}

#[tokio::test]
async fn sweep_walks_the_escalation_ladder_one_rung_per_grace_window() {
    let (ctrl, _bus, clock) = make();
    let pane = "p1".to_string();
    ctrl.mark(&pane);

    clock.advance(STUCK_GRACE_MS);
    ctrl.sweep_once().await;
    assert_eq!(ctrl.escalation_level(&pane), 1);
    assert_eq!(ctrl.pty.writes.lock().unwrap_or_else(|e| e.into_inner()).last().map(|w| w.as_slice()), Some(b"\r".as_slice()));

    clock.advance(STUCK_GRACE_MS);
    ctrl.sweep_once().await;
    assert_eq!(ctrl.escalation_level(&pane), 2);

    clock.advance(STUCK_GRACE_MS);
    ctrl.sweep_once().await;
    assert_eq!(ctrl.escalation_level(&pane), 3);
    assert_eq!(ctrl.target.unstick_calls.load(Ordering::Relaxed), 1);

    clock.advance(STUCK_GRACE_MS);
    ctrl.sweep_once().await;
    assert_eq!(ctrl.escalation_level(&pane), 4);
    assert_eq!(ctrl.target.restart_calls.load(Ordering::Relaxed), 1);

    clock.advance(STUCK_GRACE_MS);
    ctrl.sweep_once().await;
    assert_eq!(ctrl.target.fresh_start_calls.load(Ordering::Relaxed), 1);
    assert!(!ctrl.is_marked(&pane));
}

#[tokio::test]
async fn sweep_ignores_panes_still_within_the_grace_window() {
    let (ctrl, _bus, clock) = make();
    let pane = "p1".to_string();
    ctrl.mark(&pane);

    clock.advance(STUCK_GRACE_MS / 2);
    ctrl.sweep_once().await;
    assert_eq!(ctrl.escalation_level(&pane), 0);
}
