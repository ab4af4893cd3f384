// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use super::*;

fn mk_event(event_type: EventType, pane_id: &str, correlation_id: Option<&str>) -> Event {
    Event {
        event_type,
        pane_id: pane_id.to_string(),
        ts_ms: 0,
        correlation_id: correlation_id.map(str::to_string),
        causation_id: None,
        payload: json!({}),
        source: "test".to_string(),
    }
}

#[test]
fn emit_delivers_synchronously_in_subscription_order() {
    let bus = EventBus::default();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let o1 = Arc::clone(&order);
    bus.on(EventType::InjectApplied, move |_| o1.lock().unwrap().push(1));
    let o2 = Arc::clone(&order);
    bus.on(EventType::InjectApplied, move |_| o2.lock().unwrap().push(2));

    bus.emit(mk_event(EventType::InjectApplied, "1", None));

    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}

#[test]
fn handler_panic_does_not_propagate() {
    let bus = EventBus::default();
    let calls = Arc::new(AtomicUsize::new(0));
    bus.on(EventType::InjectApplied, |_| panic!("boom"));
    let c = Arc::clone(&calls);
    bus.on(EventType::InjectApplied, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    // Should not unwind out of emit, and the second handler still runs.
    bus.emit(mk_event(EventType::InjectApplied, "1", None));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn off_removes_handler() {
    let bus = EventBus::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let id = bus.on(EventType::InjectApplied, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    bus.off(id);
    bus.emit(mk_event(EventType::InjectApplied, "1", None));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn query_filters_by_correlation_and_pane() {
    let bus = EventBus::default();
    bus.emit(mk_event(EventType::InjectRequested, "1", Some("trc-1")));
    bus.emit(mk_event(EventType::InjectRequested, "2", Some("trc-2")));
    bus.emit(mk_event(EventType::InjectApplied, "1", Some("trc-1")));

    let matches = bus.query(&EventQuery {
        correlation_id: Some("trc-1".to_string()),
        pane_id: Some("1".to_string()),
        ..Default::default()
    });
    assert_eq!(matches.len(), 2);
}

#[test]
fn update_state_deep_merges_and_preserves_unrelated_keys() {
    let bus = EventBus::default();
    bus.update_state("1", json!({"gates": {"compacting": false}, "overlay": {"open": false}}));
    bus.update_state("1", json!({"gates": {"compacting": true}}));

    let state = bus.get_state("1");
    assert_eq!(state["gates"]["compacting"], json!(true));
    assert_eq!(state["overlay"]["open"], json!(false));
}

#[test]
fn reset_clears_everything() {
    let bus = EventBus::default();
    bus.on(EventType::InjectApplied, |_| {});
    bus.emit(mk_event(EventType::InjectApplied, "1", None));
    bus.update_state("1", json!({"gates": {"compacting": true}}));

    bus.reset();

    assert!(bus.query(&EventQuery::default()).is_empty());
    assert_eq!(bus.get_state("1"), json!({}));
}
