// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C1 — in-process event bus: synchronous emit/subscribe/query plus a
//! per-pane state vector, generalized from the teacher's file-backed
//! `event_log.rs` catch-up-by-sequence pattern to an in-memory ring (spec
//! §4.1 is explicitly in-process, synchronous delivery).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::event::{Event, EventType};
use crate::pane::PaneId;

/// Default capacity of the in-memory event ring. Old events are evicted
/// oldest-first once the bus exceeds this, same spirit as the teacher's
/// `RingBuffer` eviction for bytes.
const DEFAULT_RING_CAPACITY: usize = 10_000;

type Handler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

struct Subscription {
    id: u64,
    event_type: EventType,
    handler: Handler,
}

/// Query filter for [`EventBus::query`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub correlation_id: Option<String>,
    pub event_type: Option<EventType>,
    pub pane_id: Option<PaneId>,
    pub limit: Option<usize>,
}

struct Inner {
    events: VecDeque<Event>,
    subscriptions: Vec<Subscription>,
    next_sub_id: u64,
    pane_state: HashMap<PaneId, Value>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            events: VecDeque::new(),
            subscriptions: Vec::new(),
            next_sub_id: 0,
            pane_state: HashMap::new(),
        }
    }
}

/// A subscriber handle returned by [`EventBus::on`], passed back to
/// [`EventBus::off`] to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// The process-wide event bus (spec §4.1).
///
/// Delivery is synchronous, on the calling thread, in subscription order;
/// handlers are wrapped so a panicking handler never propagates to the
/// emitter (spec: "handlers never throw (wrapped)").
pub struct EventBus {
    inner: Mutex<Inner>,
    ring_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl EventBus {
    pub fn new(ring_capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner::default()), ring_capacity }
    }

    /// Append `event` to the ring and deliver it synchronously to every
    /// subscriber of its type, in subscription order.
    pub fn emit(&self, event: Event) {
        let handlers: Vec<Handler> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.events.push_back(event.clone());
            while inner.events.len() > self.ring_capacity {
                inner.events.pop_front();
            }
            inner
                .subscriptions
                .iter()
                .filter(|s| s.event_type == event.event_type)
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        // Deliver outside the lock so a handler may itself call back into
        // the bus (emit/query/on/off) without deadlocking.
        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                tracing::warn!(pane_id = %event.pane_id, event_type = event.event_type.as_str(), "bus handler panicked");
            }
        }
    }

    /// Register a handler for `event_type`, returning an id for [`Self::off`].
    pub fn on<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_sub_id;
        inner.next_sub_id += 1;
        inner.subscriptions.push(Subscription { id, event_type, handler: Arc::new(handler) });
        SubscriptionId(id)
    }

    /// Remove a previously registered handler.
    pub fn off(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscriptions.retain(|s| s.id != id.0);
    }

    /// Return matching events in insertion order.
    pub fn query(&self, q: &EventQuery) -> Vec<Event> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| q.correlation_id.is_none() || e.correlation_id.as_deref() == q.correlation_id.as_deref())
            .filter(|e| q.event_type.is_none_or_eq(&e.event_type))
            .filter(|e| q.pane_id.as_ref().is_none_or(|p| p == &e.pane_id))
            .cloned()
            .collect();
        if let Some(limit) = q.limit {
            out.truncate(limit);
        }
        out
    }

    /// Deep-merge `partial` into the per-pane state vector.
    pub fn update_state(&self, pane_id: &str, partial: Value) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = inner.pane_state.entry(pane_id.to_string()).or_insert(Value::Object(Default::default()));
        deep_merge(entry, partial);
    }

    /// Return a deep-cloned snapshot of a pane's state vector.
    pub fn get_state(&self, pane_id: &str) -> Value {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pane_state.get(pane_id).cloned().unwrap_or(Value::Object(Default::default()))
    }

    /// Clear subscribers, events, and state. Used by tests that want a
    /// fresh bus without reconstructing the `Coordinator`.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner = Inner::default();
    }
}

trait OptEq<T: PartialEq> {
    fn is_none_or_eq(&self, other: &T) -> bool;
}

impl<T: PartialEq> OptEq<T> for Option<T> {
    fn is_none_or_eq(&self, other: &T) -> bool {
        match self {
            None => true,
            Some(v) => v == other,
        }
    }
}

fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                deep_merge(target_map.entry(k).or_insert(Value::Null), v);
            }
        }
        (target_slot, patch_value) => {
            *target_slot = patch_value;
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
