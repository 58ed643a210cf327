//! Reactive output slots.
//!
//! An emitting output is a mutable slot that can be written multiple times
//! during one execution and observed individually. Each slot is a
//! broadcast channel: writers push, every subscriber receives every pushed
//! value in order, and the most recent value is retained for late
//! subscribers. This is what lets a downstream node wired to a specific
//! `fromProperty` start reacting before the upstream node reaches its
//! terminal state.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered emissions per slot before the oldest is dropped for a slow
/// subscriber. Slow subscribers observe a `Lagged` gap, never a stall of
/// the writer.
const SLOT_CAPACITY: usize = 64;

/// A single reactive output slot.
#[derive(Debug)]
pub struct EmitSlot {
    tx: broadcast::Sender<Value>,
    last: RwLock<Option<Value>>,
}

impl Default for EmitSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl EmitSlot {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SLOT_CAPACITY);
        Self {
            tx,
            last: RwLock::new(None),
        }
    }

    /// Push a value: retained as the latest and broadcast to subscribers.
    ///
    /// A push with no live subscribers is not an error; the value is still
    /// retained for anyone subscribing later.
    pub fn push(&self, value: Value) {
        *self.last.write() = Some(value.clone());
        let _ = self.tx.send(value);
    }

    /// Latest value pushed into this slot, if any.
    #[must_use]
    pub fn last(&self) -> Option<Value> {
        self.last.read().clone()
    }

    /// Subscribe to every value pushed from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }
}

/// The set of reactive slots owned by one node instance.
///
/// Slots are created lazily per output property. Cloning shares the
/// underlying slots: snapshots of a node observe the same live channels
/// as the instance being executed, which is exactly what the remote
/// bridge needs to keep a local instance synchronized.
#[derive(Debug, Clone, Default)]
pub struct OutputSlots {
    inner: Arc<RwLock<FxHashMap<String, Arc<EmitSlot>>>>,
}

impl OutputSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the slot for an output property.
    pub fn slot(&self, property: &str) -> Arc<EmitSlot> {
        if let Some(slot) = self.inner.read().get(property) {
            return Arc::clone(slot);
        }
        let mut guard = self.inner.write();
        Arc::clone(
            guard
                .entry(property.to_string())
                .or_insert_with(|| Arc::new(EmitSlot::new())),
        )
    }

    /// Slot for a property if one was ever written or subscribed.
    pub fn existing(&self, property: &str) -> Option<Arc<EmitSlot>> {
        self.inner.read().get(property).cloned()
    }

    /// Property names that currently have slots.
    pub fn properties(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}
