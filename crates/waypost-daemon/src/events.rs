//! Event emission.
//!
//! Events are pushed from the daemon to subscribed IPC connections as
//! JSON-RPC notifications. Each subscriber has an independent buffer; a
//! subscriber that falls behind loses the oldest events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "PinCreated", "InvoicePaid").
    pub event_type: String,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: &str, timestamp: u64, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp,
            payload,
        }
    }
}

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "board", "payments", "sponsorship", "system".
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Only events about these locations.
    #[serde(default)]
    pub location_ids: Option<Vec<String>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let category = categorize_event(&event.event_type);
            if !categories.iter().any(|c| c == category) {
                return false;
            }
        }

        // Events without a location (e.g. DaemonStarted) pass the location filter.
        if let Some(ref location_ids) = self.location_ids {
            if let Some(loc) = event.payload.get("location_id").and_then(|v| v.as_str()) {
                if !location_ids.iter().any(|id| id == loc) {
                    return false;
                }
            }
        }

        true
    }
}

/// Categorize an event type into a category.
fn categorize_event(event_type: &str) -> &'static str {
    match event_type {
        s if s.starts_with("Pin") => "board",
        s if s.starts_with("Invoice") => "payments",
        s if s.starts_with("Sponsor") => "sponsorship",
        _ => "system",
    }
}
