//! Event handler registry keyed by event type

use neurone_core::protocol::RelayEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Callback invoked for a relay event
pub type EventHandler = Arc<dyn Fn(&RelayEvent) + Send + Sync>;

/// Registration handle used to remove a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handlers grouped by event type name
#[derive(Default)]
pub struct EventHandlers {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, EventHandler)>>>,
}

impl EventHandlers {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `event_type`
    pub fn register(&self, event_type: &str, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(handler_id, _)| *handler_id != id);
            removed |= list.len() != before;
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Invoke every handler registered for the event's type.
    ///
    /// Handlers run outside the lock and may register or remove handlers.
    pub fn dispatch(&self, event: &RelayEvent) -> usize {
        let matching: Vec<EventHandler> = {
            let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers
                .get(event.event_type())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &matching {
            handler(event);
        }
        matching.len()
    }

    /// Total registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Whether no handler is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
