//! Synchronous change notifications.
//!
//! Fields and models each own an [`EventEmitter`]. Delivery is synchronous,
//! in registration order, to the listeners registered when dispatch began.
//! A listener added or removed during dispatch takes effect from the next
//! emit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::model::Member;

/// The named events a field or model emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ValidChange,
    ModifiedChange,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ValidChange => "validChange",
            EventKind::ModifiedChange => "modifiedChange",
        }
    }
}

/// A change notification. `source` is the field or model that emitted it.
#[derive(Debug, Clone)]
pub enum Event {
    /// The validity outcome changed: a boolean flip or a different error set.
    ValidChange { valid: Option<bool>, source: Member },
    /// The dirty flag crossed a transition.
    ModifiedChange { dirty: bool, source: Member },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ValidChange { .. } => EventKind::ValidChange,
            Event::ModifiedChange { .. } => EventKind::ModifiedChange,
        }
    }

    pub fn source(&self) -> &Member {
        match self {
            Event::ValidChange { source, .. } | Event::ModifiedChange { source, .. } => source,
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

/// Handle returned by [`EventEmitter::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Registry of listeners for one field or model.
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Listener {
            id,
            kind,
            handler: Arc::new(handler),
        });
        Subscription { id, kind }
    }

    /// Remove a listener. Returns false if it was already removed.
    pub fn off(&self, subscription: &Subscription) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != subscription.id);
        listeners.len() != before
    }

    /// Deliver `event` to every listener registered for its kind.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        // Snapshot so handlers can subscribe or unsubscribe without deadlocking.
        let handlers: Vec<Handler> = self
            .lock()
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.handler))
            .collect();
        trace!(event = kind.name(), listeners = handlers.len(), "dispatching");
        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|l| l.kind == kind).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
