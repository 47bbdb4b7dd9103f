//! Caller-provided notification contract for cache events.
//!
//! The cache never prints or logs on its own; recoverable events are routed
//! through a [`Notify`] implementation supplied at store open. The build
//! driver decides how to render them.

use std::sync::Mutex;

/// Receiver for cache events.
///
/// Implementations are shared as `Arc<dyn Notify>` between the store and
/// the executor and must therefore be thread-safe, even though the cache
/// itself calls them from a single thread.
pub trait Notify: Send + Sync {
    /// A recoverable condition worth telling the user about once, such as
    /// the cross-device copy fallback.
    fn warn(&self, msg: &str);

    /// A caught non-fatal error while attempting a hit or recording
    /// outputs for the given operation.
    fn error(&self, op_id: u64, msg: &str);

    /// An observability hook fired on cache activity for the given
    /// operation, such as each materialized write.
    fn debug(&self, op_id: u64, header: &str);
}

/// A notifier that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotify;

impl Notify for NullNotify {
    fn warn(&self, _msg: &str) {}
    fn error(&self, _op_id: u64, _msg: &str) {}
    fn debug(&self, _op_id: u64, _header: &str) {}
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A warning message.
    Warn(String),
    /// A caught error for an operation.
    Error(u64, String),
    /// A debug hook for an operation.
    Debug(u64, String),
}

/// A notifier that accumulates events in memory.
///
/// Used by tests to assert on warning one-shots and materialization order,
/// and by embedders that render events after the fact.
#[derive(Debug, Default)]
pub struct MemoryNotify {
    events: Mutex<Vec<Event>>,
}

impl MemoryNotify {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Takes all recorded events, leaving the accumulator empty.
    pub fn take_all(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Counts recorded warnings.
    pub fn warn_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Warn(_)))
            .count()
    }
}

impl Notify for MemoryNotify {
    fn warn(&self, msg: &str) {
        self.events.lock().unwrap().push(Event::Warn(msg.to_string()));
    }

    fn error(&self, op_id: u64, msg: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(op_id, msg.to_string()));
    }

    fn debug(&self, op_id: u64, header: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Debug(op_id, header.to_string()));
    }
}
