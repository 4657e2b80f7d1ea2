//! Connection events and the listener registry
//!
//! Listeners are kept in one ordered list per [`EventType`] and invoked
//! synchronously, in registration order, from the connection task.
//! Dispatch iterates a snapshot of the list, so a listener that adds or
//! removes listeners mid-dispatch never changes who receives the current
//! event. `once` listeners are filtered out after the full pass.

use crate::message::WsMessage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Kinds of events a connection dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Open,
    Close,
    Error,
    Message,
    Retry,
    Reconnect,
    HeartbeatSent,
    HeartbeatReceived,
    HeartbeatMissed,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::Open,
        EventType::Close,
        EventType::Error,
        EventType::Message,
        EventType::Retry,
        EventType::Reconnect,
        EventType::HeartbeatSent,
        EventType::HeartbeatReceived,
        EventType::HeartbeatMissed,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseEventDetail {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEventDetail {
    pub message: String,
}

/// Detail of a `retry` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEventDetail {
    /// Consecutive retries counted by the backoff
    pub retries: usize,
    /// Delay that preceded this attempt
    pub backoff_ms: u64,
    pub last_connection: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

/// Detail of a `reconnect` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectEventDetail {
    pub retries: usize,
    pub last_connection: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatEventDetail {
    pub message: WsMessage,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMissedEventDetail {
    pub missed_count: u32,
    pub will_reconnect: bool,
}

/// An event delivered to listeners
///
/// `R` is the inbound payload type produced by the connection's serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<R> {
    Open,
    Close(CloseEventDetail),
    Error(ErrorEventDetail),
    Message(R),
    Retry(RetryEventDetail),
    Reconnect(ReconnectEventDetail),
    HeartbeatSent(HeartbeatEventDetail),
    HeartbeatReceived(HeartbeatEventDetail),
    HeartbeatMissed(HeartbeatMissedEventDetail),
}

impl<R> Event<R> {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Open => EventType::Open,
            Event::Close(_) => EventType::Close,
            Event::Error(_) => EventType::Error,
            Event::Message(_) => EventType::Message,
            Event::Retry(_) => EventType::Retry,
            Event::Reconnect(_) => EventType::Reconnect,
            Event::HeartbeatSent(_) => EventType::HeartbeatSent,
            Event::HeartbeatReceived(_) => EventType::HeartbeatReceived,
            Event::HeartbeatMissed(_) => EventType::HeartbeatMissed,
        }
    }

    /// The same event over another payload type. `None` for messages.
    pub fn without_payload<R2>(&self) -> Option<Event<R2>> {
        Some(match self {
            Event::Open => Event::Open,
            Event::Close(detail) => Event::Close(detail.clone()),
            Event::Error(detail) => Event::Error(detail.clone()),
            Event::Message(_) => return None,
            Event::Retry(detail) => Event::Retry(detail.clone()),
            Event::Reconnect(detail) => Event::Reconnect(detail.clone()),
            Event::HeartbeatSent(detail) => Event::HeartbeatSent(detail.clone()),
            Event::HeartbeatReceived(detail) => Event::HeartbeatReceived(detail.clone()),
            Event::HeartbeatMissed(detail) => Event::HeartbeatMissed(*detail),
        })
    }
}

/// Registration options. `capture` and `passive` are carried for parity with
/// DOM-style listener APIs and only take part in removal matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ListenerOptions {
    pub once: bool,
    pub capture: bool,
    pub passive: bool,
}

impl ListenerOptions {
    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::default()
        }
    }
}

/// Event callback
pub type Listener<R> = Arc<dyn Fn(&Event<R>) + Send + Sync>;

/// Wrap a closure into a [`Listener`]
pub fn listener<R, F>(f: F) -> Listener<R>
where
    F: Fn(&Event<R>) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[inline]
fn same_listener<R>(a: &Listener<R>, b: &Listener<R>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct ListenerEntry<R> {
    id: u64,
    callback: Listener<R>,
    options: ListenerOptions,
}

impl<R> Clone for ListenerEntry<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
            options: self.options,
        }
    }
}

/// Ordered per-event-type listener lists
pub struct ListenerRegistry<R> {
    next_id: AtomicU64,
    lists: Mutex<HashMap<EventType, Vec<ListenerEntry<R>>>>,
}

impl<R> ListenerRegistry<R> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            lists: Mutex::new(HashMap::new()),
        }
    }

    /// Append a listener to the list for `event_type`
    pub fn add(&self, event_type: EventType, callback: Listener<R>, options: ListenerOptions) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lists
            .lock()
            .entry(event_type)
            .or_default()
            .push(ListenerEntry {
                id,
                callback,
                options,
            });
    }

    /// Remove the first registration matching both the listener and options.
    /// Returns whether anything was removed.
    pub fn remove(&self, event_type: EventType, callback: &Listener<R>, options: ListenerOptions) -> bool {
        let mut lists = self.lists.lock();
        let Some(list) = lists.get_mut(&event_type) else {
            return false;
        };
        match list
            .iter()
            .position(|entry| same_listener(&entry.callback, callback) && entry.options == options)
        {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self, event_type: EventType) -> usize {
        self.lists.lock().get(&event_type).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, event_type: EventType) -> bool {
        self.len(event_type) == 0
    }

    /// Invoke every listener registered for the event's type
    pub fn dispatch(&self, event: &Event<R>) {
        let event_type = event.event_type();
        let snapshot = match self.lists.lock().get(&event_type) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return,
        };

        for entry in &snapshot {
            (entry.callback)(event);
        }

        let fired_once: Vec<u64> = snapshot
            .iter()
            .filter(|entry| entry.options.once)
            .map(|entry| entry.id)
            .collect();
        if fired_once.is_empty() {
            return;
        }

        if let Some(list) = self.lists.lock().get_mut(&event_type) {
            list.retain(|entry| !fired_once.contains(&entry.id));
        }
    }
}

impl<R> Default for ListenerRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}
