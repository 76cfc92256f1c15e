use parking_lot::Mutex;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::trace;

use crate::utils::thread_safety::{RcAnyThreadSafety, RcThreadSafety, SendSafety, SyncSafety};

#[cfg(feature = "thread_safe")]
type BoxedListener = RcThreadSafety<dyn Fn(&Event) + Send + Sync>;

#[cfg(not(feature = "thread_safe"))]
type BoxedListener = RcThreadSafety<dyn Fn(&Event)>;

/// A named event with an optional payload
#[derive(Clone)]
pub struct Event {
    event_type: String,
    detail: Option<RcAnyThreadSafety>,
}

impl Event {
    #[inline]
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            detail: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_detail<T: SendSafety + SyncSafety + 'static>(event_type: impl Into<String>, detail: T) -> Self {
        Self {
            event_type: event_type.into(),
            detail: Some(RcThreadSafety::new(detail)),
        }
    }

    #[inline]
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the payload if there is one and it is a `T`
    #[inline]
    #[must_use]
    pub fn detail<T: 'static>(&self) -> Option<&T> {
        self.detail.as_ref().and_then(|detail| detail.downcast_ref())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.event_type)
            .field("has_detail", &self.detail.is_some())
            .finish()
    }
}

/// Handle returned by [`crate::Container::add_listener`], used to remove the listener later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Ids are unique across all containers
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct ListenerEntry {
    id: ListenerId,
    event_type: String,
    listener: BoxedListener,
}

/// Observer list dispatching events synchronously, in registration order.
pub(crate) struct EventTarget {
    listeners: Mutex<Vec<ListenerEntry>>,
}

impl EventTarget {
    #[inline]
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_listener(&self, event_type: String, listener: BoxedListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().push(ListenerEntry {
            id,
            event_type,
            listener,
        });
        id
    }

    pub(crate) fn remove_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners
            .iter()
            .position(|entry| entry.id == id && entry.event_type == event_type)
        {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Calls every listener of the event type and returns how many were called.
    ///
    /// The listeners are collected before any of them runs, so a listener may add or remove
    /// listeners without affecting the current dispatch.
    pub(crate) fn dispatch(&self, event: &Event) -> usize {
        let listeners: Vec<BoxedListener> = self
            .listeners
            .lock()
            .iter()
            .filter(|entry| entry.event_type == event.event_type)
            .map(|entry| entry.listener.clone())
            .collect();

        trace!(event_type = %event.event_type, listeners = listeners.len(), "Dispatching event");

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }
}

pub(crate) fn boxed_listener<F>(listener: F) -> BoxedListener
where
    F: Fn(&Event) + SendSafety + SyncSafety + 'static,
{
    RcThreadSafety::new(listener)
}
