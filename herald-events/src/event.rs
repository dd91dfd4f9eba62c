//! Event envelope and listener contract

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Opaque, shared context or data attached to an [`Event`].
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Wrap a value as a [`Payload`].
pub fn payload<T: Any + Send + Sync>(value: T) -> Payload {
    Arc::new(value)
}

/// One occurrence published on a dispatcher.
///
/// Events are immutable. Equality and hashing only look at the name and at
/// the *identity* of the context and data payloads, never at their contents;
/// the id and the two timestamps are ignored.
#[derive(Clone)]
pub struct Event {
    id: Uuid,
    name: String,
    context: Option<Payload>,
    data: Option<Payload>,
    created_at: Instant,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(name: impl Into<String>, context: Option<Payload>, data: Option<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            context,
            data,
            created_at: Instant::now(),
            timestamp: Utc::now(),
        }
    }

    /// Create an event without context or data
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, None, None)
    }

    /// Get event ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context in which the event occurred
    pub fn context(&self) -> Option<&Payload> {
        self.context.as_ref()
    }

    /// Data carried by the event
    pub fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    /// Downcast the context to a concrete type
    pub fn context_as<T: Any>(&self) -> Option<&T> {
        self.context.as_deref().and_then(|c| c.downcast_ref::<T>())
    }

    /// Downcast the data to a concrete type
    pub fn data_as<T: Any>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|d| d.downcast_ref::<T>())
    }

    /// Monotonic creation time
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time elapsed since the event was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Wall-clock creation time
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

fn payload_addr(payload: &Option<Payload>) -> Option<*const ()> {
    payload.as_ref().map(|p| Arc::as_ptr(p).cast::<()>())
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && payload_addr(&self.context) == payload_addr(&other.context)
            && payload_addr(&self.data) == payload_addr(&other.data)
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        payload_addr(&self.context).hash(state);
        payload_addr(&self.data).hash(state);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_context", &self.context.is_some())
            .field("has_data", &self.data.is_some())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let presence = |p: &Option<Payload>| if p.is_some() { "set" } else { "none" };
        write!(
            f,
            "Event {}[Data: {}, Context: {}]",
            self.name,
            presence(&self.data),
            presence(&self.context)
        )
    }
}

/// Listener trait
///
/// Invoked synchronously on the worker thread of the dispatcher that owns
/// the collection the listener is registered in.
pub trait EventListener: Send + Sync {
    /// Handle the event
    fn handle(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn handle(&self, event: &Event) {
        self(event)
    }
}

/// Shared listener handle. Identity is the address of the allocation, so
/// clones of one handle are the same listener and two separately created
/// handles never are.
pub type Listener = Arc<dyn EventListener>;

/// Wrap a closure as a [`Listener`].
///
/// ```rust
/// use herald_events::listener;
///
/// let l = listener(|event| println!("got {}", event.name()));
/// # let _ = l;
/// ```
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Whether two handles refer to the same listener.
pub fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
