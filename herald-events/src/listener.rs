//! Listener registrations and the ordered collections that hold them

use crate::config::RegistryConfig;
use crate::event::{Event, Listener, same_listener};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, ReentrantMutex};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

static DEFAULT_CONFIG: Lazy<RegistryConfig> = Lazy::new(RegistryConfig::default);

/// Which events a collection receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventScope {
    /// Every event, whatever its name
    Unscoped,
    /// Only events with this name
    Named(String),
}

impl EventScope {
    /// Event name for named scopes
    pub fn name(&self) -> Option<&str> {
        match self {
            EventScope::Unscoped => None,
            EventScope::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventScope::Unscoped => f.write_str("global"),
            EventScope::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for EventScope {
    fn from(name: &str) -> Self {
        EventScope::Named(name.to_string())
    }
}

impl From<String> for EventScope {
    fn from(name: String) -> Self {
        EventScope::Named(name)
    }
}

impl<S: Into<EventScope>> From<Option<S>> for EventScope {
    fn from(name: Option<S>) -> Self {
        name.map(Into::into).unwrap_or(EventScope::Unscoped)
    }
}

/// Options attached to a registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Remove the listener after it handled one event
    pub one_shot: bool,

    /// Advisory time budget per invocation. Never enforced; an overrun is
    /// only logged.
    pub timeout: Option<Duration>,
}

impl ListenerOptions {
    /// Persistent listener without timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot listener without timeout
    pub fn once() -> Self {
        Self::new().one_shot(true)
    }

    /// Set the one-shot flag
    pub fn one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = one_shot;
        self
    }

    /// Set the advisory timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A listener together with its registration options.
///
/// Two registrations are equal when they hold the same listener and share
/// the one-shot flag; the timeout does not take part.
#[derive(Clone)]
pub struct ListenerRegistration {
    listener: Listener,
    one_shot: bool,
    timeout: Option<Duration>,
}

impl ListenerRegistration {
    /// Wrap a listener
    pub fn new(listener: Listener, options: ListenerOptions) -> Self {
        Self {
            listener,
            one_shot: options.one_shot,
            timeout: options.timeout,
        }
    }

    /// The registered listener
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Whether the listener is removed after its first event
    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    /// Advisory timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl PartialEq for ListenerRegistration {
    fn eq(&self, other: &Self) -> bool {
        same_listener(&self.listener, &other.listener) && self.one_shot == other.one_shot
    }
}

impl Eq for ListenerRegistration {}

impl Hash for ListenerRegistration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.listener).cast::<()>().hash(state);
        self.one_shot.hash(state);
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("listener", &Arc::as_ptr(&self.listener).cast::<()>())
            .field("one_shot", &self.one_shot)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Counters for one pass over a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Listeners invoked
    pub invoked: usize,
    /// Invocations that panicked
    pub panicked: usize,
    /// One-shot registrations removed after delivery
    pub pruned: usize,
}

/// Ordered listeners for one scope.
///
/// `add`, `remove`, `remove_all` and `dispatch` are serialised per
/// collection. The serialising lock is reentrant so a listener may register
/// or remove listeners on the collection that is currently invoking it.
pub struct ListenerCollection {
    scope: EventScope,
    serial: ReentrantMutex<()>,
    entries: Mutex<Vec<Arc<ListenerRegistration>>>,
}

impl ListenerCollection {
    /// Create an empty collection
    pub fn new(scope: EventScope) -> Self {
        Self {
            scope,
            serial: ReentrantMutex::new(()),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Scope of this collection
    pub fn scope(&self) -> &EventScope {
        &self.scope
    }

    /// Append a registration. Duplicates are allowed.
    pub fn add(&self, listener: Listener, options: ListenerOptions) {
        let _serial = self.serial.lock();
        self.entries
            .lock()
            .push(Arc::new(ListenerRegistration::new(listener, options)));
        debug!(scope = %self.scope, one_shot = options.one_shot, "Listener added");
    }

    /// Remove the first registration holding `listener`.
    ///
    /// The one-shot flag is not compared. Returns `None` when the listener is
    /// not registered here. O(n).
    pub fn remove(&self, listener: &Listener) -> Option<ListenerRegistration> {
        let _serial = self.serial.lock();
        let removed = {
            let mut entries = self.entries.lock();
            let position = entries
                .iter()
                .position(|entry| same_listener(&entry.listener, listener))?;
            entries.remove(position)
        };
        debug!(scope = %self.scope, "Listener removed");
        Some(Arc::unwrap_or_clone(removed))
    }

    /// Remove every registration
    pub fn remove_all(&self) {
        let _serial = self.serial.lock();
        self.entries.lock().clear();
    }

    /// Drop every registration without waiting for a running pass.
    ///
    /// A pass already in progress skips the detached listeners it has not
    /// reached yet.
    pub(crate) fn detach_all(&self) {
        self.entries.lock().clear();
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the collection holds no registrations
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of the registrations in delivery order
    pub fn registrations(&self) -> Vec<ListenerRegistration> {
        self.entries
            .lock()
            .iter()
            .map(|entry| (**entry).clone())
            .collect()
    }

    /// Deliver `event` to every listener with the default configuration.
    pub fn dispatch(&self, event: &Event) -> DispatchSummary {
        self.dispatch_with(event, &DEFAULT_CONFIG)
    }

    /// Deliver `event` to every listener in registration order, pruning
    /// one-shot registrations right after their invocation.
    ///
    /// Registrations added while the pass runs are not invoked by it;
    /// registrations removed by an earlier listener of the pass are skipped.
    pub fn dispatch_with(&self, event: &Event, config: &RegistryConfig) -> DispatchSummary {
        let _serial = self.serial.lock();
        let snapshot = self.entries.lock().clone();
        let mut summary = DispatchSummary::default();

        if config.log_dispatch {
            trace!(event = event.name(), scope = %self.scope, listeners = snapshot.len(), "Dispatching");
        }

        for registration in snapshot {
            if !self.contains_entry(&registration) {
                continue;
            }

            let started = Instant::now();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| registration.listener.handle(event)));
            summary.invoked += 1;

            if config.warn_slow_listeners {
                if let Some(timeout) = registration.timeout {
                    let elapsed = started.elapsed();
                    if elapsed > timeout {
                        warn!(
                            event = event.name(),
                            scope = %self.scope,
                            "Listener took {:?}, over its {:?} timeout",
                            elapsed,
                            timeout
                        );
                    }
                }
            }

            if registration.one_shot && self.remove_entry(&registration) {
                summary.pruned += 1;
                if config.log_dispatch {
                    trace!(scope = %self.scope, "One-shot listener removed after first call");
                }
            }

            if let Err(payload) = outcome {
                summary.panicked += 1;
                error!(
                    event = event.name(),
                    scope = %self.scope,
                    "Listener panicked: {}",
                    panic_message(payload.as_ref())
                );
                if !config.continue_on_panic {
                    break;
                }
            }
        }

        summary
    }

    fn contains_entry(&self, registration: &Arc<ListenerRegistration>) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| Arc::ptr_eq(entry, registration))
    }

    fn remove_entry(&self, registration: &Arc<ListenerRegistration>) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|entry| Arc::ptr_eq(entry, registration)) {
            Some(position) => {
                entries.remove(position);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ListenerCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerCollection")
            .field("scope", &self.scope)
            .field("len", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::listener;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Listener {
        let log = log.clone();
        listener(move |_| log.lock().push(tag))
    }

    #[test]
    fn test_scope_conversions() {
        assert_eq!(
            EventScope::from("ping"),
            EventScope::Named("ping".to_string())
        );
        assert_eq!(EventScope::from(None::<&str>), EventScope::Unscoped);
        assert_eq!(EventScope::from(Some("ping")).name(), Some("ping"));
        assert_eq!(EventScope::Unscoped.to_string(), "global");
    }

    #[test]
    fn test_registration_equality_ignores_timeout() {
        let l = listener(|_| {});
        let a = ListenerRegistration::new(l.clone(), ListenerOptions::new());
        let b = ListenerRegistration::new(
            l.clone(),
            ListenerOptions::new().timeout(Duration::from_millis(5)),
        );
        let c = ListenerRegistration::new(l, ListenerOptions::once());

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_dispatch_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let collection = ListenerCollection::new(EventScope::Unscoped);
        collection.add(recorder(&log, "a"), ListenerOptions::new());
        collection.add(recorder(&log, "b"), ListenerOptions::new());
        collection.add(recorder(&log, "c"), ListenerOptions::new());

        let summary = collection.dispatch(&Event::named("x"));

        assert_eq!(summary.invoked, 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_registration_and_single_removal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = recorder(&log, "dup");
        let collection = ListenerCollection::new("x".into());
        collection.add(l.clone(), ListenerOptions::once());
        collection.add(l.clone(), ListenerOptions::new());

        collection.dispatch(&Event::named("x"));
        assert_eq!(log.lock().len(), 2);
        assert_eq!(collection.len(), 1);

        collection.add(l.clone(), ListenerOptions::new());
        let removed = collection.remove(&l).unwrap();
        assert!(!removed.is_one_shot());
        assert_eq!(collection.len(), 1);

        collection.dispatch(&Event::named("x"));
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_remove_matches_regardless_of_one_shot() {
        let l = listener(|_| {});
        let collection = ListenerCollection::new(EventScope::Unscoped);
        collection.add(l.clone(), ListenerOptions::once());

        let removed = collection.remove(&l).unwrap();
        assert!(removed.is_one_shot());
        assert!(collection.remove(&l).is_none());
        assert!(collection.is_empty());
    }

    #[test]
    fn test_one_shot_pruned_after_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let once = recorder(&log, "once");
        let collection = ListenerCollection::new(EventScope::Unscoped);
        collection.add(once.clone(), ListenerOptions::once());
        collection.add(recorder(&log, "always"), ListenerOptions::new());

        let first = collection.dispatch(&Event::named("x"));
        let second = collection.dispatch(&Event::named("x"));

        assert_eq!(first.pruned, 1);
        assert_eq!(second.invoked, 1);
        assert_eq!(*log.lock(), vec!["once", "always", "always"]);
        assert!(collection.remove(&once).is_none());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let collection = ListenerCollection::new(EventScope::Unscoped);
        collection.add(listener(|_| panic!("boom")), ListenerOptions::once());
        collection.add(recorder(&log, "after"), ListenerOptions::new());

        let summary = collection.dispatch(&Event::named("x"));

        assert_eq!(summary.panicked, 1);
        assert_eq!(summary.pruned, 1);
        assert_eq!(*log.lock(), vec!["after"]);
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_panic_stops_pass_when_configured() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let collection = ListenerCollection::new(EventScope::Unscoped);
        collection.add(listener(|_| panic!("boom")), ListenerOptions::new());
        collection.add(recorder(&log, "after"), ListenerOptions::new());

        let config = RegistryConfig {
            continue_on_panic: false,
            ..RegistryConfig::default()
        };
        let summary = collection.dispatch_with(&Event::named("x"), &config);

        assert_eq!(summary.invoked, 1);
        assert_eq!(summary.panicked, 1);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_listener_may_mutate_its_own_collection() {
        let collection = Arc::new(ListenerCollection::new(EventScope::Unscoped));
        let log = Arc::new(Mutex::new(Vec::new()));
        let late = recorder(&log, "late");

        let c = collection.clone();
        let late_clone = late.clone();
        collection.add(
            listener(move |_| c.add(late_clone.clone(), ListenerOptions::new())),
            ListenerOptions::once(),
        );

        collection.dispatch(&Event::named("x"));
        assert!(log.lock().is_empty());

        collection.dispatch(&Event::named("x"));
        assert_eq!(*log.lock(), vec!["late"]);
    }

    #[test]
    fn test_listener_removed_mid_pass_is_skipped() {
        let collection = Arc::new(ListenerCollection::new(EventScope::Unscoped));
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim = recorder(&log, "victim");

        let c = collection.clone();
        let v = victim.clone();
        collection.add(
            listener(move |_| {
                c.remove(&v);
            }),
            ListenerOptions::new(),
        );
        collection.add(victim, ListenerOptions::new());

        let summary = collection.dispatch(&Event::named("x"));
        assert_eq!(summary.invoked, 1);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_registrations_snapshot() {
        let l = listener(|_| {});
        let collection = ListenerCollection::new("x".into());
        collection.add(
            l.clone(),
            ListenerOptions::new().timeout(Duration::from_secs(1)),
        );

        let snapshot = collection.registrations();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].timeout(), Some(Duration::from_secs(1)));
        assert!(same_listener(snapshot[0].listener(), &l));

        collection.remove_all();
        assert!(collection.is_empty());
        assert_eq!(snapshot.len(), 1);
    }
}
