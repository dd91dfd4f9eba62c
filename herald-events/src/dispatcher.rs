//! Named dispatcher with its own queue and worker thread

use crate::config::RegistryConfig;
use crate::error::{BusError, BusResult};
use crate::event::{Event, Listener, Payload};
use crate::listener::{EventScope, ListenerCollection, ListenerOptions, ListenerRegistration};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, trace};

/// Named dispatchers of one registry, keyed by name.
pub(crate) type NamedDispatchers = DashMap<String, Dispatcher>;

/// Asynchronous event bus instance.
///
/// Events passed to [`trigger`](Dispatcher::trigger) are queued and delivered
/// by a dedicated worker thread, in FIFO order, to three tiers of listeners:
/// the registry's super-global listeners, this dispatcher's global
/// listeners, then the listeners registered for the event's name.
///
/// Handles are cheap to clone and all clones refer to the same instance.
/// A handle does not keep its [`DispatcherRegistry`](crate::DispatcherRegistry)
/// alive: once the last registry clone is dropped the worker is halted, and
/// further calls on the handle return [`BusError::Stopped`].
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    name: Option<String>,
    queue: Mutex<QueueState>,
    ready: Condvar,
    global_listeners: ListenerCollection,
    listeners: DashMap<String, Arc<ListenerCollection>>,
    super_globals: Arc<ListenerCollection>,
    named: Weak<NamedDispatchers>,
    config: Arc<RegistryConfig>,
    worker: OnceCell<thread::Thread>,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<Event>,
    halted: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        name: Option<String>,
        super_globals: Arc<ListenerCollection>,
        named: Weak<NamedDispatchers>,
        config: Arc<RegistryConfig>,
    ) -> Self {
        debug!(dispatcher = name.as_deref().unwrap_or("default"), "Creating dispatcher");
        Self {
            inner: Arc::new(DispatcherInner {
                name,
                queue: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
                global_listeners: ListenerCollection::new(EventScope::Unscoped),
                listeners: DashMap::new(),
                super_globals,
                named,
                config,
                worker: OnceCell::new(),
            }),
        }
    }

    /// Name of this dispatcher, `None` for the default instance
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Whether this is the registry's default instance
    pub fn is_default(&self) -> bool {
        self.inner.name.is_none()
    }

    /// Whether both handles refer to the same dispatcher
    pub fn ptr_eq(a: &Dispatcher, b: &Dispatcher) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Start the worker thread unless it is already running.
    ///
    /// The worker is spawned at most once per dispatcher, even when several
    /// threads race here.
    pub fn ensure_started(&self) -> BusResult<()> {
        self.inner.worker.get_or_try_init(|| {
            let inner = self.inner.clone();
            let handle = thread::Builder::new()
                .name(self.inner.config.thread_name(self.name()))
                .spawn(move || inner.run())?;
            debug!(dispatcher = self.inner.label(), "Dispatcher worker spawned");
            Ok::<_, BusError>(handle.thread().clone())
        })?;
        Ok(())
    }

    /// Whether the worker thread has been started
    pub fn is_started(&self) -> bool {
        self.inner.worker.get().is_some()
    }

    /// Handle of the worker thread, once started
    pub fn worker_thread(&self) -> Option<&thread::Thread> {
        self.inner.worker.get()
    }

    /// Whether [`stop`](Dispatcher::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.inner.queue.lock().halted
    }

    /// Number of queued events not yet picked up by the worker
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().events.len()
    }

    /// Queue an event built from the given parts.
    ///
    /// Returns as soon as the event is queued; listeners run later on the
    /// worker thread.
    pub fn trigger(
        &self,
        name: impl Into<String>,
        context: Option<Payload>,
        data: Option<Payload>,
    ) -> BusResult<()> {
        self.trigger_event(Event::new(name, context, data))
    }

    /// Queue a prebuilt event
    pub fn trigger_event(&self, event: Event) -> BusResult<()> {
        if event.name().is_empty() {
            return Err(BusError::InvalidArgument(
                "Event name must not be empty".to_string(),
            ));
        }

        let mut queue = self.inner.queue.lock();
        if queue.halted {
            return Err(self.inner.stopped_error());
        }
        if self.inner.config.log_dispatch {
            trace!(dispatcher = self.inner.label(), event = event.name(), "Event queued");
        }
        queue.events.push_back(event);
        self.inner.ready.notify_one();
        Ok(())
    }

    /// Register a persistent listener.
    ///
    /// [`EventScope::Unscoped`] registers a global listener for this
    /// dispatcher, a name registers for events with that name only.
    pub fn add_listener(&self, scope: impl Into<EventScope>, listener: Listener) -> BusResult<()> {
        self.add_listener_with(scope, listener, ListenerOptions::default())
    }

    /// Register a listener with explicit options
    pub fn add_listener_with(
        &self,
        scope: impl Into<EventScope>,
        listener: Listener,
        options: ListenerOptions,
    ) -> BusResult<()> {
        let name = match scope.into() {
            EventScope::Unscoped => return self.add_global_listener_with(listener, options),
            EventScope::Named(name) => name,
        };
        self.inner.ensure_running()?;
        if name.is_empty() {
            return Err(BusError::InvalidArgument(
                "Event name must not be empty".to_string(),
            ));
        }

        let collection = self
            .inner
            .listeners
            .entry(name.clone())
            .or_insert_with(|| Arc::new(ListenerCollection::new(EventScope::Named(name))))
            .value()
            .clone();
        collection.add(listener, options);
        Ok(())
    }

    /// Register a persistent global listener, receiving every event of this
    /// dispatcher
    pub fn add_global_listener(&self, listener: Listener) -> BusResult<()> {
        self.add_global_listener_with(listener, ListenerOptions::default())
    }

    /// Register a global listener with explicit options
    pub fn add_global_listener_with(
        &self,
        listener: Listener,
        options: ListenerOptions,
    ) -> BusResult<()> {
        self.inner.ensure_running()?;
        self.inner.global_listeners.add(listener, options);
        Ok(())
    }

    /// Remove the first registration of `listener` in the given scope.
    ///
    /// Fails with [`BusError::InvalidArgument`] when nothing was ever
    /// registered for a named scope; `Ok(None)` means the collection exists
    /// but does not hold the listener.
    pub fn remove_listener(
        &self,
        scope: impl Into<EventScope>,
        listener: &Listener,
    ) -> BusResult<Option<ListenerRegistration>> {
        let name = match scope.into() {
            EventScope::Unscoped => return self.remove_global_listener(listener),
            EventScope::Named(name) => name,
        };
        self.inner.ensure_running()?;

        let collection = self
            .inner
            .listeners
            .get(&name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                BusError::InvalidArgument(format!("No listeners registered for event '{}'", name))
            })?;
        Ok(collection.remove(listener))
    }

    /// Remove the first global registration of `listener`
    pub fn remove_global_listener(
        &self,
        listener: &Listener,
    ) -> BusResult<Option<ListenerRegistration>> {
        self.inner.ensure_running()?;
        Ok(self.inner.global_listeners.remove(listener))
    }

    /// Event names that have a listener collection on this dispatcher
    pub fn list_registered_event_names(&self) -> BTreeSet<String> {
        self.inner
            .listeners
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Listener collection for an event name, if one was created
    pub fn listeners_for(&self, name: &str) -> Option<Arc<ListenerCollection>> {
        self.inner.listeners.get(name).map(|entry| entry.value().clone())
    }

    /// Global listener collection of this dispatcher
    pub fn global_listeners(&self) -> &ListenerCollection {
        &self.inner.global_listeners
    }

    /// Stop the worker, drop queued events and listeners, and evict this
    /// dispatcher from its registry.
    ///
    /// The default dispatcher cannot be stopped. Returns without waiting for a
    /// listener that is running on the worker; that invocation finishes on its
    /// own and no further listeners are invoked afterwards.
    pub fn stop(&self) -> BusResult<()> {
        let Some(name) = self.inner.name.as_deref() else {
            return Err(BusError::Unsupported(
                "Default dispatcher can't be stopped".to_string(),
            ));
        };

        self.inner.halt();
        self.inner.global_listeners.detach_all();
        for entry in self.inner.listeners.iter() {
            entry.value().detach_all();
        }
        self.inner.listeners.clear();

        if let Some(named) = self.inner.named.upgrade() {
            named.remove_if(name, |_, current| Dispatcher::ptr_eq(current, self));
        }

        debug!(dispatcher = name, "Dispatcher stopped");
        Ok(())
    }

    /// Halt the worker without touching listeners or the registry
    pub(crate) fn halt(&self) {
        self.inner.halt();
    }
}

impl DispatcherInner {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("default")
    }

    fn stopped_error(&self) -> BusError {
        BusError::Stopped(self.label().to_string())
    }

    fn ensure_running(&self) -> BusResult<()> {
        if self.queue.lock().halted {
            return Err(self.stopped_error());
        }
        Ok(())
    }

    fn halt(&self) {
        let mut queue = self.queue.lock();
        queue.halted = true;
        queue.events.clear();
        self.ready.notify_all();
    }

    /// Worker loop: sleep until events arrive, then drain the whole queue.
    fn run(&self) {
        debug!(dispatcher = self.label(), "Dispatcher worker started");

        'worker: loop {
            let batch = {
                let mut queue = self.queue.lock();
                while queue.events.is_empty() && !queue.halted {
                    self.ready.wait(&mut queue);
                }
                if queue.halted {
                    break;
                }
                std::mem::take(&mut queue.events)
            };

            for event in batch {
                if self.queue.lock().halted {
                    break 'worker;
                }
                self.dispatch_event(&event);
            }
        }

        debug!(dispatcher = self.label(), "Dispatcher worker exited");
    }

    /// Deliver one event: super-global, then global, then name-scoped.
    fn dispatch_event(&self, event: &Event) {
        if self.config.log_dispatch {
            trace!(dispatcher = self.label(), event = event.name(), "Dispatching event");
        }

        self.super_globals.dispatch_with(event, &self.config);
        self.global_listeners.dispatch_with(event, &self.config);

        let scoped = self
            .listeners
            .get(event.name())
            .map(|entry| entry.value().clone());
        if let Some(collection) = scoped {
            collection.dispatch_with(event, &self.config);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("started", &self.is_started())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{listener, payload};
    use crossbeam::channel::{self, Receiver};
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(2);

    fn standalone(name: Option<&str>) -> Dispatcher {
        Dispatcher::new(
            name.map(str::to_string),
            Arc::new(ListenerCollection::new(EventScope::Unscoped)),
            Weak::new(),
            Arc::new(RegistryConfig::default()),
        )
    }

    fn forwarding(tag: &'static str) -> (Listener, Receiver<(&'static str, Event)>) {
        let (tx, rx) = channel::unbounded();
        let l = listener(move |event| {
            let _ = tx.send((tag, event.clone()));
        });
        (l, rx)
    }

    #[test]
    fn test_events_queue_until_started() {
        let dispatcher = standalone(Some("lazy"));
        let (l, rx) = forwarding("l");
        dispatcher.add_listener("tick", l).unwrap();

        dispatcher.trigger("tick", None, None).unwrap();
        dispatcher.trigger("tick", None, None).unwrap();
        assert!(!dispatcher.is_started());
        assert_eq!(dispatcher.pending(), 2);

        dispatcher.ensure_started().unwrap();
        assert!(rx.recv_timeout(WAIT).is_ok());
        assert!(rx.recv_timeout(WAIT).is_ok());
        dispatcher.halt();
    }

    #[test]
    fn test_ensure_started_is_idempotent() {
        let dispatcher = standalone(Some("once"));
        dispatcher.ensure_started().unwrap();
        let first = dispatcher.worker_thread().unwrap().id();
        dispatcher.ensure_started().unwrap();

        assert_eq!(dispatcher.worker_thread().unwrap().id(), first);
        assert_eq!(
            dispatcher.worker_thread().unwrap().name(),
            Some("herald-once")
        );
        dispatcher.halt();
    }

    #[test]
    fn test_tier_order_and_event_contents() {
        let dispatcher = standalone(Some("tiers"));
        let (tx, rx) = channel::unbounded();
        let tx_global = tx.clone();
        dispatcher
            .add_global_listener(listener(move |e| {
                let _ = tx_global.send(("global", e.clone()));
            }))
            .unwrap();
        dispatcher
            .add_listener(
                "ping",
                listener(move |e| {
                    let _ = tx.send(("ping", e.clone()));
                }),
            )
            .unwrap();
        dispatcher.ensure_started().unwrap();

        let ctx = payload("ctx");
        let data = payload(5i64);
        dispatcher
            .trigger("ping", Some(ctx.clone()), Some(data.clone()))
            .unwrap();

        let (first, event) = rx.recv_timeout(WAIT).unwrap();
        let (second, _) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!((first, second), ("global", "ping"));
        assert_eq!(event, Event::new("ping", Some(ctx), Some(data)));
        dispatcher.halt();
    }

    #[test]
    fn test_unknown_event_name_only_reaches_global() {
        let dispatcher = standalone(Some("skip"));
        let (g, rx) = forwarding("g");
        dispatcher.add_listener(EventScope::Unscoped, g).unwrap();
        dispatcher.ensure_started().unwrap();

        dispatcher.trigger("nobody-listens", None, None).unwrap();
        let (_, event) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(event.name(), "nobody-listens");
        assert!(dispatcher.list_registered_event_names().is_empty());
        dispatcher.halt();
    }

    #[test]
    fn test_remove_listener_errors() {
        let dispatcher = standalone(Some("rm"));
        let l = listener(|_| {});

        assert!(matches!(
            dispatcher.remove_listener("missing", &l),
            Err(BusError::InvalidArgument(_))
        ));

        dispatcher.add_listener("present", l.clone()).unwrap();
        let other = listener(|_| {});
        assert!(dispatcher.remove_listener("present", &other).unwrap().is_none());
        assert!(dispatcher.remove_listener("present", &l).unwrap().is_some());
        assert!(dispatcher.remove_listener(None::<&str>, &l).unwrap().is_none());
    }

    #[test]
    fn test_empty_event_name_rejected() {
        let dispatcher = standalone(Some("empty"));
        assert!(matches!(
            dispatcher.add_listener("", listener(|_| {})),
            Err(BusError::InvalidArgument(_))
        ));
        assert!(matches!(
            dispatcher.trigger("", None, None),
            Err(BusError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_default_dispatcher_cannot_stop() {
        let dispatcher = standalone(None);
        assert!(matches!(dispatcher.stop(), Err(BusError::Unsupported(_))));
        assert!(!dispatcher.is_stopped());
        assert!(dispatcher.trigger("still-works", None, None).is_ok());
    }

    #[test]
    fn test_stop_rejects_further_work() {
        let dispatcher = standalone(Some("gone"));
        dispatcher.add_listener("a", listener(|_| {})).unwrap();
        dispatcher.trigger("a", None, None).unwrap();

        dispatcher.stop().unwrap();

        assert!(dispatcher.is_stopped());
        assert_eq!(dispatcher.pending(), 0);
        assert!(dispatcher.list_registered_event_names().is_empty());
        assert!(matches!(
            dispatcher.trigger("a", None, None),
            Err(BusError::Stopped(_))
        ));
        assert!(matches!(
            dispatcher.add_global_listener(listener(|_| {})),
            Err(BusError::Stopped(_))
        ));
    }

    #[test]
    fn test_stop_does_not_wait_for_running_listener() {
        let dispatcher = standalone(Some("busy-stop"));
        let (started_tx, started_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded::<()>(1);
        dispatcher
            .add_global_listener(listener(move |_| {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            }))
            .unwrap();
        let (after, after_rx) = forwarding("after");
        dispatcher.add_global_listener(after).unwrap();
        let (scoped, scoped_rx) = forwarding("scoped");
        dispatcher.add_listener("work", scoped).unwrap();
        dispatcher.ensure_started().unwrap();

        dispatcher.trigger("work", None, None).unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        let begun = Instant::now();
        dispatcher.stop().unwrap();
        assert!(begun.elapsed() < Duration::from_millis(500));
        assert!(dispatcher.global_listeners().is_empty());

        release_tx.send(()).unwrap();
        assert!(after_rx.recv_timeout(Duration::from_millis(150)).is_err());
        assert!(scoped_rx.recv_timeout(Duration::from_millis(150)).is_err());
    }
}
