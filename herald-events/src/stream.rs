//! Async consumption of dispatched events

use crate::dispatcher::Dispatcher;
use crate::error::BusResult;
use crate::event::{Event, EventListener, Listener, listener};
use crate::listener::{EventScope, ListenerOptions};
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

/// Stream of events delivered to one listener registration.
///
/// The stream ends once the dispatcher is stopped. Dropping it removes the
/// registration.
pub struct EventStream {
    receiver: UnboundedReceiver<Event>,
    dispatcher: Dispatcher,
    scope: EventScope,
    listener: Weak<dyn EventListener>,
}

impl EventStream {
    /// Receive the next event
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Scope the stream is registered for
    pub fn scope(&self) -> &EventScope {
        &self.scope
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        let Some(listener) = self.listener.upgrade() else {
            return;
        };
        if let Err(e) = self.dispatcher.remove_listener(self.scope.clone(), &listener) {
            debug!(scope = %self.scope, "Event stream listener not removed: {}", e);
        }
    }
}

impl Dispatcher {
    /// Forward every event of `scope` into an async [`EventStream`].
    ///
    /// ```rust,no_run
    /// use futures::StreamExt;
    /// use herald_events::DispatcherRegistry;
    ///
    /// # async fn run() -> Result<(), herald_events::BusError> {
    /// let registry = DispatcherRegistry::new();
    /// let ui = registry.get_or_create("ui")?;
    /// let mut clicks = ui.subscribe("click")?;
    ///
    /// while let Some(event) = clicks.next().await {
    ///     println!("clicked at {}", event.timestamp());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self, scope: impl Into<EventScope>) -> BusResult<EventStream> {
        let scope = scope.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let forward: Listener = listener(move |event| {
            let _ = sender.send(event.clone());
        });

        self.add_listener_with(scope.clone(), forward.clone(), ListenerOptions::default())?;

        Ok(EventStream {
            receiver,
            dispatcher: self.clone(),
            scope,
            listener: Arc::downgrade(&forward),
        })
    }
}
