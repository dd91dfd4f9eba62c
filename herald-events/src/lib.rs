//! In-process event dispatching for Herald
//!
//! Named dispatchers queue triggered events and deliver them from a
//! dedicated worker thread to registered listeners.
//!
//! ## Features
//!
//! - **Named dispatchers** - Independent buses looked up by name, plus a default one
//! - **Listener tiers** - Super-global, per-dispatcher global and per-event-name listeners
//! - **One-shot listeners** - Removed automatically after their first event
//! - **Ordered delivery** - FIFO per dispatcher, registration order per tier
//! - **Panic isolation** - A panicking listener does not take down its worker
//! - **Async streams** - Consume events from async code with [`EventStream`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use herald_events::*;
//!
//! # fn main() -> Result<(), BusError> {
//! let registry = DispatcherRegistry::new();
//! let bus = registry.get_or_create("orders")?;
//!
//! bus.add_listener("created", listener(|event| {
//!     if let Some(id) = event.data_as::<u64>() {
//!         println!("order {} created", id);
//!     }
//! }))?;
//!
//! bus.trigger("created", None, Some(payload(42u64)))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Listener Tiers
//!
//! For every event, listeners run in this order:
//!
//! 1. super-global listeners of the registry ([`DispatcherRegistry::add_super_global_listener`])
//! 2. global listeners of the dispatcher ([`Dispatcher::add_global_listener`])
//! 3. listeners registered for the event's name ([`Dispatcher::add_listener`])
//!
//! ## One-shot Listeners
//!
//! ```rust,no_run
//! # use herald_events::*;
//! # fn main() -> Result<(), BusError> {
//! let registry = DispatcherRegistry::new();
//! let bus = registry.get_default()?;
//! bus.add_listener_with(
//!     "ready",
//!     listener(|_| println!("first ready event")),
//!     ListenerOptions::once(),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! # use herald_events::*;
//! # fn main() -> Result<(), BusError> {
//! let registry = DispatcherRegistry::builder()
//!     .thread_name_prefix("bus-")     // Worker thread names
//!     .continue_on_panic(true)        // Keep delivering after a listener panics
//!     .log_dispatch(false)            // Trace every event
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;
pub mod registry;
pub mod stream;

pub use config::{RegistryBuilder, RegistryConfig};
pub use dispatcher::Dispatcher;
pub use error::{BusError, BusResult};
pub use event::{Event, EventListener, Listener, Payload, listener, payload, same_listener};
pub use listener::{
    DispatchSummary, EventScope, ListenerCollection, ListenerOptions, ListenerRegistration,
};
pub use registry::{DispatcherRegistry, global};
pub use stream::EventStream;
