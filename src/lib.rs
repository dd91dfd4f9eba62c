// Herald - An in-process event bus for Rust
//
// Named dispatchers deliver triggered events from their own worker thread to
// super-global, global and per-event listeners.

// Re-export core functionality
pub use herald_events::*;

// Re-export the member crate under its own name
pub use herald_events as events;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        BusError,
        BusResult,
        Dispatcher,
        DispatcherRegistry,
        Event,
        EventListener,
        EventScope,
        EventStream,
        Listener,
        ListenerOptions,
        ListenerRegistration,
        Payload,
        RegistryConfig,
        listener,
        payload,
    };
}
