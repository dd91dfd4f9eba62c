//! Directory of dispatchers plus the super-global listener tier

use crate::config::{RegistryBuilder, RegistryConfig};
use crate::dispatcher::{Dispatcher, NamedDispatchers};
use crate::error::{BusError, BusResult};
use crate::event::Listener;
use crate::listener::{EventScope, ListenerCollection, ListenerOptions, ListenerRegistration};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

static GLOBAL: Lazy<DispatcherRegistry> =
    Lazy::new(|| DispatcherRegistry::with_config(RegistryConfig::from_env()));

/// Process-wide registry, configured from the `HERALD_*` environment
/// variables on first use.
///
/// Prefer an explicitly constructed [`DispatcherRegistry`] where the host can
/// own one; this exists for code that wants a single bus per process.
pub fn global() -> &'static DispatcherRegistry {
    &GLOBAL
}

/// Owns a default dispatcher, any number of named dispatchers and the
/// super-global listeners that see every event of every dispatcher.
///
/// Clones share state. Workers are halted once the last clone is dropped.
///
/// ```rust,no_run
/// use herald_events::{DispatcherRegistry, listener};
///
/// # fn main() -> Result<(), herald_events::BusError> {
/// let registry = DispatcherRegistry::new();
/// registry.add_super_global_listener(listener(|e| println!("saw {}", e.name())));
///
/// let audio = registry.get_or_create("audio")?;
/// audio.add_listener("play", listener(|_| println!("playing")))?;
/// audio.trigger("play", None, None)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DispatcherRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    default: Dispatcher,
    named: Arc<NamedDispatchers>,
    super_globals: Arc<ListenerCollection>,
    config: Arc<RegistryConfig>,
}

impl DispatcherRegistry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom config
    pub fn with_config(config: RegistryConfig) -> Self {
        let config = Arc::new(config);
        let named = Arc::new(NamedDispatchers::new());
        let super_globals = Arc::new(ListenerCollection::new(EventScope::Unscoped));
        let default = Dispatcher::new(
            None,
            super_globals.clone(),
            Arc::downgrade(&named),
            config.clone(),
        );

        info!(thread_prefix = %config.thread_name_prefix, "Dispatcher registry created");
        Self {
            inner: Arc::new(RegistryInner {
                default,
                named,
                super_globals,
                config,
            }),
        }
    }

    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Configuration shared by all dispatchers of this registry
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// The default dispatcher, starting its worker on first access
    pub fn get_default(&self) -> BusResult<Dispatcher> {
        self.inner.default.ensure_started()?;
        Ok(self.inner.default.clone())
    }

    /// The dispatcher registered under `name`, created and started if absent.
    ///
    /// `None` yields the default dispatcher. Concurrent calls for the same
    /// unseen name all receive the same instance.
    pub fn get_or_create<'a>(&self, name: impl Into<Option<&'a str>>) -> BusResult<Dispatcher> {
        let Some(name) = name.into() else {
            return self.get_default();
        };
        if name.is_empty() {
            return Err(BusError::InvalidArgument(
                "Dispatcher name must not be empty".to_string(),
            ));
        }

        let dispatcher = self
            .inner
            .named
            .entry(name.to_string())
            .or_insert_with(|| {
                Dispatcher::new(
                    Some(name.to_string()),
                    self.inner.super_globals.clone(),
                    Arc::downgrade(&self.inner.named),
                    self.inner.config.clone(),
                )
            })
            .value()
            .clone();

        dispatcher.ensure_started()?;
        Ok(dispatcher)
    }

    /// Names of all registered named dispatchers
    pub fn list_dispatcher_names(&self) -> BTreeSet<String> {
        self.inner
            .named
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Register a persistent super-global listener
    pub fn add_super_global_listener(&self, listener: Listener) {
        self.add_super_global_listener_with(listener, ListenerOptions::default());
    }

    /// Register a super-global listener with explicit options
    pub fn add_super_global_listener_with(&self, listener: Listener, options: ListenerOptions) {
        self.inner.super_globals.add(listener, options);
    }

    /// Remove the first super-global registration of `listener`
    pub fn remove_super_global_listener(
        &self,
        listener: &Listener,
    ) -> Option<ListenerRegistration> {
        self.inner.super_globals.remove(listener)
    }

    /// The super-global listener collection
    pub fn super_global_listeners(&self) -> &ListenerCollection {
        &self.inner.super_globals
    }

    /// Stop every named dispatcher and halt the default worker.
    ///
    /// The default dispatcher keeps its listeners but no longer accepts
    /// events.
    pub fn shutdown(&self) {
        let named: Vec<Dispatcher> = self
            .inner
            .named
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for dispatcher in named {
            if let Err(e) = dispatcher.stop() {
                debug!("Skipping dispatcher during shutdown: {}", e);
            }
        }
        self.inner.default.halt();
        info!("Dispatcher registry shut down");
    }
}

impl Default for DispatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        for entry in self.named.iter() {
            entry.value().halt();
        }
        self.default.halt();
    }
}

impl fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherRegistry")
            .field("dispatchers", &self.list_dispatcher_names())
            .field("super_globals", &self.inner.super_globals.len())
            .finish()
    }
}
