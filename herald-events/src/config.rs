//! Registry configuration.
//!
//! Settings can be built in code, read from `HERALD_*` environment variables
//! or parsed from a TOML document:
//!
//! ```toml
//! thread_name_prefix = "bus-"
//! continue_on_panic = true
//! log_dispatch = false
//! warn_slow_listeners = true
//! ```

use crate::error::{BusError, BusResult};
use crate::registry::DispatcherRegistry;
use serde::Deserialize;
use std::env;

/// Environment variable holding the worker thread name prefix.
pub const ENV_THREAD_PREFIX: &str = "HERALD_THREAD_PREFIX";
/// Environment variable toggling listener panic isolation.
pub const ENV_CONTINUE_ON_PANIC: &str = "HERALD_CONTINUE_ON_PANIC";
/// Environment variable toggling per-event trace logging.
pub const ENV_LOG_DISPATCH: &str = "HERALD_LOG_DISPATCH";
/// Environment variable toggling slow listener warnings.
pub const ENV_WARN_SLOW: &str = "HERALD_WARN_SLOW";

/// Configuration shared by a registry and all of its dispatchers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Prefix for worker thread names
    pub thread_name_prefix: String,

    /// Keep delivering to the remaining listeners after one panics
    pub continue_on_panic: bool,

    /// Emit a trace entry for every dispatched event
    pub log_dispatch: bool,

    /// Warn when a listener runs past its advisory timeout
    pub warn_slow_listeners: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "herald-".to_string(),
            continue_on_panic: true,
            log_dispatch: false,
            warn_slow_listeners: true,
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            thread_name_prefix: env::var(ENV_THREAD_PREFIX)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.thread_name_prefix),
            continue_on_panic: env_flag(ENV_CONTINUE_ON_PANIC)
                .unwrap_or(defaults.continue_on_panic),
            log_dispatch: env_flag(ENV_LOG_DISPATCH).unwrap_or(defaults.log_dispatch),
            warn_slow_listeners: env_flag(ENV_WARN_SLOW).unwrap_or(defaults.warn_slow_listeners),
        }
    }

    /// Parse config from a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> BusResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| BusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values for consistency.
    pub fn validate(&self) -> BusResult<()> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(BusError::Config(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Name of the worker thread for a dispatcher.
    pub(crate) fn thread_name(&self, dispatcher: Option<&str>) -> String {
        format!(
            "{}{}",
            self.thread_name_prefix,
            dispatcher.unwrap_or("default")
        )
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Registry builder
pub struct RegistryBuilder {
    config: RegistryConfig,
}

impl RegistryBuilder {
    /// Create new registry builder
    pub fn new() -> Self {
        Self {
            config: RegistryConfig::default(),
        }
    }

    /// Set the worker thread name prefix
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Enable/disable continue on listener panic
    pub fn continue_on_panic(mut self, enabled: bool) -> Self {
        self.config.continue_on_panic = enabled;
        self
    }

    /// Enable/disable per-event trace logging
    pub fn log_dispatch(mut self, enabled: bool) -> Self {
        self.config.log_dispatch = enabled;
        self
    }

    /// Enable/disable slow listener warnings
    pub fn warn_slow_listeners(mut self, enabled: bool) -> Self {
        self.config.warn_slow_listeners = enabled;
        self
    }

    /// Build the registry
    pub fn build(self) -> BusResult<DispatcherRegistry> {
        self.config.validate()?;
        Ok(DispatcherRegistry::with_config(self.config))
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
