//! Runtime configuration.
//!
//! `FleetConfig` is deserialized from TOML. Every field has a default, so an
//! empty document (or no file at all) yields a working configuration.
//!
//! ```toml
//! [engine]
//! tick_interval_ms = 5000
//! event_queue_capacity = 100
//!
//! [bus]
//! file_timeout_secs = 30
//! command_timeout_secs = 60
//! question_timeout_secs = 300
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, FleetResult};
use crate::message::OperationClass;

/// Settings for the coordinating loop and its monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Period of the readiness / snapshot / completion tick.
    pub tick_interval_ms: u64,
    /// Bound of the classified event queue. A full queue blocks the watcher.
    pub event_queue_capacity: usize,
    /// Bound of the monitor error stream. Errors beyond it are dropped.
    pub error_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            event_queue_capacity: 100,
            error_queue_capacity: 10,
        }
    }
}

impl EngineSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Worker-side polling intervals and deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub poll_interval_ms: u64,
    pub file_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub question_poll_interval_ms: u64,
    pub question_timeout_secs: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            file_timeout_secs: 30,
            command_timeout_secs: 60,
            question_poll_interval_ms: 2_000,
            question_timeout_secs: 300,
        }
    }
}

impl BusSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn question_poll_interval(&self) -> Duration {
        Duration::from_millis(self.question_poll_interval_ms)
    }

    pub fn question_timeout(&self) -> Duration {
        Duration::from_secs(self.question_timeout_secs)
    }

    /// Deadline for a bus request of the given class.
    pub fn timeout_for(&self, class: OperationClass) -> Duration {
        match class {
            OperationClass::File => Duration::from_secs(self.file_timeout_secs),
            OperationClass::Command => Duration::from_secs(self.command_timeout_secs),
        }
    }
}

/// The top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub engine: EngineSettings,
    pub bus: BusSettings,
}

impl FleetConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `FleetError::ConfigError` if the TOML is malformed or a value
    /// is out of range.
    pub fn from_toml_str(s: &str) -> FleetResult<Self> {
        let config: FleetConfig = toml::from_str(s).map_err(|e| FleetError::ConfigError {
            reason: format!("failed to parse config TOML: {}", e),
        })?;
        config.check()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as TOML configuration.
    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| FleetError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    fn check(&self) -> FleetResult<()> {
        if self.engine.tick_interval_ms == 0 {
            return Err(FleetError::ConfigError {
                reason: "engine.tick_interval_ms must be positive".to_string(),
            });
        }
        if self.engine.event_queue_capacity == 0 {
            return Err(FleetError::ConfigError {
                reason: "engine.event_queue_capacity must be positive".to_string(),
            });
        }
        if self.bus.poll_interval_ms == 0 || self.bus.question_poll_interval_ms == 0 {
            return Err(FleetError::ConfigError {
                reason: "bus poll intervals must be positive".to_string(),
            });
        }
        Ok(())
    }
}
