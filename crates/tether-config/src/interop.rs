//! Interop Configuration (tether.toml, ~/.tether/config.toml)
//!
//! Both files share one schema; the project file overrides the global one section by
//! section.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default allocator strategy
pub const DEFAULT_ALLOCATOR: &str = "system";
/// Default number of registry shards
pub const DEFAULT_SHARDS: usize = 16;
/// Default maximum number of live events
pub const DEFAULT_MAX_EVENTS: usize = 4096;
/// Default (and maximum) number of handles in one multi-wait
pub const DEFAULT_MAX_WAIT_HANDLES: usize = 64;
/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Interop runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct InteropConfig {
    /// Native allocator selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocator: Option<AllocatorConfig>,

    /// Registry tuning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,

    /// Callback thunk policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thunks: Option<ThunkConfig>,

    /// Wait/event bridge limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<EventConfig>,

    /// Logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Native allocator selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct AllocatorConfig {
    /// "system" (libc heap) or "rust" (global allocator)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Registry tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Number of lock shards per registry (power of two, 1..=256)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards: Option<usize>,
}

/// Callback thunk policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ThunkConfig {
    /// Reject stubs whose convention differs from the callback's declared one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforce_conventions: Option<bool>,
}

/// Wait/event bridge limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct EventConfig {
    /// Maximum number of live events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_events: Option<usize>,

    /// Maximum handles accepted by a single multi-wait (1..=64)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait_handles: Option<usize>,
}

/// Logging
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// error, warn, info, debug or trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl InteropConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(strategy) = self.allocator.as_ref().and_then(|a| a.strategy.as_deref()) {
            if !matches!(strategy, "system" | "rust") {
                return Err(ConfigError::InvalidValue {
                    field: "allocator.strategy".to_string(),
                    reason: format!("must be 'system' or 'rust', got '{}'", strategy),
                });
            }
        }

        if let Some(shards) = self.registry.as_ref().and_then(|r| r.shards) {
            if shards == 0 || shards > 256 || !shards.is_power_of_two() {
                return Err(ConfigError::InvalidValue {
                    field: "registry.shards".to_string(),
                    reason: format!("must be a power of two between 1 and 256, got {}", shards),
                });
            }
        }

        if let Some(events) = &self.events {
            if events.max_events == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "events.max_events".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            if let Some(n) = events.max_wait_handles {
                if n == 0 || n > DEFAULT_MAX_WAIT_HANDLES {
                    return Err(ConfigError::InvalidValue {
                        field: "events.max_wait_handles".to_string(),
                        reason: format!(
                            "must be between 1 and {}, got {}",
                            DEFAULT_MAX_WAIT_HANDLES, n
                        ),
                    });
                }
            }
        }

        if let Some(level) = self.logging.as_ref().and_then(|l| l.level.as_deref()) {
            if !is_valid_level(level) {
                return Err(ConfigError::InvalidValue {
                    field: "logging.level".to_string(),
                    reason: format!("unknown level '{}'", level),
                });
            }
        }

        Ok(())
    }

    /// Merge another config into this one
    /// Other config takes precedence for non-None sections
    pub fn merge(&mut self, other: &InteropConfig) {
        if other.allocator.is_some() {
            self.allocator = other.allocator.clone();
        }
        if other.registry.is_some() {
            self.registry = other.registry.clone();
        }
        if other.thunks.is_some() {
            self.thunks = other.thunks.clone();
        }
        if other.events.is_some() {
            self.events = other.events.clone();
        }
        if other.logging.is_some() {
            self.logging = other.logging.clone();
        }
    }

    /// Effective allocator strategy name
    pub fn allocator_strategy(&self) -> &str {
        self.allocator
            .as_ref()
            .and_then(|a| a.strategy.as_deref())
            .unwrap_or(DEFAULT_ALLOCATOR)
    }

    /// Effective shard count
    pub fn shards(&self) -> usize {
        self.registry
            .as_ref()
            .and_then(|r| r.shards)
            .unwrap_or(DEFAULT_SHARDS)
    }

    /// Whether calling conventions are enforced for stubs
    pub fn enforce_conventions(&self) -> bool {
        self.thunks
            .as_ref()
            .and_then(|t| t.enforce_conventions)
            .unwrap_or(true)
    }

    /// Effective live event limit
    pub fn max_events(&self) -> usize {
        self.events
            .as_ref()
            .and_then(|e| e.max_events)
            .unwrap_or(DEFAULT_MAX_EVENTS)
    }

    /// Effective multi-wait handle limit
    pub fn max_wait_handles(&self) -> usize {
        self.events
            .as_ref()
            .and_then(|e| e.max_wait_handles)
            .unwrap_or(DEFAULT_MAX_WAIT_HANDLES)
    }

    /// Effective log level
    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

fn is_valid_level(level: &str) -> bool {
    matches!(level, "error" | "warn" | "info" | "debug" | "trace")
}
