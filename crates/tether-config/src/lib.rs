//! Configuration for the tether interop runtime
//!
//! Sources, later ones overriding earlier ones:
//! 1. `~/.tether/config.toml`
//! 2. `tether.toml`, searched upward from the working directory
//! 3. `TETHER_*` environment variables
//!
//! # Example
//!
//! ```no_run
//! use tether_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("allocator: {}", config.interop.allocator_strategy());
//! ```

pub mod interop;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating, reading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in {}: {error}", file.display())]
    Parse {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("home directory not found")]
    HomeNotFound,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub use interop::{
    AllocatorConfig, EventConfig, InteropConfig, LoggingConfig, RegistryConfig, ThunkConfig,
};
pub use loader::{Config, ConfigLoader};
