//! Locating and layering configuration sources

use crate::interop::{
    AllocatorConfig, EventConfig, InteropConfig, LoggingConfig, ThunkConfig,
};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "tether.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.tether/config.toml) - lowest priority
/// 2. Project config (./tether.toml) - overrides global
/// 3. Environment variables (TETHER_*) - overrides project
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective interop configuration
    pub interop: InteropConfig,

    /// Directory where tether.toml was found
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config path instead of ~/.tether/config.toml
    pub fn with_global_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find tether.toml, layers it over the global
    /// config, then applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;

        let mut interop = self.load_global_config()?;
        interop.merge(&project_config);
        let interop = apply_env_overrides(interop)?;

        Ok(Config {
            interop,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = InteropConfig::load_from_file(config_path)?;

        let mut interop = self.load_global_config()?;
        interop.merge(&project_config);
        let interop = apply_env_overrides(interop)?;

        Ok(Config {
            interop,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Defaults plus environment overrides, without touching the filesystem
    pub fn load_from_env(&self) -> ConfigResult<Config> {
        Ok(Config {
            interop: apply_env_overrides(InteropConfig::default())?,
            project_root: None,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, InteropConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let config = InteropConfig::load_from_file(&config_path)?;
                return Ok((Some(current), config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, InteropConfig::default())),
            }
        }
    }

    /// Load global configuration, defaulting when the file is absent
    fn load_global_config(&mut self) -> ConfigResult<InteropConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match Self::global_config_dir() {
                Ok(dir) => {
                    let path = dir.join("config.toml");
                    self.global_config_path = Some(path.clone());
                    path
                }
                // No home directory: nothing global to load
                Err(ConfigError::HomeNotFound) => return Ok(InteropConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(InteropConfig::default());
        }

        InteropConfig::load_from_file(&path)
    }

    /// Get the global configuration directory (~/.tether)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".tether"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if a tether.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

/// Apply environment variable overrides
///
/// - TETHER_ALLOCATOR=system|rust
/// - TETHER_ENFORCE_CONVENTIONS=true|false
/// - TETHER_MAX_EVENTS=<n>
/// - TETHER_LOG=<level>
fn apply_env_overrides(mut config: InteropConfig) -> ConfigResult<InteropConfig> {
    if let Ok(strategy) = env::var("TETHER_ALLOCATOR") {
        config.allocator = Some(AllocatorConfig {
            strategy: Some(strategy.to_lowercase()),
        });
    }

    if let Ok(enforce) = env::var("TETHER_ENFORCE_CONVENTIONS") {
        let enforce = matches!(enforce.to_lowercase().as_str(), "true" | "1" | "yes");
        config.thunks = Some(ThunkConfig {
            enforce_conventions: Some(enforce),
        });
    }

    if let Ok(max_events) = env::var("TETHER_MAX_EVENTS") {
        let parsed = max_events
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue {
                field: "TETHER_MAX_EVENTS".to_string(),
                reason: format!("not a number: '{}'", max_events),
            })?;
        let events = config.events.get_or_insert_with(EventConfig::default);
        events.max_events = Some(parsed);
    }

    if let Ok(level) = env::var("TETHER_LOG") {
        config.logging = Some(LoggingConfig {
            level: Some(level.to_lowercase()),
        });
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_CONFIG_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_config_path(dir.path().join("missing-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[allocator]
strategy = "rust"
"#,
        );

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.interop.allocator_strategy(), "rust");
        assert!(config.is_project());
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[registry]
shards = 4
"#,
        );

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.interop.shards(), 4);
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_allocator() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[allocator]
strategy = "system"
"#,
        );

        env::set_var("TETHER_ALLOCATOR", "rust");

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();
        assert_eq!(config.interop.allocator_strategy(), "rust");

        env::remove_var("TETHER_ALLOCATOR");
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_max_events() {
        env::set_var("TETHER_MAX_EVENTS", "lots");

        let loader = ConfigLoader::new();
        let result = loader.load_from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::remove_var("TETHER_MAX_EVENTS");
    }
}
