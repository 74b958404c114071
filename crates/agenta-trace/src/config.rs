//! Configuration file support.
//!
//! Settings live in `.agenta/config.toml`, discovered by walking up from the
//! current directory. Command-line flags and environment variables override
//! individual fields after loading.

use std::path::{Path, PathBuf};

use agenta_tracing::TracingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The agenta data directory name.
pub const AGENTA_DIR: &str = ".agenta";
/// The config file name within the agenta directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Collector connection settings.
    pub tracing: TracingConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rotated log files; stderr when unset.
    pub dir: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find `.agenta/config.toml` in the current directory or its parents.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find `.agenta/config.toml` starting from a specific directory.
    ///
    /// Returns the config and the `.agenta` directory it was found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let agenta_dir = dir.join(AGENTA_DIR);
            let config_path = agenta_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, agenta_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve a relative log directory against the `.agenta` directory.
    pub fn resolve_log_dir(&self, agenta_dir: Option<&Path>) -> Option<PathBuf> {
        let dir = self.logging.dir.as_ref()?;
        if dir.is_absolute() {
            Some(dir.clone())
        } else {
            Some(
                agenta_dir
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(AGENTA_DIR))
                    .join(dir),
            )
        }
    }

    /// Template written by `agenta-trace init`.
    pub fn template() -> String {
        r#"# agenta tracing configuration

[tracing]
host = "http://localhost"
# api_key = "..."          # or set AGENTA_API_KEY; without a key traces stay local
app_id = ""
max_workers = 4
timeout_secs = 120

[logging]
# dir = "logs"             # relative to this .agenta directory
# level = "info"
"#
        .to_string()
    }
}
