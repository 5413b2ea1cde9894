//! Agent configuration.
//!
//! Loaded from TOML with `${VAR}` environment expansion. Every field has a
//! serde default so an empty file is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use svcagent_runloop::RunLoopConfig;

use crate::error::ConfigError;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Run loop settings.
    #[serde(default)]
    pub run_loop: RunLoopConfig,

    /// Background-suspend timer settings.
    #[serde(default)]
    pub suspend: SuspendConfig,

    /// Freeze/thaw listener settings.
    #[serde(default)]
    pub freeze: FreezeConfig,

    /// Condition dispatch settings.
    #[serde(default)]
    pub conditions: ConditionsConfig,

    /// Logging settings (used by the binary).
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Suspend timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendConfig {
    /// Delay between a suspend notification and the actual suspend, in ms.
    #[serde(default = "default_suspend_delay_ms")]
    pub delay_ms: u64,
}

fn default_suspend_delay_ms() -> u64 {
    5000
}

impl Default for SuspendConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_suspend_delay_ms(),
        }
    }
}

impl SuspendConfig {
    /// Get the delay as a Duration.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Freeze listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreezeConfig {
    /// Whether to subscribe to the freeze broadcast at all.
    #[serde(default = "default_freeze_enabled")]
    pub enabled: bool,
}

fn default_freeze_enabled() -> bool {
    true
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            enabled: default_freeze_enabled(),
        }
    }
}

/// What happens after a low-memory notice has been dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowMemoryPost {
    /// Trim the allocator.
    #[default]
    Trim,
    /// Call the application's low-memory-post hook; trim when it has none.
    Notify,
}

/// Condition dispatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionsConfig {
    /// Post step for low-memory notices.
    #[serde(default)]
    pub low_memory_post: LowMemoryPost,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Directory for rolling log files (supports `~`).
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AgentConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run_loop.validate().map_err(ConfigError::Invalid)?;

        if self.suspend.delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "suspend.delay_ms must be > 0".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load and validate configuration from a string.
    pub fn load_str(content: &str) -> Result<AgentConfig, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: AgentConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.svcagent`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}
