//! Configuration for the RunLoop.

use serde::{Deserialize, Serialize};

/// RunLoop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLoopConfig {
    /// Maximum number of posted messages handled in one iteration before
    /// timers are checked again.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Name given to the loop in log output.
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_max_batch() -> usize {
    64
}

fn default_name() -> String {
    "main".to_string()
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            name: default_name(),
        }
    }
}

impl RunLoopConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch == 0 {
            return Err("max_batch must be > 0".to_string());
        }
        Ok(())
    }
}
