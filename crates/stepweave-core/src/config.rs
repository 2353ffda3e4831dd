//! Engine configuration.
//!
//! ```yaml
//! max_iterations: 64
//! max_conflict_retries: 3
//! turn_timeout_secs: 300   # 0 disables the per-turn timeout
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on coordinator turns within one run
    pub max_iterations: u32,
    /// Re-read-and-reapply attempts before a conflict becomes a protocol error
    pub max_conflict_retries: u32,
    /// Per worker-unit invocation, in seconds
    pub turn_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            max_conflict_retries: 3,
            turn_timeout_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::InvalidWorkflow(format!("Failed to parse config YAML: {}", e)))
    }

    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidWorkflow(format!("Failed to read config file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        match self.turn_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml("max_iterations: 10\nturn_timeout_secs: 0\n").unwrap();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.turn_timeout(), None);
        assert_eq!(EngineConfig::default().turn_timeout(), Some(Duration::from_secs(300)));
    }
}
