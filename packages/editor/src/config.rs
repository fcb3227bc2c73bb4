use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::HistoryError;

pub const DEFAULT_CONFIG_NAME: &str = "tiledoc.config.json";

/// Tree manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    /// How long the manager waits on a single tree call before giving up
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,

    /// Maximum number of undo levels (0 = unlimited)
    #[serde(default)]
    pub max_undo_levels: usize,

    /// Action names that never produce undoable entries
    #[serde(default)]
    pub no_undo_actions: Vec<String>,
}

fn default_exchange_timeout_ms() -> u64 {
    100
}

impl ManagerConfig {
    /// Load config from a JSON file, falling back to defaults if it is absent
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ManagerConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(ManagerConfig::default())
        }
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn is_no_undo_action(&self, action: &str) -> bool {
        self.no_undo_actions.iter().any(|name| name == action)
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_undo_levels(mut self, levels: usize) -> Self {
        self.max_undo_levels = levels;
        self
    }

    pub fn with_no_undo_action(mut self, action: impl Into<String>) -> Self {
        self.no_undo_actions.push(action.into());
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: default_exchange_timeout_ms(),
            max_undo_levels: 0,
            no_undo_actions: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "exchangeTimeoutMs": 250,
            "maxUndoLevels": 20,
            "noUndoActions": ["/tileMap/t1/content/setSelection"]
        }"#;

        let config: ManagerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.exchange_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_undo_levels, 20);
        assert!(config.is_no_undo_action("/tileMap/t1/content/setSelection"));
        assert!(!config.is_no_undo_action("/tileMap/t1/content/setText"));
    }

    #[test]
    fn test_default_config() {
        let config: ManagerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.exchange_timeout_ms, 100);
        assert_eq!(config.max_undo_levels, 0);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::load(&dir.path().join(DEFAULT_CONFIG_NAME)).unwrap();
        assert_eq!(config, ManagerConfig::default());
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = ManagerConfig::default().with_exchange_timeout(Duration::MAX);
        assert_eq!(config.exchange_timeout_ms, u64::MAX);

        let config = ManagerConfig::default().with_exchange_timeout(Duration::from_millis(250));
        assert_eq!(config.exchange_timeout(), Duration::from_millis(250));
    }
}
