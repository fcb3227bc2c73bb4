use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tiledoc_editor::{ManagerConfig, DEFAULT_CONFIG_NAME};

/// Tiledoc configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Tree id the baseline document is attached under
    #[serde(default = "default_tree")]
    pub default_tree: String,

    /// Tree manager settings, stored at the top level of the file
    #[serde(flatten)]
    pub manager: ManagerConfig,
}

fn default_tree() -> String {
    "document".to_string()
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        Self::load_from(&PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME))
    }

    /// Load config from an explicit file, falling back to defaults if absent
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_tree: default_tree(),
            manager: ManagerConfig::default(),
        }
    }
}
