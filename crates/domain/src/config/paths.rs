use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data layout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of all durable state. Layout:
    ///
    /// ```text
    /// <data_dir>/
    ///     registry.json          ← model/provider/key/settings tables
    ///     models/<model_dir>/    ← weights + config.json
    ///     models/config/         ← per-model tuning snapshots
    /// ```
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
}

impl PathsConfig {
    pub fn registry_file(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn model_config_dir(&self) -> PathBuf {
        self.models_dir().join("config")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
        }
    }
}

fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
