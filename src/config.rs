use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{FetchMode, OutdatedPolicy, TargetId};
use crate::error::SyncError;

/// Caller-supplied selection of what to synchronize and how. Targets absent
/// from `targets` default to enabled with mode `older`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub include_dataset_details: bool,
    #[serde(default)]
    pub outdated_policy: OutdatedPolicy,
    #[serde(default)]
    pub stale_days: u32,
    #[serde(default)]
    pub targets: BTreeMap<TargetId, TargetSelection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSelection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: FetchMode,
}

impl Default for TargetSelection {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: FetchMode::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

impl Selection {
    pub fn enabled_for(&self, target: TargetId) -> bool {
        self.targets
            .get(&target)
            .map(|entry| entry.enabled)
            .unwrap_or(true)
    }

    pub fn mode_for(&self, target: TargetId) -> FetchMode {
        self.targets
            .get(&target)
            .map(|entry| entry.mode)
            .unwrap_or_default()
    }
}

pub struct SelectionLoader;

impl SelectionLoader {
    /// Resolves the selection config. Without an explicit path the default
    /// `rde-sync.json` is optional; a named path must exist.
    pub fn resolve(path: Option<&str>) -> Result<Selection, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("rde-sync.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Selection::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))
    }
}
