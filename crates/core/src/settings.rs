use std::path::Path;

use serde::{Deserialize, Serialize};

/// Operator choices that survive a restart.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Instances ticked in the TUI. `None` until the operator changes anything,
    /// in which case the config's `enabled` flags apply.
    #[serde(default)]
    pub enabled_instances: Option<Vec<String>>,
}

impl Settings {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }

    pub fn is_enabled(&self, instance: &str, default: bool) -> bool {
        match &self.enabled_instances {
            Some(list) => list.iter().any(|n| n == instance),
            None => default,
        }
    }
}
