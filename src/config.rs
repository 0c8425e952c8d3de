// Configuration
// Optional .aide/config/aide.json plus environment overrides. Environment
// always wins over the file; both are optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Quiet interval before a change callback fires.
    pub delay_secs: u64,
    /// Extra directories to watch besides the project root.
    pub paths: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_secs: 30,
            paths: Vec::new(),
        }
    }
}

/// Code-store initialisation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeStoreConfig {
    /// Skip the code store entirely.
    pub disable: bool,
    /// Initialise eagerly instead of on a background worker.
    pub sync_init: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AideConfig {
    pub watch: WatchConfig,
    pub code_store: CodeStoreConfig,
    /// Per-analyser thresholds, passed through to the analyser plug-ins.
    pub analysers: BTreeMap<String, serde_json::Value>,
}

impl AideConfig {
    /// Load from the config file (if present), then apply environment
    /// overrides.
    pub fn load(config_file: &Path) -> Result<Self> {
        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(config_file)
                .with_context(|| format!("Failed to read config: {}", config_file.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid config: {}", config_file.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("AIDE_CODE_WATCH") {
            self.watch.enabled = is_truthy(&value);
        }
        if let Ok(value) = std::env::var("AIDE_CODE_WATCH_DELAY") {
            if let Ok(secs) = value.parse::<u64>() {
                self.watch.delay_secs = secs;
            }
        }
        if let Ok(value) = std::env::var("AIDE_CODE_WATCH_PATHS") {
            self.watch.paths = value
                .split(':')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(value) = std::env::var("AIDE_CODE_STORE_DISABLE") {
            self.code_store.disable = is_truthy(&value);
        }
        if let Ok(value) = std::env::var("AIDE_CODE_STORE_SYNC") {
            self.code_store.sync_init = is_truthy(&value);
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let config = AideConfig::load(&dir.path().join("aide.json"))?;
        assert!(!config.watch.enabled);
        assert_eq!(config.watch.delay_secs, 30);
        Ok(())
    }

    #[test]
    fn file_values_are_read() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("aide.json");
        std::fs::write(
            &path,
            r#"{"watch": {"enabled": true, "delay_secs": 5}, "analysers": {"clones": {"min_lines": 12}}}"#,
        )?;
        let config = AideConfig::load(&path)?;
        assert!(config.watch.enabled);
        assert_eq!(config.watch.delay_secs, 5);
        assert!(config.analysers.contains_key("clones"));
        Ok(())
    }
}
