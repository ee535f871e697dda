use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_store::DEFAULT_NAMESPACE;

pub const DEFAULT_SNAPSHOTTER: &str = "overlayfs";
/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "STRATA_CONFIG";

/// User configuration, read from `~/.config/strata/config.json`.
///
/// Every field is optional in the file; command-line flags override it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: PathBuf,
    pub snapshotter: String,
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: expand_tilde("~/.local/share/strata"),
            snapshotter: DEFAULT_SNAPSHOTTER.to_owned(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
        }
    }
}

impl Config {
    /// Load from `$STRATA_CONFIG` or the default path. A missing file yields
    /// the defaults; a malformed one is an error.
    pub fn load_default() -> Result<Self, CoreError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(&expand_tilde(&path));
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.store = expand_tilde(&config.store.to_string_lossy());
        if config.snapshotter.is_empty() {
            config.snapshotter = DEFAULT_SNAPSHOTTER.to_owned();
        }
        if config.namespace.is_empty() {
            config.namespace = DEFAULT_NAMESPACE.to_owned();
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply command-line overrides. Empty values leave the field unchanged.
    #[must_use]
    pub fn with_overrides(
        mut self,
        store: Option<&str>,
        snapshotter: Option<&str>,
        namespace: Option<&str>,
    ) -> Self {
        if let Some(store) = store.filter(|s| !s.is_empty()) {
            self.store = expand_tilde(store);
        }
        if let Some(sn) = snapshotter.filter(|s| !s.is_empty()) {
            sn.clone_into(&mut self.snapshotter);
        }
        if let Some(ns) = namespace.filter(|s| !s.is_empty()) {
            ns.clone_into(&mut self.namespace);
        }
        self
    }
}

fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config/strata/config.json"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
