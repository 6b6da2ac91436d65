//! Global application config (debug output + converter dependencies)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::paths::AppPaths;
use crate::persistence::{self, DocumentStore};

/// Top-level keys a loaded app config must have to be accepted
const REQUIRED_KEYS: [&str; 2] = ["settings", "dependencies"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub settings: AppSettings,
    pub dependencies: Dependencies,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub show_debug_messages: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependencies {
    /// Built-in converter executable
    #[serde(default, alias = "phosPath")]
    pub converter_path: Option<PathBuf>,
    #[serde(default)]
    pub tools: Vec<Tool>,
}

/// A custom converter a game can use instead of the built-in one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    pub fn default_for(paths: &AppPaths) -> Self {
        Self {
            settings: AppSettings::default(),
            dependencies: Dependencies {
                converter_path: Some(paths.default_converter()),
                tools: vec![Tool {
                    name: "Example".to_string(),
                    path: None,
                }],
            },
        }
    }

    /// Load the app config, replacing a missing, corrupt or incomplete file
    /// with defaults. Unreadable files (permissions, I/O) fall back to
    /// in-memory defaults without touching the file.
    pub fn load(store: &dyn DocumentStore, paths: &AppPaths) -> Self {
        let path = paths.app_config();
        match store.read(&path, true) {
            Ok(document) => match Self::validate(&path, document) {
                Some(config) => {
                    debug!(path = %path.display(), "App config loaded");
                    config
                }
                None => Self::recreate(store, paths, &path),
            },
            Err(e) if e.is_not_found() || e.is_malformed() => Self::recreate(store, paths, &path),
            Err(e) => {
                error!(error = %e, "Failed to load app config, using defaults for this session");
                Self::default_for(paths)
            }
        }
    }

    fn validate(path: &Path, document: Value) -> Option<Self> {
        let Some(object) = document.as_object() else {
            error!(path = %path.display(), "Invalid app config! Not an object");
            return None;
        };

        let mut valid = true;
        for key in REQUIRED_KEYS {
            if !object.contains_key(key) {
                error!(path = %path.display(), missing = key, "Invalid app config! Missing property");
                valid = false;
            }
        }
        if !valid {
            return None;
        }

        serde_json::from_value(document)
            .inspect_err(|e| error!(path = %path.display(), error = %e, "Invalid app config!"))
            .ok()
    }

    fn recreate(store: &dyn DocumentStore, paths: &AppPaths, path: &Path) -> Self {
        let config = Self::default_for(paths);
        match persistence::save(store, path, &config) {
            Ok(()) => info!(path = %path.display(), "Created new app config"),
            Err(e) => error!(error = %e, "Failed to create new app config!"),
        }
        config
    }

    pub fn to_document(&self, paths: &AppPaths) -> Result<Value, StoreError> {
        persistence::to_document(&paths.app_config(), self)
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.dependencies.tools.iter().find(|tool| tool.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::testing::MemoryStore;
    use serde_json::json;

    fn paths() -> AppPaths {
        AppPaths::new("/data")
    }

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let store = MemoryStore::new();
        let config = AppConfig::load(&store, &paths());

        assert_eq!(config, AppConfig::default_for(&paths()));
        assert_eq!(store.write_count(paths().app_config()), 1);
    }

    #[test]
    fn test_config_missing_required_key_is_replaced() {
        let store = MemoryStore::new();
        store.insert(paths().app_config(), json!({ "settings": { "showDebugMessages": true } }));

        let config = AppConfig::load(&store, &paths());

        assert!(!config.settings.show_debug_messages);
        let on_disk = store.get(paths().app_config()).unwrap();
        assert!(on_disk.get("dependencies").is_some());
    }

    #[test]
    fn test_valid_config_is_kept_and_legacy_key_accepted() {
        let store = MemoryStore::new();
        store.insert(
            paths().app_config(),
            json!({
                "settings": { "showDebugMessages": true },
                "dependencies": {
                    "phosPath": "/tools/phos.exe",
                    "tools": [{ "name": "Other", "path": "/tools/other.exe" }]
                }
            }),
        );

        let config = AppConfig::load(&store, &paths());

        assert!(config.settings.show_debug_messages);
        assert_eq!(config.dependencies.converter_path, Some(PathBuf::from("/tools/phos.exe")));
        assert_eq!(config.tool("Other").and_then(|t| t.path.clone()), Some(PathBuf::from("/tools/other.exe")));
        assert_eq!(store.write_count(paths().app_config()), 0);
    }

    #[test]
    fn test_serializes_converter_path_under_new_key() {
        let value = serde_json::to_value(AppConfig::default_for(&paths())).unwrap();
        assert!(value["dependencies"].get("converterPath").is_some());
        assert!(value["dependencies"].get("phosPath").is_none());
    }
}
