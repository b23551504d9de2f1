//! Persisted chat settings: backend endpoint, request defaults, and stream
//! tuning.
//!
//! Settings load figment-first (defaults merged with the on-disk JSON file)
//! and live behind an `ArcSwap` so readers never block a concurrent update.
//! Persistence writes a temporary file and renames it over the target.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tessera_stream::STREAM_IDLE_FLUSH_MS;

pub const SETTINGS_DIRECTORY_NAME: &str = "tessera";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Streaming chat endpoint. Empty means not configured.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    /// How many prior turns travel with each request.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Idle debounce for releasing held-back stream text, in milliseconds.
    #[serde(default = "default_idle_flush_ms")]
    pub idle_flush_ms: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            history_limit: default_history_limit(),
            idle_flush_ms: default_idle_flush_ms(),
        }
    }
}

impl ChatSettings {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    pub fn normalized(mut self) -> Self {
        self.endpoint = self.endpoint.trim().to_string();
        self.api_key = self.api_key.trim().to_string();
        if self.idle_flush_ms == 0 {
            self.idle_flush_ms = default_idle_flush_ms();
        }
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".tessera"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized = settings.normalized();
        self.persist(&normalized)?;
        self.settings.store(Arc::new(normalized));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> ChatSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return ChatSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(ChatSettings::default())).merge(Json::file(path));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_idle_flush_ms() -> u64 {
    STREAM_IDLE_FLUSH_MS
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tessera-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn normalized_restores_defaults_for_blank_fields() {
        let settings = ChatSettings {
            endpoint: "  https://api.example.test/chat  ".to_string(),
            api_key: " k ".to_string(),
            history_limit: 5,
            idle_flush_ms: 0,
        }
        .normalized();

        assert_eq!(settings.endpoint, "https://api.example.test/chat");
        assert_eq!(settings.api_key, "k");
        assert_eq!(settings.history_limit, 5);
        assert_eq!(settings.idle_flush_ms, STREAM_IDLE_FLUSH_MS);
        assert!(settings.is_configured());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = temp_settings_path("missing");
        let _ = std::fs::remove_file(&path);

        let store = SettingsStore::new(path);
        assert_eq!(*store.settings(), ChatSettings::default());
        assert!(!store.settings().is_configured());
    }

    #[test]
    fn update_persists_and_reloads() {
        let path = temp_settings_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let store = SettingsStore::new(path.clone());
        let custom = ChatSettings {
            endpoint: "https://api.example.test/chat".to_string(),
            api_key: "secret".to_string(),
            history_limit: 8,
            idle_flush_ms: 90,
        };
        store.update(custom.clone()).unwrap();
        assert_eq!(*store.settings(), custom);

        let reloaded = SettingsStore::new(path.clone());
        assert_eq!(*reloaded.settings(), custom);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let path = temp_settings_path("partial");
        std::fs::write(&path, r#"{"endpoint":"https://only.endpoint.test"}"#).unwrap();

        let store = SettingsStore::new(path.clone());
        let settings = store.settings();
        assert_eq!(settings.endpoint, "https://only.endpoint.test");
        assert_eq!(settings.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(settings.idle_flush_ms, STREAM_IDLE_FLUSH_MS);
        let _ = std::fs::remove_file(&path);
    }
}
