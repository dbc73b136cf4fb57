use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::sync::engine::{DEFAULT_ROOT_FOLDER_NAME, DEFAULT_TRANSFER_CONCURRENCY, EngineSettings};
use crate::sync::reconcile::DEFAULT_TOLERANCE_MS;

pub const CONFIG_FILE_NAME: &str = "sync-drive-config.json";
const CONFIG_DIR_NAME: &str = "hypernote";
const DEFAULT_NOTES_DIR: &str = "Documents/Hypernote";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("drive sync is not configured (no access token)")]
    NotConfigured,
    #[error("{0} directory is unavailable")]
    MissingDirectory(&'static str),
}

/// On-disk shape of `sync-drive-config.json`. Keys not listed here survive a
/// save untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<StoredTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_folder_name: Option<String>,
}

// OAuth token payloads keep their snake_case wire names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// What the host may show about the stored credentials. Secrets stay out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigStatus {
    pub client_id: Option<String>,
    pub has_client_secret: bool,
    pub has_tokens: bool,
    pub sync_folder_name: Option<String>,
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CONFIG_FILE_NAME),
        }
    }

    /// `HYPERNOTE_CONFIG_DIR` if set, otherwise the per-user config dir.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(dir) = std::env::var_os("HYPERNOTE_CONFIG_DIR") {
            return Ok(Self::new(PathBuf::from(dir)));
        }
        let base = dirs::config_dir().ok_or(ConfigError::MissingDirectory("config"))?;
        Ok(Self::new(base.join(CONFIG_DIR_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as an empty config.
    pub async fn load(&self) -> Result<StoredConfig, ConfigError> {
        match self.read_value().await? {
            Some(value) => serde_json::from_value(value).map_err(|source| self.json_error(source)),
            None => Ok(StoredConfig::default()),
        }
    }

    /// Shallow-merges the set fields of `update` over the file's current
    /// content and writes the result back.
    pub async fn save(&self, update: &StoredConfig) -> Result<StoredConfig, ConfigError> {
        let mut merged = match self.read_value().await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Value::Object(fields) =
            serde_json::to_value(update).map_err(|source| self.json_error(source))?
        {
            merged.extend(fields);
        }
        let merged = Value::Object(merged);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        let body = serde_json::to_string_pretty(&merged).map_err(|source| self.json_error(source))?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|source| self.io_error(source))?;
        serde_json::from_value(merged).map_err(|source| self.json_error(source))
    }

    pub async fn status(&self) -> Result<ConfigStatus, ConfigError> {
        let config = self.load().await?;
        Ok(ConfigStatus {
            has_client_secret: config.client_secret.as_deref().is_some_and(|s| !s.is_empty()),
            has_tokens: config.tokens.is_some(),
            client_id: config.client_id,
            sync_folder_name: config.sync_folder_name,
        })
    }

    async fn read_value(&self) -> Result<Option<Value>, ConfigError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| self.json_error(source))
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn json_error(&self, source: serde_json::Error) -> ConfigError {
        ConfigError::Json {
            path: self.path.clone(),
            source,
        }
    }
}

/// Everything one sync run needs, resolved from the stored config and the
/// environment (which wins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub access_token: Option<String>,
    pub notes_dir: PathBuf,
    pub sync_folder_name: String,
    pub drive_base_url: Option<String>,
    pub tolerance_ms: i64,
    pub transfer_concurrency: usize,
}

impl SyncSettings {
    pub fn from_env(stored: &StoredConfig) -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::MissingDirectory("home"))?;
        Ok(Self::from_sources(stored, &home, |name| std::env::var(name).ok()))
    }

    pub fn from_sources<F>(stored: &StoredConfig, home: &Path, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let access_token = non_empty("HYPERNOTE_ACCESS_TOKEN").or_else(|| {
            stored
                .tokens
                .as_ref()
                .and_then(|tokens| tokens.access_token.clone())
                .filter(|token| !token.is_empty())
        });
        let notes_dir = non_empty("HYPERNOTE_NOTES_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join(DEFAULT_NOTES_DIR));
        let sync_folder_name = non_empty("HYPERNOTE_SYNC_FOLDER")
            .or_else(|| stored.sync_folder_name.clone().filter(|name| !name.is_empty()))
            .unwrap_or_else(|| DEFAULT_ROOT_FOLDER_NAME.to_string());
        let tolerance_ms = non_empty("HYPERNOTE_TOLERANCE_MS")
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|value| *value >= 0)
            .unwrap_or(DEFAULT_TOLERANCE_MS);
        let transfer_concurrency = non_empty("HYPERNOTE_TRANSFER_CONCURRENCY")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_TRANSFER_CONCURRENCY);

        Self {
            access_token,
            notes_dir,
            sync_folder_name,
            drive_base_url: non_empty("HYPERNOTE_DRIVE_BASE_URL"),
            tolerance_ms,
            transfer_concurrency,
        }
    }

    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.access_token.as_deref().ok_or(ConfigError::NotConfigured)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            root_folder_name: self.sync_folder_name.clone(),
            tolerance_ms: self.tolerance_ms,
            transfer_concurrency: self.transfer_concurrency,
        }
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
