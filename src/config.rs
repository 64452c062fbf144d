use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::engine::{EngineConfig, DEFAULT_COLOR, DEFAULT_FETCH_CONCURRENCY, DEFAULT_NOTES_FOLDER};
use crate::error::{SyncError, SyncResult};
use crate::metadata::WriteStrategy;
use crate::text_codec::{TextEncoding, DEFAULT_ENCODING};

pub const DEFAULT_CONFIG_FILE: &str = "notes-sync.json";

// App config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// OAuth client secrets as downloaded from the cloud console.
    pub credentials_path: PathBuf,
    /// Where the granted token is kept between runs.
    pub token_path: PathBuf,
    pub notes_folder: String,
    pub default_encoding: String,
    pub default_color: String,
    pub fetch_concurrency: usize,
    pub write_strategy: WriteStrategy,
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("credentials.json"),
            token_path: PathBuf::from("token.json"),
            notes_folder: DEFAULT_NOTES_FOLDER.to_string(),
            default_encoding: DEFAULT_ENCODING.to_string(),
            default_color: DEFAULT_COLOR.to_string(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            write_strategy: WriteStrategy::default(),
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Load config from disk. A missing file means defaults; an unreadable
    /// or invalid one is reported and replaced by defaults.
    pub fn load(path: &Path) -> Self {
        let (config, problem) = Self::load_checked(path);
        if let Some(err) = problem {
            warn!(path = %path.display(), error = %err, "invalid config, using defaults");
        }
        config
    }

    /// Same fallback as [`Config::load`], but hands the problem back for
    /// callers that can only log once the config is known.
    pub fn load_checked(path: &Path) -> (Self, Option<SyncError>) {
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::try_load(path) {
            Ok(config) => (config, None),
            Err(err) => (Self::default(), Some(err)),
        }
    }

    pub fn try_load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("failed to read '{}': {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("failed to parse '{}': {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> SyncResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| SyncError::Config(format!("failed to write '{}': {}", path.display(), e)))
    }

    fn validate(&self) -> SyncResult<()> {
        if self.notes_folder.trim().is_empty() {
            return Err(SyncError::Config("notesFolder must not be empty".to_string()));
        }
        if self.fetch_concurrency == 0 {
            return Err(SyncError::Config("fetchConcurrency must be at least 1".to_string()));
        }
        TextEncoding::resolve(&self.default_encoding)
            .map_err(|e| SyncError::Config(format!("defaultEncoding: {}", e)))?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            notes_folder: self.notes_folder.clone(),
            default_color: self.default_color.clone(),
            fetch_concurrency: self.fetch_concurrency,
            write_strategy: self.write_strategy,
        }
    }
}
