//! ============================================================================
//! Agent Configuration
//! ============================================================================
//! Storage locations, completion endpoint and timeouts. Defaults work out of
//! the box; `from_env` layers TRAVELVERSE_* variables on top.
//! ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::completion::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Default deadline for the classifier's completion call
pub const DEFAULT_CLASSIFY_TIMEOUT_SECS: u64 = 15;

/// Default deadline for a pipeline collaborator
pub const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// redb file; None means ~/.travelverse/memory.redb
    pub db_path: Option<PathBuf>,
    /// None means `backups/` next to the database
    pub backup_dir: Option<PathBuf>,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub classifier_temperature: f32,
    pub classify_timeout_secs: u64,
    pub pipeline_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            backup_dir: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            classifier_temperature: 0.3,
            classify_timeout_secs: DEFAULT_CLASSIFY_TIMEOUT_SECS,
            pipeline_timeout_secs: DEFAULT_PIPELINE_TIMEOUT_SECS,
        }
    }
}

impl AgentConfig {
    /// Build a config from TRAVELVERSE_* environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get("TRAVELVERSE_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = get("TRAVELVERSE_BACKUP_DIR") {
            config.backup_dir = Some(PathBuf::from(dir));
        }
        config.api_key = get("TRAVELVERSE_API_KEY").or_else(|| get("OPENAI_API_KEY"));
        if let Some(url) = get("TRAVELVERSE_BASE_URL") {
            config.base_url = url;
        }
        if let Some(model) = get("TRAVELVERSE_MODEL") {
            config.model = model;
        }
        if let Some(secs) = get("TRAVELVERSE_CLASSIFY_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(v) => config.classify_timeout_secs = v,
                Err(_) => warn!("Ignoring invalid TRAVELVERSE_CLASSIFY_TIMEOUT_SECS: {}", secs),
            }
        }
        if let Some(secs) = get("TRAVELVERSE_PIPELINE_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(v) => config.pipeline_timeout_secs = v,
                Err(_) => warn!("Ignoring invalid TRAVELVERSE_PIPELINE_TIMEOUT_SECS: {}", secs),
            }
        }

        config
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    /// Backup directory, resolved against the database location
    pub fn resolve_backup_dir(&self, db_path: &std::path::Path) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => db_path
                .parent()
                .map(|p| p.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups")),
        }
    }
}
