// Optional TOML config file
// Loaded from ~/.config/leadsync/config.toml unless LEADSYNC_CONFIG points elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub knowlarity: KnowlarityFile,
    pub meta: MetaFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KnowlarityFile {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub channel: Option<String>,
    pub lookback_minutes: Option<i64>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetaFile {
    pub graph_version: Option<String>,
    pub api_base: Option<String>,
    pub page_id: Option<String>,
    pub access_token: Option<String>,
    pub form_ids: Vec<String>,
    pub min_created_at: Option<String>,
}

impl FileConfig {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("leadsync")
            .join("config.toml")
    }

    /// Read `path`. A missing file is an empty config, not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
