//! User configuration for the fleet dashboard.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR_NAME: &str = "fleet";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no config directory could be determined for this platform")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Directory scanned for repositories; defaults to the working directory.
    pub scan_root: Option<PathBuf>,
    pub scan: ScanConfig,
    pub git: GitConfig,
    pub review: ReviewConfig,
    pub concurrency: ConcurrencyConfig,
    pub feature: FeatureConfig,
    pub logging: LoggingConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            scan_root: None,
            scan: ScanConfig::default(),
            git: GitConfig::default(),
            review: ReviewConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            feature: FeatureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_depth: usize,
    /// Directory names never descended into.
    pub ignore: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            ignore: vec![
                "node_modules".to_string(),
                "target".to_string(),
                ".venv".to_string(),
                "vendor".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub binary: PathBuf,
    pub timeout_secs: u64,
    pub default_remote: String,
    pub protected_branches: Vec<String>,
    /// Repository-name substring to main branch, e.g. `monorepo = "dev"`.
    pub main_branch_overrides: BTreeMap<String, String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
            timeout_secs: 30,
            default_remote: "origin".to_string(),
            protected_branches: vec!["main".to_string(), "master".to_string(), "dev".to_string()],
            main_branch_overrides: BTreeMap::new(),
        }
    }
}

impl GitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn main_branch_override(&self, repo_name: &str) -> Option<&str> {
        self.main_branch_overrides
            .iter()
            .find(|(pattern, _)| repo_name.contains(pattern.as_str()))
            .map(|(_, branch)| branch.as_str())
    }

    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|name| name == branch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub binary: PathBuf,
    pub timeout_secs: u64,
    pub search_limit: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gh"),
            timeout_secs: 30,
            search_limit: 100,
        }
    }
}

impl ReviewConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub classify: usize,
    pub bulk: usize,
    pub remote_lookups: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            classify: 16,
            bulk: 8,
            remote_lookups: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub number_width: usize,
    pub extra_stop_words: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            number_width: 3,
            extra_stop_words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

pub fn parse_config(contents: &str) -> Result<FleetConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<FleetConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<FleetConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(FleetConfig::default());
    }
    load_config(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &FleetConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent_dir) = path_ref.parent().map(Path::to_path_buf) {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}
