use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "natours.toml";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";

/// Runtime environment; decides how much error detail callers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Settings read from TOML files and `NATOURS_*` variables. Every field is optional so layers
/// can be merged; the accessors supply defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_retention: Option<u32>,
    pub environment: Option<Environment>,
    pub base_url: Option<String>,
}

impl AppConfig {
    /// Fills every unset field from `other`.
    pub fn merge_missing(&mut self, other: Self) {
        if self.data_dir.is_none() {
            self.data_dir = other.data_dir;
        }
        if self.log_dir.is_none() {
            self.log_dir = other.log_dir;
        }
        if self.log_level.is_none() {
            self.log_level = other.log_level;
        }
        if self.log_retention.is_none() {
            self.log_retention = other.log_retention;
        }
        if self.environment.is_none() {
            self.environment = other.environment;
        }
        if self.base_url.is_none() {
            self.base_url = other.base_url;
        }
    }

    /// Values from `NATOURS_*` environment variables, read through `var`.
    pub fn from_env_with(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            data_dir: var("NATOURS_DATA_DIR").map(PathBuf::from),
            log_dir: var("NATOURS_LOG_DIR").map(PathBuf::from),
            log_level: var("NATOURS_LOG_LEVEL"),
            log_retention: var("NATOURS_LOG_RETENTION").and_then(|s| s.parse().ok()),
            environment: var("NATOURS_ENV").and_then(|s| s.parse().ok()),
            base_url: var("NATOURS_BASE_URL"),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Reads one TOML file. A file that cannot be read or parsed is skipped with a warning.
    #[must_use]
    pub fn from_file(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match toml::from_str::<Self>(&text) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                log::warn!("ignoring config {}: {e}", path.display());
                None
            }
        }
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment.unwrap_or_default()
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Where the store keeps its log; `./data` unless configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs"))
    }
}

/// Config files in precedence order: explicit path, `$NATOURS_CONFIG`, the user config
/// directory, then the working directory.
#[must_use]
pub fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = explicit {
        paths.push(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("NATOURS_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Some(dir) = dirs_next::config_dir() {
        paths.push(dir.join(CONFIG_FILE));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join(CONFIG_FILE));
    }
    paths
}

/// Resolves the effective configuration: `overrides` (CLI flags) win over the environment,
/// which wins over config files, which win over defaults.
#[must_use]
pub fn load_config(explicit: Option<&Path>, overrides: AppConfig) -> AppConfig {
    let mut cfg = overrides;
    cfg.merge_missing(AppConfig::from_env());
    for path in config_paths(explicit) {
        if let Some(file_cfg) = AppConfig::from_file(&path) {
            log::debug!("loaded config {}", path.display());
            cfg.merge_missing(file_cfg);
        }
    }
    cfg
}
