//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration is read once at startup from a TOML file. Every
//! field has a built-in default, so a missing or partial file never prevents
//! startup.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`WAYFARER_ROOT_FOLDER`, `WAYFARER_CONTENT_API_KEY`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "WAYFARER_ROOT_FOLDER";

/// Environment variable carrying the content source API key
pub const CONTENT_API_KEY_ENV: &str = "WAYFARER_CONTENT_API_KEY";

/// Database file name used when `database_path` is not configured
pub const DEFAULT_DATABASE_FILE: &str = "wayfarer.db";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Path to SQLite database file (defaults to `<root_folder>/wayfarer.db`)
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    pub port: u16,

    /// Root folder for service data
    pub root_folder: Option<PathBuf>,

    pub logging: LoggingConfig,

    pub enrichment: EnrichmentConfig,

    pub maintenance: MaintenanceConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: 5780,
            root_folder: None,
            logging: LoggingConfig::default(),
            enrichment: EnrichmentConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// External content source settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Base URL that city page names are appended to
    pub source_base_url: String,

    /// Hard timeout for one fetch, in seconds
    pub fetch_timeout_secs: u64,

    /// User-Agent header sent to the content source
    pub user_agent: String,

    /// Optional bearer token for content proxies
    pub api_key: Option<String>,

    /// Maximum characters kept per normalized section
    pub max_section_chars: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            source_base_url: "https://en.wikipedia.org/wiki".to_string(),
            fetch_timeout_secs: 30,
            user_agent: format!("Wayfarer/{} (city enrichment)", env!("CARGO_PKG_VERSION")),
            api_key: None,
            max_section_chars: 4000,
        }
    }
}

impl EnrichmentConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Apply `WAYFARER_CONTENT_API_KEY` over the TOML value
    ///
    /// Blank values are ignored so an empty variable cannot erase a configured key.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(CONTENT_API_KEY_ENV) {
            if !key.trim().is_empty() {
                if self.api_key.is_some() {
                    warn!("Content API key found in both environment and TOML; using environment");
                }
                self.api_key = Some(key);
            }
        }
    }
}

/// Periodic maintenance job settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often the stale-lock sweep runs
    pub sweep_interval_secs: u64,

    /// Locks held longer than this are force-released by the sweep.
    /// Must comfortably exceed `fetch_timeout_secs`.
    pub stale_lock_max_age_secs: u64,

    /// How often enriched content is checked for staleness
    pub refresh_interval_secs: u64,

    /// Enriched content older than this is refreshed
    pub refresh_max_age_days: u64,

    /// Maximum cities refreshed per pass
    pub refresh_batch_size: u32,

    /// How often per-city visitor counts are recomputed
    pub visitor_recount_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            stale_lock_max_age_secs: 600,
            refresh_interval_secs: 86_400,
            refresh_max_age_days: 90,
            refresh_batch_size: 25,
            visitor_recount_interval_secs: 86_400,
        }
    }
}

impl MaintenanceConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_lock_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_lock_max_age_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_max_age(&self) -> Duration {
        Duration::from_secs(self.refresh_max_age_days.saturating_mul(86_400))
    }

    pub fn visitor_recount_interval(&self) -> Duration {
        Duration::from_secs(self.visitor_recount_interval_secs)
    }
}

impl TomlConfig {
    /// Parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML configuration text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing
    ///
    /// An explicit path that fails to parse is an error; a missing file only warns.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    warn!("Could not determine config directory, using built-in defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            warn!("Config file {} not found, using built-in defaults", path.display());
            return Ok(Self::default());
        }

        let config = Self::load(&path)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject settings that would break lock recovery or scheduling
    pub fn validate(&self) -> Result<()> {
        if self.enrichment.fetch_timeout_secs == 0 {
            return Err(Error::Config("enrichment.fetch_timeout_secs must be > 0".to_string()));
        }
        if self.maintenance.stale_lock_max_age_secs <= self.enrichment.fetch_timeout_secs {
            return Err(Error::Config(format!(
                "maintenance.stale_lock_max_age_secs ({}) must exceed enrichment.fetch_timeout_secs ({})",
                self.maintenance.stale_lock_max_age_secs, self.enrichment.fetch_timeout_secs
            )));
        }
        let intervals = [
            ("sweep_interval_secs", self.maintenance.sweep_interval_secs),
            ("refresh_interval_secs", self.maintenance.refresh_interval_secs),
            ("visitor_recount_interval_secs", self.maintenance.visitor_recount_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::Config(format!("maintenance.{} must be > 0", name)));
            }
        }
        Ok(())
    }

    /// Resolve the database file, relative to `root_folder` when not configured
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root_folder.join(path),
            None => root_folder.join(DEFAULT_DATABASE_FILE),
        }
    }
}

/// Root folder resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Default configuration file path (`<config dir>/wayfarer/wayfarer.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wayfarer").join("wayfarer.toml"))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("wayfarer"))
        .unwrap_or_else(|| PathBuf::from("./wayfarer_data"))
}
