//! Configuration loading and root folder resolution
//!
//! Settings are layered: command-line argument, then environment variable,
//! then the TOML config file, then compiled defaults. A missing or unreadable
//! TOML file never stops a run; it is logged and defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "LEDGER_ROOT_FOLDER";

/// Environment variable pointing at an explicit config file
pub const CONFIG_FILE_ENV: &str = "LEDGER_CONFIG";

/// Directory name used under the platform config/data directories
const APP_DIR_NAME: &str = "ledger-ingest";

/// Database file name inside the root folder
const DEFAULT_DATABASE_FILE: &str = "ledger.db";

/// Default number of rows committed per insert transaction
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default acceptance score (0-100) for the approximate-match tier
pub const DEFAULT_FUZZY_CUTOFF: f64 = 90.0;

/// Top-level TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and resource files
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path (defaults to `<root_folder>/ledger.db`)
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default)]
    pub resources: ResourcePaths,

    #[serde(default)]
    pub ingest: IngestSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Locations of the auxiliary matching resources
///
/// Relative paths are resolved against the root folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePaths {
    #[serde(default = "default_vocabulary_path")]
    pub vocabulary: PathBuf,
    #[serde(default = "default_special_cases_path")]
    pub special_cases: PathBuf,
    #[serde(default = "default_forced_overrides_path")]
    pub forced_overrides: PathBuf,
}

fn default_vocabulary_path() -> PathBuf {
    PathBuf::from("resources/planning_keys.json")
}

fn default_special_cases_path() -> PathBuf {
    PathBuf::from("resources/special_cases.json")
}

fn default_forced_overrides_path() -> PathBuf {
    PathBuf::from("resources/forced_overrides.json")
}

impl Default for ResourcePaths {
    fn default() -> Self {
        Self {
            vocabulary: default_vocabulary_path(),
            special_cases: default_special_cases_path(),
            forced_overrides: default_forced_overrides_path(),
        }
    }
}

impl ResourcePaths {
    /// Resolve every relative path against `root`
    pub fn resolved_against(&self, root: &Path) -> Self {
        let resolve = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        };
        Self {
            vocabulary: resolve(&self.vocabulary),
            special_cases: resolve(&self.special_cases),
            forced_overrides: resolve(&self.forced_overrides),
        }
    }
}

/// Ingest tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub fuzzy_enabled: bool,
    #[serde(default = "default_fuzzy_cutoff")]
    pub fuzzy_cutoff: f64,
    #[serde(default = "default_fast_insert")]
    pub fast_insert: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_fuzzy_cutoff() -> f64 {
    DEFAULT_FUZZY_CUTOFF
}

fn default_fast_insert() -> bool {
    true
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fuzzy_enabled: false,
            fuzzy_cutoff: DEFAULT_FUZZY_CUTOFF,
            fast_insert: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load the config file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration with graceful degradation
    ///
    /// Uses `explicit` when given, then `LEDGER_CONFIG`, then the platform
    /// config locations. Any failure falls back to defaults with a warning.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from))
            .or_else(|| locate_config_file().ok());

        match candidate {
            Some(path) => match Self::load(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("{}; using defaults", e);
                    Self::default()
                }
            },
            None => {
                warn!("No config file found; using defaults");
                Self::default()
            }
        }
    }

    /// Database path, relative to `root` unless configured absolute
    pub fn database_path(&self, root: &Path) -> PathBuf {
        match &self.database {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => root.join(DEFAULT_DATABASE_FILE),
        }
    }
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable (`LEDGER_ROOT_FOLDER`)
/// 3. TOML config `root_folder`
/// 4. OS-dependent compiled default
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

/// Get default configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./ledger_data"))
}
