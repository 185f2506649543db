//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration lives in a TOML file. Every field carries a built-in
//! default, so a missing file (or a partial one) still yields a usable
//! configuration. A file that exists but does not parse is a hard error.
//!
//! Config file priority:
//! 1. Command-line argument (highest priority)
//! 2. `BGREF_CONFIG` environment variable
//! 3. `~/.config/bgref/<module>.toml`
//! 4. Built-in defaults (fallback)
//!
//! Root folder priority:
//! 1. Command-line argument
//! 2. `BGREF_ROOT_FOLDER` environment variable
//! 3. `root_folder` from the TOML file
//! 4. OS-dependent data directory

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BGREF_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "BGREF_ROOT_FOLDER";

/// Database file created inside the root folder
pub const DATABASE_FILE_NAME: &str = "bgref.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database file, overrides `<root_folder>/bgref.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// External catalog connection
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Reconciliation heuristics
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            catalog: CatalogConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// External catalog API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog read API (required before any fetch)
    #[serde(default)]
    pub base_url: String,

    /// Optional bearer credential
    #[serde(default)]
    pub api_token: Option<String>,

    /// Minimum interval between physical requests
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Ids per batched request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Total request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: None,
            min_request_interval_ms: default_min_request_interval_ms(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Reconciliation heuristics
///
/// The engagement threshold and overlap ratio were tuned empirically; they are
/// only expected to filter obvious noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Expansions with fewer ratings than this are treated as fan content
    #[serde(default = "default_min_engagement")]
    pub min_engagement: u64,

    /// Containment matches need `min(len) / max(len)` above this ratio
    #[serde(default = "default_fuzzy_overlap_threshold")]
    pub fuzzy_overlap_threshold: f64,

    /// Link `fuzzy_contains` matches on import instead of creating a new entity
    #[serde(default)]
    pub link_fuzzy_matches: bool,

    /// Bounded progress channel size between orchestrator and transport
    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,

    #[serde(default)]
    pub noise: NoiseConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_engagement: default_min_engagement(),
            fuzzy_overlap_threshold: default_fuzzy_overlap_threshold(),
            link_fuzzy_matches: false,
            progress_channel_capacity: default_progress_channel_capacity(),
            noise: NoiseConfig::default(),
        }
    }
}

/// Noise classifier rule lists
///
/// Name patterns are regular expressions; family entries are plain
/// case-insensitive substrings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    #[serde(default = "default_promo_patterns")]
    pub promo_patterns: Vec<String>,

    #[serde(default = "default_accessory_patterns")]
    pub accessory_patterns: Vec<String>,

    #[serde(default = "default_promo_families")]
    pub promo_families: Vec<String>,

    #[serde(default = "default_accessory_families")]
    pub accessory_families: Vec<String>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            promo_patterns: default_promo_patterns(),
            accessory_patterns: default_accessory_patterns(),
            promo_families: default_promo_families(),
            accessory_families: default_accessory_families(),
        }
    }
}

fn default_port() -> u16 {
    5731
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_request_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    20
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_min_engagement() -> u64 {
    50
}

fn default_fuzzy_overlap_threshold() -> f64 {
    0.5
}

fn default_progress_channel_capacity() -> usize {
    64
}

fn default_promo_patterns() -> Vec<String> {
    [
        r"(?i)\bpromos?\b",
        r"(?i)\bpromotional\b",
        r"(?i)\bmini[\s-]?expansions?\b",
        r"(?i)\bbonus\s+cards?\b",
        r"(?i)\bpromo\s+(pack|card|tile)s?\b",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_accessory_patterns() -> Vec<String> {
    [
        r"(?i)\bstorage\b",
        r"(?i)\bsleeves?\b",
        r"(?i)\borgani[sz]ers?\b",
        r"(?i)\binserts?\b",
        r"(?i)\b(metal\s+)?(coin|token)s?\s+(set|pack)s?\b",
        r"(?i)\bplay\s?mats?\b",
        r"(?i)\b3d[\s-]?print(ed|able)?\b",
        r"(?i)\bcard\s+holders?\b",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_promo_families() -> Vec<String> {
    ["promotional", "promo cards", "convention exclusive"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_accessory_families() -> Vec<String> {
    ["components:", "accessories", "3d printing", "game storage"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Standard User-Agent for outbound HTTP requests
pub fn user_agent() -> String {
    format!("bgref/{} (catalog reconciler)", env!("CARGO_PKG_VERSION"))
}

/// Resolve which config file to read, if any
///
/// Returns `None` when no candidate exists; callers then use defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument (returned even if missing so the
    // caller reports it)
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    let user_config = dirs::config_dir()
        .map(|d| d.join("bgref").join(format!("{}.toml", module_name)))?;
    user_config.exists().then_some(user_config)
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load configuration with graceful degradation
///
/// A missing file logs a warning and falls back to defaults. A file that
/// exists but is malformed is an error.
pub fn load_config(cli_arg: Option<&Path>, module_name: &str) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg, module_name) {
        Some(path) if path.exists() => {
            let config = load_toml_config(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            info!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("bgref"))
        .unwrap_or_else(|| PathBuf::from("./bgref_data"))
}

/// Database file for a root folder, honoring an explicit `database_path`
pub fn database_path(config: &TomlConfig, root_folder: &Path) -> PathBuf {
    config
        .database_path
        .clone()
        .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME))
}

/// Create the root folder if missing
pub fn ensure_directory_exists(root_folder: &Path) -> Result<()> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        info!("Created root folder: {}", root_folder.display());
    }
    Ok(())
}
