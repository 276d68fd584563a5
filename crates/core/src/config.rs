//! Configuration for the manila metadata core.
//!
//! Config priority: MANILA_CONFIG env path > user (~/.config/manila/config.toml) > defaults

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Cache Configuration
// ============================================================================

/// Directory cache and attribute pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Files delivered per files-added emission while listing (default: 100)
  pub list_batch_size: usize,

  /// Upper bound on files kept in a directory before listing is truncated
  /// with a load error (default: 100_000)
  pub max_files_per_directory: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      list_batch_size: 100,
      max_files_per_directory: 100_000,
    }
  }
}

// ============================================================================
// Search Configuration
// ============================================================================

/// Search pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  /// Hits delivered per hits-added batch from the simple engine (default: 64)
  pub batch_size: usize,

  /// Maximum directory depth the simple engine recurses into (default: 10)
  pub max_depth: usize,

  /// Whether hidden files match by default; monitors can widen this (default: false)
  pub show_hidden: bool,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      batch_size: 64,
      max_depth: 10,
      show_hidden: false,
    }
  }
}

// ============================================================================
// Recent Configuration
// ============================================================================

/// Recent-directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentConfig {
  /// Synthetic recently-used-window entries shown alongside recent files (default: 5)
  pub max_windows: usize,
}

impl Default for RecentConfig {
  fn default() -> Self {
    Self { max_windows: 5 }
  }
}

// ============================================================================
// Log Configuration
// ============================================================================

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: off, error, warn, info, debug, trace (default: info)
  pub level: String,

  /// File rotation when logging to a file: daily, hourly, never (default: daily)
  pub rotation: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// manila configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Directory cache settings
  pub cache: CacheConfig,

  /// Search pipeline settings
  pub search: SearchConfig,

  /// Recent-directory settings
  pub recent: RecentConfig,

  /// Logging settings
  pub log: LogConfig,
}

impl Config {
  /// Load config from the usual places, falling back to defaults.
  pub fn load() -> Self {
    if let Ok(path) = std::env::var("MANILA_CONFIG")
      && let Ok(content) = std::fs::read_to_string(&path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("manila").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("manila").join("config.toml"))
  }
}
