//! Configuration for termview.
//!
//! Settings are read from `~/.termview/config.toml`. Every key is optional;
//! missing keys take the defaults shown below.
//!
//! ```toml
//! # LF also returns the carriage (matches remote shell output)
//! convert_eol = true
//!
//! # Lines of history kept above the screen
//! scrollback = 1000
//!
//! # Output bytes processed per turn before yielding back to the caller
//! write_batch_bytes = 131072
//!
//! # Largest screen buffer, in cells, a fit may allocate
//! max_cells = 1000000
//!
//! [fit]
//! cell_width = 9.0
//! cell_height = 17.0
//! padding_x = 0.0
//! padding_y = 0.0
//! scrollbar_width = 0.0
//! min_cols = 2
//! min_rows = 1
//!
//! [links]
//! # "log" or "clipboard"
//! handler = "log"
//! # pattern = "https?://\\S+"
//!
//! [logging]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid link pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Link pattern {0:?} matches empty text")]
    EmptyPattern(String),

    #[error("Invalid fit.{key}: {reason}")]
    Fit {
        key: &'static str,
        reason: &'static str,
    },
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub convert_eol: bool,
    pub scrollback: usize,
    pub write_batch_bytes: usize,
    pub max_cells: usize,
    pub fit: FitConfig,
    pub links: LinksConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            convert_eol: true,
            scrollback: 1000,
            write_batch_bytes: 128 * 1024,
            max_cells: 1_000_000,
            fit: FitConfig::default(),
            links: LinksConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Auto-fit settings, in pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Cell metrics used when the mount node does not report its own
    pub cell_width: f32,
    pub cell_height: f32,
    pub padding_x: f32,
    pub padding_y: f32,
    pub scrollbar_width: f32,
    pub min_cols: u16,
    pub min_rows: u16,
}

impl FitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let cells = [
            ("cell_width", self.cell_width),
            ("cell_height", self.cell_height),
        ];
        for (key, value) in cells {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Fit {
                    key,
                    reason: "must be a positive number",
                });
            }
        }
        let spacing = [
            ("padding_x", self.padding_x),
            ("padding_y", self.padding_y),
            ("scrollbar_width", self.scrollbar_width),
        ];
        for (key, value) in spacing {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Fit {
                    key,
                    reason: "must not be negative",
                });
            }
        }
        if self.min_cols == 0 {
            return Err(ConfigError::Fit {
                key: "min_cols",
                reason: "must be at least 1",
            });
        }
        if self.min_rows == 0 {
            return Err(ConfigError::Fit {
                key: "min_rows",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            cell_width: 9.0,
            cell_height: 17.0,
            padding_x: 0.0,
            padding_y: 0.0,
            scrollbar_width: 0.0,
            min_cols: 2,
            min_rows: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkHandlerKind {
    #[default]
    Log,
    Clipboard,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub handler: LinkHandlerKind,
    /// Replaces the built-in URL pattern
    pub pattern: Option<String>,
}

impl LinksConfig {
    /// The custom pattern, compiled; `None` selects the built-in one
    pub fn compiled_pattern(&self) -> Result<Option<Regex>, ConfigError> {
        let Some(pattern) = &self.pattern else {
            return Ok(None);
        };
        let regex = Regex::new(pattern)?;
        if regex.is_match("") {
            return Err(ConfigError::EmptyPattern(pattern.clone()));
        }
        Ok(Some(regex))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load `~/.termview/config.toml`, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|error| {
            warn!("{error}; using default configuration");
            Self::default()
        })
    }

    /// Load a specific file, reporting every problem
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.links.compiled_pattern()?;
        self.fit.validate()
    }

    /// Directory holding the configuration and the log file
    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".termview"))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }
}
