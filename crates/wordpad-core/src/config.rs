use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_AUTOSAVE_KEY: &str = "wp_ce_draft_v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for one editor session. Every field has a default, so a partial TOML table is
/// a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Key of the draft record in the key-value store.
    pub autosave_key: String,
    /// Quiet period after the last mutation before the draft is written.
    pub autosave_delay_ms: u64,
    pub max_undo: usize,
    pub max_normalize_iterations: usize,
    /// `chrono` format string for the "last saved" indicator.
    pub indicator_format: String,
    pub indicator_utc_offset_minutes: i32,
    pub never_saved_label: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            autosave_key: DEFAULT_AUTOSAVE_KEY.to_string(),
            autosave_delay_ms: 1000,
            max_undo: 200,
            max_normalize_iterations: 100,
            indicator_format: "Saved at %H:%M:%S".to_string(),
            indicator_utc_offset_minutes: 0,
            never_saved_label: "Not saved yet".to_string(),
        }
    }
}

impl EditorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config.with_defaults())
    }

    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_path = config_path.as_ref();
        let content =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                config_path: config_path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content)
    }

    /// Replaces zero limits and blank keys with the defaults.
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.autosave_key.trim().is_empty() {
            self.autosave_key = defaults.autosave_key;
        }
        if self.max_undo == 0 {
            self.max_undo = defaults.max_undo;
        }
        if self.max_normalize_iterations == 0 {
            self.max_normalize_iterations = defaults.max_normalize_iterations;
        }
        self
    }

    pub fn autosave_delay(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.autosave_delay_ms).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config =
            EditorConfig::from_toml_str("autosave_delay_ms = 250\nmax_undo = 0\n").unwrap();
        assert_eq!(config.autosave_delay_ms, 250);
        assert_eq!(config.max_undo, 200);
        assert_eq!(config.autosave_key, DEFAULT_AUTOSAVE_KEY);
        assert_eq!(config.autosave_delay(), TimeDelta::milliseconds(250));
    }

    #[test]
    fn invalid_toml_is_reported() {
        let err = EditorConfig::from_toml_str("autosave_delay_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_missing_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EditorConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.toml");
        std::fs::write(&path, "autosave_key = \"doc_b\"\n").unwrap();
        let config = EditorConfig::load_from_path(&path).unwrap();
        assert_eq!(config.autosave_key, "doc_b");
    }
}
