//! # Engine Configuration
//!
//! The `Config` record `{dataDir, binDir, envDir, schemaDir?}` tells the
//! engine where managed state lives. Every field has a default; tilde
//! prefixes expand to the user's home. The engine config file itself
//! (`config.yaml` in the data dir, or `$TOOLSMITH_CONFIG`) is excluded
//! from manifest collection.

use crate::errors::{Error, Result};
use crate::log_debug;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the engine's own configuration file inside a manifest directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Environment variable overriding the engine config file location.
pub const CONFIG_ENV: &str = "TOOLSMITH_CONFIG";

/// Where the engine keeps installed artifacts and its state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Config {
    /// Root of managed data: state, tools, runtimes, registry cache.
    pub data_dir: PathBuf,
    /// Directory receiving the stable symlinks that go on PATH.
    pub bin_dir: PathBuf,
    /// Directory of env-export files owned by callers; opaque to the core.
    pub env_dir: PathBuf,
    /// Optional directory holding a user-managed schema pin. Unset by
    /// default; an empty string is never persisted as meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("~/.toolsmith"),
            bin_dir: PathBuf::from("~/.local/bin"),
            env_dir: PathBuf::from("~/.toolsmith/env"),
            schema_dir: None,
        }
    }
}

impl Config {
    /// Loads the engine configuration.
    ///
    /// Resolution order for the file: explicit argument, then
    /// `$TOOLSMITH_CONFIG`, then `~/.toolsmith/config.yaml`. A missing file
    /// yields the defaults. Tilde expansion applies to every path field.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".toolsmith")
                    .join(CONFIG_FILE_NAME)
            });

        let mut config = if candidate.exists() {
            log_debug!(
                "[Config] Loading engine config from {}",
                candidate.display().to_string().cyan()
            );
            let raw = fs::read_to_string(&candidate)
                .map_err(|e| Error::config_parse(candidate.display().to_string(), e.to_string()))?;
            serde_yaml::from_str::<Config>(&raw)
                .map_err(|e| Error::config_parse(candidate.display().to_string(), e.to_string()))?
        } else {
            log_debug!("[Config] No engine config at {:?}; using defaults", candidate);
            Config::default()
        };

        config.data_dir = expand_tilde(&config.data_dir);
        config.bin_dir = expand_tilde(&config.bin_dir);
        config.env_dir = expand_tilde(&config.env_dir);
        config.schema_dir = config
            .schema_dir
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| expand_tilde(&p));
        Ok(config)
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_field() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("~/.toolsmith"));
        assert_eq!(config.bin_dir, PathBuf::from("~/.local/bin"));
        assert_eq!(config.env_dir, PathBuf::from("~/.toolsmith/env"));
        assert_eq!(config.schema_dir, None);
    }

    #[test]
    fn loads_partial_config_with_tilde_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&file, "dataDir: ~/custom-data\nbinDir: /opt/bin\n").unwrap();

        let config = Config::load(Some(&file)).unwrap();
        assert!(!config.data_dir.to_string_lossy().contains('~'));
        assert!(config.data_dir.ends_with("custom-data"));
        assert_eq!(config.bin_dir, PathBuf::from("/opt/bin"));
        // Unset fields keep their defaults, expanded.
        assert!(config.env_dir.ends_with(".toolsmith/env"));
    }

    #[test]
    fn empty_schema_dir_collapses_to_unset() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&file, "schemaDir: \"\"\n").unwrap();
        let config = Config::load(Some(&file)).unwrap();
        assert_eq!(config.schema_dir, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&file, "dataDirectory: /x\n").unwrap();
        let err = Config::load(Some(&file)).unwrap_err();
        assert_eq!(err.code(), "config.parse");
    }
}
