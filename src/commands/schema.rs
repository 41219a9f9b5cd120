//! The `schema` subcommand: manage the user-side schema pin.

use crate::libs::module_overlay::embedded_schema;
use crate::schemas::config::Config;
use crate::{log_error, log_info};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

/// Rewrites the user-side schema pin (`schema.yaml`) with the apiVersion
/// this engine speaks. The target directory is, in order: the explicit
/// `--dir`, the configured `schemaDir`, the current directory.
pub fn update(config_path: Option<PathBuf>, dir: Option<PathBuf>) -> i32 {
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log_error!("{}", e.render());
            return 1;
        }
    };
    let target_dir = dir
        .or(config.schema_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    if let Err(e) = fs::create_dir_all(&target_dir) {
        log_error!("[Schema] Cannot create {}: {}", target_dir.display(), e);
        return 1;
    }
    let pin_path = target_dir.join("schema.yaml");
    if let Err(e) = fs::write(&pin_path, embedded_schema()) {
        log_error!("[Schema] Cannot write {}: {}", pin_path.display(), e);
        return 1;
    }
    log_info!(
        "[Schema] Wrote schema pin to {}",
        pin_path.display().to_string().green()
    );
    0
}
