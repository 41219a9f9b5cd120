//! The `remove` subcommand: uninstall recorded tools and runtimes,
//! replaying their stored removal commands.

use crate::libs::orchestrator::Orchestrator;
use crate::libs::runctx::RunCtx;
use crate::schemas::config::Config;
use crate::schemas::environment::Env;
use crate::{log_error, log_info};
use colored::Colorize;
use std::path::PathBuf;

/// Removes the named resources from disk and from state.
pub fn run(config_path: Option<PathBuf>, names: Vec<String>) -> i32 {
    let Some(env) = Env::detect() else {
        log_error!("[Remove] Unsupported platform");
        return 1;
    };
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log_error!("{}", e.render());
            return 1;
        }
    };
    if names.is_empty() {
        log_error!("[Remove] No resource names given");
        return 2;
    }

    let orchestrator = Orchestrator::new(config, env);
    match orchestrator.remove(&names, &RunCtx::new()) {
        Ok(summary) => {
            log_info!("[Remove] {} resource(s) removed", summary.applied.to_string().green());
            if summary.failures.is_empty() { 0 } else { 1 }
        }
        Err(e) => {
            log_error!("{}", e.render());
            1
        }
    }
}
