//! The `doctor` subcommand: report drift between recorded state and the
//! filesystem.

use crate::libs::doctor::render_table;
use crate::libs::orchestrator::Orchestrator;
use crate::schemas::config::Config;
use crate::schemas::environment::Env;
use crate::log_error;
use std::path::PathBuf;

/// Prints the diagnostic report, as a table or as JSON.
pub fn run(config_path: Option<PathBuf>, json: bool) -> i32 {
    let Some(env) = Env::detect() else {
        log_error!("[Doctor] Unsupported platform");
        return 1;
    };
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log_error!("{}", e.render());
            return 1;
        }
    };

    let orchestrator = Orchestrator::new(config, env);
    match orchestrator.doctor() {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => {
                        log_error!("[Doctor] Cannot serialize report: {}", e);
                        return 1;
                    }
                }
            } else {
                print!("{}", render_table(&report));
            }
            if report.is_clean() { 0 } else { 1 }
        }
        Err(e) => {
            log_error!("{}", e.render());
            1
        }
    }
}
