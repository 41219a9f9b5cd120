//! The `apply` subcommand: realize every resource the manifests describe.

use crate::errors::Error;
use crate::libs::orchestrator::Orchestrator;
use crate::libs::runctx::RunCtx;
use crate::schemas::config::Config;
use crate::schemas::environment::Env;
use crate::{log_error, log_info};
use colored::Colorize;
use std::path::PathBuf;

/// Runs an apply over the given manifest paths.
///
/// # Arguments
/// * `config_path`: explicit engine config file, overriding discovery.
/// * `manifest_paths`: ordered file-or-directory manifest paths.
/// * `force`: permit replacing binaries that differ from their pinned
///   digest, and reinstalling recorded resources.
/// * `json_errors`: emit failures as JSON objects instead of tables.
///
/// # Returns
/// The process exit code.
pub fn run(
    config_path: Option<PathBuf>,
    manifest_paths: Vec<PathBuf>,
    force: bool,
    json_errors: bool,
) -> i32 {
    let Some(env) = Env::detect() else {
        log_error!("[Apply] Unsupported platform: toolsmith manages linux/darwin on amd64/arm64");
        return 1;
    };
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => return fail(&e, json_errors),
    };
    if manifest_paths.is_empty() {
        log_error!("[Apply] No manifest paths given");
        return 2;
    }

    let orchestrator = Orchestrator::new(config, env);
    let ctx = RunCtx::new();
    match orchestrator.apply(&manifest_paths, force, &ctx) {
        Ok(summary) => {
            log_info!(
                "[Apply] {} resource(s) realized, {} failure(s)",
                summary.applied.to_string().green(),
                summary.failures.len().to_string().yellow()
            );
            if summary.failures.is_empty() {
                0
            } else {
                for (name, error) in &summary.failures {
                    if json_errors {
                        println!("{}", error.to_json());
                    } else {
                        log_error!("{} failed: {}", name.red(), error.code());
                    }
                }
                1
            }
        }
        Err(e) => fail(&e, json_errors),
    }
}

fn fail(error: &Error, json_errors: bool) -> i32 {
    if json_errors {
        println!("{}", error.to_json());
    } else {
        log_error!("{}", error.render());
    }
    1
}
