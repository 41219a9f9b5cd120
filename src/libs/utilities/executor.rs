//! # Command Executor
//!
//! Runs the ordered shell steps of a command set. Each step is expanded
//! with a small template substitution (`{{Package}}`, `{{Version}}`,
//! `{{Name}}`, `{{BinPath}}`, `{{Args}}`) before being handed to `sh -c`,
//! with an optional environment overlay merged onto the process env.
//!
//! Two modes:
//! - streamed: stdout/stderr lines flow to the ambient output callback as
//!   they appear (the normal install path);
//! - captured: combined output is returned as a string (used by
//!   resolve-version commands).
//!
//! The first failing step aborts the sequence; its exit status is carried
//! in the error. Cancellation is polled between steps.

use crate::errors::{Error, InstallFault, Result};
use crate::libs::runctx::RunCtx;
use crate::{log_debug, log_info};
use colored::Colorize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

/// The variables a command-set step may reference.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub package: String,
    pub version: String,
    pub name: String,
    pub bin_path: String,
    pub args: Vec<String>,
}

impl TemplateVars {
    /// Expands every template token in one step. `{{Args}}` joins the args
    /// with single spaces.
    pub fn expand(&self, step: &str) -> String {
        step.replace("{{Package}}", &self.package)
            .replace("{{Version}}", &self.version)
            .replace("{{Name}}", &self.name)
            .replace("{{BinPath}}", &self.bin_path)
            .replace("{{Args}}", &self.args.join(" "))
    }
}

/// Runs a command sequence, streaming output lines to the context callback.
///
/// # Arguments
/// * `steps`: shell-ready step strings, run in order.
/// * `vars`: template substitution values.
/// * `env_overlay`: variables merged onto the inherited process env.
/// * `resource` / `action`: diagnostics for the error taxonomy.
pub fn run_steps(
    steps: &[String],
    vars: &TemplateVars,
    env_overlay: &HashMap<String, String>,
    ctx: &RunCtx,
    resource: &str,
    action: &str,
) -> Result<()> {
    for step in steps {
        ctx.check_cancelled(resource, action)?;
        let expanded = vars.expand(step);
        log_info!("[Exec] {} $ {}", resource.green(), expanded.cyan());
        run_streamed(&expanded, env_overlay, ctx, resource, action)?;
    }
    Ok(())
}

/// Runs a command sequence and returns its combined stdout+stderr. Used by
/// resolve-version commands whose output *is* the result.
pub fn run_steps_captured(
    steps: &[String],
    vars: &TemplateVars,
    env_overlay: &HashMap<String, String>,
    ctx: &RunCtx,
    resource: &str,
    action: &str,
) -> Result<String> {
    let mut combined = String::new();
    for step in steps {
        ctx.check_cancelled(resource, action)?;
        let expanded = vars.expand(step);
        log_debug!("[Exec] {} $ {} (captured)", resource, expanded);

        let output = Command::new("sh")
            .arg("-c")
            .arg(&expanded)
            .envs(env_overlay)
            .output()
            .map_err(|e| command_failed(resource, action, &expanded, None, &e.to_string()))?;

        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(command_failed(
                resource,
                action,
                &expanded,
                output.status.code(),
                combined.trim(),
            ));
        }
    }
    Ok(combined)
}

/// Runs one expanded step with line-streamed output. Stderr drains on its
/// own thread so neither pipe can stall the other.
fn run_streamed(
    expanded: &str,
    env_overlay: &HashMap<String, String>,
    ctx: &RunCtx,
    resource: &str,
    action: &str,
) -> Result<()> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(expanded)
        .envs(env_overlay)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| command_failed(resource, action, expanded, None, &e.to_string()))?;

    let stderr = child.stderr.take();
    let stderr_ctx = ctx.clone();
    let drain = std::thread::spawn(move || {
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                stderr_ctx.emit_line(&line);
            }
        }
    });

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
            ctx.emit_line(&line);
        }
    }
    let _ = drain.join();

    let status = child
        .wait()
        .map_err(|e| command_failed(resource, action, expanded, None, &e.to_string()))?;
    if !status.success() {
        return Err(command_failed(
            resource,
            action,
            expanded,
            status.code(),
            "step exited with failure",
        ));
    }
    Ok(())
}

fn command_failed(
    resource: &str,
    action: &str,
    step: &str,
    exit: Option<i32>,
    detail: &str,
) -> Error {
    let status = exit.map_or_else(|| "killed by signal".to_string(), |c| format!("exit status {c}"));
    Error::Install {
        fault: InstallFault::CommandFailed,
        resource: resource.to_string(),
        action: action.to_string(),
        version: None,
        url: None,
        message: format!("command step '{step}' failed ({status}): {detail}"),
    }
}
