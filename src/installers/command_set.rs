//! # Command-Set Pattern
//!
//! Realizes a tool whose spec carries its own command set, and hosts the
//! shared command-pattern runner the delegation patterns reuse:
//!
//! - `install` runs for a fresh install; `upgrade`/`reinstall` run the
//!   `update` steps, falling back to `install` when none exist;
//! - a `check` command, when present, must report success or the install
//!   fails with `install.check_failed`; an absent check means a clean
//!   command-step exit is success;
//! - a `resolveVersion` command, when present and the spec version is not
//!   exact, is run in capture mode to populate the concrete version.

use crate::errors::{Error, InstallFault, Result};
use crate::installers::{Action, ToolInstaller, effective_version, tool_state};
use crate::libs::runctx::RunCtx;
use crate::libs::utilities::executor::{TemplateVars, run_steps, run_steps_captured};
use crate::log_debug;
use crate::schemas::state_file::ToolState;
use crate::schemas::tools::{CommandSet, ToolSpec, VersionKind};
use std::collections::HashMap;

/// Runs one command set for `action` and returns the resolved concrete
/// version, when a `resolveVersion` command produced one.
pub fn run_command_pattern(
    name: &str,
    commands: &CommandSet,
    action: Action,
    vars: &TemplateVars,
    extra_env: &HashMap<String, String>,
    version_kind: VersionKind,
    ctx: &RunCtx,
) -> Result<Option<String>> {
    // The command set's own env is the base; the caller's overlay (PATH
    // prepends) wins on conflicts.
    let mut env = commands.env.clone();
    for (key, value) in extra_env {
        env.insert(key.clone(), value.clone());
    }

    let steps: &[String] = match action {
        Action::Install => &commands.install,
        Action::Upgrade | Action::Reinstall => {
            commands.update.as_deref().unwrap_or(&commands.install)
        }
    };
    run_steps(steps, vars, &env, ctx, name, action.name())?;

    if let Some(check) = &commands.check {
        run_steps(check, vars, &env, ctx, name, action.name()).map_err(|e| match e {
            Error::Install { resource, action, version, url, message, .. } => Error::Install {
                fault: InstallFault::CheckFailed,
                resource,
                action,
                version,
                url,
                message: format!("post-install check failed: {message}"),
            },
            other => other,
        })?;
    }

    if version_kind != VersionKind::Exact {
        if let Some(resolve) = &commands.resolve_version {
            let output = run_steps_captured(resolve, vars, &env, ctx, name, action.name())?;
            let resolved = output.lines().map(str::trim).find(|l| !l.is_empty());
            if let Some(resolved) = resolved {
                log_debug!("[Commands] '{}' resolved concrete version '{}'", name, resolved);
                return Ok(Some(resolved.to_string()));
            }
        }
    }
    Ok(None)
}

/// The in-spec command-set pattern.
pub fn install_via_commands(
    installer: &ToolInstaller<'_>,
    name: &str,
    spec: &ToolSpec,
    action: Action,
    ctx: &RunCtx,
) -> Result<ToolState> {
    let commands = spec
        .commands
        .as_ref()
        .ok_or_else(|| Error::install_failed(name, action.name(), "command set disappeared"))?;

    let bin_path = installer.placer.paths().link_path(spec.link_name(name));
    let vars = TemplateVars {
        package: spec.package.as_ref().and_then(|p| p.slug()).unwrap_or_else(|| name.to_string()),
        version: effective_version(&spec.version),
        name: name.to_string(),
        bin_path: bin_path.display().to_string(),
        args: spec.args.clone(),
    };

    let resolved =
        run_command_pattern(name, commands, action, &vars, &HashMap::new(), spec.version_kind(), ctx)?;
    let version = resolved.unwrap_or_else(|| effective_version(&spec.version));

    // The commands put the binary wherever {{BinPath}} told them to; the
    // recorded paths both point there.
    Ok(tool_state(spec, &version, &bin_path, &bin_path, None, None, Some(commands.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        TemplateVars {
            package: "pkg".into(),
            version: "latest".into(),
            name: "demo".into(),
            bin_path: "/tmp/bin".into(),
            args: Vec::new(),
        }
    }

    #[test]
    fn upgrade_falls_back_to_install_when_no_update() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let commands = CommandSet {
            install: vec![format!("echo install >> {}", marker.display())],
            check: Some(vec!["true".to_string()]),
            ..Default::default()
        };
        run_command_pattern(
            "demo",
            &commands,
            Action::Upgrade,
            &vars(),
            &HashMap::new(),
            VersionKind::Exact,
            &RunCtx::new(),
        )
        .unwrap();
        // Only the install step ran, exactly once.
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "install\n");
    }

    #[test]
    fn update_steps_win_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let commands = CommandSet {
            install: vec![format!("echo install >> {}", marker.display())],
            update: Some(vec![format!("echo update >> {}", marker.display())]),
            ..Default::default()
        };
        run_command_pattern(
            "demo",
            &commands,
            Action::Reinstall,
            &vars(),
            &HashMap::new(),
            VersionKind::Exact,
            &RunCtx::new(),
        )
        .unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "update\n");
    }

    #[test]
    fn failing_check_surfaces_check_failed() {
        let commands = CommandSet {
            install: vec!["true".to_string()],
            check: Some(vec!["exit 1".to_string()]),
            ..Default::default()
        };
        let err = run_command_pattern(
            "demo",
            &commands,
            Action::Upgrade,
            &vars(),
            &HashMap::new(),
            VersionKind::Exact,
            &RunCtx::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "install.check_failed");
    }

    #[test]
    fn resolve_version_populates_concrete_version() {
        let commands = CommandSet {
            install: vec!["true".to_string()],
            resolve_version: Some(vec!["echo 14.0.0".to_string()]),
            ..Default::default()
        };
        let resolved = run_command_pattern(
            "demo",
            &commands,
            Action::Install,
            &vars(),
            &HashMap::new(),
            VersionKind::Latest,
            &RunCtx::new(),
        )
        .unwrap();
        assert_eq!(resolved.as_deref(), Some("14.0.0"));

        // Exact spec versions never run the resolver.
        let resolved = run_command_pattern(
            "demo",
            &commands,
            Action::Install,
            &vars(),
            &HashMap::new(),
            VersionKind::Exact,
            &RunCtx::new(),
        )
        .unwrap();
        assert_eq!(resolved, None);
    }
}
