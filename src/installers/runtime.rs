//! # Runtime Installation and Runtime Delegation
//!
//! Two responsibilities:
//!
//! - realizing a `Runtime` resource itself (download variant: archive into
//!   the versioned runtimes tree plus symlinks for its listed binaries;
//!   delegation variant: run its command set);
//! - realizing a `Tool` that delegates to a runtime: the tool's commands
//!   run with the runtime's bin dir prepended to PATH, and the produced
//!   binary is expected under the runtime's `toolBinPath`.

use crate::errors::{Error, Result};
use crate::installers::{
    Action, RuntimeInfo, ToolInstaller, effective_version, tool_state,
};
use crate::installers::command_set::run_command_pattern;
use crate::libs::runctx::RunCtx;
use crate::libs::utilities::archive::{ArchiveKind, extract_archive};
use crate::libs::utilities::download::{download, verify};
use crate::libs::utilities::executor::TemplateVars;
use crate::libs::utilities::placer::Placer;
use crate::schemas::runtimes::{RuntimeSpec, RuntimeType};
use crate::schemas::state_file::{RuntimeState, ToolState};
use crate::schemas::tools::ToolSpec;
use crate::{log_debug, log_info};
use colored::Colorize;
use std::collections::HashMap;

/// Realizes a `Runtime` resource and returns its state record.
pub fn install_runtime(
    placer: &Placer,
    name: &str,
    spec: &RuntimeSpec,
    action: Action,
    ctx: &RunCtx,
) -> Result<RuntimeState> {
    ctx.check_cancelled(name, action.name())?;
    match spec.runtime_type {
        RuntimeType::Download => install_download_runtime(placer, name, spec, action, ctx),
        RuntimeType::Delegation => install_delegation_runtime(placer, name, spec, action, ctx),
    }
}

fn install_download_runtime(
    placer: &Placer,
    name: &str,
    spec: &RuntimeSpec,
    action: Action,
    ctx: &RunCtx,
) -> Result<RuntimeState> {
    let source = spec
        .source
        .as_ref()
        .ok_or_else(|| Error::install_failed(name, action.name(), "download runtime without source"))?;
    let version = effective_version(&spec.version);
    let paths = placer.paths();
    let install_root = paths.runtime_install_dir(name, &version);

    let mut digest = None;
    if install_root.is_dir() && action != Action::Reinstall {
        log_info!(
            "[Runtime] {} {} already installed; re-pointing symlinks",
            name.green(),
            version.dimmed()
        );
    } else {
        let filename = source.url.rsplit('/').next().unwrap_or(&source.url);
        let kind = ArchiveKind::resolve(source.archive_type.as_deref(), filename, name)?;

        let scratch = tempfile::tempdir().map_err(|e| {
            Error::install_failed(name, action.name(), format!("cannot create temp dir: {e}"))
        })?;
        let archive_path = scratch.path().join(filename);
        log_info!(
            "[Runtime] Fetching {} {} from {}",
            name.green(),
            version.dimmed(),
            source.url.blue()
        );
        download(&source.url, &archive_path, ctx)?;
        digest = verify(&archive_path, source.checksum.as_ref(), name)?;

        if action == Action::Reinstall {
            placer.cleanup(&install_root)?;
        }
        extract_archive(&archive_path, &install_root, kind, name, ctx)?;
        placer.cleanup(scratch.path())?;
    }

    // The runtime's listed binaries get stable symlinks like any tool.
    for binary in &spec.binaries {
        let target = install_root.join(binary);
        let link_name = binary.rsplit('/').next().unwrap_or(binary);
        placer.symlink(&target, link_name)?;
    }

    log_info!("[Runtime] {} {} ready", name.green(), version.dimmed());
    Ok(RuntimeState {
        version: version.clone(),
        spec_version: spec.version.clone(),
        version_kind: spec.version_kind(),
        install_path: install_root.display().to_string(),
        binaries: spec.binaries.clone(),
        bin_dir: None,
        tool_bin_path: spec.tool_bin_path.as_ref().map(|p| p.display().to_string()),
        digest,
        source: Some(source.clone()),
        commands: None,
        updated_at: chrono::Utc::now(),
    })
}

fn install_delegation_runtime(
    placer: &Placer,
    name: &str,
    spec: &RuntimeSpec,
    action: Action,
    ctx: &RunCtx,
) -> Result<RuntimeState> {
    let commands = spec
        .commands
        .as_ref()
        .ok_or_else(|| Error::install_failed(name, action.name(), "delegation runtime without commands"))?;
    let info = RuntimeInfo::from_spec(spec, &placer.paths().runtime_install_dir(name, "current"));

    let vars = TemplateVars {
        package: name.to_string(),
        version: effective_version(&spec.version),
        name: name.to_string(),
        bin_path: info.bin_dir.display().to_string(),
        args: Vec::new(),
    };
    let resolved = run_command_pattern(
        name,
        commands,
        action,
        &vars,
        &HashMap::new(),
        spec.version_kind(),
        ctx,
    )?;
    let version = resolved.unwrap_or_else(|| effective_version(&spec.version));

    log_info!("[Runtime] {} {} ready (delegated)", name.green(), version.dimmed());
    Ok(RuntimeState {
        version,
        spec_version: spec.version.clone(),
        version_kind: spec.version_kind(),
        install_path: info.bin_dir.display().to_string(),
        binaries: Vec::new(),
        bin_dir: Some(info.bin_dir.display().to_string()),
        tool_bin_path: info.tool_bin_path.as_ref().map(|p| p.display().to_string()),
        digest: None,
        source: None,
        commands: Some(commands.clone()),
        updated_at: chrono::Utc::now(),
    })
}

/// Runtime delegation for a `Tool`: the tool's own commands run with the
/// runtime's bin dir leading PATH; the binary lands in `toolBinPath`.
pub fn install_via_runtime(
    installer: &ToolInstaller<'_>,
    name: &str,
    spec: &ToolSpec,
    runtime_ref: &str,
    action: Action,
    ctx: &RunCtx,
) -> Result<ToolState> {
    let Some(runtime) = installer.registry.runtime(runtime_ref) else {
        return Err(Error::Dependency {
            resource: name.to_string(),
            missing: vec![format!("Runtime/{runtime_ref}")],
            cycle: Vec::new(),
            message: format!("'{name}' references unregistered runtime '{runtime_ref}'"),
        });
    };
    let Some(commands) = &spec.commands else {
        return Err(Error::install_failed(
            name,
            action.name(),
            format!("runtime delegation via '{runtime_ref}' requires in-spec commands"),
        ));
    };

    let binary = spec.binary_name(name);
    let install_path = runtime
        .tool_bin_path
        .as_ref()
        .map(|dir| dir.join(binary))
        .unwrap_or_else(|| installer.placer.paths().link_path(binary));

    // PATH overlay: the runtime's binaries must win while its installer
    // commands run.
    let mut env = HashMap::new();
    env.insert("PATH".to_string(), prepend_path(&runtime.bin_dir));
    log_debug!(
        "[Runtime] PATH for '{}' prepends {}",
        name,
        runtime.bin_dir.display().to_string().dimmed()
    );

    let vars = TemplateVars {
        package: spec.package.as_ref().and_then(|p| p.slug()).unwrap_or_else(|| name.to_string()),
        version: effective_version(&spec.version),
        name: name.to_string(),
        bin_path: install_path.display().to_string(),
        args: spec.args.clone(),
    };
    let resolved =
        run_command_pattern(name, commands, action, &vars, &env, spec.version_kind(), ctx)?;
    let version = resolved.unwrap_or_else(|| effective_version(&spec.version));

    // The stable symlink points into the runtime's tool bin dir.
    let bin_path = if runtime.tool_bin_path.is_some() {
        installer.placer.symlink(&install_path, spec.link_name(name))?
    } else {
        install_path.clone()
    };

    log_info!("[Runtime] {} installed via runtime '{}'", name.green(), runtime_ref.cyan());
    Ok(tool_state(spec, &version, &install_path, &bin_path, None, None, Some(commands.clone())))
}

/// `<dir>:` prepended onto the current PATH.
fn prepend_path(dir: &std::path::Path) -> String {
    match std::env::var("PATH") {
        Ok(path) if !path.is_empty() => format!("{}:{}", dir.display(), path),
        _ => dir.display().to_string(),
    }
}
