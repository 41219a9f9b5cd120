//! # Installer Delegation
//!
//! Realizes a `Tool` through a delegation-type `Installer`: the
//! installer's command set runs with the tool's identity substituted in.
//! When the installer names a `toolRef` (its own executable, managed as a
//! Tool), the engine's bin dir joins the PATH overlay so the freshly
//! linked executable resolves. An absent `check` command means a clean
//! command-step exit is success.

use crate::errors::{Error, Result};
use crate::installers::command_set::run_command_pattern;
use crate::installers::{Action, ToolInstaller, effective_version, tool_state};
use crate::libs::runctx::RunCtx;
use crate::libs::utilities::executor::TemplateVars;
use crate::log_info;
use crate::schemas::config::expand_tilde;
use crate::schemas::installers::InstallerSpec;
use crate::schemas::state_file::ToolState;
use crate::schemas::tools::ToolSpec;
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Realizes one tool through a delegation installer.
pub fn install_via_installer(
    installer: &ToolInstaller<'_>,
    name: &str,
    spec: &ToolSpec,
    installer_name: &str,
    installer_spec: &InstallerSpec,
    action: Action,
    ctx: &RunCtx,
) -> Result<ToolState> {
    let Some(commands) = &installer_spec.commands else {
        return Err(Error::install_failed(
            name,
            action.name(),
            format!("delegation installer '{installer_name}' declares no commands"),
        ));
    };

    let engine_bin = installer.placer.paths().bin_dir().to_path_buf();
    let installer_bin = installer_spec.bin_dir.as_deref().map(expand_tilde);

    // PATH overlay: the installer's own bin dir, and the engine bin dir
    // when the installer executable is a managed toolRef.
    let mut prepends: Vec<PathBuf> = Vec::new();
    if let Some(dir) = &installer_bin {
        prepends.push(dir.clone());
    }
    if installer_spec.tool_ref.is_some() {
        prepends.push(engine_bin.clone());
    }
    let mut env: HashMap<String, String> = installer_spec.env.clone();
    if !prepends.is_empty() {
        env.insert("PATH".to_string(), prepend_path(&prepends));
    }

    let binary = spec.binary_name(name);
    // Where the installer drops the binary: its bin dir when it has one,
    // the engine bin dir otherwise.
    let install_path = installer_bin
        .as_ref()
        .map(|dir| dir.join(binary))
        .unwrap_or_else(|| engine_bin.join(binary));

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

    // When the binary lives outside the engine bin dir, maintain the
    // stable symlink into it.
    let bin_path = if installer_bin.is_some() {
        installer.placer.symlink(&install_path, spec.link_name(name))?
    } else {
        install_path.clone()
    };

    log_info!(
        "[Delegation] {} installed via installer '{}'",
        name.green(),
        installer_name.cyan()
    );
    Ok(tool_state(spec, &version, &install_path, &bin_path, None, None, Some(commands.clone())))
}

fn prepend_path(dirs: &[PathBuf]) -> String {
    let joined: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
    match std::env::var("PATH") {
        Ok(path) if !path.is_empty() => format!("{}:{}", joined.join(":"), path),
        _ => joined.join(":"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::InstallerRegistry;
    use crate::libs::registry::{PackageInfo, RegistryResolver, Resolution};
    use crate::libs::utilities::placer::Placer;
    use crate::schemas::config::Config;
    use crate::schemas::path_resolver::PathResolver;
    use std::fs;

    struct NullResolver;
    impl RegistryResolver for NullResolver {
        fn resolve(&self, _: &str, _: &str, _: &str) -> Result<Resolution> {
            unreachable!()
        }
        fn latest_version(&self, _: &str, _: &str) -> Result<String> {
            unreachable!()
        }
        fn fetch_package_info(&self, _: &str) -> Result<PackageInfo> {
            unreachable!()
        }
    }

    #[test]
    fn delegation_runs_installer_commands_and_links_binary() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().join("data"),
            bin_dir: dir.path().join("bin"),
            env_dir: dir.path().join("env"),
            schema_dir: None,
        };
        let placer = Placer::new(PathResolver::new(&config));
        let registry = InstallerRegistry::default();
        let installer = ToolInstaller {
            placer: &placer,
            resolver: &NullResolver,
            registry: &registry,
            force: false,
            progress: None,
        };

        let cargo_bin = dir.path().join("cargo-bin");
        fs::create_dir_all(&cargo_bin).unwrap();
        let installer_spec: InstallerSpec = serde_yaml::from_str(&format!(
            "type: delegation\ncommands:\n  install:\n    - \"touch {}/{{{{Name}}}}\"\nbinDir: {}\n",
            cargo_bin.display(),
            cargo_bin.display()
        ))
        .unwrap();

        let spec = ToolSpec {
            version: "14.0.0".into(),
            installer_ref: Some("cargo-install".into()),
            ..Default::default()
        };
        let state = install_via_installer(
            &installer,
            "ripgrep",
            &spec,
            "cargo-install",
            &installer_spec,
            Action::Install,
            &RunCtx::new(),
        )
        .unwrap();

        // The command produced the binary in the installer's bin dir and
        // the engine linked it.
        assert!(cargo_bin.join("ripgrep").exists());
        let link = placer.paths().link_path("ripgrep");
        assert_eq!(fs::read_link(&link).unwrap(), cargo_bin.join("ripgrep"));
        assert_eq!(state.installer_ref.as_deref(), Some("cargo-install"));
        // The installer's command set is stored for removal replay.
        assert!(state.commands.is_some());
    }
}
