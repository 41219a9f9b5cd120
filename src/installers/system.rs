//! # System-Package Realization
//!
//! Delegates `SystemPackageSet` and `SystemPackageRepository` resources to
//! their `SystemInstaller`'s command set, and `InstallerRepository`
//! resources to either their own add-repo commands or the referenced
//! installer's `addRepo` convention. None of these produce state records;
//! the OS package manager owns their lifecycle.

use crate::errors::{Error, Result};
use crate::installers::command_set::run_command_pattern;
use crate::installers::{Action, InstallerRegistry};
use crate::libs::runctx::RunCtx;
use crate::libs::utilities::executor::{TemplateVars, run_steps};
use crate::log_info;
use crate::schemas::installers::InstallerRepositorySpec;
use crate::schemas::system::{SystemPackageRepositorySpec, SystemPackageSetSpec};
use crate::schemas::tools::VersionKind;
use colored::Colorize;
use std::collections::HashMap;

/// Realizes a system package set: the installer's steps run once with the
/// whole package list as `{{Args}}`.
pub fn realize_package_set(
    registry: &InstallerRegistry,
    name: &str,
    spec: &SystemPackageSetSpec,
    action: Action,
    ctx: &RunCtx,
) -> Result<()> {
    let Some(installer) = registry.system_installer(&spec.installer_ref) else {
        return Err(missing_system_installer(name, &spec.installer_ref));
    };
    let vars = TemplateVars {
        package: name.to_string(),
        version: String::new(),
        name: name.to_string(),
        bin_path: String::new(),
        args: spec.packages.clone(),
    };
    log_info!(
        "[System] Realizing package set {} ({} package(s)) via '{}'",
        name.green(),
        spec.packages.len(),
        spec.installer_ref.cyan()
    );
    run_command_pattern(
        name,
        &installer.commands,
        action,
        &vars,
        &HashMap::new(),
        VersionKind::Alias,
        ctx,
    )?;
    Ok(())
}

/// Registers a system package repository through its installer's add-repo
/// command set.
pub fn realize_system_repository(
    registry: &InstallerRegistry,
    name: &str,
    spec: &SystemPackageRepositorySpec,
    ctx: &RunCtx,
) -> Result<()> {
    if registry.system_installer(&spec.installer_ref).is_none() {
        return Err(missing_system_installer(name, &spec.installer_ref));
    }
    let vars = TemplateVars {
        package: name.to_string(),
        version: String::new(),
        name: name.to_string(),
        bin_path: String::new(),
        args: Vec::new(),
    };
    log_info!("[System] Registering package repository {}", name.green());
    run_steps(&spec.commands.install, &vars, &spec.commands.env, ctx, name, "add-repo")
}

/// Registers an installer repository: delegated command set, or the
/// referenced installer's `addRepo` convention for the git-URL form.
pub fn realize_installer_repository(
    registry: &InstallerRegistry,
    name: &str,
    spec: &InstallerRepositorySpec,
    ctx: &RunCtx,
) -> Result<()> {
    if let Some(commands) = &spec.commands {
        let vars = TemplateVars {
            package: String::new(),
            version: String::new(),
            name: name.to_string(),
            bin_path: String::new(),
            args: Vec::new(),
        };
        log_info!("[System] Registering installer repository {}", name.green());
        return run_steps(&commands.install, &vars, &commands.env, ctx, name, "add-repo");
    }

    // URL form: the installer declares how a repository is added.
    let url = spec.url.as_deref().unwrap_or_default();
    let Some(installer) = registry.installer(&spec.installer_ref) else {
        return Err(Error::Dependency {
            resource: name.to_string(),
            missing: vec![format!("Installer/{}", spec.installer_ref)],
            cycle: Vec::new(),
            message: format!("'{name}' references unregistered installer '{}'", spec.installer_ref),
        });
    };
    let Some(add_repo) = &installer.spec.add_repo else {
        return Err(Error::install_failed(
            name,
            "add-repo",
            format!(
                "installer '{}' declares no addRepo convention; declare spec.commands instead",
                spec.installer_ref
            ),
        ));
    };
    let vars = TemplateVars {
        package: url.to_string(),
        version: String::new(),
        name: name.to_string(),
        bin_path: String::new(),
        args: Vec::new(),
    };
    log_info!(
        "[System] Registering installer repository {} from {}",
        name.green(),
        url.blue()
    );
    run_steps(add_repo, &vars, &installer.spec.env, ctx, name, "add-repo")
}

fn missing_system_installer(resource: &str, installer_ref: &str) -> Error {
    Error::Dependency {
        resource: resource.to_string(),
        missing: vec![format!("SystemInstaller/{installer_ref}")],
        cycle: Vec::new(),
        message: format!("'{resource}' references unregistered system installer '{installer_ref}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::system::SystemInstallerSpec;

    #[test]
    fn package_set_passes_packages_as_args() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("installed");

        let mut registry = InstallerRegistry::default();
        let installer: SystemInstallerSpec = serde_yaml::from_str(&format!(
            "commands:\n  install:\n    - \"echo {{{{Args}}}} > {}\"\n",
            marker.display()
        ))
        .unwrap();
        registry.register_system_installer("apt", installer);

        let spec: SystemPackageSetSpec =
            serde_yaml::from_str("installerRef: apt\npackages: [jq, curl]\n").unwrap();
        realize_package_set(&registry, "base", &spec, Action::Install, &RunCtx::new()).unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "jq curl\n");
    }

    #[test]
    fn url_repository_requires_add_repo_convention() {
        let mut registry = InstallerRegistry::default();
        let installer: crate::schemas::installers::InstallerSpec = serde_yaml::from_str(
            "type: delegation\ncommands:\n  install: [true]\n",
        )
        .unwrap();
        registry.register_installer("helm", installer);

        let spec: InstallerRepositorySpec =
            serde_yaml::from_str("installerRef: helm\nurl: https://example.com/charts\n").unwrap();
        let err =
            realize_installer_repository(&registry, "charts", &spec, &RunCtx::new()).unwrap_err();
        assert_eq!(err.code(), "install.failed");
        assert!(err.to_string().contains("addRepo"));
    }
}
