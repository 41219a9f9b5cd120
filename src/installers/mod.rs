//! # Installer Dispatch
//!
//! The per-resource state machine. A `Tool` is classified into one of five
//! installation patterns, in priority order, and routed to the matching
//! submodule:
//!
//! 1. `runtimeRef`                            → [`runtime`] delegation
//! 2. `installerRef` (delegation installer)   → [`delegation`]
//! 3. in-spec `commands`                      → [`command_set`]
//! 4. `package`                               → [`download`] via the registry
//! 5. `source`                                → [`download`] explicit
//!
//! The runtime/installer registration tables are populated by the
//! orchestrator before any dispatch and are read-only afterwards; dispatch
//! never mutates shared state, so independent resources may be realized
//! concurrently as long as no two target the same `(name, version)`.

pub mod command_set;
pub mod delegation;
pub mod download;
pub mod runtime;
pub mod system;

use crate::errors::{Error, Result};
use crate::libs::registry::RegistryResolver;
use crate::libs::runctx::{ProgressFn, RunCtx};
use crate::libs::utilities::placer::Placer;
use crate::log_debug;
use crate::schemas::config::expand_tilde;
use crate::schemas::installers::{InstallerSpec, InstallerType};
use crate::schemas::runtimes::{RuntimeSpec, RuntimeType};
use crate::schemas::state_file::ToolState;
use crate::schemas::system::SystemInstallerSpec;
use crate::schemas::tools::ToolSpec;
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The action being performed on a resource. `remove` is driven from
/// state, not from dispatch, and lives on the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Upgrade,
    Reinstall,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Upgrade => "upgrade",
            Action::Reinstall => "reinstall",
        }
    }
}

/// A registered runtime, with its directories resolved to absolutes.
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub spec: RuntimeSpec,
    /// Where the runtime's own binaries live; prepended to PATH for
    /// runtime-delegated installs.
    pub bin_dir: PathBuf,
    /// Where tools installed by the runtime land.
    pub tool_bin_path: Option<PathBuf>,
}

impl RuntimeInfo {
    /// Derives the resolved directories from a runtime spec and its
    /// install root.
    pub fn from_spec(spec: &RuntimeSpec, install_root: &PathBuf) -> Self {
        let bin_dir = match spec.runtime_type {
            RuntimeType::Delegation => {
                expand_tilde(spec.bin_dir.as_deref().unwrap_or(install_root.as_path()))
            }
            // Download runtimes keep their binaries inside the versioned
            // tree; the directory of the first listed binary is the bin dir.
            RuntimeType::Download => spec
                .binaries
                .first()
                .and_then(|b| PathBuf::from(b).parent().map(|p| install_root.join(p)))
                .unwrap_or_else(|| install_root.clone()),
        };
        RuntimeInfo {
            spec: spec.clone(),
            bin_dir,
            tool_bin_path: spec.tool_bin_path.as_deref().map(expand_tilde),
        }
    }
}

/// A registered installer.
#[derive(Debug, Clone)]
pub struct InstallerInfo {
    pub spec: InstallerSpec,
}

/// The read-only registration tables behind dispatch. Populated once by
/// the orchestrator, before the first install call.
#[derive(Debug, Clone, Default)]
pub struct InstallerRegistry {
    runtimes: HashMap<String, RuntimeInfo>,
    installers: HashMap<String, InstallerInfo>,
    system_installers: HashMap<String, SystemInstallerSpec>,
}

impl InstallerRegistry {
    pub fn register_runtime(&mut self, name: &str, info: RuntimeInfo) {
        self.runtimes.insert(name.to_string(), info);
    }

    pub fn register_installer(&mut self, name: &str, spec: InstallerSpec) {
        self.installers.insert(name.to_string(), InstallerInfo { spec });
    }

    pub fn register_system_installer(&mut self, name: &str, spec: SystemInstallerSpec) {
        self.system_installers.insert(name.to_string(), spec);
    }

    pub fn runtime(&self, name: &str) -> Option<&RuntimeInfo> {
        self.runtimes.get(name)
    }

    pub fn installer(&self, name: &str) -> Option<&InstallerInfo> {
        self.installers.get(name)
    }

    pub fn system_installer(&self, name: &str) -> Option<&SystemInstallerSpec> {
        self.system_installers.get(name)
    }

    pub fn runtimes(&self) -> impl Iterator<Item = (&String, &RuntimeInfo)> {
        self.runtimes.iter()
    }
}

/// The tool installer: classification plus orchestration of the pattern
/// submodules.
pub struct ToolInstaller<'a> {
    pub placer: &'a Placer,
    pub resolver: &'a dyn RegistryResolver,
    pub registry: &'a InstallerRegistry,
    /// Required to overwrite a binary that differs from its pinned digest.
    pub force: bool,
    /// Instance-level progress callback; an ambient context callback wins.
    pub progress: Option<Arc<ProgressFn>>,
}

impl ToolInstaller<'_> {
    /// Realizes one tool and returns its state record.
    pub fn install(
        &self,
        name: &str,
        spec: &ToolSpec,
        action: Action,
        ctx: &RunCtx,
    ) -> Result<ToolState> {
        ctx.check_cancelled(name, action.name())?;
        let ctx = self.effective_ctx(ctx);

        // Pattern classification, strictly in priority order.
        if let Some(runtime_ref) = &spec.runtime_ref {
            log_debug!("[Dispatch] {} -> runtime delegation via '{}'", name.bold(), runtime_ref);
            return runtime::install_via_runtime(self, name, spec, runtime_ref, action, &ctx);
        }
        if let Some(installer_ref) = &spec.installer_ref {
            let Some(installer) = self.registry.installer(installer_ref) else {
                return Err(Error::Dependency {
                    resource: name.to_string(),
                    missing: vec![format!("Installer/{installer_ref}")],
                    cycle: Vec::new(),
                    message: format!("'{name}' references unregistered installer '{installer_ref}'"),
                });
            };
            match installer.spec.installer_type {
                InstallerType::Delegation => {
                    log_debug!(
                        "[Dispatch] {} -> installer delegation via '{}'",
                        name.bold(),
                        installer_ref
                    );
                    return delegation::install_via_installer(
                        self,
                        name,
                        spec,
                        installer_ref,
                        &installer.spec,
                        action,
                        &ctx,
                    );
                }
                InstallerType::Download => {
                    log_debug!(
                        "[Dispatch] {} -> templated download via '{}'",
                        name.bold(),
                        installer_ref
                    );
                    return download::install_via_download_installer(
                        self,
                        name,
                        spec,
                        installer_ref,
                        &installer.spec,
                        action,
                        &ctx,
                    );
                }
            }
        }
        if spec.commands.is_some() {
            log_debug!("[Dispatch] {} -> in-spec command set", name.bold());
            return command_set::install_via_commands(self, name, spec, action, &ctx);
        }
        if let Some(package) = &spec.package {
            log_debug!("[Dispatch] {} -> registry-resolved download", name.bold());
            return download::install_from_registry(self, name, spec, package, action, &ctx);
        }
        if let Some(source) = &spec.source {
            log_debug!("[Dispatch] {} -> explicit download", name.bold());
            return download::install_download(self, name, spec, source, None, action, &ctx);
        }
        // Unreachable for validated specs; surfaced for hand-built ones.
        Err(Error::install_failed(name, action.name(), "tool spec declares no installation pattern"))
    }

    /// Applies the callback priority rule: a context callback wins over
    /// the installer-instance one.
    fn effective_ctx(&self, ctx: &RunCtx) -> RunCtx {
        match (&self.progress, ctx.progress_callback()) {
            (Some(instance), None) => ctx.clone().with_progress(Arc::clone(instance)),
            _ => ctx.clone(),
        }
    }
}

/// Builds the state record every pattern submodule ends with. The spec's
/// version literal is preserved verbatim next to the resolved version.
pub(crate) fn tool_state(
    spec: &ToolSpec,
    version: &str,
    install_path: &std::path::Path,
    bin_path: &std::path::Path,
    digest: Option<String>,
    source: Option<crate::schemas::tools::DownloadSource>,
    commands: Option<crate::schemas::tools::CommandSet>,
) -> ToolState {
    ToolState {
        version: version.to_string(),
        spec_version: spec.version.clone(),
        version_kind: spec.version_kind(),
        install_path: install_path.display().to_string(),
        bin_path: bin_path.display().to_string(),
        digest,
        installer_ref: spec.installer_ref.clone(),
        runtime_ref: spec.runtime_ref.clone(),
        package: spec.package.clone(),
        source,
        commands,
        updated_at: chrono::Utc::now(),
    }
}

/// The version segment used for on-disk layout when the spec pins nothing.
pub(crate) fn effective_version(spec_version: &str) -> String {
    if spec_version.trim().is_empty() {
        "latest".to_string()
    } else {
        spec_version.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::registry::{PackageInfo, Resolution};
    use crate::schemas::config::Config;
    use crate::schemas::path_resolver::PathResolver;

    struct NullResolver;
    impl RegistryResolver for NullResolver {
        fn resolve(&self, _o: &str, _r: &str, _v: &str) -> Result<Resolution> {
            unreachable!("not exercised")
        }
        fn latest_version(&self, _o: &str, _r: &str) -> Result<String> {
            unreachable!("not exercised")
        }
        fn fetch_package_info(&self, _n: &str) -> Result<PackageInfo> {
            unreachable!("not exercised")
        }
    }

    #[test]
    fn unknown_installer_ref_is_a_dependency_error() {
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
        let spec = ToolSpec { installer_ref: Some("ghost".into()), ..Default::default() };
        let err = installer.install("rg", &spec, Action::Install, &RunCtx::new()).unwrap_err();
        assert_eq!(err.code(), "dependency.missing");
    }

    #[test]
    fn runtime_info_derives_bin_dir_per_variant() {
        let download: RuntimeSpec = serde_yaml::from_str(
            "type: download\nsource:\n  url: https://x/go.tar.gz\nbinaries: [go/bin/go]\n",
        )
        .unwrap();
        let root = PathBuf::from("/data/runtimes/go/1.22.1");
        let info = RuntimeInfo::from_spec(&download, &root);
        assert_eq!(info.bin_dir, PathBuf::from("/data/runtimes/go/1.22.1/go/bin"));

        let delegation: RuntimeSpec = serde_yaml::from_str(
            "type: delegation\ncommands:\n  install: [x]\nbinDir: /opt/rust/bin\n",
        )
        .unwrap();
        let info = RuntimeInfo::from_spec(&delegation, &root);
        assert_eq!(info.bin_dir, PathBuf::from("/opt/rust/bin"));
    }
}
