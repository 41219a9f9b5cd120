//! # Orchestrator
//!
//! The thin layer driving a run: acquire the state lock, load manifests,
//! order resources topologically over their references, populate the
//! installer registration tables, dispatch each resource, and persist
//! state after every successful realization.
//!
//! Error policy: a failure aborts only its own resource and the run
//! continues, unless the error is a precondition failure (held lock,
//! schema mismatch, reference cycle), which aborts the whole run. The
//! orchestrator is the single writer of the state file.

use crate::errors::{Error, Result};
use crate::installers::{
    Action, InstallerRegistry, RuntimeInfo, ToolInstaller, effective_version, runtime, system,
};
use crate::libs::doctor::{self, DoctorReport};
use crate::libs::manifest_loader::ManifestLoader;
use crate::libs::registry::GithubResolver;
use crate::libs::runctx::RunCtx;
use crate::libs::state_management::{acquire_lock, load_state, save_state};
use crate::libs::utilities::executor::{TemplateVars, run_steps};
use crate::libs::utilities::placer::Placer;
use crate::schemas::config::Config;
use crate::schemas::environment::Env;
use crate::schemas::path_resolver::PathResolver;
use crate::schemas::resources::{Kind, Resource, ResourceBody};
use crate::schemas::tools::ToolSpec;
use crate::{log_debug, log_error, log_info, log_warn};
use colored::Colorize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of one `apply` run.
#[derive(Debug, Default)]
pub struct ApplySummary {
    pub applied: usize,
    /// `(resource, error)` pairs for resources that failed; the run
    /// continued past them.
    pub failures: Vec<(String, Error)>,
}

/// Drives a full engine invocation.
pub struct Orchestrator {
    config: Config,
    paths: PathResolver,
    placer: Placer,
    env: Env,
}

impl Orchestrator {
    pub fn new(config: Config, env: Env) -> Self {
        let paths = PathResolver::new(&config);
        let placer = Placer::new(paths.clone());
        Orchestrator { config, paths, placer, env }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    /// Realizes every resource under the given manifest paths.
    pub fn apply(
        &self,
        manifest_paths: &[PathBuf],
        force: bool,
        ctx: &RunCtx,
    ) -> Result<ApplySummary> {
        let _lock = acquire_lock(&self.paths)?;
        let mut state = load_state(&self.paths)?;

        let mut loader =
            ManifestLoader::new(self.env).with_schema_dir(self.config.schema_dir.clone());
        let resources = loader.load(manifest_paths)?;
        let order = topological_order(&resources)?;

        // Registration tables are complete before the first dispatch and
        // read-only afterwards.
        let mut registry = InstallerRegistry::default();
        for resource in &resources {
            match &resource.body {
                ResourceBody::Runtime(spec) => {
                    let root = self
                        .paths
                        .runtime_install_dir(resource.name(), &effective_version(&spec.version));
                    registry.register_runtime(resource.name(), RuntimeInfo::from_spec(spec, &root));
                }
                ResourceBody::Installer(spec) => {
                    registry.register_installer(resource.name(), spec.clone());
                }
                ResourceBody::SystemInstaller(spec) => {
                    registry.register_system_installer(resource.name(), spec.clone());
                }
                _ => {}
            }
        }

        let resolver = GithubResolver::new(self.env, self.paths.registry_cache_dir());
        let installer = ToolInstaller {
            placer: &self.placer,
            resolver: &resolver,
            registry: &registry,
            force,
            progress: None,
        };

        let mut summary = ApplySummary::default();
        for resource in order {
            let outcome = self.dispatch(resource, &installer, &mut state, force, ctx);
            match outcome {
                Ok(()) => summary.applied += 1,
                Err(e) if e.is_precondition_failure() => return Err(e),
                Err(e) => {
                    log_error!("{}", e.render());
                    summary.failures.push((resource.name().to_string(), e));
                }
            }
        }
        Ok(summary)
    }

    /// One resource through the dispatch table, persisting state on
    /// success.
    fn dispatch(
        &self,
        resource: &Resource,
        installer: &ToolInstaller<'_>,
        state: &mut crate::schemas::state_file::StateFile,
        force: bool,
        ctx: &RunCtx,
    ) -> Result<()> {
        let name = resource.name();
        match &resource.body {
            ResourceBody::Runtime(spec) => {
                let action = runtime_action(state.runtimes.contains_key(name), force);
                let record = runtime::install_runtime(&self.placer, name, spec, action, ctx)?;
                state.runtimes.insert(name.to_string(), record);
                save_state(state, &self.paths)
            }
            ResourceBody::Tool(spec) => {
                let action = tool_action(state.tools.contains_key(name), force);
                let record = installer.install(name, spec, action, ctx)?;
                state.tools.insert(name.to_string(), record);
                save_state(state, &self.paths)
            }
            ResourceBody::ToolSet(set) => {
                // Members realize as individual tools sharing the set's
                // installer; each gets its own state entry.
                for member in &set.tools {
                    let spec = ToolSpec {
                        version: member.version.clone(),
                        installer_ref: Some(set.installer_ref.clone()),
                        args: member.args.clone(),
                        ..Default::default()
                    };
                    let action = tool_action(state.tools.contains_key(&member.name), force);
                    let record = installer.install(&member.name, &spec, action, ctx)?;
                    state.tools.insert(member.name.clone(), record);
                    save_state(state, &self.paths)?;
                }
                Ok(())
            }
            ResourceBody::InstallerRepository(spec) => {
                system::realize_installer_repository(installer.registry, name, spec, ctx)
            }
            ResourceBody::SystemPackageRepository(spec) => {
                system::realize_system_repository(installer.registry, name, spec, ctx)
            }
            ResourceBody::SystemPackageSet(spec) => {
                let action = tool_action(false, force);
                system::realize_package_set(installer.registry, name, spec, action, ctx)
            }
            // Installers and system installers realize nothing themselves;
            // registration already happened.
            ResourceBody::Installer(_) | ResourceBody::SystemInstaller(_) => {
                log_debug!("[Orchestrator] {} registered", name.dimmed());
                Ok(())
            }
        }
    }

    /// Removes named resources: replay recorded removal commands, delete
    /// the versioned install tree, and drop the symlink when it still
    /// points into it.
    pub fn remove(&self, names: &[String], ctx: &RunCtx) -> Result<ApplySummary> {
        let _lock = acquire_lock(&self.paths)?;
        let mut state = load_state(&self.paths)?;

        let mut summary = ApplySummary::default();
        for name in names {
            let outcome = self.remove_one(name, &mut state, ctx);
            match outcome {
                Ok(true) => {
                    summary.applied += 1;
                    save_state(&state, &self.paths)?;
                }
                Ok(false) => {}
                Err(e) => {
                    log_error!("{}", e.render());
                    summary.failures.push((name.clone(), e));
                }
            }
        }
        Ok(summary)
    }

    fn remove_one(
        &self,
        name: &str,
        state: &mut crate::schemas::state_file::StateFile,
        ctx: &RunCtx,
    ) -> Result<bool> {
        if let Some(tool) = state.tools.get(name).cloned() {
            log_info!("[Remove] Removing tool {}", name.green());
            // Replay the recorded removal steps even if the manifest is
            // long gone; state kept them for exactly this.
            if let Some(commands) = &tool.commands {
                if let Some(remove) = &commands.remove {
                    let vars = TemplateVars {
                        package: tool
                            .package
                            .as_ref()
                            .and_then(|p| p.slug())
                            .unwrap_or_else(|| name.to_string()),
                        version: tool.version.clone(),
                        name: name.to_string(),
                        bin_path: tool.bin_path.clone(),
                        args: Vec::new(),
                    };
                    run_steps(remove, &vars, &commands.env, ctx, name, "remove")?;
                }
            }
            remove_path(Path::new(&tool.install_path));
            remove_link_if_pointing(Path::new(&tool.bin_path), Path::new(&tool.install_path));
            // Versioned parents stay tidy: drop the tool's whole dir when
            // its last version went away.
            let tool_dir = self.paths.tool_dir(name);
            if fs::read_dir(&tool_dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(&tool_dir);
            }
            state.tools.remove(name);
            return Ok(true);
        }

        if let Some(rt) = state.runtimes.get(name).cloned() {
            log_info!("[Remove] Removing runtime {}", name.green());
            if let Some(commands) = &rt.commands {
                if let Some(remove) = &commands.remove {
                    let vars = TemplateVars {
                        package: name.to_string(),
                        version: rt.version.clone(),
                        name: name.to_string(),
                        bin_path: rt.bin_dir.clone().unwrap_or_default(),
                        args: Vec::new(),
                    };
                    run_steps(remove, &vars, &commands.env, ctx, name, "remove")?;
                }
            }
            for binary in &rt.binaries {
                let link_name = binary.rsplit('/').next().unwrap_or(binary);
                let link = self.paths.link_path(link_name);
                remove_link_if_pointing(&link, Path::new(&rt.install_path));
            }
            remove_path(Path::new(&rt.install_path));
            state.runtimes.remove(name);
            return Ok(true);
        }

        log_warn!("[Remove] '{}' is not recorded in state; nothing to do", name.yellow());
        Ok(false)
    }

    /// Runs the doctor against current state.
    pub fn doctor(&self) -> Result<DoctorReport> {
        let state = load_state(&self.paths)?;
        Ok(doctor::diagnose(&state, &self.paths))
    }
}

fn tool_action(present_in_state: bool, force: bool) -> Action {
    match (present_in_state, force) {
        (true, true) => Action::Reinstall,
        (true, false) => Action::Upgrade,
        (false, _) => Action::Install,
    }
}

fn runtime_action(present_in_state: bool, force: bool) -> Action {
    tool_action(present_in_state, force)
}

fn remove_path(path: &Path) {
    let outcome = if path.is_dir() { fs::remove_dir_all(path) } else { fs::remove_file(path) };
    if let Err(e) = outcome {
        if e.kind() != std::io::ErrorKind::NotFound {
            log_warn!("[Remove] Could not remove {}: {}", path.display(), e);
        }
    }
}

/// Drops a symlink only while it still points at (or into) the removed
/// install path.
fn remove_link_if_pointing(link: &Path, install_path: &Path) {
    let Ok(target) = fs::read_link(link) else {
        return;
    };
    if target == install_path || target.starts_with(install_path) {
        if let Err(e) = fs::remove_file(link) {
            log_warn!("[Remove] Could not remove symlink {}: {}", link.display(), e);
        }
    }
}

// ============================================================================
// TOPOLOGICAL ORDERING
// ============================================================================

/// Orders resources so every reference is realized before its referrer.
/// A leftover after Kahn's algorithm is a reference cycle and aborts the
/// run.
pub fn topological_order(resources: &[Resource]) -> Result<Vec<&Resource>> {
    let index: HashMap<(Kind, &str), usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| ((r.kind(), r.name()), i))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
    let mut in_degree = vec![0usize; resources.len()];
    for (i, resource) in resources.iter().enumerate() {
        for (kind, name) in resource.references() {
            // Presence was checked at load time; skip anything dangling so
            // hand-built sets degrade gracefully.
            if let Some(&dep) = index.get(&(kind, name.as_str())) {
                dependents[dep].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> =
        (0..resources.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(resources.len());
    while let Some(i) = queue.pop_front() {
        order.push(&resources[i]);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != resources.len() {
        let stuck: HashSet<&str> = (0..resources.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| resources[i].name())
            .collect();
        let cycle: Vec<String> = resources
            .iter()
            .filter(|r| stuck.contains(r.name()))
            .map(|r| r.name().to_string())
            .collect();
        return Err(Error::Dependency {
            resource: cycle.first().cloned().unwrap_or_default(),
            missing: Vec::new(),
            message: format!("reference cycle between: {}", cycle.join(" -> ")),
            cycle,
        });
    }
    Ok(order)
}
