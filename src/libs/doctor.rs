//! # Doctor
//!
//! Drift detection between recorded state and filesystem reality. The
//! doctor scans the engine's bin dir plus every managed runtime's bin
//! dirs and reports:
//!
//! - **unmanaged tools**: executables present in a scanned directory with
//!   no state record claiming them, grouped by the directory's category
//!   (a runtime name, or the engine's own slot);
//! - **conflicts**: binary names resolving in more than one scanned
//!   directory, annotated with the one the shell currently uses (PATH
//!   order);
//! - **state issues**: recorded tools/runtimes whose `installPath` is gone
//!   (`missing_binary` / `missing_install_dir`) or whose symlink is
//!   absent or dangling (`broken_symlink`, with its target).

use crate::log_debug;
use crate::schemas::path_resolver::PathResolver;
use crate::schemas::state_file::StateFile;
use prettytable::{Table, row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Category label for the engine's own bin dir.
pub const ENGINE_CATEGORY: &str = "toolsmith";

/// An executable no state record claims.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnmanagedTool {
    pub binary: String,
    pub directory: String,
    pub category: String,
}

/// A binary name resolving in more than one scanned directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Conflict {
    pub binary: String,
    pub directories: Vec<String>,
    /// The directory the shell resolves first, judged by PATH order.
    pub active: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateIssueKind {
    MissingBinary,
    BrokenSymlink,
    MissingInstallDir,
}

/// A recorded resource whose on-disk reality drifted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StateIssue {
    pub resource: String,
    pub kind: StateIssueKind,
    pub detail: String,
}

/// The full diagnostic report.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DoctorReport {
    pub unmanaged: Vec<UnmanagedTool>,
    pub conflicts: Vec<Conflict>,
    pub state_issues: Vec<StateIssue>,
}

impl DoctorReport {
    pub fn is_clean(&self) -> bool {
        self.unmanaged.is_empty() && self.conflicts.is_empty() && self.state_issues.is_empty()
    }
}

/// Runs the full diagnosis against the current state and filesystem.
pub fn diagnose(state: &StateFile, paths: &PathResolver) -> DoctorReport {
    let scan_dirs = scan_directories(state, paths);
    let path_var = std::env::var("PATH").unwrap_or_default();
    diagnose_with(state, &scan_dirs, &path_var)
}

/// The scan set: the engine bin dir plus each managed runtime's dirs.
fn scan_directories(state: &StateFile, paths: &PathResolver) -> Vec<(String, PathBuf)> {
    let mut dirs = vec![(ENGINE_CATEGORY.to_string(), paths.bin_dir().to_path_buf())];
    for (name, runtime) in &state.runtimes {
        if let Some(bin_dir) = &runtime.bin_dir {
            dirs.push((name.clone(), PathBuf::from(bin_dir)));
        }
        if let Some(tool_bin) = &runtime.tool_bin_path {
            dirs.push((name.clone(), PathBuf::from(tool_bin)));
        }
    }
    dirs.retain(|(_, dir)| dir.is_dir());
    dirs.dedup_by(|a, b| a.1 == b.1);
    dirs
}

/// Diagnosis over an explicit scan set; `path_var` is the PATH used for
/// conflict-winner annotation.
pub fn diagnose_with(
    state: &StateFile,
    scan_dirs: &[(String, PathBuf)],
    path_var: &str,
) -> DoctorReport {
    let mut report = DoctorReport::default();
    let mut locations: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for (category, dir) in scan_dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_executable(&path) {
                continue;
            }
            let binary = entry.file_name().to_string_lossy().into_owned();
            locations.entry(binary.clone()).or_default().push(dir.clone());

            if !is_managed(state, &binary, category) {
                report.unmanaged.push(UnmanagedTool {
                    binary,
                    directory: dir.display().to_string(),
                    category: category.clone(),
                });
            }
        }
    }

    for (binary, dirs) in locations {
        if dirs.len() < 2 {
            continue;
        }
        let active = path_winner(&dirs, path_var);
        report.conflicts.push(Conflict {
            binary,
            directories: dirs.iter().map(|d| d.display().to_string()).collect(),
            active: active.map(|d| d.display().to_string()),
        });
    }

    check_state_entries(state, &mut report);
    log_debug!(
        "[Doctor] {} unmanaged, {} conflict(s), {} state issue(s)",
        report.unmanaged.len(),
        report.conflicts.len(),
        report.state_issues.len()
    );
    report
}

/// The managed test: (a) a tool whose runtimeRef matches the category,
/// (b) a runtime binary recorded for the category, or (c) the engine slot
/// and a tool with no runtimeRef.
fn is_managed(state: &StateFile, binary: &str, category: &str) -> bool {
    let tool_claims = state.tools.iter().any(|(_, tool)| {
        let link = basename(&tool.bin_path);
        let placed = basename(&tool.install_path);
        if link != binary && placed != binary {
            return false;
        }
        match &tool.runtime_ref {
            Some(runtime) => runtime == category,
            None => category == ENGINE_CATEGORY,
        }
    });
    if tool_claims {
        return true;
    }
    if let Some(runtime) = state.runtimes.get(category) {
        if runtime.binaries.iter().any(|b| basename(b) == binary) {
            return true;
        }
    }
    // Runtime binaries are linked into the engine slot too.
    category == ENGINE_CATEGORY
        && state
            .runtimes
            .values()
            .any(|r| r.binaries.iter().any(|b| basename(b) == binary))
}

/// The first scanned directory PATH mentions wins; directories absent
/// from PATH never win.
fn path_winner<'a>(dirs: &'a [PathBuf], path_var: &str) -> Option<&'a PathBuf> {
    for component in path_var.split(':').filter(|c| !c.is_empty()) {
        let component = Path::new(component);
        if let Some(found) = dirs.iter().find(|d| d.as_path() == component) {
            return Some(found);
        }
    }
    None
}

fn check_state_entries(state: &StateFile, report: &mut DoctorReport) {
    for (name, tool) in &state.tools {
        let install_path = Path::new(&tool.install_path);
        if !install_path.exists() {
            report.state_issues.push(StateIssue {
                resource: name.clone(),
                kind: StateIssueKind::MissingBinary,
                detail: format!("recorded binary {} does not exist", tool.install_path),
            });
        }
        check_symlink(name, &tool.bin_path, &tool.install_path, report);
    }
    for (name, runtime) in &state.runtimes {
        if !Path::new(&runtime.install_path).exists() {
            report.state_issues.push(StateIssue {
                resource: name.clone(),
                kind: StateIssueKind::MissingInstallDir,
                detail: format!("recorded install dir {} does not exist", runtime.install_path),
            });
        }
    }
}

fn check_symlink(resource: &str, bin_path: &str, install_path: &str, report: &mut DoctorReport) {
    // A bin path equal to the install path means no managed symlink
    // (command-set and bare delegation patterns).
    if bin_path == install_path {
        return;
    }
    let link = Path::new(bin_path);
    match fs::symlink_metadata(link) {
        Err(_) => report.state_issues.push(StateIssue {
            resource: resource.to_string(),
            kind: StateIssueKind::BrokenSymlink,
            detail: format!("symlink {bin_path} is missing"),
        }),
        Ok(metadata) if metadata.file_type().is_symlink() => {
            let target = fs::read_link(link).unwrap_or_default();
            if !link.exists() {
                // The link itself exists but its target is gone.
                report.state_issues.push(StateIssue {
                    resource: resource.to_string(),
                    kind: StateIssueKind::BrokenSymlink,
                    detail: format!("symlink {bin_path} dangles at {}", target.display()),
                });
            }
        }
        Ok(_) => report.state_issues.push(StateIssue {
            resource: resource.to_string(),
            kind: StateIssueKind::BrokenSymlink,
            detail: format!("{bin_path} exists but is not a symlink"),
        }),
    }
}

/// Exec bit on POSIX, with a goblin sniff for files whose mode bits were
/// lost (extracted on foreign filesystems).
fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 != 0 {
            return true;
        }
    }
    matches!(
        fs::read(path).as_deref().map(goblin::Object::parse),
        Ok(Ok(goblin::Object::Elf(_))) | Ok(Ok(goblin::Object::Mach(_)))
    )
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// ============================================================================
// RENDERING
// ============================================================================

/// Renders the report as terminal tables.
pub fn render_table(report: &DoctorReport) -> String {
    let mut out = String::new();
    if report.is_clean() {
        return "No drift detected: state and filesystem agree.\n".to_string();
    }

    if !report.unmanaged.is_empty() {
        let mut table = Table::new();
        table.add_row(row!["UNMANAGED BINARY", "DIRECTORY", "CATEGORY"]);
        for item in &report.unmanaged {
            table.add_row(row![item.binary, item.directory, item.category]);
        }
        out.push_str(&table.to_string());
    }
    if !report.conflicts.is_empty() {
        let mut table = Table::new();
        table.add_row(row!["CONFLICTING BINARY", "DIRECTORIES", "SHELL USES"]);
        for item in &report.conflicts {
            table.add_row(row![
                item.binary,
                item.directories.join("\n"),
                item.active.as_deref().unwrap_or("(not on PATH)")
            ]);
        }
        out.push_str(&table.to_string());
    }
    if !report.state_issues.is_empty() {
        let mut table = Table::new();
        table.add_row(row!["RESOURCE", "ISSUE", "DETAIL"]);
        for item in &report.state_issues {
            let kind = match item.kind {
                StateIssueKind::MissingBinary => "missing_binary",
                StateIssueKind::BrokenSymlink => "broken_symlink",
                StateIssueKind::MissingInstallDir => "missing_install_dir",
            };
            table.add_row(row![item.resource, kind, item.detail]);
        }
        out.push_str(&table.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::state_file::{RuntimeState, ToolState};
    use crate::schemas::tools::VersionKind;
    use chrono::Utc;

    fn tool_state(install: &Path, link: &Path, runtime_ref: Option<&str>) -> ToolState {
        ToolState {
            version: "1.0.0".into(),
            spec_version: "1.0.0".into(),
            version_kind: VersionKind::Exact,
            install_path: install.display().to_string(),
            bin_path: link.display().to_string(),
            digest: None,
            installer_ref: None,
            runtime_ref: runtime_ref.map(str::to_string),
            package: None,
            source: None,
            commands: None,
            updated_at: Utc::now(),
        }
    }

    fn executable(path: &Path) {
        fs::write(path, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn missing_binary_and_unmanaged_detection() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();

        // Recorded tool whose install path is gone.
        let gone = dir.path().join("data/tools/rg/14.0.0/rg");
        let link = bin.join("rg");
        let mut state = StateFile::default();
        state.tools.insert("rg".into(), tool_state(&gone, &link, None));

        // An executable nothing in state claims.
        executable(&bin.join("rogue"));

        let scan = vec![(ENGINE_CATEGORY.to_string(), bin.clone())];
        let report = diagnose_with(&state, &scan, "");

        assert!(report
            .state_issues
            .iter()
            .any(|i| i.resource == "rg" && i.kind == StateIssueKind::MissingBinary));
        assert!(report
            .state_issues
            .iter()
            .any(|i| i.resource == "rg" && i.kind == StateIssueKind::BrokenSymlink));
        assert_eq!(report.unmanaged.len(), 1);
        assert_eq!(report.unmanaged[0].binary, "rogue");
        assert_eq!(report.unmanaged[0].category, ENGINE_CATEGORY);
    }

    #[test]
    fn managed_binaries_are_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();

        let install = dir.path().join("data/tools/rg/14.0.0/rg");
        fs::create_dir_all(install.parent().unwrap()).unwrap();
        executable(&install);
        let link = bin.join("rg");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&install, &link).unwrap();

        let mut state = StateFile::default();
        state.tools.insert("rg".into(), tool_state(&install, &link, None));

        let scan = vec![(ENGINE_CATEGORY.to_string(), bin.clone())];
        let report = diagnose_with(&state, &scan, "");
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn runtime_category_claims_its_tools_and_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let go_tools = dir.path().join("go-tools");
        fs::create_dir_all(&go_tools).unwrap();
        executable(&go_tools.join("gopls"));
        executable(&go_tools.join("stray"));

        let mut state = StateFile::default();
        state.runtimes.insert(
            "go".into(),
            RuntimeState {
                version: "1.22.1".into(),
                spec_version: "1.22.1".into(),
                version_kind: VersionKind::Exact,
                install_path: dir.path().display().to_string(),
                binaries: vec![],
                bin_dir: None,
                tool_bin_path: Some(go_tools.display().to_string()),
                digest: None,
                source: None,
                commands: None,
                updated_at: Utc::now(),
            },
        );
        let gopls = go_tools.join("gopls");
        state.tools.insert("gopls".into(), tool_state(&gopls, &gopls, Some("go")));

        let scan = vec![("go".to_string(), go_tools.clone())];
        let report = diagnose_with(&state, &scan, "");
        assert_eq!(report.unmanaged.len(), 1);
        assert_eq!(report.unmanaged[0].binary, "stray");
        assert_eq!(report.unmanaged[0].category, "go");
    }

    #[test]
    fn conflicts_annotate_the_path_winner() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        executable(&first.join("rg"));
        executable(&second.join("rg"));

        let state = StateFile::default();
        let scan = vec![
            (ENGINE_CATEGORY.to_string(), first.clone()),
            ("cargo".to_string(), second.clone()),
        ];
        let path_var = format!("{}:{}", second.display(), first.display());
        let report = diagnose_with(&state, &scan, &path_var);

        assert_eq!(report.conflicts.len(), 1);
        let conflict = &report.conflicts[0];
        assert_eq!(conflict.binary, "rg");
        assert_eq!(conflict.directories.len(), 2);
        // PATH lists `second` first, so the shell uses that copy.
        assert_eq!(conflict.active.as_deref(), Some(second.display().to_string().as_str()));
    }

    #[test]
    fn dangling_symlink_reports_its_target() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let install = dir.path().join("data/tools/rg/14.0.0/rg");
        fs::create_dir_all(install.parent().unwrap()).unwrap();
        executable(&install);

        let link = bin.join("rg");
        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &link).unwrap();

        let mut state = StateFile::default();
        state.tools.insert("rg".into(), tool_state(&install, &link, None));

        let report = diagnose_with(&state, &[(ENGINE_CATEGORY.to_string(), bin)], "");
        let issue = report
            .state_issues
            .iter()
            .find(|i| i.kind == StateIssueKind::BrokenSymlink)
            .unwrap();
        assert!(issue.detail.contains("nowhere"));
    }
}
