//! # Archive Extraction
//!
//! Streaming tar extraction (gzip, xz, bz2, plain) and random-access zip
//! extraction with the safety rules every downloaded artifact must pass:
//!
//! - every output path, symlink target, and hardlink target must stay
//!   inside the destination directory after normalization — any escape is
//!   fatal (`install.invalid_link`);
//! - the executable bit of archive entries is preserved on POSIX;
//! - OS metadata paths (`__MACOSX/...`) are silently skipped.
//!
//! Tar links whose target does not exist yet (forward references, or links
//! whose parent directory materializes later) are pushed onto a deferred
//! queue and re-processed once after the main pass; a link whose target is
//! still missing then is fatal.

use crate::errors::{Error, InstallFault, Result};
use crate::libs::runctx::RunCtx;
use crate::{log_debug, log_warn};
use bzip2::read::BzDecoder;
use colored::Colorize;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use xz2::read::XzDecoder;
use zip::ZipArchive;

/// Archive formats the extractor understands. `Raw` means a single
/// executable with no container; the placer consumes it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    TarXz,
    TarBz2,
    Tar,
    Zip,
    Raw,
}

impl ArchiveKind {
    /// Parses an explicit archive-type hint as written in manifests.
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint {
            "tar.gz" | "tgz" => Some(ArchiveKind::TarGz),
            "tar.xz" | "txz" => Some(ArchiveKind::TarXz),
            "tar.bz2" | "tbz2" => Some(ArchiveKind::TarBz2),
            "tar" => Some(ArchiveKind::Tar),
            "zip" => Some(ArchiveKind::Zip),
            "raw" => Some(ArchiveKind::Raw),
            _ => None,
        }
    }

    /// Infers the archive type from a filename suffix.
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Some(ArchiveKind::TarXz)
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Some(ArchiveKind::TarBz2)
        } else if lower.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }

    /// Resolves the effective archive type: an explicit caller hint wins,
    /// then filename inference. No hint and no recognizable suffix is fatal.
    pub fn resolve(hint: Option<&str>, filename: &str, resource: &str) -> Result<Self> {
        if let Some(hint) = hint {
            return ArchiveKind::from_hint(hint).ok_or_else(|| Error::Install {
                fault: InstallFault::UnsupportedArchive,
                resource: resource.to_string(),
                action: "extract".to_string(),
                version: None,
                url: None,
                message: format!("unsupported archive type '{hint}'"),
            });
        }
        ArchiveKind::from_filename(filename).ok_or_else(|| Error::Install {
            fault: InstallFault::UnsupportedArchive,
            resource: resource.to_string(),
            action: "extract".to_string(),
            version: None,
            url: None,
            message: format!("cannot infer archive type of '{filename}'"),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarXz => "tar.xz",
            ArchiveKind::TarBz2 => "tar.bz2",
            ArchiveKind::Tar => "tar",
            ArchiveKind::Zip => "zip",
            ArchiveKind::Raw => "raw",
        }
    }
}

/// Extracts an archive file into `dest`, dispatching on its kind.
/// `Raw` artifacts are copied into `dest` under their original filename.
pub fn extract_archive(
    src: &Path,
    dest: &Path,
    kind: ArchiveKind,
    resource: &str,
    ctx: &RunCtx,
) -> Result<()> {
    log_debug!(
        "[Archive] Extracting {} ({}) into {}",
        src.display().to_string().blue(),
        kind.name(),
        dest.display().to_string().cyan()
    );
    fs::create_dir_all(dest).map_err(|e| extract_failed(resource, dest, &e))?;

    match kind {
        ArchiveKind::TarGz => {
            let file = File::open(src).map_err(|e| extract_failed(resource, src, &e))?;
            extract_tar(GzDecoder::new(file), dest, resource, ctx)
        }
        ArchiveKind::TarXz => {
            let file = File::open(src).map_err(|e| extract_failed(resource, src, &e))?;
            extract_tar(XzDecoder::new(file), dest, resource, ctx)
        }
        ArchiveKind::TarBz2 => {
            let file = File::open(src).map_err(|e| extract_failed(resource, src, &e))?;
            extract_tar(BzDecoder::new(file), dest, resource, ctx)
        }
        ArchiveKind::Tar => {
            let file = File::open(src).map_err(|e| extract_failed(resource, src, &e))?;
            extract_tar(file, dest, resource, ctx)
        }
        ArchiveKind::Zip => extract_zip(src, dest, resource, ctx),
        ArchiveKind::Raw => {
            let name = src
                .file_name()
                .ok_or_else(|| extract_failed(resource, src, &"source has no filename"))?;
            fs::copy(src, dest.join(name)).map_err(|e| extract_failed(resource, src, &e))?;
            Ok(())
        }
    }
}

// ============================================================================
// TAR
// ============================================================================

/// A symlink or hardlink whose target was not present when its entry was
/// read; re-tried once after the main pass.
#[derive(Debug)]
struct DeferredLink {
    /// Absolute path of the link to create.
    link_path: PathBuf,
    /// Link target exactly as declared in the archive.
    declared: PathBuf,
    /// The declared target resolved to an absolute in-destination path.
    resolved: PathBuf,
    kind: LinkKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Symlink,
    Hardlink,
}

/// Streams a tar archive entry by entry. Works for any sequential byte
/// source, so the compression decoders wrap transparently.
pub fn extract_tar<R: Read>(reader: R, dest: &Path, resource: &str, ctx: &RunCtx) -> Result<()> {
    let mut archive = Archive::new(reader);
    let mut deferred: Vec<DeferredLink> = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| extract_failed(resource, dest, &e))?;
    for entry in entries {
        ctx.check_cancelled(resource, "extract")?;
        let mut entry = entry.map_err(|e| extract_failed(resource, dest, &e))?;

        let rel_path = entry
            .path()
            .map_err(|e| extract_failed(resource, dest, &e))?
            .into_owned();
        if is_os_metadata(&rel_path) {
            log_debug!("[Archive] Skipping OS metadata entry {:?}", rel_path);
            continue;
        }
        let out_path = safe_join(dest, &rel_path, resource)?;
        let mode = entry.header().mode().ok();

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&out_path).map_err(|e| extract_failed(resource, &out_path, &e))?;
                apply_mode(&out_path, mode);
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent).map_err(|e| extract_failed(resource, parent, &e))?;
                }
                let mut file =
                    File::create(&out_path).map_err(|e| extract_failed(resource, &out_path, &e))?;
                io::copy(&mut entry, &mut file).map_err(|e| extract_failed(resource, &out_path, &e))?;
                apply_mode(&out_path, mode);
            }
            EntryType::Symlink => {
                let declared = link_target(&entry, resource, &out_path)?;
                stage_link(dest, &out_path, &declared, LinkKind::Symlink, resource, &mut deferred)?;
            }
            EntryType::Link => {
                let declared = link_target(&entry, resource, &out_path)?;
                stage_link(dest, &out_path, &declared, LinkKind::Hardlink, resource, &mut deferred)?;
            }
            other => {
                // Character devices, FIFOs and friends have no business in a
                // tool archive.
                log_warn!(
                    "[Archive] Skipping unsupported tar entry type {:?} at {:?}",
                    other,
                    rel_path
                );
            }
        }
    }

    // Single deferred pass: targets declared later in the archive now exist.
    for link in deferred {
        if !link.resolved.exists() && fs::symlink_metadata(&link.resolved).is_err() {
            return Err(invalid_link(
                resource,
                &link.link_path,
                &link.declared,
                "link target does not exist after extraction",
            ));
        }
        create_link(&link.link_path, &link.declared, &link.resolved, link.kind, resource)?;
    }
    Ok(())
}

/// Reads and validates a tar link target; absolute targets are rejected
/// outright.
fn link_target<R: Read>(entry: &tar::Entry<'_, R>, resource: &str, link_path: &Path) -> Result<PathBuf> {
    let target = entry
        .link_name()
        .ok()
        .flatten()
        .map(|t| t.into_owned())
        .ok_or_else(|| {
            invalid_link(resource, link_path, Path::new("?"), "entry carries no link target")
        })?;
    if target.is_absolute() {
        return Err(invalid_link(resource, link_path, &target, "invalid symlink target"));
    }
    Ok(target)
}

/// Validates a link against the destination and either creates it now (the
/// target already exists) or defers it to the post-pass.
fn stage_link(
    dest: &Path,
    link_path: &Path,
    declared: &Path,
    kind: LinkKind,
    resource: &str,
    deferred: &mut Vec<DeferredLink>,
) -> Result<()> {
    // Targets resolve relative to the link's own directory.
    let link_dir = link_path.parent().unwrap_or(dest);
    let resolved = lexical_normalize(&link_dir.join(declared));
    if !resolved.starts_with(dest) {
        return Err(invalid_link(resource, link_path, declared, "invalid symlink target"));
    }

    if resolved.exists() || fs::symlink_metadata(&resolved).is_ok() {
        create_link(link_path, declared, &resolved, kind, resource)
    } else {
        log_debug!(
            "[Archive] Deferring {:?} link {:?} -> {:?} (target not present yet)",
            kind,
            link_path,
            declared
        );
        deferred.push(DeferredLink {
            link_path: link_path.to_path_buf(),
            declared: declared.to_path_buf(),
            resolved,
            kind,
        });
        Ok(())
    }
}

fn create_link(
    link_path: &Path,
    declared: &Path,
    resolved: &Path,
    kind: LinkKind,
    resource: &str,
) -> Result<()> {
    if let Some(parent) = link_path.parent() {
        fs::create_dir_all(parent).map_err(|e| extract_failed(resource, parent, &e))?;
    }
    // Re-extraction over an existing tree replaces stale links.
    if fs::symlink_metadata(link_path).is_ok() {
        let _ = fs::remove_file(link_path);
    }
    match kind {
        LinkKind::Symlink => {
            #[cfg(unix)]
            std::os::unix::fs::symlink(declared, link_path)
                .map_err(|e| extract_failed(resource, link_path, &e))?;
            #[cfg(not(unix))]
            return Err(invalid_link(resource, link_path, declared, "symlinks unsupported here"));
        }
        LinkKind::Hardlink => {
            fs::hard_link(resolved, link_path).map_err(|e| extract_failed(resource, link_path, &e))?;
        }
    }
    Ok(())
}

// ============================================================================
// ZIP
// ============================================================================

/// Extracts a zip archive. Zip needs random access, so the source is a file
/// path rather than a stream; callers staging from a network stream write a
/// temp file first.
pub fn extract_zip(src: &Path, dest: &Path, resource: &str, ctx: &RunCtx) -> Result<()> {
    let file = File::open(src).map_err(|e| extract_failed(resource, src, &e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| extract_failed(resource, src, &e))?;

    for index in 0..archive.len() {
        ctx.check_cancelled(resource, "extract")?;
        let mut entry = archive
            .by_index(index)
            .map_err(|e| extract_failed(resource, src, &e))?;

        // `enclosed_name` refuses absolute and parent-escaping names; a
        // rejected name is a traversal attempt, not a skippable oddity.
        let Some(rel_path) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(invalid_link(
                resource,
                Path::new(entry.name()),
                Path::new(entry.name()),
                "zip entry escapes the destination directory",
            ));
        };
        if is_os_metadata(&rel_path) {
            continue;
        }
        let out_path = safe_join(dest, &rel_path, resource)?;

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| extract_failed(resource, &out_path, &e))?;
            apply_mode(&out_path, entry.unix_mode());
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| extract_failed(resource, parent, &e))?;
        }
        let mut out =
            File::create(&out_path).map_err(|e| extract_failed(resource, &out_path, &e))?;
        io::copy(&mut entry, &mut out).map_err(|e| extract_failed(resource, &out_path, &e))?;
        apply_mode(&out_path, entry.unix_mode());
    }
    Ok(())
}

// ============================================================================
// PATH SAFETY
// ============================================================================

/// Joins an archive-relative path onto the destination, rejecting absolute
/// paths and any `..` component. The check is on components, never on a
/// leading dot: `.config/` is a legitimate name.
fn safe_join(dest: &Path, rel: &Path, resource: &str) -> Result<PathBuf> {
    if rel.is_absolute() {
        return Err(invalid_link(resource, rel, rel, "absolute entry path"));
    }
    for component in rel.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid_link(resource, rel, rel, "entry path escapes the destination"));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(dest.join(rel))
}

/// Lexically resolves `.` and `..` components without touching the
/// filesystem, so containment can be judged before a link exists.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// True for paths macOS archivers sprinkle into zips and tarballs.
fn is_os_metadata(path: &Path) -> bool {
    matches!(
        path.components().next(),
        Some(Component::Normal(first)) if first == "__MACOSX"
    )
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777));
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) {}

fn invalid_link(resource: &str, path: &Path, target: &Path, detail: &str) -> Error {
    Error::Install {
        fault: InstallFault::InvalidLink,
        resource: resource.to_string(),
        action: "extract".to_string(),
        version: None,
        url: None,
        message: format!("{detail}: {} -> {}", path.display(), target.display()),
    }
}

fn extract_failed(resource: &str, path: &Path, err: &dyn std::fmt::Display) -> Error {
    Error::Install {
        fault: InstallFault::Failed,
        resource: resource.to_string(),
        action: "extract".to_string(),
        version: None,
        url: None,
        message: format!("extraction failed at {}: {err}", path.display()),
    }
}
