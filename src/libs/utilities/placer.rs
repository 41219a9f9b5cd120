//! # Placer
//!
//! Moves binaries into the versioned layout and maintains the stable
//! symlinks under `binDir`. The placer owns three guarantees:
//!
//! - idempotent placement: the validate step compares the on-disk binary's
//!   SHA-256 against the expected digest and reports `Skip` when nothing
//!   changed (an empty expected digest matches any present binary);
//! - atomic symlink retargeting: the link is created at a temporary name
//!   and renamed over the final path, so an observer always resolves either
//!   the previous install or the new one, never a half state;
//! - tolerant cleanup of scratch directories.

use crate::errors::{Error, InstallFault, Result};
use crate::libs::utilities::checksum::{self, Algorithm};
use crate::schemas::path_resolver::PathResolver;
use crate::{log_debug, log_info};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What the validate step decided about an already-targeted binary path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceDecision {
    /// Nothing on disk; proceed with a fresh install.
    Install,
    /// The binary is present and matches; no download, no extraction.
    Skip,
    /// The binary is present but differs; caller must hold a force flag.
    Replace,
}

/// Places binaries and maintains symlinks for one engine configuration.
#[derive(Debug, Clone)]
pub struct Placer {
    paths: PathResolver,
}

impl Placer {
    pub fn new(paths: PathResolver) -> Self {
        Placer { paths }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    /// Decides between install, skip and replace for `target`.
    ///
    /// An empty `expected_digest` means "match anything if present": used
    /// for archive sources whose manifest checksum covers the archive, not
    /// the placed binary.
    pub fn validate(&self, target: &Path, expected_digest: &str) -> Result<PlaceDecision> {
        if !target.exists() {
            return Ok(PlaceDecision::Install);
        }
        if expected_digest.is_empty() {
            log_debug!("[Placer] {} present, no digest pinned; skipping", target.display());
            return Ok(PlaceDecision::Skip);
        }
        let actual = checksum::file_digest(target, Algorithm::Sha256).map_err(|e| {
            place_failed(target, &format!("cannot hash existing binary: {e}"))
        })?;
        if actual == expected_digest.to_lowercase() {
            log_debug!("[Placer] {} matches pinned digest; skipping", target.display());
            Ok(PlaceDecision::Skip)
        } else {
            log_debug!(
                "[Placer] {} differs from pinned digest (have {}, want {})",
                target.display(),
                actual.dimmed(),
                expected_digest.dimmed()
            );
            Ok(PlaceDecision::Replace)
        }
    }

    /// Copies the named binary out of an extraction tree into `target`,
    /// creating the destination directory chain. The binary is located by
    /// filename anywhere under `src_dir`, depth-first, first match wins.
    ///
    /// # Returns
    /// The destination path.
    pub fn place(&self, src_dir: &Path, binary: &str, target: &Path) -> Result<PathBuf> {
        let found = WalkDir::new(src_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == binary)
            .map(|e| e.into_path())
            .ok_or_else(|| {
                place_failed(src_dir, &format!("binary '{binary}' not found in extracted contents"))
            })?;
        log_debug!(
            "[Placer] Found binary at {}",
            found.display().to_string().cyan()
        );

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| place_failed(parent, &format!("cannot create install dir: {e}")))?;
        }
        // fs::copy carries the permission bits, so the executable bit
        // preserved by extraction survives placement.
        fs::copy(&found, target)
            .map_err(|e| place_failed(target, &format!("cannot copy binary: {e}")))?;
        ensure_executable(target)?;
        log_info!("[Placer] Placed {}", target.display().to_string().green());
        Ok(target.to_path_buf())
    }

    /// Points `binDir/<link_name>` at `target`, atomically.
    ///
    /// The new link is created under a temporary name next to the final one
    /// and renamed into place; rename replaces an existing link in one
    /// step, so the name either resolves to the prior install or the new
    /// one at every instant.
    ///
    /// # Returns
    /// The link path.
    pub fn symlink(&self, target: &Path, link_name: &str) -> Result<PathBuf> {
        let bin_dir = self.paths.bin_dir();
        fs::create_dir_all(bin_dir)
            .map_err(|e| place_failed(bin_dir, &format!("cannot create bin dir: {e}")))?;

        let link = self.paths.link_path(link_name);
        let staging = bin_dir.join(format!(".{link_name}.toolsmith-{}", std::process::id()));
        // A leftover staging link from a crashed run must not block us.
        if fs::symlink_metadata(&staging).is_ok() {
            let _ = fs::remove_file(&staging);
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(target, &staging)
            .map_err(|e| place_failed(&staging, &format!("cannot create symlink: {e}")))?;
        #[cfg(not(unix))]
        return Err(place_failed(&link, "symlinks are not supported on this platform"));

        fs::rename(&staging, &link).map_err(|e| {
            let _ = fs::remove_file(&staging);
            place_failed(&link, &format!("cannot retarget symlink: {e}"))
        })?;
        log_debug!(
            "[Placer] {} -> {}",
            link.display().to_string().green(),
            target.display().to_string().cyan()
        );
        Ok(link)
    }

    /// Removes a directory tree, tolerating its absence.
    pub fn cleanup(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(place_failed(path, &format!("cleanup failed: {e}"))),
        }
    }
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata =
        fs::metadata(path).map_err(|e| place_failed(path, &format!("cannot stat binary: {e}")))?;
    let mut permissions = metadata.permissions();
    if permissions.mode() & 0o111 == 0 {
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions)
            .map_err(|e| place_failed(path, &format!("cannot set permissions: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn place_failed(path: &Path, detail: &str) -> Error {
    Error::Install {
        fault: InstallFault::Failed,
        resource: path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default(),
        action: "place".to_string(),
        version: None,
        url: None,
        message: format!("{detail} ({})", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::config::Config;

    fn fixture() -> (tempfile::TempDir, Placer) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().join("data"),
            bin_dir: dir.path().join("bin"),
            env_dir: dir.path().join("env"),
            schema_dir: None,
        };
        let placer = Placer::new(PathResolver::new(&config));
        (dir, placer)
    }

    #[test]
    fn validate_decides_install_skip_replace() {
        let (dir, placer) = fixture();
        let target = dir.path().join("data/tools/rg/14.0.0/rg");
        assert_eq!(placer.validate(&target, "").unwrap(), PlaceDecision::Install);

        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"hello world").unwrap();
        let digest = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        assert_eq!(placer.validate(&target, digest).unwrap(), PlaceDecision::Skip);
        // Empty digest matches any present binary.
        assert_eq!(placer.validate(&target, "").unwrap(), PlaceDecision::Skip);
        let other = "a".repeat(64);
        assert_eq!(placer.validate(&target, &other).unwrap(), PlaceDecision::Replace);
    }

    #[test]
    fn place_finds_nested_binary_and_preserves_mode() {
        let (dir, placer) = fixture();
        let extracted = dir.path().join("extracted");
        let nested = extracted.join("pkg-1.0/bin");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("rg"), b"binary bits").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(nested.join("rg"), fs::Permissions::from_mode(0o755)).unwrap();
        }

        let target = placer.paths().tool_binary_path("rg", "14.0.0", "rg");
        let placed = placer.place(&extracted, "rg", &target).unwrap();
        assert_eq!(placed, target);
        assert_eq!(fs::read(&target).unwrap(), b"binary bits");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_ne!(fs::metadata(&target).unwrap().permissions().mode() & 0o111, 0);
        }
    }

    #[test]
    fn place_fails_when_binary_absent() {
        let (dir, placer) = fixture();
        let extracted = dir.path().join("empty");
        fs::create_dir_all(&extracted).unwrap();
        let target = placer.paths().tool_binary_path("rg", "14.0.0", "rg");
        let err = placer.place(&extracted, "rg", &target).unwrap_err();
        assert_eq!(err.code(), "install.failed");
    }

    #[test]
    fn symlink_retargets_atomically_across_versions() {
        let (dir, placer) = fixture();
        let old = dir.path().join("data/tools/rg/13.0.0/rg");
        let new = dir.path().join("data/tools/rg/14.0.0/rg");
        for p in [&old, &new] {
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, b"x").unwrap();
        }

        let link = placer.symlink(&old, "rg").unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), old);

        // Retarget over the existing link; the path never disappears.
        let link = placer.symlink(&new, "rg").unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), new);
        // No staging debris left behind.
        let leftovers: Vec<_> = fs::read_dir(placer.paths().bin_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("toolsmith-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn cleanup_tolerates_missing_paths() {
        let (dir, placer) = fixture();
        placer.cleanup(&dir.path().join("never-existed")).unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(scratch.join("inner")).unwrap();
        placer.cleanup(&scratch).unwrap();
        assert!(!scratch.exists());
    }
}
