//! # State Persistence
//!
//! Loads and saves the engine's state document and guards a run with the
//! advisory lockfile. The state file is rewritten atomically (write to a
//! temp file in the same directory, then rename), so a crash never leaves
//! a half-written document. The lockfile records the holder's PID; a held
//! lock refuses the run and surfaces that PID.

use crate::errors::{Error, Result, StateFault};
use crate::schemas::path_resolver::PathResolver;
use crate::schemas::state_file::StateFile;
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// RAII guard over the advisory lockfile; dropping it releases the lock.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log_warn!("[State] Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Acquires the state lock, creating the data dir on first use.
///
/// The lock is advisory: creation with `create_new` is the atomic claim.
/// When the file already exists the holder's PID is read back and surfaced
/// in the error.
pub fn acquire_lock(paths: &PathResolver) -> Result<StateLock> {
    fs::create_dir_all(paths.data_dir()).map_err(|e| Error::State {
        fault: StateFault::Io,
        lock_pid: None,
        lock_file: None,
        message: format!("cannot create data dir {}: {e}", paths.data_dir().display()),
        source: Some(Box::new(e)),
    })?;

    let lock_path = paths.lock_file();
    match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
        Ok(mut file) => {
            let _ = write!(file, "{}", std::process::id());
            log_debug!("[State] Acquired lock {}", lock_path.display().to_string().dimmed());
            Ok(StateLock { path: lock_path })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let holder = fs::read_to_string(&lock_path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());
            Err(Error::State {
                fault: StateFault::Locked,
                lock_pid: holder,
                lock_file: Some(lock_path.display().to_string()),
                message: match holder {
                    Some(pid) => format!("state lock is held by pid {pid}"),
                    None => "state lock is held by another process".to_string(),
                },
                source: None,
            })
        }
        Err(e) => Err(Error::State {
            fault: StateFault::Io,
            lock_pid: None,
            lock_file: Some(lock_path.display().to_string()),
            message: format!("cannot create lock file: {e}"),
            source: Some(Box::new(e)),
        }),
    }
}

/// Loads the state document, or an empty one when none exists yet.
pub fn load_state(paths: &PathResolver) -> Result<StateFile> {
    let state_path = paths.state_file();
    if !state_path.exists() {
        log_info!(
            "[State] No state file at {}; starting fresh",
            state_path.display().to_string().yellow()
        );
        return Ok(StateFile::default());
    }
    let raw = fs::read_to_string(&state_path).map_err(|e| Error::State {
        fault: StateFault::Io,
        lock_pid: None,
        lock_file: None,
        message: format!("cannot read state file {}: {e}", state_path.display()),
        source: Some(Box::new(e)),
    })?;
    let state = serde_json::from_str(&raw).map_err(|e| Error::State {
        fault: StateFault::Io,
        lock_pid: None,
        lock_file: None,
        message: format!(
            "state file {} is not valid: {e}; fix or delete it to start fresh",
            state_path.display()
        ),
        source: Some(Box::new(e)),
    })?;
    log_debug!("[State] Loaded state from {}", state_path.display().to_string().cyan());
    Ok(state)
}

/// Saves the state document atomically: serialize to a temp file next to
/// the target, then rename over it. The target's parent is created on
/// demand, so a relocated state file (`$TOOLSMITH_STATE_FILE`) works
/// without setup.
pub fn save_state(state: &StateFile, paths: &PathResolver) -> Result<()> {
    let state_path = paths.state_file();
    let serialized = serde_json::to_string_pretty(state).map_err(|e| Error::State {
        fault: StateFault::Io,
        lock_pid: None,
        lock_file: None,
        message: format!("cannot serialize state: {e}"),
        source: Some(Box::new(e)),
    })?;

    let io_err = |detail: String, e: std::io::Error| Error::State {
        fault: StateFault::Io,
        lock_pid: None,
        lock_file: None,
        message: detail,
        source: Some(Box::new(e)),
    };

    // Staging lives next to the target so the rename stays on one
    // filesystem.
    let staging_dir = state_path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(staging_dir)
        .map_err(|e| io_err(format!("cannot create state dir {}: {e}", staging_dir.display()), e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(staging_dir)
        .map_err(|e| io_err(format!("cannot create temp state file: {e}"), e))?;
    tmp.write_all(serialized.as_bytes())
        .map_err(|e| io_err(format!("cannot write temp state file: {e}"), e))?;
    tmp.persist(&state_path).map_err(|e| {
        let detail = format!("cannot move state into place at {}: {e}", state_path.display());
        io_err(detail, e.error)
    })?;
    log_debug!("[State] Saved state to {}", state_path.display().to_string().cyan());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::config::Config;

    fn fixture() -> (tempfile::TempDir, PathResolver) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().join("data"),
            bin_dir: dir.path().join("bin"),
            env_dir: dir.path().join("env"),
            schema_dir: None,
        };
        let paths = PathResolver::new(&config);
        (dir, paths)
    }

    #[test]
    fn lock_is_exclusive_and_carries_holder_pid() {
        let (_dir, paths) = fixture();
        let lock = acquire_lock(&paths).unwrap();

        let err = acquire_lock(&paths).unwrap_err();
        assert_eq!(err.code(), "state.locked");
        assert!(err.is_precondition_failure());
        let json = err.to_json();
        assert_eq!(json["fields"]["lockPid"], std::process::id());

        drop(lock);
        // Released on drop; a new run can claim it.
        let _lock = acquire_lock(&paths).unwrap();
    }

    #[test]
    fn state_roundtrip_and_fresh_start() {
        let (_dir, paths) = fixture();
        fs::create_dir_all(paths.data_dir()).unwrap();

        let empty = load_state(&paths).unwrap();
        assert!(empty.tools.is_empty());

        let mut state = StateFile::default();
        state.tools.insert(
            "rg".into(),
            crate::schemas::state_file::ToolState {
                version: "14.0.0".into(),
                spec_version: "14.0.0".into(),
                version_kind: crate::schemas::tools::VersionKind::Exact,
                install_path: "/x/rg".into(),
                bin_path: "/b/rg".into(),
                digest: None,
                installer_ref: None,
                runtime_ref: None,
                package: None,
                source: None,
                commands: None,
                updated_at: chrono::Utc::now(),
            },
        );
        save_state(&state, &paths).unwrap();
        let back = load_state(&paths).unwrap();
        assert_eq!(back, state);
        // The atomic write leaves no temp debris behind.
        let entries: Vec<_> = fs::read_dir(paths.data_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["state.json".to_string()]);
    }

    #[test]
    fn state_file_override_redirects_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().join("data"),
            bin_dir: dir.path().join("bin"),
            env_dir: dir.path().join("env"),
            schema_dir: None,
        };
        // The explicit override stands in for $TOOLSMITH_STATE_FILE; both
        // flow through the same constructor.
        let relocated = dir.path().join("elsewhere/custom-state.json");
        let paths = PathResolver::with_state_file(&config, Some(relocated.clone()));
        assert_eq!(paths.state_file(), relocated);

        let state = StateFile::default();
        save_state(&state, &paths).unwrap();
        assert!(relocated.exists());
        // The default location stays untouched.
        assert!(!dir.path().join("data/state.json").exists());

        let back = load_state(&paths).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn corrupt_state_is_a_state_error() {
        let (_dir, paths) = fixture();
        fs::create_dir_all(paths.data_dir()).unwrap();
        fs::write(paths.state_file(), "{not json").unwrap();
        let err = load_state(&paths).unwrap_err();
        assert_eq!(err.code(), "state.io");
    }
}
