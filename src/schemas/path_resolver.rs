// =========================================================================== //
//                                PATH MODEL                                   //
// =========================================================================== //
//
// Deterministic install/link/state paths from logical identity. Every
// subsystem that touches disk derives its locations here, so the layout
// invariants live in exactly one place:
//
//   <dataDir>/state.json      (or $TOOLSMITH_STATE_FILE)
//   <dataDir>/state.lock
//   <dataDir>/tools/<name>/<version>/<binary>
//   <dataDir>/runtimes/<name>/<version>/...
//   <binDir>/<binary>                     (stable symlink)

use crate::schemas::config::{Config, expand_tilde};
use std::path::{Path, PathBuf};

/// Environment variable overriding the state-file location; the
/// companion of `TOOLSMITH_CONFIG`.
pub const STATE_FILE_ENV: &str = "TOOLSMITH_STATE_FILE";

/// Central path resolution service, initialized once from the engine
/// config and passed around by reference.
#[derive(Debug, Clone)]
pub struct PathResolver {
    data_dir: PathBuf,
    bin_dir: PathBuf,
    state_file: PathBuf,
}

impl PathResolver {
    /// Resolves paths from the engine config; `$TOOLSMITH_STATE_FILE`,
    /// when set, relocates the state file.
    pub fn new(config: &Config) -> Self {
        Self::with_state_file(config, std::env::var_os(STATE_FILE_ENV).map(PathBuf::from))
    }

    /// Same, with an explicit state-file override. The override wins over
    /// the environment variable; tilde prefixes expand. An empty override
    /// falls back to the default location.
    pub fn with_state_file(config: &Config, state_file: Option<PathBuf>) -> Self {
        let state_file = state_file
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| expand_tilde(&p))
            .unwrap_or_else(|| config.data_dir.join("state.json"));
        PathResolver {
            data_dir: config.data_dir.clone(),
            bin_dir: config.bin_dir.clone(),
            state_file,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// The persisted state document: `<dataDir>/state.json` unless
    /// relocated by `$TOOLSMITH_STATE_FILE` or an explicit override.
    pub fn state_file(&self) -> PathBuf {
        self.state_file.clone()
    }

    /// `<dataDir>/state.lock` — the advisory lockfile guarding a run.
    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join("state.lock")
    }

    /// `<dataDir>/registry/` — cached package-info documents.
    pub fn registry_cache_dir(&self) -> PathBuf {
        self.data_dir.join("registry")
    }

    /// `<dataDir>/tools/<name>/<version>` — a tool's versioned directory.
    pub fn tool_install_dir(&self, name: &str, version: &str) -> PathBuf {
        self.data_dir.join("tools").join(name).join(version)
    }

    /// `<dataDir>/tools/<name>/<version>/<binary>` — the placed binary.
    pub fn tool_binary_path(&self, name: &str, version: &str, binary: &str) -> PathBuf {
        self.tool_install_dir(name, version).join(binary)
    }

    /// `<dataDir>/tools/<name>` — all versions of one tool.
    pub fn tool_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join("tools").join(name)
    }

    /// `<dataDir>/runtimes/<name>/<version>` — a runtime's versioned tree.
    pub fn runtime_install_dir(&self, name: &str, version: &str) -> PathBuf {
        self.data_dir.join("runtimes").join(name).join(version)
    }

    /// `<dataDir>/runtimes/<name>` — all versions of one runtime.
    pub fn runtime_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join("runtimes").join(name)
    }

    /// `<binDir>/<binary>` — the stable symlink callers put on PATH.
    pub fn link_path(&self, binary: &str) -> PathBuf {
        self.bin_dir.join(binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        let config = Config {
            data_dir: PathBuf::from("/home/u/.toolsmith"),
            bin_dir: PathBuf::from("/home/u/.local/bin"),
            env_dir: PathBuf::from("/home/u/.toolsmith/env"),
            schema_dir: None,
        };
        PathResolver::new(&config)
    }

    #[test]
    fn layout_is_deterministic() {
        let paths = resolver();
        assert_eq!(
            paths.tool_binary_path("rg", "14.0.0", "rg"),
            PathBuf::from("/home/u/.toolsmith/tools/rg/14.0.0/rg")
        );
        assert_eq!(
            paths.runtime_install_dir("go", "1.22.1"),
            PathBuf::from("/home/u/.toolsmith/runtimes/go/1.22.1")
        );
        assert_eq!(paths.link_path("rg"), PathBuf::from("/home/u/.local/bin/rg"));
        assert_eq!(paths.lock_file(), PathBuf::from("/home/u/.toolsmith/state.lock"));
    }

    #[test]
    fn state_file_defaults_and_overrides() {
        let config = Config {
            data_dir: PathBuf::from("/home/u/.toolsmith"),
            bin_dir: PathBuf::from("/home/u/.local/bin"),
            env_dir: PathBuf::from("/home/u/.toolsmith/env"),
            schema_dir: None,
        };
        let paths = PathResolver::with_state_file(&config, None);
        assert_eq!(paths.state_file(), PathBuf::from("/home/u/.toolsmith/state.json"));

        let paths =
            PathResolver::with_state_file(&config, Some(PathBuf::from("/mnt/sync/state.json")));
        assert_eq!(paths.state_file(), PathBuf::from("/mnt/sync/state.json"));

        // Empty override means unset, not "the current directory".
        let paths = PathResolver::with_state_file(&config, Some(PathBuf::new()));
        assert_eq!(paths.state_file(), PathBuf::from("/home/u/.toolsmith/state.json"));
    }
}
