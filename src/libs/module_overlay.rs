//! # Module Overlay
//!
//! Manifest directories may import shared packages (presets, the schema
//! pin) under the `toolsmith.dev/` prefix. When the user manages a module
//! file (`module.yaml` in the directory or an ancestor), their module is
//! respected verbatim; when none exists, a virtual module is synthesized
//! on the fly and the engine's embedded packages answer the imports.
//!
//! Resolution goes through the [`SourceResolver`] seam: an in-memory map
//! is consulted before the real filesystem, so tests (and vendored module
//! trees) can inject arbitrary packages.

use crate::errors::Result;
use crate::log_debug;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Conventional import prefix for engine-provided packages.
pub const IMPORT_PREFIX: &str = "toolsmith.dev";

/// Name of a user-managed module file.
pub const MODULE_FILE_NAME: &str = "module.yaml";

/// Resolves an import path to manifest source text.
pub trait SourceResolver {
    fn resolve(&self, import_path: &str) -> Option<String>;
}

/// In-memory overlay consulted before the filesystem.
#[derive(Debug, Clone, Default)]
pub struct ModuleOverlay {
    entries: HashMap<String, String>,
}

impl ModuleOverlay {
    /// The overlay holding the engine's embedded packages.
    pub fn embedded() -> Self {
        let mut entries = HashMap::new();
        entries.insert(format!("{IMPORT_PREFIX}/schema"), EMBEDDED_SCHEMA.to_string());
        entries.insert(format!("{IMPORT_PREFIX}/presets/go"), PRESET_GO.to_string());
        entries.insert(format!("{IMPORT_PREFIX}/presets/rust"), PRESET_RUST.to_string());
        ModuleOverlay { entries }
    }

    /// An empty overlay: imports resolve from disk only. Used when the
    /// user manages their own module file.
    pub fn none() -> Self {
        ModuleOverlay::default()
    }

    pub fn insert(&mut self, import_path: impl Into<String>, source: impl Into<String>) {
        self.entries.insert(import_path.into(), source.into());
    }

    pub fn import_paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl SourceResolver for ModuleOverlay {
    fn resolve(&self, import_path: &str) -> Option<String> {
        self.entries.get(import_path).cloned()
    }
}

/// A parsed user-managed module file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModuleFile {
    /// The module path this directory tree publishes under.
    pub module: String,
    /// Declared dependency pins, `import path -> version`.
    #[serde(default)]
    pub deps: BTreeMap<String, String>,
}

/// Verification hook for user-managed module files. Called once per unique
/// module-file location with the declared dependency set; non-success is
/// fatal for the load.
pub trait ModuleVerifier {
    fn verify(&self, module_file: &Path, deps: &BTreeMap<String, String>) -> Result<()>;
}

/// Walks a directory and its ancestors looking for a user-managed module
/// file.
pub fn find_module_file(dir: &Path) -> Option<PathBuf> {
    let mut current = Some(dir);
    while let Some(dir) = current {
        let candidate = dir.join(MODULE_FILE_NAME);
        if candidate.is_file() {
            log_debug!("[Module] Found user-managed module file at {:?}", candidate);
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

/// Reads and parses a module file; parse failures degrade to an empty
/// declaration (the verifier still sees the location).
pub fn read_module_file(path: &Path) -> ModuleFile {
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_yaml::from_str(&raw).ok())
        .unwrap_or_default()
}

// ============================================================================
// EMBEDDED PACKAGES
// ============================================================================

/// The embedded schema package source, for `schema update` to write as a
/// fresh user-side pin.
pub fn embedded_schema() -> &'static str {
    EMBEDDED_SCHEMA
}

/// The schema package: the apiVersion constant user schema pins are
/// compared against. Carries no resources.
const EMBEDDED_SCHEMA: &str = r#"# toolsmith embedded schema package
schemaVersion: toolsmith.dev/v1alpha1
kinds:
  - Tool
  - ToolSet
  - Runtime
  - Installer
  - InstallerRepository
  - SystemInstaller
  - SystemPackageRepository
  - SystemPackageSet
"#;

/// Go toolchain preset: a download runtime whose URL interpolates the
/// platform tags.
const PRESET_GO: &str = r#"# toolsmith preset: Go toolchain
- apiVersion: toolsmith.dev/v1alpha1
  kind: Runtime
  metadata:
    name: go
    description: Go toolchain, installed from the official archives
  spec:
    type: download
    version: "1.22.1"
    source:
      url: "https://go.dev/dl/go1.22.1.<os>-<arch>.tar.gz"
    binaries:
      - go/bin/go
      - go/bin/gofmt
    toolBinPath: ~/go/bin
"#;

/// Rust toolchain preset: a delegation runtime plus the cargo-install
/// installer tools can reference.
const PRESET_RUST: &str = r#"# toolsmith preset: Rust toolchain
- apiVersion: toolsmith.dev/v1alpha1
  kind: Runtime
  metadata:
    name: rust
    description: Rust toolchain via rustup
  spec:
    type: delegation
    version: stable
    commands:
      install:
        - "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y --default-toolchain {{Version}}"
      update:
        - "rustup update {{Version}}"
      remove:
        - "rustup self uninstall -y"
    binDir: ~/.cargo/bin
    toolBinPath: ~/.cargo/bin
- apiVersion: toolsmith.dev/v1alpha1
  kind: Installer
  metadata:
    name: cargo-install
    description: Install Rust tools with cargo
  spec:
    type: delegation
    commands:
      install:
        - "cargo install {{Name}}@{{Version}} {{Args}}"
      remove:
        - "cargo uninstall {{Name}}"
    binDir: ~/.cargo/bin
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_overlay_answers_known_imports() {
        let overlay = ModuleOverlay::embedded();
        assert!(overlay.resolve("toolsmith.dev/schema").is_some());
        assert!(overlay.resolve("toolsmith.dev/presets/go").is_some());
        assert!(overlay.resolve("toolsmith.dev/presets/rust").is_some());
        assert!(overlay.resolve("toolsmith.dev/presets/zig").is_none());
    }

    #[test]
    fn module_file_discovery_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_module_file(&nested), None);

        fs::write(dir.path().join(MODULE_FILE_NAME), "module: example.com/me\n").unwrap();
        let found = find_module_file(&nested).unwrap();
        assert_eq!(found, dir.path().join(MODULE_FILE_NAME));

        let parsed = read_module_file(&found);
        assert_eq!(parsed.module, "example.com/me");
    }

    #[test]
    fn presets_parse_as_valid_resources() {
        use crate::schemas::resources::{Resource, discover};
        for preset in ["toolsmith.dev/presets/go", "toolsmith.dev/presets/rust"] {
            let source = ModuleOverlay::embedded().resolve(preset).unwrap();
            // Presets may reference platform tags; pin them for the test.
            let source = source.replace("<os>", "linux").replace("<arch>", "arm64");
            let value: serde_json::Value =
                serde_yaml::from_str::<serde_yaml::Value>(&source)
                    .and_then(serde_yaml::from_value)
                    .unwrap();
            let found = discover(&value);
            assert!(!found.is_empty(), "{preset} yields no resources");
            for item in found {
                Resource::decode(&item, preset).unwrap();
            }
        }
    }
}
