//! # Config / Manifest Loader
//!
//! Turns an ordered list of file-or-directory paths into validated, typed
//! resources. The pipeline per source:
//!
//! 1. **Source collection** — in a directory, every manifest file except
//!    the engine's own `config.yaml`; hidden files skipped. A file path is
//!    used alone.
//! 2. **Package-name detection** — the first non-blank, non-comment line;
//!    a `package: <name>` declaration enables imports for that source.
//! 3. **Environment injection** — the platform tags (`os`, `arch`,
//!    `headless`) are substituted into the source for exactly the tag
//!    names it references, before parsing, so interpolated URLs and
//!    conditionals are concrete by validation time.
//! 4. **Module overlay** — imports under `toolsmith.dev/` resolve from the
//!    embedded packages when no user-managed `module.yaml` exists in the
//!    directory or any ancestor; a user-managed module is respected and
//!    nothing is injected.
//! 5. **Schema validation + decoding** — every discovered value must carry
//!    the engine's apiVersion and a known kind, and its spec must decode
//!    cleanly (unknown fields rejected) and pass the variant's invariants.
//!
//! A user-side schema pin (`schema.yaml`) carrying a different apiVersion
//! constant aborts the load with `config.schema_mismatch`.

use crate::errors::{ConfigFault, Error, Result};
use crate::libs::module_overlay::{
    IMPORT_PREFIX, ModuleOverlay, ModuleVerifier, SourceResolver, find_module_file,
    read_module_file,
};
use crate::schemas::config::CONFIG_FILE_NAME;
use crate::schemas::environment::Env;
use crate::schemas::resources::{API_VERSION, Kind, Resource, discover};
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable selecting the module registry. The literal `none`
/// selects vendor-only mode and disables module-signature verification.
pub const REGISTRY_ENV: &str = "TOOLSMITH_REGISTRY";

/// Name of an optional user-side schema pin file.
const SCHEMA_PIN_FILE: &str = "schema.yaml";

/// Loads manifests into validated resources.
pub struct ManifestLoader<'v> {
    env: Env,
    overlay: ModuleOverlay,
    verifier: Option<&'v dyn ModuleVerifier>,
    /// Module-file locations already verified this load; the hook runs
    /// once per unique location.
    verified: HashSet<PathBuf>,
    /// Imports currently being expanded, for cycle detection.
    active_imports: HashSet<String>,
    vendor_only: bool,
    schema_dir: Option<PathBuf>,
}

impl<'v> ManifestLoader<'v> {
    pub fn new(env: Env) -> Self {
        let vendor_only = std::env::var(REGISTRY_ENV).is_ok_and(|v| v == "none");
        if vendor_only {
            log_debug!("[Loader] {}=none; vendor-only mode, signature verification off", REGISTRY_ENV);
        }
        ManifestLoader {
            env,
            overlay: ModuleOverlay::embedded(),
            verifier: None,
            verified: HashSet::new(),
            active_imports: HashSet::new(),
            vendor_only,
            schema_dir: None,
        }
    }

    /// Installs the module-signature verification hook.
    pub fn with_verifier(mut self, verifier: &'v dyn ModuleVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Points the loader at a user-managed schema pin directory.
    pub fn with_schema_dir(mut self, schema_dir: Option<PathBuf>) -> Self {
        self.schema_dir = schema_dir;
        self
    }

    /// Replaces the import overlay (tests inject arbitrary modules here).
    pub fn with_overlay(mut self, overlay: ModuleOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    /// Loads every manifest under the given paths and returns the
    /// validated resource set, checked for duplicate names and dangling
    /// references.
    pub fn load(&mut self, paths: &[PathBuf]) -> Result<Vec<Resource>> {
        if let Some(schema_dir) = self.schema_dir.clone() {
            self.check_schema_pin(&schema_dir)?;
        }

        let mut resources = Vec::new();
        for path in paths {
            if path.is_dir() {
                resources.extend(self.load_dir(path)?);
            } else {
                resources.extend(self.load_file(path)?);
            }
        }
        check_uniqueness(&resources)?;
        check_references(&resources)?;
        log_info!("[Loader] Loaded {} resource(s)", resources.len().to_string().green());
        Ok(resources)
    }

    /// Directory mode: module context, schema pin, then every manifest
    /// file as a package.
    fn load_dir(&mut self, dir: &Path) -> Result<Vec<Resource>> {
        log_debug!("[Loader] Loading manifest directory {:?}", dir);
        self.check_schema_pin(dir)?;

        // A user-managed module file suppresses the virtual module: their
        // declared dependencies answer imports, nothing is injected.
        let user_module = find_module_file(dir);
        if let Some(module_path) = &user_module {
            self.verify_module(module_path)?;
        }

        let mut resources = Vec::new();
        for source_path in collect_sources(dir)? {
            let inject_overlay = user_module.is_none();
            resources.extend(self.evaluate_path(&source_path, inject_overlay)?);
        }
        Ok(resources)
    }

    /// File mode: the file is evaluated alone.
    fn load_file(&mut self, path: &Path) -> Result<Vec<Resource>> {
        log_debug!("[Loader] Loading manifest file {:?}", path);
        let user_module = path.parent().and_then(find_module_file);
        if let Some(module_path) = &user_module {
            self.verify_module(module_path)?;
        }
        self.evaluate_path(path, user_module.is_none())
    }

    fn evaluate_path(&mut self, path: &Path, inject_overlay: bool) -> Result<Vec<Resource>> {
        let source = fs::read_to_string(path)
            .map_err(|e| Error::config_parse(path.display().to_string(), e.to_string()))?;
        let origin = path.display().to_string();
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.evaluate_source(&source, &origin, &base_dir, inject_overlay)
    }

    /// Evaluates one manifest source: tag injection, imports, discovery,
    /// decoding.
    fn evaluate_source(
        &mut self,
        source: &str,
        origin: &str,
        base_dir: &Path,
        inject_overlay: bool,
    ) -> Result<Vec<Resource>> {
        let package = detect_package_name(source);
        if let Some(package) = &package {
            log_debug!("[Loader] {} declares package '{}'", origin, package.cyan());
        }
        let imports_enabled = package.is_some();

        let injected = self.inject_tags(source, origin);

        let mut resources = Vec::new();
        for document in parse_documents(&injected, origin)? {
            let (imports, value) = split_imports(document);
            if !imports.is_empty() && !imports_enabled {
                log_warn!(
                    "[Loader] {} lists imports but declares no package; imports ignored",
                    origin.yellow()
                );
            } else {
                for import in imports {
                    resources.extend(self.expand_import(&import, origin, base_dir, inject_overlay)?);
                }
            }
            for found in discover(&value) {
                resources.push(Resource::decode(&found, origin)?);
            }
        }
        Ok(resources)
    }

    /// Substitutes the platform tags the source references; one tag per
    /// referenced name, exactly the evaluator-tag semantics.
    fn inject_tags(&self, source: &str, origin: &str) -> String {
        let mut injected = source.to_string();
        let mut passed = Vec::new();
        for name in Env::TAG_NAMES {
            let token = format!("<{name}>");
            if !source.contains(&token) {
                continue;
            }
            if let Some(value) = self.env.tag_value(name) {
                injected = injected.replace(&token, &value);
                passed.push(format!("{name}={value}"));
            }
        }
        if !passed.is_empty() {
            log_debug!("[Loader] {} tags: {}", origin, passed.join(" ").dimmed());
        }
        injected
    }

    /// Resolves and evaluates one import: the overlay answers virtual
    /// paths (when injection is active), the module tree answers the rest.
    fn expand_import(
        &mut self,
        import: &str,
        origin: &str,
        base_dir: &Path,
        inject_overlay: bool,
    ) -> Result<Vec<Resource>> {
        if !self.active_imports.insert(import.to_string()) {
            return Err(Error::config_parse(
                origin,
                format!("import cycle through '{import}'"),
            ));
        }
        let outcome = self.expand_import_inner(import, origin, base_dir, inject_overlay);
        self.active_imports.remove(import);
        outcome
    }

    fn expand_import_inner(
        &mut self,
        import: &str,
        origin: &str,
        base_dir: &Path,
        inject_overlay: bool,
    ) -> Result<Vec<Resource>> {
        if inject_overlay {
            if let Some(source) = self.overlay.resolve(import) {
                log_debug!("[Loader] Import '{}' answered by the virtual module", import.cyan());
                return self.evaluate_source(&source, import, base_dir, inject_overlay);
            }
        }
        // Intra-module imports resolve relative to the importing manifest.
        let relative = base_dir.join(import);
        let candidate = if relative.extension().is_some() {
            relative
        } else {
            relative.with_extension("yaml")
        };
        if candidate.is_file() {
            let source = fs::read_to_string(&candidate)
                .map_err(|e| Error::config_parse(candidate.display().to_string(), e.to_string()))?;
            return self.evaluate_source(&source, &candidate.display().to_string(), base_dir, inject_overlay);
        }
        if import.starts_with(IMPORT_PREFIX) && !inject_overlay {
            return Err(Error::config_parse(
                origin,
                format!(
                    "import '{import}' is not declared by your module file; \
                     add it to {} or remove the module file to use the embedded packages",
                    crate::libs::module_overlay::MODULE_FILE_NAME
                ),
            ));
        }
        Err(Error::config_parse(origin, format!("unresolvable import '{import}'")))
    }

    /// Runs the signature-verification hook once per unique module-file
    /// location. Vendor-only mode disables the hook entirely.
    fn verify_module(&mut self, module_path: &Path) -> Result<()> {
        if self.vendor_only {
            return Ok(());
        }
        let Some(verifier) = self.verifier else {
            return Ok(());
        };
        let canonical = module_path.canonicalize().unwrap_or_else(|_| module_path.to_path_buf());
        if !self.verified.insert(canonical.clone()) {
            return Ok(());
        }
        let module = read_module_file(module_path);
        log_debug!(
            "[Loader] Verifying module {} ({} dep(s))",
            module_path.display().to_string().cyan(),
            module.deps.len()
        );
        verifier.verify(&canonical, &module.deps)
    }

    /// Compares a user-side schema pin against the engine's embedded
    /// apiVersion constant.
    fn check_schema_pin(&self, dir: &Path) -> Result<()> {
        let pin_path = dir.join(SCHEMA_PIN_FILE);
        if !pin_path.is_file() {
            return Ok(());
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SchemaPin {
            schema_version: Option<String>,
            api_version: Option<String>,
        }

        let raw = fs::read_to_string(&pin_path)
            .map_err(|e| Error::config_parse(pin_path.display().to_string(), e.to_string()))?;
        let pin: SchemaPin = serde_yaml::from_str(&raw)
            .map_err(|e| Error::config_parse(pin_path.display().to_string(), e.to_string()))?;
        let pinned = pin.schema_version.or(pin.api_version).unwrap_or_default();
        if pinned != API_VERSION {
            return Err(Error::Config {
                fault: ConfigFault::SchemaMismatch,
                file: pin_path.display().to_string(),
                line: None,
                column: None,
                snippet: Some(format!("schemaVersion: {pinned}")),
                message: format!(
                    "schema pin declares '{pinned}' but this engine speaks '{API_VERSION}'"
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SOURCE COLLECTION & PARSING
// ============================================================================

/// Selects the manifest files of a directory: YAML/JSON, not hidden, and
/// never the engine's own configuration file.
fn collect_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::config_parse(dir.display().to_string(), e.to_string()))?;
    let mut sources: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let Some(name) = path.file_name().and_then(|f| f.to_str()) else {
                return false;
            };
            if name.starts_with('.')
                || name == CONFIG_FILE_NAME
                || name == crate::libs::module_overlay::MODULE_FILE_NAME
                || name == SCHEMA_PIN_FILE
            {
                return false;
            }
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml") | Some("json")
            )
        })
        .collect();
    sources.sort();
    Ok(sources)
}

/// Peeks the first non-blank, non-comment line for a package declaration.
fn detect_package_name(source: &str) -> Option<String> {
    let first = source
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))?;
    let name = first.strip_prefix("package:")?.trim();
    (!name.is_empty()).then(|| name.trim_matches('"').to_string())
}

/// Parses a (possibly multi-document) YAML source into JSON-shaped values.
fn parse_documents(source: &str, origin: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(source) {
        let yaml = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::config_parse(origin, e.to_string()))?;
        if yaml.is_null() {
            continue;
        }
        let json: Value = serde_yaml::from_value(yaml)
            .map_err(|e| Error::config_parse(origin, e.to_string()))?;
        documents.push(json);
    }
    Ok(documents)
}

/// Splits the top-level `package`/`imports` declarations off a document,
/// returning the imports and the remaining value.
fn split_imports(mut value: Value) -> (Vec<String>, Value) {
    let mut imports = Vec::new();
    if let Value::Object(map) = &mut value {
        map.remove("package");
        if let Some(Value::Array(items)) = map.remove("imports") {
            imports = items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
    }
    (imports, value)
}

// ============================================================================
// SET-LEVEL CHECKS
// ============================================================================

/// Resource names must be unique within their kind.
fn check_uniqueness(resources: &[Resource]) -> Result<()> {
    let mut seen: HashMap<(Kind, &str), ()> = HashMap::new();
    for resource in resources {
        if seen.insert((resource.kind(), resource.name()), ()).is_some() {
            return Err(Error::validation(
                resource.name(),
                "metadata.name",
                format!("a unique name within kind {}", resource.kind().name()),
                "a duplicate",
            ));
        }
    }
    Ok(())
}

/// Every reference must resolve to a resource present in the set.
fn check_references(resources: &[Resource]) -> Result<()> {
    let declared: HashSet<(Kind, &str)> = resources
        .iter()
        .map(|r| (r.kind(), r.name()))
        .collect();
    for resource in resources {
        let missing: Vec<String> = resource
            .references()
            .into_iter()
            .filter(|(kind, name)| !declared.contains(&(*kind, name.as_str())))
            .map(|(kind, name)| format!("{}/{name}", kind.name()))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Dependency {
                resource: resource.name().to_string(),
                message: format!(
                    "'{}' references resources missing from the manifest set: {}",
                    resource.name(),
                    missing.join(", ")
                ),
                missing,
                cycle: Vec::new(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::environment::{Arch, Os};
    use crate::schemas::resources::ResourceBody;
    use std::sync::Mutex;

    fn loader() -> ManifestLoader<'static> {
        let env = Env { os: Os::Linux, arch: Arch::Arm64, headless: false };
        ManifestLoader::new(env)
    }

    const TOOL_MANIFEST: &str = r#"
apiVersion: toolsmith.dev/v1alpha1
kind: Tool
metadata:
  name: gh
spec:
  version: "2.40.0"
  source:
    url: "https://example.com/gh_<os>_<arch>.tar.gz"
"#;

    #[test]
    fn tags_interpolate_into_urls() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tools.yaml");
        fs::write(&file, TOOL_MANIFEST).unwrap();

        let resources = loader().load(&[file]).unwrap();
        assert_eq!(resources.len(), 1);
        let ResourceBody::Tool(spec) = &resources[0].body else { panic!("wrong kind") };
        assert_eq!(
            spec.source.as_ref().unwrap().url,
            "https://example.com/gh_linux_arm64.tar.gz"
        );
    }

    #[test]
    fn directory_mode_skips_hidden_and_engine_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tools.yaml"), TOOL_MANIFEST).unwrap();
        fs::write(dir.path().join(".hidden.yaml"), TOOL_MANIFEST).unwrap();
        fs::write(dir.path().join("config.yaml"), "binDir: /tmp/bin\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a manifest").unwrap();

        let resources = loader().load(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn package_declaration_enables_preset_imports() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = r#"package: mybox
imports:
  - toolsmith.dev/presets/go
gopls:
  apiVersion: toolsmith.dev/v1alpha1
  kind: Tool
  metadata:
    name: gopls
  spec:
    runtimeRef: go
"#;
        fs::write(dir.path().join("box.yaml"), manifest).unwrap();

        let resources = loader().load(&[dir.path().to_path_buf()]).unwrap();
        let kinds: Vec<_> = resources.iter().map(|r| (r.kind(), r.name().to_string())).collect();
        assert!(kinds.contains(&(Kind::Runtime, "go".to_string())));
        assert!(kinds.contains(&(Kind::Tool, "gopls".to_string())));
        // The preset's URL had its tags injected.
        let go = resources.iter().find(|r| r.name() == "go").unwrap();
        let ResourceBody::Runtime(spec) = &go.body else { panic!("wrong kind") };
        assert!(spec.source.as_ref().unwrap().url.contains("linux-arm64"));
    }

    #[test]
    fn user_managed_module_suppresses_the_virtual_module() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("module.yaml"), "module: example.com/me\n").unwrap();
        let manifest = "package: mybox\nimports:\n  - toolsmith.dev/presets/go\n";
        fs::write(dir.path().join("box.yaml"), manifest).unwrap();

        let err = loader().load(&[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.code(), "config.parse");
        assert!(err.to_string().contains("module"));
    }

    #[test]
    fn verifier_runs_once_per_module_location() {
        struct CountingVerifier(Mutex<usize>);
        impl ModuleVerifier for CountingVerifier {
            fn verify(
                &self,
                _module_file: &Path,
                _deps: &std::collections::BTreeMap<String, String>,
            ) -> Result<()> {
                *self.0.lock().unwrap() += 1;
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("module.yaml"), "module: example.com/me\n").unwrap();
        fs::write(dir.path().join("a.yaml"), TOOL_MANIFEST).unwrap();
        let second = TOOL_MANIFEST.replace("name: gh", "name: gh2");
        fs::write(dir.path().join("b.yaml"), second).unwrap();

        let verifier = CountingVerifier(Mutex::new(0));
        let env = Env { os: Os::Linux, arch: Arch::Arm64, headless: false };
        let mut loader = ManifestLoader::new(env).with_verifier(&verifier);
        loader.load(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(*verifier.0.lock().unwrap(), 1);
    }

    #[test]
    fn schema_pin_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tools.yaml"), TOOL_MANIFEST).unwrap();
        fs::write(dir.path().join("schema.yaml"), "schemaVersion: toolsmith.dev/v1\n").unwrap();

        let err = loader().load(&[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.code(), "config.schema_mismatch");
        assert!(err.is_precondition_failure());
        assert!(err.hint().unwrap().contains("schema update"));
    }

    #[test]
    fn duplicate_names_and_dangling_refs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let twice = format!("{TOOL_MANIFEST}---\n{TOOL_MANIFEST}");
        fs::write(dir.path().join("tools.yaml"), twice).unwrap();
        let err = loader().load(&[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.code(), "validation.failed");

        let dir = tempfile::tempdir().unwrap();
        let dangling = r#"
apiVersion: toolsmith.dev/v1alpha1
kind: Tool
metadata:
  name: gopls
spec:
  runtimeRef: go
"#;
        fs::write(dir.path().join("tools.yaml"), dangling).unwrap();
        let err = loader().load(&[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.code(), "dependency.missing");
        let json = err.to_json();
        assert_eq!(json["fields"]["missing"][0], "Runtime/go");
    }

    #[test]
    fn list_shaped_manifests_load() {
        let dir = tempfile::tempdir().unwrap();
        let list = r#"
- apiVersion: toolsmith.dev/v1alpha1
  kind: Tool
  metadata: {name: a}
  spec:
    source: {url: "https://example.com/a.tar.gz"}
- apiVersion: toolsmith.dev/v1alpha1
  kind: Tool
  metadata: {name: b}
  spec:
    source: {url: "https://example.com/b.tar.gz"}
"#;
        fs::write(dir.path().join("tools.yaml"), list).unwrap();
        let resources = loader().load(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(resources.len(), 2);
    }
}
