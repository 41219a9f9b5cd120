//! # Download Patterns
//!
//! The explicit-download pattern and its two derived forms: registry
//! resolution (a `package` identity resolved to a synthetic download
//! source) and templated download installers (a shared URL template
//! expanded per tool).
//!
//! The explicit flow is the placer state machine of the engine:
//! validate → (skip | replace | install) → download → verify → extract →
//! place → symlink → cleanup. A skipped tool still has its symlink
//! re-pointed at the recorded version, keeping links in sync with the
//! manifest when the binary itself already exists.

use crate::errors::{Error, RegistryFault, Result};
use crate::installers::{Action, ToolInstaller, effective_version, tool_state};
use crate::libs::runctx::RunCtx;
use crate::libs::utilities::archive::{ArchiveKind, extract_archive};
use crate::libs::utilities::checksum::parse_checksum_value;
use crate::libs::utilities::download::{download, verify};
use crate::libs::utilities::executor::TemplateVars;
use crate::libs::utilities::placer::PlaceDecision;
use crate::schemas::installers::InstallerSpec;
use crate::schemas::state_file::ToolState;
use crate::schemas::tools::{ChecksumSpec, DownloadSource, PackageRef, ToolSpec, VersionKind};
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::path::Path;

/// A package identity carried through to state after registry resolution.
pub struct ResolvedPackage {
    pub package: PackageRef,
    pub version: String,
}

/// The explicit-download pattern. `resolved` is set when a registry
/// resolution produced the source; its concrete version then names the
/// versioned directory while the spec literal is preserved in state.
pub fn install_download(
    installer: &ToolInstaller<'_>,
    name: &str,
    spec: &ToolSpec,
    source: &DownloadSource,
    resolved: Option<ResolvedPackage>,
    action: Action,
    ctx: &RunCtx,
) -> Result<ToolState> {
    let version = resolved
        .as_ref()
        .map(|r| r.version.clone())
        .unwrap_or_else(|| effective_version(&spec.version));
    let binary = spec.binary_name(name);
    let link_name = spec.link_name(name);
    let paths = installer.placer.paths();
    let target = paths.tool_binary_path(name, &version, binary);

    let filename = source.url.rsplit('/').next().unwrap_or(&source.url);
    let kind = ArchiveKind::resolve(source.archive_type.as_deref(), filename, name)?;

    // For raw artifacts the manifest checksum covers the placed binary
    // itself, so the skip decision can pin it; for archives it covers the
    // archive and the decision degrades to a presence check.
    let expected_digest = match (&source.checksum, kind) {
        (Some(ChecksumSpec { value: Some(value), .. }), ArchiveKind::Raw) => {
            parse_checksum_value(value)?.1
        }
        _ => String::new(),
    };

    match installer.placer.validate(&target, &expected_digest)? {
        PlaceDecision::Skip => {
            log_info!(
                "[Download] {} {} already in place; re-pointing symlink",
                name.green(),
                version.dimmed()
            );
            let bin_path = installer.placer.symlink(&target, link_name)?;
            return Ok(finish_state(spec, &version, &target, &bin_path, None, source, resolved));
        }
        PlaceDecision::Replace => {
            if !installer.force {
                return Err(Error::Install {
                    fault: crate::errors::InstallFault::ReplaceRefused,
                    resource: name.to_string(),
                    action: action.name().to_string(),
                    version: Some(version.clone()),
                    url: Some(source.url.clone()),
                    message: format!(
                        "binary at {} differs from the pinned digest",
                        target.display()
                    ),
                });
            }
            log_warn!("[Download] Overwriting {} (force)", target.display());
        }
        PlaceDecision::Install => {}
    }

    // Scratch space for the archive and its extraction; removed on every
    // exit path by the TempDir guard.
    let scratch = tempfile::tempdir().map_err(|e| {
        Error::install_failed(name, action.name(), format!("cannot create temp dir: {e}"))
    })?;
    let archive_path = scratch.path().join(filename);

    log_info!(
        "[Download] Fetching {} {} from {}",
        name.green(),
        version.dimmed(),
        source.url.blue()
    );
    download(&source.url, &archive_path, ctx)?;
    let digest = verify(&archive_path, source.checksum.as_ref(), name)?;

    let extract_dir = scratch.path().join("extracted");
    extract_archive(&archive_path, &extract_dir, kind, name, ctx)?;

    // Raw artifacts land under the URL's filename; place by that name.
    let search_name = if kind == ArchiveKind::Raw { filename } else { binary };
    let placed = installer.placer.place(&extract_dir, search_name, &target)?;
    let bin_path = installer.placer.symlink(&placed, link_name)?;
    installer.placer.cleanup(scratch.path())?;

    log_info!("[Download] {} {} installed", name.green(), version.dimmed());
    Ok(finish_state(spec, &version, &placed, &bin_path, digest, source, resolved))
}

/// Registry-resolved download: resolve `owner/repo` (or a symbolic name)
/// to a synthetic download source and fall through to the explicit flow.
pub fn install_from_registry(
    installer: &ToolInstaller<'_>,
    name: &str,
    spec: &ToolSpec,
    package: &PackageRef,
    action: Action,
    ctx: &RunCtx,
) -> Result<ToolState> {
    let (owner, repo) = match (&package.owner, &package.repo) {
        (Some(owner), Some(repo)) => (owner.clone(), repo.clone()),
        _ => {
            let symbolic = package.name.as_deref().unwrap_or(name);
            let info = installer.resolver.fetch_package_info(symbolic)?;
            (info.owner, info.repo)
        }
    };

    let version = match spec.version_kind() {
        VersionKind::Latest => installer.resolver.latest_version(&owner, &repo)?,
        _ => spec.version.trim().to_string(),
    };
    log_debug!("[Registry] {} resolves to {}/{}@{}", name, owner, repo, version);

    let resolution = installer.resolver.resolve(&owner, &repo, &version)?;
    for warning in &resolution.warnings {
        log_warn!("[Registry] {}: {}", name.yellow(), warning);
    }
    if !resolution.errors.is_empty() {
        return Err(Error::Registry {
            fault: RegistryFault::UnsupportedPlatform,
            registry: "github".to_string(),
            package: Some(format!("{owner}/{repo}")),
            version: Some(version),
            message: format!(
                "package is not supported on this platform: {}",
                resolution.errors.join("; ")
            ),
        });
    }

    let source = DownloadSource {
        url: resolution.url,
        checksum: resolution
            .checksum_url
            .map(|url| ChecksumSpec { value: None, url: Some(url) }),
        archive_type: resolution.archive_type,
    };
    let resolved = ResolvedPackage {
        package: PackageRef { owner: Some(owner), repo: Some(repo), name: package.name.clone() },
        version,
    };
    install_download(installer, name, spec, &source, Some(resolved), action, ctx)
}

/// Templated download installer: the shared source's URL is a template
/// over the tool's name/version.
pub fn install_via_download_installer(
    installer: &ToolInstaller<'_>,
    name: &str,
    spec: &ToolSpec,
    installer_name: &str,
    installer_spec: &InstallerSpec,
    action: Action,
    ctx: &RunCtx,
) -> Result<ToolState> {
    let Some(template) = &installer_spec.source else {
        return Err(Error::install_failed(
            name,
            action.name(),
            format!("download installer '{installer_name}' declares no source"),
        ));
    };
    let vars = TemplateVars {
        package: spec.package.as_ref().and_then(|p| p.slug()).unwrap_or_else(|| name.to_string()),
        version: effective_version(&spec.version),
        name: name.to_string(),
        bin_path: installer.placer.paths().bin_dir().display().to_string(),
        args: spec.args.clone(),
    };
    let source = DownloadSource {
        url: vars.expand(&template.url),
        checksum: template.checksum.clone(),
        archive_type: template.archive_type.clone(),
    };
    install_download(installer, name, spec, &source, None, action, ctx)
}

/// State construction shared by the skip and install exits.
fn finish_state(
    spec: &ToolSpec,
    version: &str,
    install_path: &Path,
    bin_path: &Path,
    digest: Option<String>,
    source: &DownloadSource,
    resolved: Option<ResolvedPackage>,
) -> ToolState {
    let mut state = tool_state(
        spec,
        version,
        install_path,
        bin_path,
        digest,
        Some(source.clone()),
        None,
    );
    if let Some(resolved) = resolved {
        state.package = Some(resolved.package);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installers::InstallerRegistry;
    use crate::libs::registry::{PackageInfo, RegistryResolver, Resolution};
    use crate::libs::utilities::placer::Placer;
    use crate::schemas::config::Config;
    use crate::schemas::path_resolver::PathResolver;
    use std::fs;

    struct StubResolver {
        resolution: Resolution,
        latest: String,
    }

    impl RegistryResolver for StubResolver {
        fn resolve(&self, _o: &str, _r: &str, _v: &str) -> Result<Resolution> {
            Ok(self.resolution.clone())
        }
        fn latest_version(&self, _o: &str, _r: &str) -> Result<String> {
            Ok(self.latest.clone())
        }
        fn fetch_package_info(&self, name: &str) -> Result<PackageInfo> {
            assert_eq!(name, "ripgrep");
            Ok(PackageInfo { owner: "BurntSushi".into(), repo: "ripgrep".into() })
        }
    }

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
    fn skip_still_retargets_the_symlink() {
        let (_dir, placer) = fixture();
        let registry = InstallerRegistry::default();
        let resolver = StubResolver {
            resolution: Resolution {
                url: String::new(),
                checksum_url: None,
                archive_type: None,
                warnings: vec![],
                errors: vec![],
            },
            latest: String::new(),
        };
        let installer = ToolInstaller {
            placer: &placer,
            resolver: &resolver,
            registry: &registry,
            force: false,
            progress: None,
        };

        // The binary already exists at the target; no download happens
        // (the URL is unreachable, so a download attempt would error).
        let target = placer.paths().tool_binary_path("rg", "14.0.0", "rg");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"bits").unwrap();

        let spec = ToolSpec {
            version: "14.0.0".into(),
            source: Some(DownloadSource {
                url: "https://invalid.invalid/rg.tar.gz".into(),
                checksum: None,
                archive_type: None,
            }),
            ..Default::default()
        };
        let source = spec.source.clone().unwrap();
        let state =
            install_download(&installer, "rg", &spec, &source, None, Action::Install, &RunCtx::new())
                .unwrap();

        assert_eq!(state.version, "14.0.0");
        assert_eq!(state.spec_version, "14.0.0");
        let link = placer.paths().link_path("rg");
        assert_eq!(fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn replace_without_force_is_refused() {
        let (_dir, placer) = fixture();
        let registry = InstallerRegistry::default();
        let resolver = StubResolver {
            resolution: Resolution {
                url: String::new(),
                checksum_url: None,
                archive_type: None,
                warnings: vec![],
                errors: vec![],
            },
            latest: String::new(),
        };
        let installer = ToolInstaller {
            placer: &placer,
            resolver: &resolver,
            registry: &registry,
            force: false,
            progress: None,
        };

        let target = placer.paths().tool_binary_path("rg", "14.0.0", "rg");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"different bits").unwrap();

        // Raw artifact with a pinned digest that does not match the file.
        let spec = ToolSpec {
            version: "14.0.0".into(),
            source: Some(DownloadSource {
                url: "https://invalid.invalid/rg".into(),
                checksum: Some(ChecksumSpec {
                    value: Some(format!("sha256:{}", "a".repeat(64))),
                    url: None,
                }),
                archive_type: Some("raw".into()),
            }),
            ..Default::default()
        };
        let source = spec.source.clone().unwrap();
        let err =
            install_download(&installer, "rg", &spec, &source, None, Action::Install, &RunCtx::new())
                .unwrap_err();
        assert_eq!(err.code(), "install.replace_refused");
    }

    #[test]
    fn unsupported_platform_resolution_is_fatal() {
        let (_dir, placer) = fixture();
        let registry = InstallerRegistry::default();
        let resolver = StubResolver {
            resolution: Resolution {
                url: String::new(),
                checksum_url: None,
                archive_type: None,
                warnings: vec![],
                errors: vec!["no asset for linux/arm64".into()],
            },
            latest: "14.0.0".into(),
        };
        let installer = ToolInstaller {
            placer: &placer,
            resolver: &resolver,
            registry: &registry,
            force: false,
            progress: None,
        };
        let spec = ToolSpec {
            package: Some(PackageRef {
                owner: Some("BurntSushi".into()),
                repo: Some("ripgrep".into()),
                name: None,
            }),
            ..Default::default()
        };
        let package = spec.package.clone().unwrap();
        let err = install_from_registry(
            &installer,
            "rg",
            &spec,
            &package,
            Action::Install,
            &RunCtx::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "registry.unsupported_platform");
        assert!(err.to_string().contains("not supported on this platform"));
    }
}
