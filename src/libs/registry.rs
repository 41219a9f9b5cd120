//! # Registry Resolver
//!
//! Resolves abstract package identities (`owner/repo`, or a symbolic name)
//! to a concrete download triple `{url, checksumUrl?, archiveType}`. The
//! concrete resolver is backed by GitHub releases; release metadata is
//! cached as JSON documents under `<dataDir>/registry/` with a TTL so
//! repeated runs do not hammer the API.
//!
//! The engine treats the resolver as opaque behind [`RegistryResolver`]:
//! only the returned triple is consumed. Warnings are logged by the
//! caller; any non-empty `errors` is fatal for the resource with a
//! "not supported on this platform" diagnostic.

use crate::errors::{Error, NetworkFault, RegistryFault, Result};
use crate::libs::utilities::archive::ArchiveKind;
use crate::libs::utilities::platform::{asset_matches_platform, find_checksum_asset};
use crate::schemas::environment::Env;
use crate::{log_debug, log_warn};
use chrono::{DateTime, Duration, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const REGISTRY_NAME: &str = "github";
const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("toolsmith/", env!("CARGO_PKG_VERSION"));

/// The download triple a resolution produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub url: String,
    pub checksum_url: Option<String>,
    pub archive_type: Option<String>,
    /// Non-fatal notes, logged by the caller.
    pub warnings: Vec<String>,
    /// Non-empty means the package cannot be realized on this platform.
    pub errors: Vec<String>,
}

/// Mapping of a symbolic package name to its registry identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageInfo {
    pub owner: String,
    pub repo: String,
}

/// The resolver seam the installer dispatch consumes.
pub trait RegistryResolver {
    /// Resolves `owner/repo` at `version` (empty means latest) to a
    /// download triple.
    fn resolve(&self, owner: &str, repo: &str, version: &str) -> Result<Resolution>;

    /// The latest released version, v-prefix stripped.
    fn latest_version(&self, owner: &str, repo: &str) -> Result<String>;

    /// Looks up the registry identity behind a symbolic package name.
    fn fetch_package_info(&self, name: &str) -> Result<PackageInfo>;
}

// ============================================================================
// RELEASE MODEL (the slice of the GitHub API the resolver reads)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// One cached registry document: the release plus its fetch time.
#[derive(Debug, Serialize, Deserialize)]
struct CachedRelease {
    fetched_at: DateTime<Utc>,
    release: Release,
}

// ============================================================================
// GITHUB-BACKED RESOLVER
// ============================================================================

/// Resolver over the GitHub releases API with an on-disk document cache.
pub struct GithubResolver {
    env: Env,
    cache_dir: PathBuf,
    /// Cache lifetime for version-pinned lookups; `latest` uses a tenth of
    /// it so new releases surface quickly.
    ttl: Duration,
}

impl GithubResolver {
    pub fn new(env: Env, cache_dir: PathBuf) -> Self {
        GithubResolver { env, cache_dir, ttl: Duration::hours(24) }
    }

    /// Builds the resolution triple from a release's asset list. Pure with
    /// respect to the filesystem and network.
    pub fn resolution_from_release(&self, release: &Release) -> Resolution {
        let mut warnings = Vec::new();
        let matching: Vec<&ReleaseAsset> = release
            .assets
            .iter()
            .filter(|asset| asset_matches_platform(&asset.name, &self.env))
            .collect();

        let Some(chosen) = matching.first() else {
            return Resolution {
                url: String::new(),
                checksum_url: None,
                archive_type: None,
                warnings,
                errors: vec![format!(
                    "release {} publishes no asset for {}/{}",
                    release.tag_name,
                    self.env.os.name(),
                    self.env.arch.name()
                )],
            };
        };
        if matching.len() > 1 {
            warnings.push(format!(
                "{} assets match {}/{}; picked '{}'",
                matching.len(),
                self.env.os.name(),
                self.env.arch.name(),
                chosen.name
            ));
        }

        let asset_names: Vec<String> = release.assets.iter().map(|a| a.name.clone()).collect();
        let checksum_url = find_checksum_asset(&asset_names, &chosen.name).and_then(|name| {
            release
                .assets
                .iter()
                .find(|a| &a.name == name)
                .map(|a| a.browser_download_url.clone())
        });

        Resolution {
            url: chosen.browser_download_url.clone(),
            checksum_url,
            archive_type: ArchiveKind::from_filename(&chosen.name).map(|k| k.name().to_string()),
            warnings,
            errors: Vec::new(),
        }
    }

    /// Fetches (or reads from cache) the release for `version`; empty
    /// version means the latest release.
    fn release_for(&self, owner: &str, repo: &str, version: &str) -> Result<Release> {
        let cache_key = if version.is_empty() {
            format!("{owner}__{repo}__latest.json")
        } else {
            format!("{owner}__{repo}__{version}.json")
        };
        let ttl = if version.is_empty() { self.ttl / 10 } else { self.ttl };
        if let Some(release) = self.read_cache(&cache_key, ttl) {
            return Ok(release);
        }

        let release = if version.is_empty() {
            self.fetch_release(&format!("{API_BASE}/repos/{owner}/{repo}/releases/latest"))?
        } else {
            // Tags disagree about the v prefix; try both spellings.
            let tagged = format!("{API_BASE}/repos/{owner}/{repo}/releases/tags/v{version}");
            match self.fetch_release(&tagged) {
                Ok(release) => release,
                Err(Error::Network { status_code: Some(404), .. }) => self.fetch_release(
                    &format!("{API_BASE}/repos/{owner}/{repo}/releases/tags/{version}"),
                )?,
                Err(other) => return Err(other),
            }
        };
        self.write_cache(&cache_key, &release);
        Ok(release)
    }

    fn fetch_release(&self, url: &str) -> Result<Release> {
        log_debug!("[Registry] GET {}", url.blue());
        let response = ureq::get(url)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/vnd.github+json")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => Error::Network {
                    fault: NetworkFault::Status,
                    url: url.to_string(),
                    status_code: Some(code),
                    message: format!("HTTP {code} from {url}"),
                    source: None,
                },
                transport => Error::Network {
                    fault: NetworkFault::Request,
                    url: url.to_string(),
                    status_code: None,
                    message: format!("request to {url} failed: {transport}"),
                    source: None,
                },
            })?;
        response.into_json().map_err(|e| Error::Network {
            fault: NetworkFault::Request,
            url: url.to_string(),
            status_code: None,
            message: format!("invalid release document: {e}"),
            source: Some(Box::new(e)),
        })
    }

    fn read_cache(&self, key: &str, ttl: Duration) -> Option<Release> {
        let path = self.cache_dir.join(key);
        let raw = fs::read_to_string(&path).ok()?;
        let cached: CachedRelease = serde_json::from_str(&raw).ok()?;
        if Utc::now() - cached.fetched_at > ttl {
            log_debug!("[Registry] Cache expired for {}", key.dimmed());
            return None;
        }
        log_debug!("[Registry] Cache hit for {}", key.dimmed());
        Some(cached.release)
    }

    fn write_cache(&self, key: &str, release: &Release) {
        if let Err(e) = fs::create_dir_all(&self.cache_dir) {
            log_warn!("[Registry] Cannot create cache dir: {}", e);
            return;
        }
        let cached = CachedRelease { fetched_at: Utc::now(), release: release.clone() };
        match serde_json::to_string_pretty(&cached) {
            Ok(serialized) => {
                if let Err(e) = fs::write(self.cache_dir.join(key), serialized) {
                    log_warn!("[Registry] Cannot write cache entry {}: {}", key, e);
                }
            }
            Err(e) => log_warn!("[Registry] Cannot serialize cache entry: {}", e),
        }
    }
}

impl RegistryResolver for GithubResolver {
    fn resolve(&self, owner: &str, repo: &str, version: &str) -> Result<Resolution> {
        let release = self.release_for(owner, repo, version)?;
        Ok(self.resolution_from_release(&release))
    }

    fn latest_version(&self, owner: &str, repo: &str) -> Result<String> {
        let release = self.release_for(owner, repo, "")?;
        Ok(release.tag_name.trim_start_matches('v').to_string())
    }

    fn fetch_package_info(&self, name: &str) -> Result<PackageInfo> {
        // Well-known aliases ship embedded; a user-managed document in the
        // cache dir (`packages/<name>.json`) overrides them.
        let user_doc = self.cache_dir.join("packages").join(format!("{name}.json"));
        if let Ok(raw) = fs::read_to_string(&user_doc) {
            return serde_json::from_str(&raw).map_err(|e| Error::Registry {
                fault: RegistryFault::Resolve,
                registry: REGISTRY_NAME.to_string(),
                package: Some(name.to_string()),
                version: None,
                message: format!("invalid package document {}: {e}", user_doc.display()),
            });
        }
        builtin_package_info(name).ok_or_else(|| Error::Registry {
            fault: RegistryFault::Resolve,
            registry: REGISTRY_NAME.to_string(),
            package: Some(name.to_string()),
            version: None,
            message: format!("unknown package name '{name}'; use owner/repo form"),
        })
    }
}

/// The embedded slice of the package-info store: the handful of names that
/// appear in the shipped presets.
fn builtin_package_info(name: &str) -> Option<PackageInfo> {
    let (owner, repo) = match name {
        "ripgrep" | "rg" => ("BurntSushi", "ripgrep"),
        "fd" => ("sharkdp", "fd"),
        "bat" => ("sharkdp", "bat"),
        "jq" => ("jqlang", "jq"),
        "fzf" => ("junegunn", "fzf"),
        "gh" => ("cli", "cli"),
        "delta" => ("dandavison", "delta"),
        "hyperfine" => ("sharkdp", "hyperfine"),
        _ => return None,
    };
    Some(PackageInfo { owner: owner.to_string(), repo: repo.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::environment::{Arch, Os};

    fn resolver(dir: &std::path::Path) -> GithubResolver {
        let env = Env { os: Os::Linux, arch: Arch::Arm64, headless: true };
        GithubResolver::new(env, dir.to_path_buf())
    }

    fn release() -> Release {
        let asset = |name: &str| ReleaseAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.com/dl/{name}"),
        };
        Release {
            tag_name: "v14.0.0".to_string(),
            prerelease: false,
            assets: vec![
                asset("rg-14.0.0-x86_64-unknown-linux-musl.tar.gz"),
                asset("rg-14.0.0-aarch64-unknown-linux-gnu.tar.gz"),
                asset("rg-14.0.0-aarch64-apple-darwin.tar.gz"),
                asset("SHA256SUMS"),
            ],
        }
    }

    #[test]
    fn picks_platform_asset_with_checksum_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let resolution = resolver(dir.path()).resolution_from_release(&release());
        assert!(resolution.errors.is_empty());
        assert_eq!(
            resolution.url,
            "https://example.com/dl/rg-14.0.0-aarch64-unknown-linux-gnu.tar.gz"
        );
        assert_eq!(resolution.checksum_url.as_deref(), Some("https://example.com/dl/SHA256SUMS"));
        assert_eq!(resolution.archive_type.as_deref(), Some("tar.gz"));
    }

    #[test]
    fn missing_platform_asset_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut release = release();
        release.assets.retain(|a| !a.name.contains("aarch64-unknown-linux"));
        let resolution = resolver(dir.path()).resolution_from_release(&release);
        assert!(!resolution.errors.is_empty());
        assert!(resolution.url.is_empty());
    }

    #[test]
    fn cache_hit_avoids_refetch_and_honors_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());
        resolver.write_cache("o__r__14.0.0.json", &release());

        let cached = resolver.read_cache("o__r__14.0.0.json", Duration::hours(1)).unwrap();
        assert_eq!(cached.tag_name, "v14.0.0");

        // Zero TTL expires everything.
        assert!(resolver.read_cache("o__r__14.0.0.json", Duration::zero()).is_none());
    }

    #[test]
    fn package_info_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());

        let info = resolver.fetch_package_info("ripgrep").unwrap();
        assert_eq!(info.owner, "BurntSushi");

        // A user-managed document overrides the embedded table.
        fs::create_dir_all(dir.path().join("packages")).unwrap();
        fs::write(
            dir.path().join("packages/ripgrep.json"),
            r#"{"owner": "fork", "repo": "ripgrep"}"#,
        )
        .unwrap();
        let info = resolver.fetch_package_info("ripgrep").unwrap();
        assert_eq!(info.owner, "fork");

        let err = resolver.fetch_package_info("no-such-tool").unwrap_err();
        assert_eq!(err.code(), "registry.resolve");
    }
}
