//! # Tool Resource Schema
//!
//! The `Tool` kind is the central case of the resource model: a
//! user-visible executable at a pinned version, realized by exactly one of
//! five installation patterns, resolved in priority order:
//!
//! 1. `runtimeRef` set                      → runtime delegation
//! 2. `installerRef` names a delegation     → installer delegation
//! 3. `commands` present                    → in-spec command set
//! 4. `package` with owner+repo (or name)   → registry-resolved download
//! 5. `source` present                      → explicit download
//!
//! Version strings are free-form and classified at load time into a
//! `VersionKind`; the literal spec version is preserved in state verbatim.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classification of a version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    /// Looks like a concrete version number (`1.2.3`, `v0.10`, `1.2.3-rc1`).
    Exact,
    /// Empty or the literal `latest`.
    Latest,
    /// Any other symbolic name (`stable`, `lts`, a channel).
    Alias,
}

/// Classifies a version string. The literal is never modified; state keeps
/// it verbatim alongside the resolved concrete version.
pub fn classify_version(version: &str) -> VersionKind {
    let trimmed = version.trim();
    if trimmed.is_empty() || trimmed == "latest" {
        return VersionKind::Latest;
    }
    if looks_like_version(trimmed) {
        return VersionKind::Exact;
    }
    VersionKind::Alias
}

/// A string "looks like a version" when it parses as semver (optionally
/// `v`-prefixed) or is a plain dotted-numeric like `1.22`.
fn looks_like_version(s: &str) -> bool {
    let stripped = s.strip_prefix('v').unwrap_or(s);
    if semver::Version::parse(stripped).is_ok() {
        return true;
    }
    !stripped.is_empty()
        && stripped
            .split('.')
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// A download origin: URL plus optional integrity and archive-type hints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DownloadSource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumSpec>,
    /// One of `tar.gz`, `tar.xz`, `tar.bz2`, `zip`, `raw`; inferred from
    /// the URL suffix when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_type: Option<String>,
}

/// Integrity declaration: an inline `<alg>:<hex>` value, or the URL of a
/// checksum file to fetch and match by basename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChecksumSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// An abstract package identity for the registry resolver: `owner/repo`,
/// or a symbolic `name` the resolver maps to one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PackageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PackageRef {
    /// A package is addressable when it has owner+repo, or a symbolic name
    /// the resolver can look up.
    pub fn is_addressable(&self) -> bool {
        (self.owner.is_some() && self.repo.is_some()) || self.name.is_some()
    }

    /// `owner/repo` display form, when concrete.
    pub fn slug(&self) -> Option<String> {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => Some(format!("{owner}/{repo}")),
            _ => None,
        }
    }
}

/// An in-spec command set. Steps are shell-ready strings expanded with the
/// executor's template variables before running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandSet {
    #[serde(default)]
    pub install: Vec<String>,
    /// Used for upgrade/reinstall; falls back to `install` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Vec<String>>,
    /// Stored into state so `remove` can replay it after the manifest is
    /// gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<Vec<String>>,
    /// Post-install verification; a failing check fails the install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<Vec<String>>,
    /// Captured to populate the concrete version when the spec version is
    /// latest/alias/empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_version: Option<Vec<String>>,
    /// Environment overlay for every step.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// The `spec` body of a `Tool` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSpec {
    /// Free-form version literal; classified by [`classify_version`].
    #[serde(default)]
    pub version: String,
    /// Delegate installation to a `Runtime` resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    /// Delegate installation to an `Installer` resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_ref: Option<String>,
    /// In-spec command set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    /// Registry package identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageRef>,
    /// Explicit download origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DownloadSource>,
    /// Binary name inside the archive; defaults to the resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Name of the stable symlink; defaults to the binary name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_name: Option<String>,
    /// Extra arguments handed to delegated installers via `{{Args}}`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ToolSpec {
    /// The binary name to place and link for tool `name`.
    pub fn binary_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.binary.as_deref().unwrap_or(name)
    }

    /// The symlink name under `binDir`.
    pub fn link_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.link_name.as_deref().or(self.binary.as_deref()).unwrap_or(name)
    }

    pub fn version_kind(&self) -> VersionKind {
        classify_version(&self.version)
    }

    /// Schema-level invariant: at least one installation pattern must be
    /// expressible from the declared fields.
    pub fn validate(&self, resource: &str) -> Result<()> {
        if self.runtime_ref.is_some() || self.installer_ref.is_some() {
            return Ok(());
        }
        if let Some(commands) = &self.commands {
            if commands.install.is_empty() {
                return Err(crate::errors::Error::validation(
                    resource,
                    "spec.commands.install",
                    "at least one install step",
                    "empty list",
                ));
            }
            return Ok(());
        }
        if let Some(package) = &self.package {
            if package.is_addressable() {
                return Ok(());
            }
            return Err(crate::errors::Error::validation(
                resource,
                "spec.package",
                "owner+repo, or a symbolic name",
                "neither",
            ));
        }
        if let Some(source) = &self.source {
            if source.url.is_empty() {
                return Err(crate::errors::Error::validation(
                    resource,
                    "spec.source.url",
                    "a non-empty URL",
                    "empty string",
                ));
            }
            return Ok(());
        }
        Err(crate::errors::Error::validation(
            resource,
            "spec",
            "one of runtimeRef, installerRef, commands, package, source",
            "none set",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_classification() {
        assert_eq!(classify_version(""), VersionKind::Latest);
        assert_eq!(classify_version("latest"), VersionKind::Latest);
        assert_eq!(classify_version("1.2.3"), VersionKind::Exact);
        assert_eq!(classify_version("v1.2.3"), VersionKind::Exact);
        assert_eq!(classify_version("1.22"), VersionKind::Exact);
        assert_eq!(classify_version("1.2.3-rc1"), VersionKind::Exact);
        assert_eq!(classify_version("stable"), VersionKind::Alias);
        assert_eq!(classify_version("lts/hydrogen"), VersionKind::Alias);
    }

    #[test]
    fn spec_requires_some_pattern() {
        let empty = ToolSpec::default();
        let err = empty.validate("rg").unwrap_err();
        assert_eq!(err.code(), "validation.failed");

        let with_source = ToolSpec {
            source: Some(DownloadSource {
                url: "https://example.com/rg.tar.gz".into(),
                checksum: None,
                archive_type: None,
            }),
            ..Default::default()
        };
        with_source.validate("rg").unwrap();

        let with_package = ToolSpec {
            package: Some(PackageRef {
                owner: Some("BurntSushi".into()),
                repo: Some("ripgrep".into()),
                name: None,
            }),
            ..Default::default()
        };
        with_package.validate("rg").unwrap();

        let bad_package = ToolSpec { package: Some(PackageRef::default()), ..Default::default() };
        assert!(bad_package.validate("rg").is_err());
    }

    #[test]
    fn binary_and_link_name_defaults() {
        let spec = ToolSpec::default();
        assert_eq!(spec.binary_name("rg"), "rg");
        assert_eq!(spec.link_name("rg"), "rg");

        let spec = ToolSpec { binary: Some("ripgrep".into()), ..Default::default() };
        assert_eq!(spec.binary_name("rg"), "ripgrep");
        assert_eq!(spec.link_name("rg"), "ripgrep");

        let spec = ToolSpec {
            binary: Some("ripgrep".into()),
            link_name: Some("rg".into()),
            ..Default::default()
        };
        assert_eq!(spec.link_name("x"), "rg");
    }

    #[test]
    fn command_set_decodes_from_camel_case() {
        let yaml = r#"
install:
  - "cargo install {{Package}}"
resolveVersion:
  - "{{Name}} --version"
env:
  CARGO_TERM_COLOR: never
"#;
        let set: CommandSet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(set.install.len(), 1);
        assert!(set.resolve_version.is_some());
        assert_eq!(set.env.get("CARGO_TERM_COLOR").map(String::as_str), Some("never"));
    }
}
