//! # Persisted State Records
//!
//! The state file (`<dataDir>/state.json`) is the engine's memory of what
//! it has realized. Per installed resource it records the resolved
//! concrete version *and* the original spec literal, the versioned install
//! path, the stable symlink, the archive digest when known, and enough of
//! the producing spec (source, commands, refs) that `remove` can replay
//! the right steps after the manifest is gone.

use crate::schemas::tools::{CommandSet, DownloadSource, PackageRef, VersionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State recorded for one installed tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolState {
    /// The concrete version realized on disk.
    pub version: String,
    /// The manifest's version literal, verbatim, whatever its kind.
    pub spec_version: String,
    pub version_kind: VersionKind,
    /// `<dataDir>/tools/<name>/<version>/<binary>` (download patterns) or
    /// the delegated bin path.
    pub install_path: String,
    /// `<binDir>/<linkName>`; always a symlink while managed.
    pub bin_path: String,
    /// Archive digest, when the source declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DownloadSource>,
    /// The command set used, kept so removal can replay it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    /// Advances on every successful install/upgrade/reinstall.
    pub updated_at: DateTime<Utc>,
}

/// State recorded for one installed runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    pub version: String,
    pub spec_version: String,
    pub version_kind: VersionKind,
    /// `<dataDir>/runtimes/<name>/<version>` (download) or the delegated
    /// install root.
    pub install_path: String,
    /// Binaries linked into `binDir`, relative to the install root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
    /// Delegation runtimes: where the runtime's own binaries appear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<String>,
    /// Where tools installed by this runtime land.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_bin_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DownloadSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    pub updated_at: DateTime<Utc>,
}

/// The persisted state document: `{tools: {...}, runtimes: {...}}`.
/// BTreeMaps keep the on-disk JSON stably ordered across rewrites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StateFile {
    pub tools: BTreeMap<String, ToolState>,
    pub runtimes: BTreeMap<String, RuntimeState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrips_through_json() {
        let mut state = StateFile::default();
        state.tools.insert(
            "rg".to_string(),
            ToolState {
                version: "14.0.0".to_string(),
                spec_version: "latest".to_string(),
                version_kind: VersionKind::Latest,
                install_path: "/home/u/.toolsmith/tools/rg/14.0.0/rg".to_string(),
                bin_path: "/home/u/.local/bin/rg".to_string(),
                digest: Some("a".repeat(64)),
                installer_ref: None,
                runtime_ref: None,
                package: None,
                source: None,
                commands: None,
                updated_at: Utc::now(),
            },
        );

        let json = serde_json::to_string_pretty(&state).unwrap();
        // Keys are camelCase on the wire.
        assert!(json.contains("\"specVersion\": \"latest\""));
        assert!(json.contains("\"versionKind\": \"latest\""));

        let back: StateFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let state: StateFile = serde_json::from_str("{}").unwrap();
        assert!(state.tools.is_empty());
        assert!(state.runtimes.is_empty());
    }
}
