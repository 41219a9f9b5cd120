//! # Runtime Resource Schema
//!
//! A `Runtime` is a language or toolchain whose own binaries go on PATH
//! and which can install further Tools. Two variants share one spec
//! struct, discriminated by `type`:
//!
//! - `download`: same download shape as a Tool, plus the list of binaries
//!   to symlink and an optional `toolBinPath` where runtime-installed
//!   tools land;
//! - `delegation`: a command set that installs the runtime itself, plus
//!   the `binDir` where the runtime's produced binaries appear.

use crate::errors::{Error, Result};
use crate::schemas::tools::{CommandSet, DownloadSource, VersionKind, classify_version};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a runtime is realized on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Download,
    Delegation,
}

/// The `spec` body of a `Runtime` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeSpec {
    #[serde(rename = "type")]
    pub runtime_type: RuntimeType,
    #[serde(default)]
    pub version: String,
    /// Download variant: the archive origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DownloadSource>,
    /// Download variant: binaries inside the install tree to symlink into
    /// `binDir` (paths relative to the install root).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
    /// Delegation variant: the command set realizing the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    /// Delegation variant: where the runtime's own binaries appear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
    /// Where tools installed *by* this runtime land; tools delegating to
    /// the runtime get their `binPath` here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_bin_path: Option<PathBuf>,
}

impl RuntimeSpec {
    pub fn version_kind(&self) -> VersionKind {
        classify_version(&self.version)
    }

    /// Schema-level invariants for each variant.
    pub fn validate(&self, resource: &str) -> Result<()> {
        match self.runtime_type {
            RuntimeType::Download => {
                let Some(source) = &self.source else {
                    return Err(Error::validation(
                        resource,
                        "spec.source",
                        "a download source for type: download",
                        "absent",
                    ));
                };
                if source.url.is_empty() {
                    return Err(Error::validation(
                        resource,
                        "spec.source.url",
                        "a non-empty URL",
                        "empty string",
                    ));
                }
                if self.binaries.is_empty() {
                    return Err(Error::validation(
                        resource,
                        "spec.binaries",
                        "at least one binary to link",
                        "empty list",
                    ));
                }
            }
            RuntimeType::Delegation => {
                let Some(commands) = &self.commands else {
                    return Err(Error::validation(
                        resource,
                        "spec.commands",
                        "a command set for type: delegation",
                        "absent",
                    ));
                };
                if commands.install.is_empty() {
                    return Err(Error::validation(
                        resource,
                        "spec.commands.install",
                        "at least one install step",
                        "empty list",
                    ));
                }
                if self.bin_dir.is_none() {
                    return Err(Error::validation(
                        resource,
                        "spec.binDir",
                        "the directory the runtime's binaries appear in",
                        "absent",
                    ));
                }
            }
        }
        Ok(())
    }
}
