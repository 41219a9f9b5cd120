//! # Installer and InstallerRepository Schemas
//!
//! An `Installer` is a named installation strategy tools can reference:
//!
//! - `download`: a shared download shape whose URL is a template over the
//!   executor variables (`{{Name}}`, `{{Version}}`), letting many tools
//!   share one origin;
//! - `delegation`: a command set run on behalf of each referencing tool,
//!   optionally with a `toolRef` whose bin dir is prepended to PATH.
//!
//! An `InstallerRepository` registers a third-party source list for an
//! installer: either a git URL the installer understands, or a delegated
//! add-repo command set.

use crate::errors::{Error, Result};
use crate::schemas::tools::{CommandSet, DownloadSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// The two installer strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerType {
    Download,
    Delegation,
}

/// The `spec` body of an `Installer` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstallerSpec {
    #[serde(rename = "type")]
    pub installer_type: InstallerType,
    /// Download variant: the templated origin shared by referencing tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DownloadSource>,
    /// Delegation variant: commands run per referencing tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    /// How this installer registers a third-party repository; used by
    /// `InstallerRepository` resources declaring a `url`. `{{Package}}`
    /// receives the URL, `{{Name}}` the repository resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_repo: Option<Vec<String>>,
    /// Delegation variant: a tool whose bin dir is prepended to PATH while
    /// the commands run (the installer's own executable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_ref: Option<String>,
    /// Where binaries produced by this installer appear, for doctor scans
    /// and PATH overlays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
    /// Environment overlay applied to every delegated command.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl InstallerSpec {
    pub fn validate(&self, resource: &str) -> Result<()> {
        match self.installer_type {
            InstallerType::Download => {
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
                        "a non-empty URL template",
                        "empty string",
                    ));
                }
            }
            InstallerType::Delegation => {
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
            }
        }
        Ok(())
    }
}

/// The `spec` body of an `InstallerRepository` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstallerRepositorySpec {
    /// The installer this repository feeds. Must resolve within the
    /// manifest set.
    pub installer_ref: String,
    /// Git URL form: the installer's own add-repo convention applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Delegated form: explicit add-repo command set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
}

impl InstallerRepositorySpec {
    pub fn validate(&self, resource: &str) -> Result<()> {
        if self.installer_ref.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.installerRef",
                "the name of an Installer resource",
                "empty string",
            ));
        }
        match (&self.url, &self.commands) {
            (None, None) => Err(Error::validation(
                resource,
                "spec",
                "either url or commands",
                "neither",
            )),
            (Some(_), Some(_)) => Err(Error::validation(
                resource,
                "spec",
                "either url or commands",
                "both",
            )),
            _ => Ok(()),
        }
    }
}

/// The `spec` body of a `ToolSet` resource: a named group of tools sharing
/// an installer reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSetSpec {
    /// The shared installer every member is realized through.
    pub installer_ref: String,
    /// Member tools: name plus optional version/args per member.
    pub tools: Vec<ToolSetMember>,
}

/// One member of a `ToolSet`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSetMember {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ToolSetSpec {
    pub fn validate(&self, resource: &str) -> Result<()> {
        if self.installer_ref.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.installerRef",
                "the name of an Installer resource",
                "empty string",
            ));
        }
        if self.tools.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.tools",
                "at least one member tool",
                "empty list",
            ));
        }
        for member in &self.tools {
            if member.name.is_empty() {
                return Err(Error::validation(
                    resource,
                    "spec.tools[].name",
                    "a non-empty tool name",
                    "empty string",
                ));
            }
        }
        Ok(())
    }
}
