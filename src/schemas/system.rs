//! # System-Package Schemas
//!
//! OS-package equivalents of the installer kinds, delegating to the host's
//! package manager (apt, dnf, brew, ...):
//!
//! - `SystemInstaller`: the manager itself, as a command set over
//!   `{{Args}}` (the package list);
//! - `SystemPackageRepository`: a source list registered through a
//!   manager-specific add-repo command set;
//! - `SystemPackageSet`: the packages the user wants present.

use crate::errors::{Error, Result};
use crate::schemas::tools::CommandSet;
use serde::{Deserialize, Serialize};

/// The `spec` body of a `SystemInstaller` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SystemInstallerSpec {
    /// Command set over the executor variables; `{{Args}}` receives the
    /// whitespace-joined package list of the referencing set.
    pub commands: CommandSet,
}

impl SystemInstallerSpec {
    pub fn validate(&self, resource: &str) -> Result<()> {
        if self.commands.install.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.commands.install",
                "at least one install step",
                "empty list",
            ));
        }
        Ok(())
    }
}

/// The `spec` body of a `SystemPackageRepository` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SystemPackageRepositorySpec {
    /// The system installer this repository is registered with.
    pub installer_ref: String,
    /// Manager-specific add-repo command set.
    pub commands: CommandSet,
}

impl SystemPackageRepositorySpec {
    pub fn validate(&self, resource: &str) -> Result<()> {
        if self.installer_ref.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.installerRef",
                "the name of a SystemInstaller resource",
                "empty string",
            ));
        }
        if self.commands.install.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.commands.install",
                "at least one add-repo step",
                "empty list",
            ));
        }
        Ok(())
    }
}

/// The `spec` body of a `SystemPackageSet` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SystemPackageSetSpec {
    /// The system installer realizing this set.
    pub installer_ref: String,
    /// OS package names, handed to the installer as `{{Args}}`.
    pub packages: Vec<String>,
}

impl SystemPackageSetSpec {
    pub fn validate(&self, resource: &str) -> Result<()> {
        if self.installer_ref.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.installerRef",
                "the name of a SystemInstaller resource",
                "empty string",
            ));
        }
        if self.packages.is_empty() {
            return Err(Error::validation(
                resource,
                "spec.packages",
                "at least one package",
                "empty list",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apt_style_installer_decodes() {
        let yaml = r#"
commands:
  install:
    - "sudo apt-get install -y {{Args}}"
  update:
    - "sudo apt-get update"
  remove:
    - "sudo apt-get remove -y {{Args}}"
"#;
        let spec: SystemInstallerSpec = serde_yaml::from_str(yaml).unwrap();
        spec.validate("apt").unwrap();
    }

    #[test]
    fn package_set_requires_packages() {
        let empty: SystemPackageSetSpec =
            serde_yaml::from_str("installerRef: apt\npackages: []\n").unwrap();
        assert!(empty.validate("base").is_err());

        let ok: SystemPackageSetSpec =
            serde_yaml::from_str("installerRef: apt\npackages: [jq, curl]\n").unwrap();
        ok.validate("base").unwrap();
    }
}
