//! # Resource Model
//!
//! The polymorphic resource sum type, discriminated on `kind`. Every
//! resource carries the common envelope (`apiVersion`, `kind`, `metadata`)
//! plus a kind-specific `spec` body; decoding goes through a JSON-shaped
//! intermediate so any evaluator that produces JSON values can feed it.
//!
//! Top-level discovery rule for a manifest value: a value with an
//! `apiVersion` is a single resource; a list is a list of resources;
//! anything else is scanned field by field and every field value carrying
//! an `apiVersion` is emitted.

use crate::errors::{Error, Result, ValidationFault};
use crate::schemas::installers::{InstallerRepositorySpec, InstallerSpec, ToolSetSpec};
use crate::schemas::runtimes::RuntimeSpec;
use crate::schemas::system::{
    SystemInstallerSpec, SystemPackageRepositorySpec, SystemPackageSetSpec,
};
use crate::schemas::tools::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The apiVersion constant every resource must carry. Changing it is a
/// breaking change; a user-side schema pin with a different constant
/// produces `config.schema_mismatch`.
pub const API_VERSION: &str = "toolsmith.dev/v1alpha1";

/// Common resource header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Metadata {
    /// Unique within the resource's kind.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// The enumerated resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Tool,
    ToolSet,
    Runtime,
    Installer,
    InstallerRepository,
    SystemInstaller,
    SystemPackageRepository,
    SystemPackageSet,
}

impl Kind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Tool" => Some(Kind::Tool),
            "ToolSet" => Some(Kind::ToolSet),
            "Runtime" => Some(Kind::Runtime),
            "Installer" => Some(Kind::Installer),
            "InstallerRepository" => Some(Kind::InstallerRepository),
            "SystemInstaller" => Some(Kind::SystemInstaller),
            "SystemPackageRepository" => Some(Kind::SystemPackageRepository),
            "SystemPackageSet" => Some(Kind::SystemPackageSet),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kind::Tool => "Tool",
            Kind::ToolSet => "ToolSet",
            Kind::Runtime => "Runtime",
            Kind::Installer => "Installer",
            Kind::InstallerRepository => "InstallerRepository",
            Kind::SystemInstaller => "SystemInstaller",
            Kind::SystemPackageRepository => "SystemPackageRepository",
            Kind::SystemPackageSet => "SystemPackageSet",
        }
    }
}

/// A validated, typed resource instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub metadata: Metadata,
    pub body: ResourceBody,
}

/// The kind-specific body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBody {
    Tool(ToolSpec),
    ToolSet(ToolSetSpec),
    Runtime(RuntimeSpec),
    Installer(InstallerSpec),
    InstallerRepository(InstallerRepositorySpec),
    SystemInstaller(SystemInstallerSpec),
    SystemPackageRepository(SystemPackageRepositorySpec),
    SystemPackageSet(SystemPackageSetSpec),
}

impl Resource {
    pub fn kind(&self) -> Kind {
        match &self.body {
            ResourceBody::Tool(_) => Kind::Tool,
            ResourceBody::ToolSet(_) => Kind::ToolSet,
            ResourceBody::Runtime(_) => Kind::Runtime,
            ResourceBody::Installer(_) => Kind::Installer,
            ResourceBody::InstallerRepository(_) => Kind::InstallerRepository,
            ResourceBody::SystemInstaller(_) => Kind::SystemInstaller,
            ResourceBody::SystemPackageRepository(_) => Kind::SystemPackageRepository,
            ResourceBody::SystemPackageSet(_) => Kind::SystemPackageSet,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Decodes one JSON-shaped resource value into its typed variant and
    /// runs the variant's validation. `origin` names the manifest file for
    /// diagnostics.
    pub fn decode(value: &Value, origin: &str) -> Result<Resource> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if api_version != API_VERSION {
            return Err(Error::Validation {
                fault: ValidationFault::Failed,
                resource: origin.to_string(),
                field: "apiVersion".to_string(),
                expected: API_VERSION.to_string(),
                got: api_version.to_string(),
            });
        }

        let kind_str = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        let Some(kind) = Kind::parse(kind_str) else {
            return Err(Error::Validation {
                fault: ValidationFault::UnknownKind,
                resource: origin.to_string(),
                field: "kind".to_string(),
                expected: "one of the enumerated resource kinds".to_string(),
                got: kind_str.to_string(),
            });
        };

        let metadata: Metadata = decode_field(value, "metadata", origin)?;
        if metadata.name.is_empty() {
            return Err(Error::validation(
                origin,
                "metadata.name",
                "a non-empty name",
                "empty string",
            ));
        }

        let name = metadata.name.clone();
        let body = match kind {
            Kind::Tool => {
                let spec: ToolSpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::Tool(spec)
            }
            Kind::ToolSet => {
                let spec: ToolSetSpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::ToolSet(spec)
            }
            Kind::Runtime => {
                let spec: RuntimeSpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::Runtime(spec)
            }
            Kind::Installer => {
                let spec: InstallerSpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::Installer(spec)
            }
            Kind::InstallerRepository => {
                let spec: InstallerRepositorySpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::InstallerRepository(spec)
            }
            Kind::SystemInstaller => {
                let spec: SystemInstallerSpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::SystemInstaller(spec)
            }
            Kind::SystemPackageRepository => {
                let spec: SystemPackageRepositorySpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::SystemPackageRepository(spec)
            }
            Kind::SystemPackageSet => {
                let spec: SystemPackageSetSpec = decode_field(value, "spec", &name)?;
                spec.validate(&name)?;
                ResourceBody::SystemPackageSet(spec)
            }
        };

        Ok(Resource { metadata, body })
    }

    /// The resources this one references, as `(kind, name)` pairs; the
    /// loader checks presence, the orchestrator orders on them.
    pub fn references(&self) -> Vec<(Kind, String)> {
        match &self.body {
            ResourceBody::Tool(spec) => {
                let mut refs = Vec::new();
                if let Some(runtime) = &spec.runtime_ref {
                    refs.push((Kind::Runtime, runtime.clone()));
                }
                if let Some(installer) = &spec.installer_ref {
                    refs.push((Kind::Installer, installer.clone()));
                }
                refs
            }
            ResourceBody::ToolSet(spec) => vec![(Kind::Installer, spec.installer_ref.clone())],
            ResourceBody::Installer(spec) => spec
                .tool_ref
                .iter()
                .map(|t| (Kind::Tool, t.clone()))
                .collect(),
            ResourceBody::InstallerRepository(spec) => {
                vec![(Kind::Installer, spec.installer_ref.clone())]
            }
            ResourceBody::SystemPackageRepository(spec) => {
                vec![(Kind::SystemInstaller, spec.installer_ref.clone())]
            }
            ResourceBody::SystemPackageSet(spec) => {
                vec![(Kind::SystemInstaller, spec.installer_ref.clone())]
            }
            ResourceBody::Runtime(_) | ResourceBody::SystemInstaller(_) => Vec::new(),
        }
    }
}

/// Applies the top-level discovery rule to one evaluated manifest value.
pub fn discover(value: &Value) -> Vec<Value> {
    if value.get("apiVersion").is_some() {
        return vec![value.clone()];
    }
    if let Value::Array(items) = value {
        return items.clone();
    }
    if let Value::Object(map) = value {
        return map
            .values()
            .filter(|v| v.get("apiVersion").is_some())
            .cloned()
            .collect();
    }
    Vec::new()
}

/// Decodes a required envelope field with a structured validation error on
/// absence or shape mismatch.
fn decode_field<T: serde::de::DeserializeOwned>(
    value: &Value,
    field: &str,
    resource: &str,
) -> Result<T> {
    let Some(raw) = value.get(field) else {
        return Err(Error::validation(resource, field, "present", "absent"));
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        Error::validation(resource, field, "a value matching the resource schema", e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_value() -> Value {
        json!({
            "apiVersion": API_VERSION,
            "kind": "Tool",
            "metadata": {"name": "rg", "labels": {"team": "search"}},
            "spec": {
                "version": "14.0.0",
                "source": {
                    "url": "https://example.com/rg_linux_arm64.tar.gz",
                    "checksum": {"value": format!("sha256:{}", "a".repeat(64))}
                }
            }
        })
    }

    #[test]
    fn decodes_a_tool_resource() {
        let resource = Resource::decode(&tool_value(), "tools.yaml").unwrap();
        assert_eq!(resource.kind(), Kind::Tool);
        assert_eq!(resource.name(), "rg");
        let ResourceBody::Tool(spec) = &resource.body else { panic!("wrong body") };
        assert_eq!(spec.version, "14.0.0");
    }

    #[test]
    fn rejects_wrong_api_version_and_unknown_kind() {
        let mut v = tool_value();
        v["apiVersion"] = json!("toolsmith.dev/v0");
        let err = Resource::decode(&v, "tools.yaml").unwrap_err();
        assert_eq!(err.code(), "validation.failed");

        let mut v = tool_value();
        v["kind"] = json!("Gadget");
        let err = Resource::decode(&v, "tools.yaml").unwrap_err();
        assert_eq!(err.code(), "validation.unknown_kind");
    }

    #[test]
    fn rejects_unknown_spec_fields() {
        let mut v = tool_value();
        v["spec"]["sourceUrl"] = json!("https://typo.example.com");
        let err = Resource::decode(&v, "tools.yaml").unwrap_err();
        assert_eq!(err.code(), "validation.failed");
    }

    #[test]
    fn discovery_rule_covers_all_three_shapes() {
        // Single resource.
        assert_eq!(discover(&tool_value()).len(), 1);

        // List of resources.
        let list = json!([tool_value(), tool_value()]);
        assert_eq!(discover(&list).len(), 2);

        // Field iteration: only values with apiVersion are emitted.
        let object = json!({
            "rg": tool_value(),
            "notes": "just a comment field",
            "fd": tool_value(),
        });
        assert_eq!(discover(&object).len(), 2);
    }

    #[test]
    fn references_follow_the_refs() {
        let v = json!({
            "apiVersion": API_VERSION,
            "kind": "Tool",
            "metadata": {"name": "gopls"},
            "spec": {"runtimeRef": "go"}
        });
        let resource = Resource::decode(&v, "tools.yaml").unwrap();
        assert_eq!(resource.references(), vec![(Kind::Runtime, "go".to_string())]);
    }
}
