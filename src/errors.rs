//! # Structured Error Taxonomy
//!
//! Every fallible engine operation returns [`Error`]. Each variant is one
//! error *kind* carrying structured fields; within a kind a fault value
//! selects the stable machine code (e.g. `install.invalid_link`). Errors
//! render two ways:
//!
//! - human: a colored headline with the code, the structured fields, and an
//!   optional actionable hint / example snippet;
//! - machine: the same information as a JSON object via [`Error::to_json`].
//!
//! Identity comparison is by code: two errors are "the same" when
//! [`Error::code`] matches, regardless of message wording. Errors propagate
//! to the nearest operation boundary (a single resource's install, a single
//! manifest's load); the orchestrator keeps going with the remaining
//! resources unless [`Error::is_precondition_failure`] holds.

use colored::Colorize;
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// FAULT SELECTORS (one enum per kind that needs more than one code)
// ============================================================================

/// Selects the stable code within the `config.*` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFault {
    /// The manifest or engine config could not be parsed/evaluated.
    Parse,
    /// A user-side schema file pins a different apiVersion than the engine.
    SchemaMismatch,
}

/// Selects the stable code within the `validation.*` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFault {
    /// A field value violates the resource schema.
    Failed,
    /// The manifest names a `kind` the engine does not know.
    UnknownKind,
}

/// Selects the stable code within the `install.*` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallFault {
    /// Generic installation failure.
    Failed,
    /// An archive entry's symlink/hardlink target escapes the destination.
    InvalidLink,
    /// A command-set `check` step reported non-success.
    CheckFailed,
    /// An on-disk binary differs from the expected digest and no force flag
    /// was given.
    ReplaceRefused,
    /// The ambient context requested cancellation mid-operation.
    Cancelled,
    /// The archive type could not be determined or is not supported.
    UnsupportedArchive,
    /// A command-set step exited non-zero.
    CommandFailed,
}

/// Selects the stable code within the `checksum.*` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumFault {
    /// Computed digest differs from the expected one.
    Mismatch,
    /// A checksum value or checksum file could not be parsed.
    Parse,
}

/// Selects the stable code within the `network.*` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFault {
    /// Transport-level failure (DNS, connect, read).
    Request,
    /// The server answered with an HTTP error status.
    Status,
}

/// Selects the stable code within the `state.*` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFault {
    /// Another process holds the state lock.
    Locked,
    /// Reading/writing the state file failed.
    Io,
}

/// Selects the stable code within the `registry.*` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFault {
    /// The resolver could not produce a download triple.
    Resolve,
    /// The resolver produced platform errors for this package.
    UnsupportedPlatform,
}

// ============================================================================
// THE ERROR TYPE
// ============================================================================

/// The engine-wide error type. One variant per taxonomy kind.
#[derive(Debug, Error)]
pub enum Error {
    /// Manifest / engine-config parse or schema-pin failures.
    #[error("{message}")]
    Config {
        fault: ConfigFault,
        /// Manifest or config file the failure originates from.
        file: String,
        line: Option<u32>,
        column: Option<u32>,
        /// Short snippet of the offending source, when available.
        snippet: Option<String>,
        message: String,
    },

    /// A resource failed schema-level validation.
    #[error("resource '{resource}': field '{field}' expected {expected}, got {got}")]
    Validation {
        fault: ValidationFault,
        resource: String,
        field: String,
        expected: String,
        got: String,
    },

    /// Missing or cyclic references between resources.
    #[error("{message}")]
    Dependency {
        resource: String,
        /// Referenced resources absent from the manifest set.
        missing: Vec<String>,
        /// Resource names forming a reference cycle, in order.
        cycle: Vec<String>,
        message: String,
    },

    /// A single resource's realization failed.
    #[error("{message}")]
    Install {
        fault: InstallFault,
        resource: String,
        /// The action being performed: install, upgrade, reinstall, remove.
        action: String,
        version: Option<String>,
        url: Option<String>,
        message: String,
    },

    /// Integrity verification failed or a checksum document was malformed.
    #[error("{message}")]
    Checksum {
        fault: ChecksumFault,
        resource: String,
        url: Option<String>,
        expected: Option<String>,
        got: Option<String>,
        message: String,
    },

    /// HTTP transport or status failures.
    #[error("{message}")]
    Network {
        fault: NetworkFault,
        url: String,
        status_code: Option<u16>,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// State-file and lockfile failures.
    #[error("{message}")]
    State {
        fault: StateFault,
        lock_pid: Option<u32>,
        lock_file: Option<String>,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Package-registry resolution failures.
    #[error("{message}")]
    Registry {
        fault: RegistryFault,
        registry: String,
        package: Option<String>,
        version: Option<String>,
        message: String,
    },
}

impl Error {
    /// The stable machine code for this error. Codes never change meaning
    /// across releases; new failure modes get new codes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { fault, .. } => match fault {
                ConfigFault::Parse => "config.parse",
                ConfigFault::SchemaMismatch => "config.schema_mismatch",
            },
            Error::Validation { fault, .. } => match fault {
                ValidationFault::Failed => "validation.failed",
                ValidationFault::UnknownKind => "validation.unknown_kind",
            },
            Error::Dependency { cycle, .. } => {
                if cycle.is_empty() {
                    "dependency.missing"
                } else {
                    "dependency.cycle"
                }
            }
            Error::Install { fault, .. } => match fault {
                InstallFault::Failed => "install.failed",
                InstallFault::InvalidLink => "install.invalid_link",
                InstallFault::CheckFailed => "install.check_failed",
                InstallFault::ReplaceRefused => "install.replace_refused",
                InstallFault::Cancelled => "install.cancelled",
                InstallFault::UnsupportedArchive => "install.unsupported_archive",
                InstallFault::CommandFailed => "install.command_failed",
            },
            Error::Checksum { fault, .. } => match fault {
                ChecksumFault::Mismatch => "checksum.mismatch",
                ChecksumFault::Parse => "checksum.parse",
            },
            Error::Network { fault, .. } => match fault {
                NetworkFault::Request => "network.request",
                NetworkFault::Status => "network.status",
            },
            Error::State { fault, .. } => match fault {
                StateFault::Locked => "state.locked",
                StateFault::Io => "state.io",
            },
            Error::Registry { fault, .. } => match fault {
                RegistryFault::Resolve => "registry.resolve",
                RegistryFault::UnsupportedPlatform => "registry.unsupported_platform",
            },
        }
    }

    /// Actionable advice for the user, when there is a known remedy.
    pub fn hint(&self) -> Option<&'static str> {
        match self.code() {
            "config.schema_mismatch" => {
                Some("your schema file pins an older apiVersion; run `toolsmith schema update` to refresh it")
            }
            "install.replace_refused" => {
                Some("the binary on disk differs from the manifest; pass --force to overwrite it")
            }
            "install.invalid_link" => {
                Some("the archive contains a link escaping its extraction directory; refusing to install from it")
            }
            "state.locked" => {
                Some("another toolsmith run holds the lock; wait for it to finish or remove the lock file if the process is dead")
            }
            "registry.unsupported_platform" => {
                Some("this package publishes no artifact for your OS/architecture; pin an explicit source URL instead")
            }
            "checksum.mismatch" => {
                Some("the downloaded artifact does not match its published digest; retry, and distrust the mirror if it persists")
            }
            "dependency.missing" => {
                Some("declare the referenced resource in the same manifest set, or drop the reference")
            }
            _ => None,
        }
    }

    /// A short manifest snippet illustrating a correct declaration, for the
    /// codes where one exists.
    pub fn example(&self) -> Option<&'static str> {
        match self.code() {
            "dependency.missing" => Some(
                "kind: Runtime\nmetadata:\n  name: go\nspec:\n  type: download\n  ...",
            ),
            "checksum.parse" => Some("checksum:\n  value: \"sha256:3f8b...c1\""),
            _ => None,
        }
    }

    /// True when the failure invalidates the whole run, not just one
    /// resource: a held state lock, a schema pin mismatch, or a reference
    /// cycle. The orchestrator stops instead of continuing.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self.code(),
            "state.locked" | "config.schema_mismatch" | "dependency.cycle"
        )
    }

    /// The same structured information as a JSON object, for machine
    /// consumers (`--json`).
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        let fields = match self {
            Error::Config { file, line, column, snippet, .. } => json!({
                "file": file, "line": line, "column": column, "snippet": snippet,
            }),
            Error::Validation { resource, field, expected, got, .. } => json!({
                "resource": resource, "field": field, "expected": expected, "got": got,
            }),
            Error::Dependency { resource, missing, cycle, .. } => json!({
                "resource": resource, "missing": missing, "cycle": cycle,
            }),
            Error::Install { resource, action, version, url, .. } => json!({
                "resource": resource, "action": action, "version": version, "url": url,
            }),
            Error::Checksum { resource, url, expected, got, .. } => json!({
                "resource": resource, "url": url, "expected": expected, "got": got,
            }),
            Error::Network { url, status_code, .. } => json!({
                "url": url, "statusCode": status_code,
            }),
            Error::State { lock_pid, lock_file, .. } => json!({
                "lockPid": lock_pid, "lockFile": lock_file,
            }),
            Error::Registry { registry, package, version, .. } => json!({
                "registry": registry, "package": package, "version": version,
            }),
        };
        obj["fields"] = fields;
        if let Some(hint) = self.hint() {
            obj["hint"] = json!(hint);
        }
        if let Some(example) = self.example() {
            obj["example"] = json!(example);
        }
        obj
    }

    /// Renders the human-facing report: headline, fields, hint, example.
    pub fn render(&self) -> String {
        let mut out = format!("{} {}", self.code().red().bold(), self);
        if let Value::Object(map) = &self.to_json()["fields"] {
            for (key, value) in map {
                if value.is_null() {
                    continue;
                }
                out.push_str(&format!("\n    {}: {}", key.dimmed(), Renderable(value)));
            }
        }
        if let Some(hint) = self.hint() {
            out.push_str(&format!("\n  {} {}", "hint:".cyan(), hint));
        }
        if let Some(example) = self.example() {
            out.push_str(&format!("\n  {}\n{}", "example:".cyan(), indent(example)));
        }
        out
    }
}

/// Code-based identity: two errors are equal when their stable codes match.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

// JSON scalars print bare, without quotes, in the human rendering.
struct Renderable<'a>(&'a Value);

impl fmt::Display for Renderable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{other}"),
        }
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// CONSTRUCTION HELPERS
// ============================================================================

impl Error {
    /// Shorthand for the common `install.failed` case.
    pub fn install_failed(resource: &str, action: &str, message: impl Into<String>) -> Self {
        Error::Install {
            fault: InstallFault::Failed,
            resource: resource.to_string(),
            action: action.to_string(),
            version: None,
            url: None,
            message: message.into(),
        }
    }

    /// Shorthand for manifest parse failures without position information.
    pub fn config_parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            fault: ConfigFault::Parse,
            file: file.into(),
            line: None,
            column: None,
            snippet: None,
            message: message.into(),
        }
    }

    /// Shorthand for field-level validation failures.
    pub fn validation(
        resource: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Error::Validation {
            fault: ValidationFault::Failed,
            resource: resource.into(),
            field: field.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_per_fault() {
        let e = Error::Install {
            fault: InstallFault::InvalidLink,
            resource: "rg".into(),
            action: "install".into(),
            version: None,
            url: None,
            message: "invalid symlink target".into(),
        };
        assert_eq!(e.code(), "install.invalid_link");

        let e = Error::Dependency {
            resource: "rg".into(),
            missing: vec!["go".into()],
            cycle: vec![],
            message: "missing reference".into(),
        };
        assert_eq!(e.code(), "dependency.missing");

        let e = Error::Dependency {
            resource: "a".into(),
            missing: vec![],
            cycle: vec!["a".into(), "b".into(), "a".into()],
            message: "cycle".into(),
        };
        assert_eq!(e.code(), "dependency.cycle");
        assert!(e.is_precondition_failure());
    }

    #[test]
    fn identity_is_by_code() {
        let a = Error::install_failed("rg", "install", "boom");
        let b = Error::install_failed("fd", "upgrade", "different words");
        assert_eq!(a, b);

        let c = Error::Install {
            fault: InstallFault::CheckFailed,
            resource: "rg".into(),
            action: "install".into(),
            version: None,
            url: None,
            message: "boom".into(),
        };
        assert_ne!(a, c);
    }

    #[test]
    fn json_rendering_carries_fields_and_hint() {
        let e = Error::Checksum {
            fault: ChecksumFault::Mismatch,
            resource: "rg".into(),
            url: Some("https://example.com/rg.tar.gz".into()),
            expected: Some("aa".into()),
            got: Some("bb".into()),
            message: "digest mismatch".into(),
        };
        let v = e.to_json();
        assert_eq!(v["code"], "checksum.mismatch");
        assert_eq!(v["fields"]["expected"], "aa");
        assert_eq!(v["fields"]["got"], "bb");
        assert!(v["hint"].as_str().unwrap().contains("digest"));
    }
}
