//! # Platform Environment
//!
//! The `Env` triple `{os, arch, headless}` drives manifest tag injection
//! and registry asset matching. Both axes carry dual-convention names
//! (release archives disagree about `amd64` vs `x86_64` and `darwin` vs
//! `macOS`), so each axis exposes its canonical name, its alternate name,
//! and the full alias list used for fuzzy asset matching.
//!
//! Headless detection is heuristic: container/CI/SSH markers, or a missing
//! display on Linux.

use crate::log_debug;
use serde::Serialize;
use std::path::Path;

/// Operating systems the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
}

impl Os {
    /// Canonical short name, as injected into manifests.
    pub fn name(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
        }
    }

    /// The other naming convention commonly seen in release assets.
    pub fn alt_name(&self) -> &'static str {
        match self {
            Os::Linux => "Linux",
            Os::Darwin => "macOS",
        }
    }

    /// All spellings accepted when matching asset filenames.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Os::Linux => &["linux"],
            Os::Darwin => &["darwin", "macos", "apple-darwin", "macosx", "osx"],
        }
    }
}

/// CPU architectures the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn name(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    pub fn alt_name(&self) -> &'static str {
        match self {
            Arch::Amd64 => "x86_64",
            Arch::Arm64 => "aarch64",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Arch::Amd64 => &["amd64", "x86_64", "x64"],
            Arch::Arm64 => &["arm64", "aarch64"],
        }
    }
}

/// The detected platform environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Env {
    pub os: Os,
    pub arch: Arch,
    pub headless: bool,
}

impl Env {
    /// Detects the host environment. `None` on platforms the engine does
    /// not manage.
    pub fn detect() -> Option<Self> {
        let os = match std::env::consts::OS {
            "linux" => Os::Linux,
            "macos" => Os::Darwin,
            _ => return None,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::Amd64,
            "aarch64" => Arch::Arm64,
            _ => return None,
        };
        let headless = detect_headless(os);
        let env = Env { os, arch, headless };
        log_debug!("[Env] Detected environment: {:?}", env);
        Some(env)
    }

    /// The tag names manifests may reference, in injection order.
    pub const TAG_NAMES: [&'static str; 3] = ["os", "arch", "headless"];

    /// The value injected for one tag name, or `None` for an unknown tag.
    pub fn tag_value(&self, name: &str) -> Option<String> {
        match name {
            "os" => Some(self.os.name().to_string()),
            "arch" => Some(self.arch.name().to_string()),
            "headless" => Some(self.headless.to_string()),
            _ => None,
        }
    }
}

/// Headless when running in a container, under Kubernetes or CI, over SSH,
/// or on a Linux host with no display server reachable.
fn detect_headless(os: Os) -> bool {
    let set = |name: &str| std::env::var_os(name).is_some_and(|v| !v.is_empty());

    if set("container") || set("KUBERNETES_SERVICE_HOST") || set("CI") {
        return true;
    }
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    if set("SSH_CLIENT") || set("SSH_TTY") {
        return true;
    }
    match os {
        Os::Linux => !set("DISPLAY") && !set("WAYLAND_DISPLAY"),
        // A local macOS session always has a display server.
        Os::Darwin => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_convention_names() {
        assert_eq!(Os::Darwin.name(), "darwin");
        assert_eq!(Os::Darwin.alt_name(), "macOS");
        assert_eq!(Arch::Amd64.name(), "amd64");
        assert_eq!(Arch::Amd64.alt_name(), "x86_64");
        assert!(Arch::Arm64.aliases().contains(&"aarch64"));
    }

    #[test]
    fn tag_values_follow_the_env() {
        let env = Env { os: Os::Linux, arch: Arch::Arm64, headless: false };
        assert_eq!(env.tag_value("os").as_deref(), Some("linux"));
        assert_eq!(env.tag_value("arch").as_deref(), Some("arm64"));
        assert_eq!(env.tag_value("headless").as_deref(), Some("false"));
        assert_eq!(env.tag_value("unknown"), None);
    }
}
