//! Fuzzy matching of release asset filenames against the host platform.
//! Release archives name their targets inconsistently (`amd64` vs
//! `x86_64`, `darwin` vs `macOS`), so matching runs over the alias tables
//! of both axes. Checksum, signature, source and debug artifacts are
//! excluded so the match lands on the actual binary archive.

use crate::log_debug;
use crate::schemas::environment::Env;
use colored::Colorize;

/// Reports whether a release asset filename is a plausible binary artifact
/// for the given platform.
///
/// # Arguments
/// * `filename`: e.g. `"rg-14.0.0-aarch64-unknown-linux-gnu.tar.gz"`.
/// * `env`: the detected platform environment.
pub fn asset_matches_platform(filename: &str, env: &Env) -> bool {
    let lower = filename.to_lowercase();

    let os_matches = env.os.aliases().iter().any(|alias| lower.contains(alias));
    if !os_matches {
        log_debug!("[Platform] '{}' does not match OS {}", filename.dimmed(), env.os.name());
        return false;
    }

    let arch_matches = env.arch.aliases().iter().any(|alias| lower.contains(alias));
    if !arch_matches {
        log_debug!(
            "[Platform] '{}' does not match arch {}",
            filename.dimmed(),
            env.arch.name()
        );
        return false;
    }

    // Companion artifacts share the platform substring but are never the
    // binary we want.
    if is_companion_artifact(&lower) {
        log_debug!("[Platform] '{}' excluded as a companion artifact", filename.dimmed());
        return false;
    }
    true
}

/// True for checksum files, signatures, source tarballs and debug bundles.
pub fn is_companion_artifact(lower_name: &str) -> bool {
    lower_name.contains("checksum")
        || lower_name.contains("sha256")
        || lower_name.contains("sha512")
        || lower_name.contains("src")
        || lower_name.contains("source")
        || lower_name.contains("debug")
        || lower_name.ends_with(".sig")
        || lower_name.ends_with(".asc")
        || lower_name.ends_with(".pem")
        || lower_name.ends_with(".sbom")
}

/// Finds a checksum sidecar among release asset names: a whole-release
/// digest list, or a per-asset `<asset>.sha256` file.
pub fn find_checksum_asset<'a>(assets: &'a [String], binary_asset: &str) -> Option<&'a String> {
    let sidecar = format!("{}.sha256", binary_asset.to_lowercase());
    assets
        .iter()
        .find(|name| name.to_lowercase() == sidecar)
        .or_else(|| {
            assets.iter().find(|name| {
                let lower = name.to_lowercase();
                lower == "sha256sums"
                    || lower == "sha256sums.txt"
                    || lower == "checksums.txt"
                    || lower.ends_with("checksums.txt")
                    || lower.ends_with("sha256sums")
            })
        })
}
