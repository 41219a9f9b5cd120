//! # Checksum Subsystem
//!
//! Streaming digest computation (SHA-256 / SHA-512), `<alg>:<hex>` checksum
//! value parsing, file verification, and multi-format checksum-file parsing.
//!
//! Four checksum-file formats are accepted, auto-detected from the first
//! non-empty line:
//!
//! 1. GNU coreutils: `<hex>  <name>` or `<hex> *<name>`
//! 2. BSD tagged:    `SHA256 (<name>) = <hex>`
//! 3. Bare hash:     a single hex string and nothing else (per-file sidecar)
//! 4. JSON release manifest: an array of releases, each carrying a `files`
//!    list of `{filename, sha256, ...}` objects
//!
//! Filename queries match either the full recorded path or its basename.

use crate::errors::{ChecksumFault, Error, Result};
use crate::log_debug;
use colored::Colorize;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Digest algorithms the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Parses an algorithm name as it appears in checksum values and BSD
    /// tags. Case-insensitive; accepts `sha256`/`sha-256` spellings.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(Error::Checksum {
                fault: ChecksumFault::Parse,
                resource: String::new(),
                url: None,
                expected: None,
                got: Some(other.to_string()),
                message: format!("unsupported checksum algorithm '{other}'"),
            }),
        }
    }

    /// Infers the algorithm from a hex digest's length: 64 chars is
    /// SHA-256, 128 chars is SHA-512.
    pub fn from_digest_len(digest: &str) -> Result<Self> {
        match digest.len() {
            64 => Ok(Algorithm::Sha256),
            128 => Ok(Algorithm::Sha512),
            n => Err(Error::Checksum {
                fault: ChecksumFault::Parse,
                resource: String::new(),
                url: None,
                expected: None,
                got: Some(digest.to_string()),
                message: format!("cannot infer checksum algorithm from a {n}-char digest"),
            }),
        }
    }

    /// Canonical lower-case name.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Expected hex-digest length for this algorithm.
    pub fn digest_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }
}

/// Parses a checksum value of the form `<algorithm>:<hex>`.
///
/// # Arguments
/// * `value`: e.g. `"sha256:3f8b...c1"`.
///
/// # Returns
/// The parsed `(Algorithm, digest)` pair; digest is normalized to
/// lower-case. Fails on a missing separator, an unsupported algorithm, or a
/// digest whose length does not fit the named algorithm.
pub fn parse_checksum_value(value: &str) -> Result<(Algorithm, String)> {
    let Some((alg_name, digest)) = value.split_once(':') else {
        return Err(Error::Checksum {
            fault: ChecksumFault::Parse,
            resource: String::new(),
            url: None,
            expected: None,
            got: Some(value.to_string()),
            message: format!("malformed checksum value '{value}', expected '<algorithm>:<hex>'"),
        });
    };
    let algorithm = Algorithm::from_name(alg_name)?;
    let digest = digest.trim().to_lowercase();
    if digest.len() != algorithm.digest_len() || !is_hex(&digest) {
        return Err(Error::Checksum {
            fault: ChecksumFault::Parse,
            resource: String::new(),
            url: None,
            expected: None,
            got: Some(digest),
            message: format!(
                "digest is not a valid {}-char hex string for {}",
                algorithm.digest_len(),
                algorithm.name()
            ),
        });
    }
    Ok((algorithm, digest))
}

/// Computes the digest of a byte stream, returning lower-case hex.
/// Reads in 64 KiB chunks so arbitrarily large artifacts stream without
/// buffering whole.
pub fn compute_digest<R: Read>(mut reader: R, algorithm: Algorithm) -> io::Result<String> {
    let mut buf = [0u8; 64 * 1024];
    match algorithm {
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
        Algorithm::Sha512 => {
            let mut hasher = Sha512::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Computes the digest of a file on disk.
pub fn file_digest(path: &Path, algorithm: Algorithm) -> io::Result<String> {
    let file = File::open(path)?;
    compute_digest(file, algorithm)
}

/// Verifies a file against an expected digest. The algorithm is inferred
/// from the digest's length.
///
/// # Arguments
/// * `path`: the file to verify.
/// * `expected`: the expected lower/upper-case hex digest.
/// * `resource`: the resource name, for diagnostics.
/// * `url`: the artifact's origin, for diagnostics.
pub fn verify_file(path: &Path, expected: &str, resource: &str, url: Option<&str>) -> Result<()> {
    let algorithm = Algorithm::from_digest_len(expected)?;
    let expected = expected.to_lowercase();
    let actual = file_digest(path, algorithm).map_err(|e| Error::Checksum {
        fault: ChecksumFault::Parse,
        resource: resource.to_string(),
        url: url.map(str::to_string),
        expected: Some(expected.clone()),
        got: None,
        message: format!("failed to read {} for verification: {e}", path.display()),
    })?;
    if actual != expected {
        return Err(Error::Checksum {
            fault: ChecksumFault::Mismatch,
            resource: resource.to_string(),
            url: url.map(str::to_string),
            expected: Some(expected),
            got: Some(actual),
            message: format!("checksum mismatch for {}", path.display()),
        });
    }
    log_debug!(
        "[Checksum] {} verified ({}: {})",
        path.display().to_string().green(),
        algorithm.name(),
        expected.dimmed()
    );
    Ok(())
}

// ============================================================================
// CHECKSUM FILE PARSING
// ============================================================================

/// The checksum-file formats the parser auto-detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumFileFormat {
    /// GNU coreutils `sha256sum`-style lines.
    Gnu,
    /// BSD tagged lines: `SHA256 (name) = hex`.
    Bsd,
    /// A single bare hex digest (per-file sidecar).
    BareHash,
    /// JSON release manifest with per-file digests.
    JsonManifest,
}

/// Detects the checksum-file format from the first non-empty line. Bare
/// hash additionally requires that no further non-empty lines exist.
pub fn detect_format(content: &str) -> Option<ChecksumFileFormat> {
    let mut non_empty = content.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = non_empty.next()?;

    if first.starts_with('[') || first.starts_with('{') {
        return Some(ChecksumFileFormat::JsonManifest);
    }
    if parse_bsd_line(first).is_some() {
        return Some(ChecksumFileFormat::Bsd);
    }
    if parse_gnu_line(first).is_some() {
        return Some(ChecksumFileFormat::Gnu);
    }
    if is_hex(first) && (first.len() == 64 || first.len() == 128) {
        // A sidecar holds exactly one digest; trailing lines disqualify it.
        if non_empty.next().is_none() {
            return Some(ChecksumFileFormat::BareHash);
        }
    }
    None
}

/// Parses a checksum file and returns the digest recorded for `filename`.
///
/// The query matches an entry when the recorded name equals the query, or
/// when either side's basename equals the other. Unknown formats and absent
/// filenames are fatal.
pub fn parse_checksum_file(content: &str, filename: &str) -> Result<(Algorithm, String)> {
    let format = detect_format(content).ok_or_else(|| Error::Checksum {
        fault: ChecksumFault::Parse,
        resource: String::new(),
        url: None,
        expected: None,
        got: None,
        message: "unrecognized checksum file format".to_string(),
    })?;
    log_debug!("[Checksum] Detected checksum file format: {:?}", format);

    let found = match format {
        ChecksumFileFormat::Gnu => content
            .lines()
            .map(str::trim)
            .filter_map(parse_gnu_line)
            .find(|(name, _)| filename_matches(name, filename))
            .map(|(_, digest)| digest),
        ChecksumFileFormat::Bsd => content
            .lines()
            .map(str::trim)
            .filter_map(parse_bsd_line)
            .find(|(name, _)| filename_matches(name, filename))
            .map(|(_, digest)| digest),
        ChecksumFileFormat::BareHash => content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|digest| digest.to_lowercase()),
        ChecksumFileFormat::JsonManifest => parse_json_manifest(content, filename)?,
    };

    match found {
        Some(digest) => {
            let algorithm = Algorithm::from_digest_len(&digest)?;
            Ok((algorithm, digest))
        }
        None => Err(Error::Checksum {
            fault: ChecksumFault::Parse,
            resource: String::new(),
            url: None,
            expected: None,
            got: None,
            message: format!("no checksum entry found for '{filename}'"),
        }),
    }
}

/// One GNU line: `<hex>  <name>` or `<hex> *<name>` (binary marker).
fn parse_gnu_line(line: &str) -> Option<(String, String)> {
    let (digest, rest) = line.split_once(char::is_whitespace)?;
    if !is_hex(digest) || !(digest.len() == 64 || digest.len() == 128) {
        return None;
    }
    let name = rest.trim_start().trim_start_matches('*');
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), digest.to_lowercase()))
}

/// One BSD tagged line: `<ALG> (<name>) = <hex>`.
fn parse_bsd_line(line: &str) -> Option<(String, String)> {
    let (tag, rest) = line.split_once(" (")?;
    Algorithm::from_name(tag).ok()?;
    let (name, rest) = rest.split_once(") = ")?;
    let digest = rest.trim();
    if name.is_empty() || !is_hex(digest) {
        return None;
    }
    Some((name.to_string(), digest.to_lowercase()))
}

/// JSON release manifests: an array of releases, each with a `files` array
/// of `{filename, sha256, ...}` objects.
fn parse_json_manifest(content: &str, filename: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(content).map_err(|e| Error::Checksum {
        fault: ChecksumFault::Parse,
        resource: String::new(),
        url: None,
        expected: None,
        got: None,
        message: format!("invalid JSON checksum manifest: {e}"),
    })?;
    let releases = match &value {
        Value::Array(items) => items.as_slice(),
        _ => std::slice::from_ref(&value),
    };
    for release in releases {
        let Some(files) = release.get("files").and_then(Value::as_array) else {
            continue;
        };
        for file in files {
            let Some(name) = file.get("filename").and_then(Value::as_str) else {
                continue;
            };
            if !filename_matches(name, filename) {
                continue;
            }
            if let Some(digest) = file.get("sha256").and_then(Value::as_str) {
                return Ok(Some(digest.to_lowercase()));
            }
        }
    }
    Ok(None)
}

/// Match by full recorded path, or by basename on either side.
fn filename_matches(recorded: &str, query: &str) -> bool {
    if recorded == query {
        return true;
    }
    let recorded_base = basename(recorded);
    let query_base = basename(query);
    recorded_base == query || recorded == query_base || recorded_base == query_base
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DIGEST_A: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn parses_checksum_values() {
        let (alg, digest) = parse_checksum_value(&format!("sha256:{DIGEST_A}")).unwrap();
        assert_eq!(alg, Algorithm::Sha256);
        assert_eq!(digest, DIGEST_A);

        assert!(parse_checksum_value("sha256").is_err());
        assert!(parse_checksum_value(&format!("md5:{DIGEST_A}")).is_err());
        assert!(parse_checksum_value("sha256:nothex").is_err());
    }

    #[test]
    fn algorithm_inferred_from_length() {
        assert_eq!(Algorithm::from_digest_len(DIGEST_A).unwrap(), Algorithm::Sha256);
        assert_eq!(
            Algorithm::from_digest_len(&"a".repeat(128)).unwrap(),
            Algorithm::Sha512
        );
        assert!(Algorithm::from_digest_len("abcd").is_err());
    }

    #[test]
    fn digest_roundtrip_and_bitflip() {
        let data = b"hello world";
        let digest = compute_digest(&data[..], Algorithm::Sha256).unwrap();
        assert_eq!(digest, DIGEST_A);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        verify_file(file.path(), DIGEST_A, "t", None).unwrap();

        // Flip one nibble of the expectation; verification must now fail
        // with a mismatch carrying both digests.
        let mut flipped = DIGEST_A.to_string();
        flipped.replace_range(0..1, "c");
        let err = verify_file(file.path(), &flipped, "t", None).unwrap_err();
        assert_eq!(err.code(), "checksum.mismatch");
    }

    #[test]
    fn gnu_file_matches_by_basename() {
        let content = format!("{DIGEST_A}  path/to/test.tar.gz\n");
        let (alg, digest) = parse_checksum_file(&content, "test.tar.gz").unwrap();
        assert_eq!(alg, Algorithm::Sha256);
        assert_eq!(digest, DIGEST_A);

        // Full-path query matches the same line.
        let (_, digest) = parse_checksum_file(&content, "path/to/test.tar.gz").unwrap();
        assert_eq!(digest, DIGEST_A);
    }

    #[test]
    fn gnu_binary_marker_and_multiple_lines() {
        let other = "a".repeat(64);
        let content = format!("{other} *other.zip\n{DIGEST_A} *test.tar.gz\n");
        let (_, digest) = parse_checksum_file(&content, "test.tar.gz").unwrap();
        assert_eq!(digest, DIGEST_A);
    }

    #[test]
    fn bsd_tagged_format() {
        let content = format!("SHA256 (test.tar.gz) = {DIGEST_A}\n");
        assert_eq!(detect_format(&content), Some(ChecksumFileFormat::Bsd));
        let (alg, digest) = parse_checksum_file(&content, "test.tar.gz").unwrap();
        assert_eq!(alg, Algorithm::Sha256);
        assert_eq!(digest, DIGEST_A);
    }

    #[test]
    fn bare_hash_requires_single_line() {
        let content = format!("{DIGEST_A}\n");
        assert_eq!(detect_format(&content), Some(ChecksumFileFormat::BareHash));
        let (_, digest) = parse_checksum_file(&content, "anything.tar.gz").unwrap();
        assert_eq!(digest, DIGEST_A);

        let content = format!("{DIGEST_A}\n{}\n", "b".repeat(64));
        assert_eq!(detect_format(&content), None);
    }

    #[test]
    fn json_manifest_format() {
        let content = format!(
            r#"[{{"version": "14.0.0", "files": [
                 {{"filename": "rg-14.0.0-linux.tar.gz", "sha256": "{DIGEST_A}"}},
                 {{"filename": "rg-14.0.0-darwin.tar.gz", "sha256": "{}"}}
               ]}}]"#,
            "c".repeat(64)
        );
        let (_, digest) = parse_checksum_file(&content, "rg-14.0.0-linux.tar.gz").unwrap();
        assert_eq!(digest, DIGEST_A);
    }

    #[test]
    fn unknown_format_is_fatal() {
        let err = parse_checksum_file("not a checksum file\n", "x").unwrap_err();
        assert_eq!(err.code(), "checksum.parse");
    }

    #[test]
    fn missing_filename_is_fatal() {
        let content = format!("{DIGEST_A}  other.tar.gz\n");
        let err = parse_checksum_file(&content, "test.tar.gz").unwrap_err();
        assert_eq!(err.code(), "checksum.parse");
    }
}
