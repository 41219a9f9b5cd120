//! # Downloader
//!
//! Streamed HTTP downloads over `ureq`, with byte-progress reporting,
//! cooperative cancellation between chunks, and checksum verification
//! against either an inline `<alg>:<hex>` value or a remote checksum-file
//! sidecar. Partially written files are truncated away on error.

use crate::errors::{Error, NetworkFault, Result};
use crate::libs::runctx::RunCtx;
use crate::libs::utilities::checksum;
use crate::schemas::tools::ChecksumSpec;
use crate::{log_debug, log_info};
use colored::Colorize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

const USER_AGENT: &str = concat!("toolsmith/", env!("CARGO_PKG_VERSION"));

/// Downloads `url` into `dest`, streaming in 64 KiB chunks. Progress and
/// cancellation come from the ambient context.
pub fn download(url: &str, dest: &Path, ctx: &RunCtx) -> Result<()> {
    log_debug!("[Downloader] Starting download from {}", url.blue());

    let response = ureq::get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| classify_ureq(url, e))?;

    let total: Option<u64> = response
        .header("Content-Length")
        .and_then(|v| v.parse().ok());

    let mut reader = response.into_reader();
    let mut file = File::create(dest).map_err(|e| Error::Network {
        fault: NetworkFault::Request,
        url: url.to_string(),
        status_code: None,
        message: format!("cannot create {}: {e}", dest.display()),
        source: Some(Box::new(e)),
    })?;

    let mut done: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        if ctx.is_cancelled() {
            let _ = fs::remove_file(dest);
            let label = dest.file_name().and_then(|f| f.to_str()).unwrap_or(url);
            ctx.check_cancelled(label, "download")?;
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(dest);
                return Err(Error::Network {
                    fault: NetworkFault::Request,
                    url: url.to_string(),
                    status_code: None,
                    message: format!("read failed mid-download: {e}"),
                    source: Some(Box::new(e)),
                });
            }
        };
        if let Err(e) = file.write_all(&buf[..n]) {
            let _ = fs::remove_file(dest);
            return Err(Error::Network {
                fault: NetworkFault::Request,
                url: url.to_string(),
                status_code: None,
                message: format!("write failed mid-download: {e}"),
                source: Some(Box::new(e)),
            });
        }
        done += n as u64;
        ctx.report_progress(done, total);
    }

    log_debug!(
        "[Downloader] Downloaded {} bytes to {}",
        done,
        dest.display().to_string().green()
    );
    Ok(())
}

/// Downloads with an explicit progress callback. The callback is installed
/// on a derived context; an ambient callback, when present, still wins.
pub fn download_with_progress(
    url: &str,
    dest: &Path,
    ctx: &RunCtx,
    cb: std::sync::Arc<crate::libs::runctx::ProgressFn>,
) -> Result<()> {
    if ctx.progress_callback().is_some() {
        // Context callback takes precedence over the caller's.
        return download(url, dest, ctx);
    }
    let derived = ctx.clone().with_progress(cb);
    download(url, dest, &derived)
}

/// Fetches a small text document (checksum sidecars, registry metadata).
pub fn fetch_text(url: &str) -> Result<String> {
    let response = ureq::get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| classify_ureq(url, e))?;
    response.into_string().map_err(|e| Error::Network {
        fault: NetworkFault::Request,
        url: url.to_string(),
        status_code: None,
        message: format!("failed to read response body: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Verifies a downloaded artifact against its checksum declaration.
///
/// - `checksum.value` verifies locally against `<alg>:<hex>`.
/// - `checksum.url` fetches the sidecar, parses it (any of the four
///   supported formats), matches by the downloaded file's basename, then
///   verifies.
///
/// # Returns
/// The digest the artifact was verified against, for recording in state;
/// `None` when the spec declares no checksum.
pub fn verify(path: &Path, spec: Option<&ChecksumSpec>, resource: &str) -> Result<Option<String>> {
    let Some(spec) = spec else {
        log_debug!("[Downloader] No checksum declared for {}; skipping verification", resource);
        return Ok(None);
    };

    if let Some(value) = &spec.value {
        let (_, digest) = checksum::parse_checksum_value(value)?;
        checksum::verify_file(path, &digest, resource, None)?;
        log_info!("[Downloader] Verified {} against inline checksum", resource.green());
        return Ok(Some(digest));
    }

    if let Some(url) = &spec.url {
        let body = fetch_text(url)?;
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or_default();
        let (_, digest) = checksum::parse_checksum_file(&body, filename).map_err(|e| match e {
            Error::Checksum { fault, expected, got, message, .. } => Error::Checksum {
                fault,
                resource: resource.to_string(),
                url: Some(url.clone()),
                expected,
                got,
                message,
            },
            other => other,
        })?;
        checksum::verify_file(path, &digest, resource, Some(url))?;
        log_info!("[Downloader] Verified {} against checksum file", resource.green());
        return Ok(Some(digest));
    }

    log_debug!("[Downloader] Checksum block for {} is empty; nothing to verify", resource);
    Ok(None)
}

/// Maps ureq failures onto the network taxonomy: HTTP error statuses keep
/// the status code, everything else is transport.
fn classify_ureq(url: &str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(code, _) => Error::Network {
            fault: NetworkFault::Status,
            url: url.to_string(),
            status_code: Some(code),
            message: format!("HTTP {code} from {url}"),
            source: None,
        },
        transport => Error::Network {
            fault: NetworkFault::Request,
            url: url.to_string(),
            status_code: None,
            message: format!("request to {url} failed: {transport}"),
            source: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_with_inline_value() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), b"hello world").unwrap();
        let spec = ChecksumSpec {
            value: Some(
                "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9".into(),
            ),
            url: None,
        };
        let digest = verify(file.path(), Some(&spec), "t").unwrap();
        assert_eq!(
            digest.as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
    }

    #[test]
    fn verify_without_spec_is_a_noop() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(verify(file.path(), None, "t").unwrap(), None);
    }

    #[test]
    fn verify_rejects_corrupted_artifact() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), b"tampered").unwrap();
        let spec = ChecksumSpec {
            value: Some(
                "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9".into(),
            ),
            url: None,
        };
        let err = verify(file.path(), Some(&spec), "t").unwrap_err();
        assert_eq!(err.code(), "checksum.mismatch");
    }
}
