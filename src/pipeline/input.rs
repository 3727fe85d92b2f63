//! Input resolution: turn a user-supplied path or URL into document bytes.
//!
//! pdfium loads documents straight from a byte slice, so both local files
//! and downloads end up as one `Vec<u8>` and nothing touches a temp
//! directory. [`validate_document`] runs before rasterisation so callers get
//! a size or magic-byte error instead of a pdfium crash.

use crate::error::PipelineError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Leading bytes of every PDF file.
const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read the document named by `input`, downloading it when it is a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Vec<u8>, PipelineError> {
    if input.trim().is_empty() {
        return Err(PipelineError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Reject documents that are too large or are not PDFs.
///
/// Only the header is inspected; structural damage further in is reported
/// by the page source when pdfium parses the file.
pub fn validate_document(bytes: &[u8], max_file_size: usize) -> Result<(), PipelineError> {
    if bytes.len() > max_file_size {
        return Err(PipelineError::FileTooLarge {
            size: bytes.len(),
            limit: max_file_size,
        });
    }
    if bytes.is_empty() {
        return Err(PipelineError::InvalidDocument {
            detail: "document is empty".to_string(),
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        let head = &bytes[..bytes.len().min(4)];
        return Err(PipelineError::InvalidDocument {
            detail: format!("missing %PDF header (found {head:?})"),
        });
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, PipelineError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(PipelineError::PermissionDenied { path })
        }
        Err(_) => Err(PipelineError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
