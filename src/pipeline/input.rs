//! Input resolution: load a local path or URL into a [`SourceDocument`].
//!
//! The whole PDF is held in memory for the run: the renderer and the splitter
//! both read from the same bytes, and the splitter must copy pages from the
//! exact file that was classified. The `%PDF` magic is checked before
//! parsing so callers get a meaningful error rather than a parser failure.

use crate::error::DocSplitError;
use crate::output::SourceDocument;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a loaded source document.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
) -> Result<SourceDocument, DocSplitError> {
    let (name, bytes) = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    load_bytes(name, bytes)
}

/// Validate PDF bytes and count their pages.
pub fn load_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<SourceDocument, DocSplitError> {
    let name = name.into();
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(DocSplitError::NotAPdf { name, magic });
    }

    let document = lopdf::Document::load_mem(&bytes).map_err(|e| DocSplitError::CorruptPdf {
        name: name.clone(),
        detail: e.to_string(),
    })?;
    let page_count = document.get_pages().len();
    if page_count == 0 {
        return Err(DocSplitError::EmptyDocument { name });
    }

    debug!("Loaded '{}': {} pages, {} bytes", name, page_count, bytes.len());
    Ok(SourceDocument {
        name,
        bytes: Arc::new(bytes),
        page_count,
    })
}

async fn read_local(path_str: &str) -> Result<(String, Vec<u8>), DocSplitError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DocSplitError::PermissionDenied { path: path.clone() },
        _ => DocSplitError::FileNotFound { path: path.clone() },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());
    Ok((name, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<(String, Vec<u8>), DocSplitError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocSplitError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocSplitError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocSplitError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DocSplitError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DocSplitError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok((extract_filename(url), bytes.to_vec()))
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
