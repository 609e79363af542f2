//! Error types for the edgequake-docsplit library.
//!
//! Failures are split by blast radius:
//!
//! * [`DocSplitError`] — **Fatal**: the run cannot start or cannot continue
//!   (unreadable input, pdfium missing, authentication failed or lost).
//!   Returned as `Err` from [`crate::split_and_deliver`] before any work is
//!   done, or carried in [`crate::output::RunStatus::Failed`] once the run
//!   has started, so partial results are never thrown away.
//!
//! * [`RenderError`], [`SplitError`], [`DeliveryError`] — **Per item**: one
//!   page, one group or one deliverable failed. The orchestrator records them
//!   as [`ItemFailure`] in the manifest and moves on.
//!
//! * [`InferenceError`] — classified vision-call failure. It never leaves the
//!   extractor, which degrades every failure to null metadata.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docsplit library.
#[derive(Debug, Error)]
pub enum DocSplitError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("'{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF structure cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { name: String, detail: String },

    /// The document has no pages to split.
    #[error("PDF '{name}' contains no pages")]
    EmptyDocument { name: String },

    /// Every page failed to rasterise; there is nothing to classify.
    #[error("All {total} pages failed to render.\nFirst error: {first_error}")]
    AllPagesUnreadable { total: usize, first_error: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib), or place\n\
libpdfium next to the binary.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Provider / delivery errors ────────────────────────────────────────
    /// The configured vision provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The identity provider refused or could not issue a token.
    #[error("Authentication failed: {0}\nRe-authenticate and run again.")]
    AuthFailed(String),

    /// Storage rejected the token mid-run.
    #[error("Authentication lost during delivery: {0}\nRe-authenticate and run again.")]
    AuthLost(String),

    /// The storage host stopped answering mid-run.
    #[error("Connection lost during delivery: {0}\nCheck network access and run again.")]
    ConnectionLost(String),

    // ── Run control ───────────────────────────────────────────────────────
    /// The configured run deadline passed.
    #[error("Run exceeded its {secs}s deadline")]
    DeadlineExceeded { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rasterisation failure for a single page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    #[error("page {page} could not be decoded: {detail}")]
    Decode { page: usize, detail: String },

    #[error("page {page} could not be encoded as JPEG: {detail}")]
    Encode { page: usize, detail: String },
}

/// Failure of one call to the vision model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// HTTP 429 or equivalent. The only retryable condition.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Bad key, missing model, entity-not-found.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    /// The model answered, but not with the expected JSON object.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl InferenceError {
    /// Classify a provider error by its rendered text.
    ///
    /// Providers report rate limits as a status code inside a message, a typed
    /// variant, or a vendor string (`RESOURCE_EXHAUSTED`); the text covers all
    /// three.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("too many requests")
            || lower.contains("resource_exhausted")
        {
            InferenceError::RateLimited(message)
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("permission denied")
            || lower.contains("api key")
            || lower.contains("requested entity was not found")
        {
            InferenceError::Unauthorized(message)
        } else {
            InferenceError::Transport(message)
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, InferenceError::RateLimited(_))
    }
}

/// Failure to produce one deliverable from its page group.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("group {group} is empty")]
    EmptyGroup { group: usize },

    #[error("group {group} references page {page}, document has {total} pages")]
    PageOutOfRange {
        group: usize,
        page: usize,
        total: usize,
    },

    #[error("source PDF could not be parsed: {0}")]
    Parse(String),

    #[error("group {group} could not be written: {detail}")]
    Save { group: usize, detail: String },
}

/// Failure talking to the identity provider or the storage provider.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The identity provider was unavailable or the user cancelled.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The storage provider rejected the bearer token (HTTP 401).
    #[error("access token rejected: {0}")]
    Unauthorized(String),

    /// Folder lookup or creation failed.
    #[error("could not resolve folder '{name}': {detail}")]
    FolderResolution { name: String, detail: String },

    /// Create reported that the folder already exists.
    #[error("folder '{name}' already exists")]
    FolderExists { name: String },

    /// Non-2xx answer to an upload.
    #[error("upload of '{name}' failed with HTTP {status}: {body}")]
    Upload {
        name: String,
        status: u16,
        body: String,
    },

    /// The storage host could not be reached at all.
    #[error("storage unreachable: {0}")]
    Unreachable(String),

    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Classify a failed send: connection failures become [`DeliveryError::Unreachable`].
    pub fn transport(err: reqwest::Error) -> Self {
        if err.is_connect() {
            DeliveryError::Unreachable(err.to_string())
        } else {
            DeliveryError::Http(err)
        }
    }

    /// Errors that end the whole run rather than one deliverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeliveryError::Auth(_) | DeliveryError::Unauthorized(_))
            || self.is_connectivity()
    }

    /// The storage host is unreachable; every later call would fail the same way.
    pub fn is_connectivity(&self) -> bool {
        match self {
            DeliveryError::Unreachable(_) => true,
            DeliveryError::Http(e) => e.is_connect(),
            _ => false,
        }
    }
}

/// A non-fatal failure recorded in the run manifest.
///
/// Serialisable so the manifest can be written as JSON next to the output.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemFailure {
    /// Page could not be rasterised; its metadata was treated as unknown.
    #[error("Page {page}: rendering failed: {detail}")]
    Render { page: usize, detail: String },

    /// Vision extraction degraded to null metadata.
    #[error("Page {page}: extraction failed after {attempts} attempt(s): {detail}")]
    Extraction {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The group could not be cut out of the source document.
    #[error("Group {group}: split failed: {detail}")]
    Split { group: usize, detail: String },

    /// Destination folder could not be resolved.
    #[error("Group {group}: folder '{folder}' unavailable: {detail}")]
    Folder {
        group: usize,
        folder: String,
        detail: String,
    },

    /// Upload was rejected or never completed.
    #[error("Group {group}: upload failed: {detail}")]
    Upload { group: usize, detail: String },

    /// Delivery was never attempted because the run stopped first.
    #[error("Group {group}: not delivered: {detail}")]
    NotAttempted { group: usize, detail: String },
}
