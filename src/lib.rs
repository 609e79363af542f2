//! # edgequake-docsplit
//!
//! Split a scanned batch of invoices into one PDF per invoice and deliver
//! each to its client's folder, using a Vision Language Model (VLM) to read
//! the identifying fields off every page.
//!
//! ## Why this crate?
//!
//! Warehouses and logistics desks receive invoices as a single scanned PDF
//! holding dozens of documents back to back. Text extraction is useless on a
//! scan, and page counts per invoice vary. This crate renders each page,
//! asks a VLM for the invoice number and the ship-to client, groups
//! consecutive pages of the same invoice, copies those pages out of the
//! source untouched, and files each result under the client's folder.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF batch
//!  │
//!  ├─ 1. Input    resolve local file or download from URL, count pages
//!  ├─ 2. Render   rasterise each page via pdfium (spawn_blocking), JPEG
//!  ├─ 3. Extract  VLM → {invoiceNo, shipTo}, retry on rate limits only
//!  ├─ 4. Group    contiguous pages sharing an invoice number
//!  ├─ 5. Split    copy each group's pages into its own PDF (lopdf)
//!  └─ 6. Deliver  resolve-or-create client folder, upload (Drive or local)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docsplit::{split_and_deliver, SplitConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = SplitConfig::builder().output_dir("./out").build()?;
//!     let manifest = split_and_deliver("batch.pdf", &config).await?;
//!     for d in manifest.uploaded() {
//!         println!("{} → {}", d.file_name, d.folder_name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsplit` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docsplit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod delivery;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DriveSettings, SplitConfig, SplitConfigBuilder, UNCLASSIFIED_FOLDER};
pub use delivery::{
    AccessToken, DeliveryClient, DriveStorage, IdentityProvider, LocalStorage, RefreshTokenFlow,
    StaticToken, StorageProvider,
};
pub use error::{DeliveryError, DocSplitError, InferenceError, ItemFailure, RenderError, SplitError};
pub use orchestrator::{
    split_and_deliver, split_and_deliver_cancellable, split_and_deliver_sync, Pipeline,
};
pub use output::{
    DeliverableDocument, DeliveryOutcome, DeliveryResult, Discrepancy, DiscrepancyKind,
    FolderHandle, PageGroup, PageImage, PageMetadata, RunManifest, RunStats, RunStatus,
    SourceDocument, Stage, StoredFile,
};
pub use pipeline::extract::{LlmVisionModel, MetadataExtractor, VisionModel};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{NoopProgressCallback, ProgressCallback, SplitProgressCallback};
pub use tokio_util::sync::CancellationToken;
