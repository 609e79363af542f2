//! Data model shared by every pipeline stage, plus the run manifest.
//!
//! Everything a caller needs to report on a run lives in [`RunManifest`]:
//! per-page metadata, the grouping decision, and one [`DeliveryResult`] per
//! group. Types serialise with the camelCase keys the extraction prompt uses
//! so a manifest can be diffed against raw model output.

use crate::error::ItemFailure;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The multi-page source PDF, loaded once per run.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Display name (file name or last URL segment).
    pub name: String,
    /// Raw PDF bytes. Shared with blocking render tasks.
    pub bytes: Arc<Vec<u8>>,
    /// Number of pages; pages are addressed `1..=page_count`.
    pub page_count: usize,
}

impl SourceDocument {
    pub fn page_indices(&self) -> impl Iterator<Item = usize> {
        1..=self.page_count
    }
}

/// A rasterised page ready for the vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page_index: usize,
    /// Base64-encoded image bytes (no data-URI prefix).
    pub base64: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Identifying fields read off one page. `None` means "not detected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub page_index: usize,
    pub invoice_no: Option<String>,
    pub ship_to: Option<String>,
}

impl PageMetadata {
    /// The degraded result for a page nothing could be read from.
    pub fn unknown(page_index: usize) -> Self {
        Self {
            page_index,
            invoice_no: None,
            ship_to: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.invoice_no.is_none() && self.ship_to.is_none()
    }
}

/// A contiguous run of pages that forms one logical document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageGroup {
    /// 1-based position of the group in the document.
    pub index: usize,
    /// 1-based page indices, ascending and contiguous.
    pub pages: Vec<usize>,
    /// Metadata standing for the whole group.
    pub representative: PageMetadata,
}

impl PageGroup {
    pub fn first_page(&self) -> usize {
        self.pages.first().copied().unwrap_or(0)
    }

    pub fn last_page(&self) -> usize {
        self.pages.last().copied().unwrap_or(0)
    }
}

/// One independent PDF cut from the source, with its destination.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliverableDocument {
    pub group_index: usize,
    pub pages: Vec<usize>,
    pub file_name: String,
    pub folder_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for DeliverableDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverableDocument")
            .field("group_index", &self.group_index)
            .field("pages", &self.pages)
            .field("file_name", &self.file_name)
            .field("folder_name", &self.folder_name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Remote folder identity, cached per `(name, parent_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderHandle {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// A file as the storage provider actually stored it.
///
/// `name` can differ from the requested name when the provider avoids a clash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
}

/// Outcome of delivering one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Uploaded { file_id: String, folder_id: String },
    Failed { error: ItemFailure },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub group_index: usize,
    pub pages: Vec<usize>,
    pub invoice_no: Option<String>,
    pub file_name: String,
    pub folder_name: String,
    pub outcome: DeliveryOutcome,
}

impl DeliveryResult {
    pub fn is_uploaded(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Uploaded { .. })
    }
}

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Rendering,
    Extracting,
    Grouping,
    Splitting,
    Delivering,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Rendering => "rendering",
            Stage::Extracting => "extracting",
            Stage::Grouping => "grouping",
            Stage::Splitting => "splitting",
            Stage::Delivering => "delivering",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage ran; individual items may still have failed.
    Done,
    /// A run-level error stopped the pipeline at `stage`.
    Failed { stage: Stage, reason: String },
    /// The caller abandoned the run at `stage`.
    Cancelled { stage: Stage },
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    pub identified_pages: usize,
    pub render_failures: usize,
    pub extraction_failures: usize,
    pub extraction_retries: u32,
    pub groups: usize,
    pub uploaded: usize,
    pub failed_deliveries: usize,
    pub extract_duration_ms: u64,
    pub deliver_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a run produced, successes and failures alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub document: String,
    pub status: RunStatus,
    pub pages: Vec<PageMetadata>,
    pub page_failures: Vec<ItemFailure>,
    pub groups: Vec<PageGroup>,
    pub deliveries: Vec<DeliveryResult>,
    pub stats: RunStats,
}

impl RunManifest {
    pub(crate) fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            status: RunStatus::Done,
            pages: Vec::new(),
            page_failures: Vec::new(),
            groups: Vec::new(),
            deliveries: Vec::new(),
            stats: RunStats::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn uploaded(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.deliveries.iter().filter(|d| d.is_uploaded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.deliveries.iter().filter(|d| !d.is_uploaded())
    }

    /// Invoice numbers of every delivered group, in document order.
    ///
    /// These are the identifiers a reconciliation step compares against a
    /// spreadsheet; see [`Discrepancy`].
    pub fn discrepancy_ids(&self) -> Vec<String> {
        self.uploaded()
            .filter_map(|d| d.invoice_no.clone())
            .collect()
    }
}

/// A reconciliation finding between delivered invoices and a spreadsheet.
///
/// Produced by an external reconciliation step; the pipeline only supplies
/// identifiers through [`RunManifest::discrepancy_ids`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DiscrepancyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    MissingInExcel,
    MissingInPdf,
}
