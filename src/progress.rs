//! Progress-callback trait for run events.
//!
//! Inject an [`Arc<dyn SplitProgressCallback>`] via
//! [`crate::config::SplitConfigBuilder::progress_callback`] to receive stage
//! transitions, per-page extraction results, retry notices and per-group
//! delivery outcomes as they happen.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docsplit::{SplitProgressCallback, SplitConfig};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct RetryCounter {
//!     retries: AtomicU32,
//! }
//!
//! impl SplitProgressCallback for RetryCounter {
//!     fn on_extraction_retry(&self, page_index: usize, attempt: u32, delay_ms: u64) {
//!         self.retries.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_index}: rate limited, retry {attempt} in {delay_ms}ms");
//!     }
//! }
//!
//! let config = SplitConfig::builder()
//!     .progress_callback(Arc::new(RetryCounter { retries: AtomicU32::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{DeliveryResult, PageMetadata, RunManifest, Stage};
use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` page events
/// may arrive from several tasks. All methods default to no-ops.
pub trait SplitProgressCallback: Send + Sync {
    /// Called once the source is loaded, before the first page is rendered.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called on every stage transition, including the terminal one.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called just before a page is rendered.
    fn on_page_start(&self, page_index: usize, total_pages: usize) {
        let _ = (page_index, total_pages);
    }

    /// Called when a rate-limited extraction is about to be retried.
    ///
    /// `attempt` is the 1-based number of the attempt that failed.
    fn on_extraction_retry(&self, page_index: usize, attempt: u32, delay_ms: u64) {
        let _ = (page_index, attempt, delay_ms);
    }

    /// Called with each page's metadata (possibly unknown).
    fn on_page_extracted(&self, metadata: &PageMetadata, total_pages: usize) {
        let _ = (metadata, total_pages);
    }

    /// Called when a page failed to render or extract.
    fn on_page_error(&self, page_index: usize, total_pages: usize, error: &str) {
        let _ = (page_index, total_pages, error);
    }

    /// Called after each group has been delivered or has failed.
    fn on_delivery(&self, result: &DeliveryResult, total_groups: usize) {
        let _ = (result, total_groups);
    }

    /// Called once with the final manifest.
    fn on_run_complete(&self, manifest: &RunManifest) {
        let _ = manifest;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl SplitProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SplitConfig`].
pub type ProgressCallback = Arc<dyn SplitProgressCallback>;
