//! Run orchestration: pages → metadata → groups → deliverables → uploads.
//!
//! ## State machine
//!
//! ```text
//! Idle → Rendering → Extracting → Grouping → Splitting → Delivering → Done
//!                                                                  ↘ Failed / Cancelled
//! ```
//!
//! Pages are rendered in batches, then extracted through an ordered buffered
//! stream, so metadata reaches the grouping engine in page order whatever the
//! concurrency. Grouping waits for every page. Delivery walks the groups in
//! order; a per-item failure is recorded and the next group proceeds, while a
//! fatal error (authentication failed or lost, storage unreachable) stops the
//! run with everything done so far kept in the manifest.
//!
//! Cancellation and the optional run deadline are checked between stages,
//! before each page and before each deliverable; in-flight render and
//! extraction calls are abandoned, in-flight uploads are allowed to finish.

use crate::config::SplitConfig;
use crate::delivery::{
    AccessToken, DeliveryClient, DriveStorage, IdentityProvider, LocalStorage, StaticToken,
    StorageProvider,
};
use crate::error::{DeliveryError, DocSplitError, ItemFailure, RenderError, SplitError};
use crate::output::{
    DeliverableDocument, DeliveryOutcome, DeliveryResult, PageGroup, PageImage, PageMetadata,
    RunManifest, RunStatus, SourceDocument, Stage, StoredFile,
};
use crate::pipeline::extract::{Extraction, LlmVisionModel, MetadataExtractor, VisionModel};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::pipeline::{group, input, split};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default Gemini model when only `GEMINI_API_KEY` is available.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Pages rasterised per renderer call (raised to `concurrency` when larger).
const RENDER_BATCH_PAGES: usize = 8;

/// Split a PDF batch and deliver every invoice to its client folder.
///
/// Resolves the input, binds pdfium, resolves the vision provider and builds
/// the delivery client from `config`, then runs the pipeline.
///
/// # Errors
/// Returns `Err` only when the run cannot start (unreadable input, pdfium
/// missing, no provider, no identity). Once started, failures are reported in
/// the returned [`RunManifest`]; check [`RunManifest::status`].
pub async fn split_and_deliver(
    input_str: impl AsRef<str>,
    config: &SplitConfig,
) -> Result<RunManifest, DocSplitError> {
    split_and_deliver_cancellable(input_str, config, CancellationToken::new()).await
}

/// [`split_and_deliver`] with a caller-held cancellation token.
pub async fn split_and_deliver_cancellable(
    input_str: impl AsRef<str>,
    config: &SplitConfig,
    cancel: CancellationToken,
) -> Result<RunManifest, DocSplitError> {
    let input_str = input_str.as_ref();
    info!("Starting run: {}", input_str);

    let source = input::resolve_input(input_str, config.download_timeout_secs).await?;
    info!("'{}' has {} pages", source.name, source.page_count);

    let renderer = PdfiumRenderer::new(config)?;
    let provider = resolve_provider(config)?;
    let model = LlmVisionModel::new(provider, config);
    let delivery = build_delivery(config)?;

    let pipeline = Pipeline::new(Arc::new(renderer), Arc::new(model), delivery, config.clone());
    Ok(pipeline.run(&source, cancel).await)
}

/// Synchronous wrapper around [`split_and_deliver`].
///
/// Creates a temporary tokio runtime internally.
pub fn split_and_deliver_sync(
    input_str: impl AsRef<str>,
    config: &SplitConfig,
) -> Result<RunManifest, DocSplitError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocSplitError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(split_and_deliver(input_str, config))
}

/// Local directory when `output_dir` is set, else Drive with the configured identity.
fn build_delivery(config: &SplitConfig) -> Result<DeliveryClient, DocSplitError> {
    if let Some(ref dir) = config.output_dir {
        std::fs::create_dir_all(dir).map_err(|e| {
            DocSplitError::InvalidConfig(format!(
                "Cannot create output directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticToken::new("local"));
        let storage: Arc<dyn StorageProvider> = Arc::new(LocalStorage::new(dir));
        return Ok(DeliveryClient::new(identity, storage));
    }

    let identity = config.identity.clone().ok_or_else(|| {
        DocSplitError::InvalidConfig(
            "Drive delivery needs an identity provider (access token or refresh token), \
             or set an output directory"
                .into(),
        )
    })?;
    if config.drive.drive_client_id.trim().is_empty() {
        return Err(DocSplitError::InvalidConfig(
            "Drive client id is empty".into(),
        ));
    }
    Ok(DeliveryClient::new(identity, Arc::new(DriveStorage::new())))
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DocSplitError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocSplitError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the vision provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. Gemini, when `GEMINI_API_KEY` is set.
/// 5. [`ProviderFactory::from_env`] auto-detection.
fn resolve_provider(config: &SplitConfig) -> Result<Arc<dyn LLMProvider>, DocSplitError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
            return create_vision_provider("gemini", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocSplitError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

/// Why a run stopped early.
enum Halt {
    Cancelled,
    Fatal(DocSplitError),
}

/// Result of delivering one deliverable.
struct Delivered {
    outcome: DeliveryOutcome,
    stored: Option<StoredFile>,
    /// Error that must stop the run.
    fatal: Option<DeliveryError>,
}

impl Delivered {
    fn failed(error: ItemFailure, fatal: Option<DeliveryError>) -> Self {
        Self {
            outcome: DeliveryOutcome::Failed { error },
            stored: None,
            fatal,
        }
    }
}

/// Per-page result of the render + extract phase.
enum PageOutcome {
    Unrendered(usize, RenderError),
    Extracted(Extraction),
}

/// The component-injected core of a run.
pub struct Pipeline {
    renderer: Arc<dyn PageRenderer>,
    extractor: MetadataExtractor,
    delivery: DeliveryClient,
    config: SplitConfig,
}

impl Pipeline {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        model: Arc<dyn VisionModel>,
        delivery: DeliveryClient,
        config: SplitConfig,
    ) -> Self {
        Self {
            renderer,
            extractor: MetadataExtractor::new(model, &config),
            delivery,
            config,
        }
    }

    /// Run every stage over `source`. Never returns an error: the outcome,
    /// including a fatal stop, is in [`RunManifest::status`].
    pub async fn run(&self, source: &SourceDocument, cancel: CancellationToken) -> RunManifest {
        let start = Instant::now();
        let deadline = self
            .config
            .run_timeout_secs
            .map(|secs| start + Duration::from_secs(secs));

        let mut manifest = RunManifest::new(source.name.clone());
        manifest.stats.total_pages = source.page_count;
        self.enter(Stage::Idle);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(source.page_count);
        }

        let mut stage = Stage::Rendering;
        let result = self
            .run_stages(source, &cancel, deadline, &mut manifest, &mut stage)
            .await;

        manifest.status = match result {
            Ok(()) => RunStatus::Done,
            Err(Halt::Cancelled) => {
                warn!("Run cancelled during {}", stage);
                RunStatus::Cancelled { stage }
            }
            Err(Halt::Fatal(e)) => {
                warn!("Run failed during {}: {}", stage, e);
                RunStatus::Failed {
                    stage,
                    reason: e.to_string(),
                }
            }
        };
        if !manifest.groups.is_empty() {
            fill_not_attempted(&mut manifest, &self.config.unclassified_folder);
        }

        let stats = &mut manifest.stats;
        stats.groups = manifest.groups.len();
        stats.uploaded = manifest.deliveries.iter().filter(|d| d.is_uploaded()).count();
        stats.failed_deliveries = manifest.deliveries.len() - stats.uploaded;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        self.enter(if manifest.is_done() {
            Stage::Done
        } else {
            Stage::Failed
        });
        info!(
            "Run finished: {} pages, {} groups, {} uploaded, {} failed ({}ms)",
            manifest.stats.total_pages,
            manifest.stats.groups,
            manifest.stats.uploaded,
            manifest.stats.failed_deliveries,
            manifest.stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(&manifest);
        }
        manifest
    }

    async fn run_stages(
        &self,
        source: &SourceDocument,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        manifest: &mut RunManifest,
        stage: &mut Stage,
    ) -> Result<(), Halt> {
        // ── Rendering + Extracting ───────────────────────────────────────
        self.enter(Stage::Rendering);
        let extract_start = Instant::now();
        let extracting = AtomicBool::new(false);
        let total = source.page_count;
        let concurrency = self.config.concurrency.max(1);
        let page_indices: Vec<usize> = source.page_indices().collect();
        let mut outcomes = Vec::with_capacity(total);
        for batch in page_indices.chunks(RENDER_BATCH_PAGES.max(concurrency)) {
            self.checkpoint(cancel, deadline)?;
            let rendered = self
                .guarded(cancel, deadline, self.renderer.render_pages(source, batch))
                .await?;
            let batch_outcomes: Vec<Result<PageOutcome, Halt>> =
                stream::iter(batch.iter().copied().zip(rendered))
                    .map(|(page, image)| {
                        self.process_page(page, image, total, cancel, deadline, &extracting)
                    })
                    .buffered(concurrency)
                    .collect()
                    .await;
            if extracting.load(Ordering::SeqCst) {
                *stage = Stage::Extracting;
            }
            for outcome in batch_outcomes {
                outcomes.push(outcome?);
            }
        }
        manifest.stats.extract_duration_ms = extract_start.elapsed().as_millis() as u64;

        let mut first_render_error: Option<String> = None;
        for outcome in outcomes {
            match outcome {
                PageOutcome::Unrendered(page, e) => {
                    manifest.stats.render_failures += 1;
                    first_render_error.get_or_insert_with(|| e.to_string());
                    manifest.page_failures.push(ItemFailure::Render {
                        page,
                        detail: e.to_string(),
                    });
                    manifest.pages.push(PageMetadata::unknown(page));
                }
                PageOutcome::Extracted(extraction) => {
                    manifest.stats.extraction_retries += extraction.retries;
                    if let Some(ref e) = extraction.failure {
                        manifest.stats.extraction_failures += 1;
                        manifest.page_failures.push(ItemFailure::Extraction {
                            page: extraction.metadata.page_index,
                            attempts: extraction.attempts,
                            detail: e.to_string(),
                        });
                    }
                    if !extraction.metadata.is_unknown() {
                        manifest.stats.identified_pages += 1;
                    }
                    manifest.pages.push(extraction.metadata);
                }
            }
        }

        if total > 0 && manifest.stats.render_failures == total {
            *stage = Stage::Rendering;
            return Err(Halt::Fatal(DocSplitError::AllPagesUnreadable {
                total,
                first_error: first_render_error.unwrap_or_default(),
            }));
        }
        info!(
            "Extracted {} pages ({} identified) in {}ms",
            total, manifest.stats.identified_pages, manifest.stats.extract_duration_ms
        );

        // ── Grouping ─────────────────────────────────────────────────────
        *stage = Stage::Grouping;
        self.checkpoint(cancel, deadline)?;
        self.enter(Stage::Grouping);
        manifest.groups = group::group_pages(&manifest.pages);
        info!("Grouped {} pages into {} documents", total, manifest.groups.len());

        // ── Splitting ────────────────────────────────────────────────────
        *stage = Stage::Splitting;
        self.checkpoint(cancel, deadline)?;
        self.enter(Stage::Splitting);
        let deliverables =
            split::split_document(source, &manifest.groups, &self.config.unclassified_folder);

        // ── Delivering ───────────────────────────────────────────────────
        *stage = Stage::Delivering;
        self.checkpoint(cancel, deadline)?;
        self.enter(Stage::Delivering);
        let deliver_start = Instant::now();
        let groups = manifest.groups.clone();
        let result = self
            .deliver_all(&groups, deliverables, cancel, deadline, manifest)
            .await;
        manifest.stats.deliver_duration_ms = deliver_start.elapsed().as_millis() as u64;
        result
    }

    async fn process_page(
        &self,
        page: usize,
        rendered: Result<PageImage, RenderError>,
        total: usize,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        extracting: &AtomicBool,
    ) -> Result<PageOutcome, Halt> {
        self.checkpoint(cancel, deadline)?;
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_page_start(page, total);
        }

        let image = match rendered {
            Ok(image) => image,
            Err(e) => {
                warn!("Page {}: {}", page, e);
                if let Some(cb) = cb {
                    cb.on_page_error(page, total, &e.to_string());
                }
                return Ok(PageOutcome::Unrendered(page, e));
            }
        };

        if !extracting.swap(true, Ordering::SeqCst) {
            self.enter(Stage::Extracting);
        }
        let extraction = self
            .guarded(cancel, deadline, self.extractor.extract(&image))
            .await?;
        drop(image);

        if let Some(cb) = cb {
            match extraction.failure {
                None => cb.on_page_extracted(&extraction.metadata, total),
                Some(ref e) => cb.on_page_error(page, total, &e.to_string()),
            }
        }
        Ok(PageOutcome::Extracted(extraction))
    }

    async fn deliver_all(
        &self,
        groups: &[PageGroup],
        deliverables: Vec<Result<DeliverableDocument, SplitError>>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        manifest: &mut RunManifest,
    ) -> Result<(), Halt> {
        let token = self
            .delivery
            .authenticate(&self.config.drive.drive_client_id)
            .await
            .map_err(|e| Halt::Fatal(DocSplitError::AuthFailed(e.to_string())))?;

        let parent = self.config.drive.drive_folder_id.as_deref();
        let total_groups = groups.len();
        let mut failed_folders: HashMap<String, String> = HashMap::new();

        for (group, deliverable) in groups.iter().zip(deliverables) {
            self.checkpoint(cancel, deadline)?;

            let delivered = match deliverable {
                Err(e) => {
                    warn!("Group {}: {}", group.index, e);
                    Delivered::failed(
                        ItemFailure::Split {
                            group: group.index,
                            detail: e.to_string(),
                        },
                        None,
                    )
                }
                Ok(ref doc) => {
                    self.deliver_one(&token, doc, parent, &mut failed_folders)
                        .await
                }
            };

            let mut result =
                delivery_result(group, delivered.outcome, &self.config.unclassified_folder);
            if let Some(stored) = delivered.stored {
                result.file_name = stored.name;
            }
            let fatal = delivered.fatal;
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_delivery(&result, total_groups);
            }
            manifest.deliveries.push(result);

            if let Some(e) = fatal {
                let reason = e.to_string();
                return Err(Halt::Fatal(if e.is_connectivity() {
                    DocSplitError::ConnectionLost(reason)
                } else {
                    DocSplitError::AuthLost(reason)
                }));
            }
        }
        Ok(())
    }

    /// Resolve the folder and upload.
    async fn deliver_one(
        &self,
        token: &AccessToken,
        doc: &DeliverableDocument,
        parent: Option<&str>,
        failed_folders: &mut HashMap<String, String>,
    ) -> Delivered {
        let group = doc.group_index;
        let folder_failure = |detail: String| ItemFailure::Folder {
            group,
            folder: doc.folder_name.clone(),
            detail,
        };

        if let Some(detail) = failed_folders.get(&doc.folder_name) {
            debug!("Group {}: folder '{}' already failed", group, doc.folder_name);
            return Delivered::failed(folder_failure(detail.clone()), None);
        }

        let folder = match self
            .delivery
            .resolve_or_create_folder(token, &doc.folder_name, parent)
            .await
        {
            Ok(folder) => folder,
            Err(e) if e.is_fatal() => {
                return Delivered::failed(folder_failure(e.to_string()), Some(e))
            }
            Err(e) => {
                warn!("Group {}: {}", group, e);
                failed_folders.insert(doc.folder_name.clone(), e.to_string());
                return Delivered::failed(folder_failure(e.to_string()), None);
            }
        };

        match self.delivery.upload(token, doc, &folder.id).await {
            Ok(stored) => Delivered {
                outcome: DeliveryOutcome::Uploaded {
                    file_id: stored.id.clone(),
                    folder_id: folder.id,
                },
                stored: Some(stored),
                fatal: None,
            },
            Err(e) => {
                warn!("Group {}: {}", group, e);
                let failure = ItemFailure::Upload {
                    group,
                    detail: e.to_string(),
                };
                let fatal = e.is_fatal().then_some(e);
                Delivered::failed(failure, fatal)
            }
        }
    }

    fn enter(&self, stage: Stage) {
        debug!("Stage → {}", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(stage);
        }
    }

    fn checkpoint(&self, cancel: &CancellationToken, deadline: Option<Instant>) -> Result<(), Halt> {
        if cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        match deadline {
            Some(d) if Instant::now() >= d => Err(self.deadline_exceeded()),
            _ => Ok(()),
        }
    }

    /// Await `fut` unless the run is cancelled or its deadline passes first.
    async fn guarded<F: Future>(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        fut: F,
    ) -> Result<F::Output, Halt> {
        let expiry = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Halt::Cancelled),
            _ = expiry => Err(self.deadline_exceeded()),
            out = fut => Ok(out),
        }
    }

    fn deadline_exceeded(&self) -> Halt {
        Halt::Fatal(DocSplitError::DeadlineExceeded {
            secs: self.config.run_timeout_secs.unwrap_or_default(),
        })
    }
}

fn delivery_result(group: &PageGroup, outcome: DeliveryOutcome, unclassified: &str) -> DeliveryResult {
    DeliveryResult {
        group_index: group.index,
        pages: group.pages.clone(),
        invoice_no: group.representative.invoice_no.clone(),
        file_name: split::file_name_for(group),
        folder_name: split::folder_name_for(group, unclassified),
        outcome,
    }
}

/// Record every group without a delivery result as not attempted.
fn fill_not_attempted(manifest: &mut RunManifest, unclassified: &str) {
    let reason = match manifest.status {
        RunStatus::Done => return,
        RunStatus::Cancelled { .. } => "run cancelled".to_string(),
        RunStatus::Failed { ref reason, .. } => reason.clone(),
    };
    let delivered = manifest.deliveries.len();
    let missing: Vec<DeliveryResult> = manifest.groups[delivered..]
        .iter()
        .map(|g| {
            delivery_result(
                g,
                DeliveryOutcome::Failed {
                    error: ItemFailure::NotAttempted {
                        group: g.index,
                        detail: reason.clone(),
                    },
                },
                unclassified,
            )
        })
        .collect();
    manifest.deliveries.extend(missing);
}
