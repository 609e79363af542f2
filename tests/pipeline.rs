//! Integration scenarios for the split-and-deliver pipeline.
//!
//! Every run goes through [`Pipeline`] with a fake renderer, a scripted
//! vision model and an in-memory storage provider, so no pdfium, network or
//! API key is needed. Source PDFs are built with lopdf.

use async_trait::async_trait;
use edgequake_docsplit::{
    AccessToken, DeliveryClient, DeliveryError, DeliveryOutcome, DriveSettings, FolderHandle,
    IdentityProvider, InferenceError, ItemFailure, LocalStorage, PageImage, PageMetadata,
    PageRenderer, Pipeline, RenderError, RunManifest, RunStatus, SourceDocument, SplitConfig,
    SplitProgressCallback, Stage, StaticToken, StorageProvider, StoredFile, VisionModel,
};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn batch_pdf(pages: usize) -> SourceDocument {
    let mut doc = Document::with_version("1.5");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (1..=pages)
        .map(|i| {
            let content = format!("BT /F1 18 Tf 72 720 Td (Sheet {i}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
                "Contents" => content_id,
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture saves");
    SourceDocument {
        name: "batch.pdf".into(),
        bytes: Arc::new(bytes),
        page_count: pages,
    }
}

fn answer(invoice: Option<&str>, ship_to: Option<&str>) -> Result<String, InferenceError> {
    Ok(serde_json::json!({ "invoiceNo": invoice, "shipTo": ship_to }).to_string())
}

/// Renders nothing; fails for the listed pages and records each batch.
#[derive(Default)]
struct FakeRenderer {
    broken: HashSet<usize>,
    batches: Mutex<Vec<Vec<usize>>>,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(
        &self,
        _document: &SourceDocument,
        page_index: usize,
    ) -> Result<PageImage, RenderError> {
        if self.broken.contains(&page_index) {
            return Err(RenderError::Decode {
                page: page_index,
                detail: "damaged scan".into(),
            });
        }
        Ok(PageImage {
            page_index,
            base64: String::new(),
            mime_type: "image/jpeg",
            width: 1,
            height: 1,
        })
    }

    async fn render_pages(
        &self,
        document: &SourceDocument,
        pages: &[usize],
    ) -> Vec<Result<PageImage, RenderError>> {
        self.batches.lock().unwrap().push(pages.to_vec());
        let mut rendered = Vec::new();
        for &page in pages {
            rendered.push(self.render(document, page).await);
        }
        rendered
    }
}

/// Answers per page from a queue; pages without a script read as unknown.
#[derive(Default)]
struct ScriptedModel {
    answers: Mutex<HashMap<usize, Vec<Result<String, InferenceError>>>>,
    delays_ms: HashMap<usize, u64>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn pages(pages: Vec<(usize, Result<String, InferenceError>)>) -> Self {
        let mut answers: HashMap<usize, Vec<_>> = HashMap::new();
        for (page, a) in pages {
            answers.entry(page).or_default().push(a);
        }
        Self {
            answers: Mutex::new(answers),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn complete(&self, image: &PageImage, _prompt: &str) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = self.delays_ms.get(&image.page_index) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        let mut answers = self.answers.lock().unwrap();
        match answers.get_mut(&image.page_index) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => answer(None, None),
        }
    }
}

#[derive(Default)]
struct MemoryStorage {
    folders: Mutex<Vec<FolderHandle>>,
    uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
    lookups: AtomicUsize,
    creates: AtomicUsize,
    upload_calls: AtomicUsize,
    /// File name → HTTP status to fail with.
    fail_uploads: HashMap<String, u16>,
    /// Folder name → lookup failure.
    broken_folders: HashSet<String>,
    /// File names whose upload finds the host unreachable.
    unreachable_uploads: HashSet<String>,
    cancel_after_first_upload: Option<CancellationToken>,
}

impl MemoryStorage {
    fn uploaded_names(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(_, name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn find_folder(
        &self,
        _token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<FolderHandle>, DeliveryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.broken_folders.contains(name) {
            return Err(DeliveryError::FolderResolution {
                name: name.into(),
                detail: "HTTP 503".into(),
            });
        }
        Ok(self
            .folders
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.name == name && f.parent_id.as_deref() == parent_id)
            .cloned())
    }

    async fn create_folder(
        &self,
        _token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderHandle, DeliveryError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        let handle = FolderHandle {
            id: format!("folder-{n}"),
            name: name.into(),
            parent_id: parent_id.map(str::to_string),
        };
        self.folders.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn upload_file(
        &self,
        _token: &AccessToken,
        folder_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, DeliveryError> {
        let n = self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_after_first_upload {
            token.cancel();
        }
        if self.unreachable_uploads.contains(file_name) {
            return Err(DeliveryError::Unreachable("connection refused".into()));
        }
        match self.fail_uploads.get(file_name) {
            Some(401) => Err(DeliveryError::Unauthorized("token expired".into())),
            Some(&status) => Err(DeliveryError::Upload {
                name: file_name.into(),
                status,
                body: "backend error".into(),
            }),
            None => {
                self.uploads.lock().unwrap().push((
                    folder_id.into(),
                    file_name.into(),
                    bytes.to_vec(),
                ));
                Ok(StoredFile {
                    id: format!("file-{n}"),
                    name: file_name.into(),
                })
            }
        }
    }
}

/// Records stages and retry events.
#[derive(Default)]
struct Recorder {
    stages: Mutex<Vec<Stage>>,
    retries: Mutex<Vec<(usize, u32, u64)>>,
    deliveries: AtomicUsize,
}

impl SplitProgressCallback for Recorder {
    fn on_stage(&self, stage: Stage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_extraction_retry(&self, page_index: usize, attempt: u32, delay_ms: u64) {
        self.retries.lock().unwrap().push((page_index, attempt, delay_ms));
    }

    fn on_delivery(&self, _result: &edgequake_docsplit::DeliveryResult, _total_groups: usize) {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
    }
}

fn config(recorder: Option<Arc<Recorder>>) -> SplitConfig {
    let mut builder = SplitConfig::builder().drive(DriveSettings {
        drive_client_id: "client-1".into(),
        drive_folder_id: Some("root".into()),
    });
    if let Some(r) = recorder {
        builder = builder.progress_callback(r);
    }
    builder.build().expect("valid config")
}

fn pipeline(
    renderer: FakeRenderer,
    model: Arc<ScriptedModel>,
    storage: Arc<MemoryStorage>,
    identity: Arc<dyn IdentityProvider>,
    config: SplitConfig,
) -> Pipeline {
    Pipeline::new(
        Arc::new(renderer),
        model,
        DeliveryClient::new(identity, storage),
        config,
    )
}

fn reference_model() -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::pages(vec![
        (1, answer(Some("INV-100"), Some("ACME"))),
        (2, answer(Some("INV-100"), None)),
        (3, answer(Some("INV-200"), Some("Blue Harbor"))),
        (4, answer(None, None)),
        (5, answer(None, None)),
    ]))
}

fn token() -> Arc<dyn IdentityProvider> {
    Arc::new(StaticToken::new("tok"))
}

fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes).expect("valid pdf").get_pages().len()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reference_batch_is_split_and_filed() {
    let storage = Arc::new(MemoryStorage::default());
    let recorder = Arc::new(Recorder::default());
    let manifest = pipeline(
        FakeRenderer::default(),
        reference_model(),
        storage.clone(),
        token(),
        config(Some(recorder.clone())),
    )
    .run(&batch_pdf(5), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    let pages: Vec<Vec<usize>> = manifest.groups.iter().map(|g| g.pages.clone()).collect();
    assert_eq!(pages, vec![vec![1, 2], vec![3, 4, 5]]);

    assert_eq!(
        storage.uploaded_names(),
        vec!["INV-100 - ACME.pdf", "INV-200 - Blue Harbor.pdf"]
    );
    let uploads = storage.uploads.lock().unwrap();
    assert_eq!(page_count(&uploads[0].2), 2);
    assert_eq!(page_count(&uploads[1].2), 3);
    drop(uploads);

    assert_eq!(manifest.discrepancy_ids(), vec!["INV-100", "INV-200"]);
    assert_eq!(manifest.stats.identified_pages, 3);
    assert_eq!(manifest.stats.uploaded, 2);
    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec![
            Stage::Idle,
            Stage::Rendering,
            Stage::Extracting,
            Stage::Grouping,
            Stage::Splitting,
            Stage::Delivering,
            Stage::Done
        ]
    );
}

#[tokio::test]
async fn upload_failure_does_not_stop_later_groups() {
    let model = Arc::new(ScriptedModel::pages(vec![
        (1, answer(Some("A-1"), Some("ACME"))),
        (2, answer(Some("A-2"), Some("ACME"))),
        (3, answer(Some("A-3"), Some("ACME"))),
    ]));
    let storage = Arc::new(MemoryStorage {
        fail_uploads: HashMap::from([("A-2 - ACME.pdf".to_string(), 500)]),
        ..Default::default()
    });
    let manifest = pipeline(
        FakeRenderer::default(),
        model,
        storage.clone(),
        token(),
        config(None),
    )
    .run(&batch_pdf(3), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    assert!(manifest.deliveries[0].is_uploaded());
    assert!(matches!(
        manifest.deliveries[1].outcome,
        DeliveryOutcome::Failed {
            error: ItemFailure::Upload { group: 2, .. }
        }
    ));
    assert!(manifest.deliveries[2].is_uploaded());
    assert_eq!(storage.uploaded_names(), vec!["A-1 - ACME.pdf", "A-3 - ACME.pdf"]);

    // One folder for all three groups: one lookup, one create.
    assert_eq!(storage.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(storage.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreadable_folder_fails_its_groups_without_requerying() {
    let model = Arc::new(ScriptedModel::pages(vec![
        (1, answer(Some("X-1"), Some("Broken Co"))),
        (2, answer(Some("X-2"), Some("Broken Co"))),
        (3, answer(Some("X-3"), Some("ACME"))),
    ]));
    let storage = Arc::new(MemoryStorage {
        broken_folders: HashSet::from(["Broken Co".to_string()]),
        ..Default::default()
    });
    let manifest = pipeline(
        FakeRenderer::default(),
        model,
        storage.clone(),
        token(),
        config(None),
    )
    .run(&batch_pdf(3), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    for d in &manifest.deliveries[..2] {
        assert!(matches!(
            d.outcome,
            DeliveryOutcome::Failed {
                error: ItemFailure::Folder { .. }
            }
        ));
    }
    assert!(manifest.deliveries[2].is_uploaded());
    // Broken Co looked up once, ACME once.
    assert_eq!(storage.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lost_authentication_stops_the_run_and_keeps_partial_results() {
    let model = Arc::new(ScriptedModel::pages(vec![
        (1, answer(Some("A-1"), Some("ACME"))),
        (2, answer(Some("A-2"), Some("ACME"))),
        (3, answer(Some("A-3"), Some("ACME"))),
    ]));
    let storage = Arc::new(MemoryStorage {
        fail_uploads: HashMap::from([("A-2 - ACME.pdf".to_string(), 401)]),
        ..Default::default()
    });
    let manifest = pipeline(
        FakeRenderer::default(),
        model,
        storage.clone(),
        token(),
        config(None),
    )
    .run(&batch_pdf(3), CancellationToken::new())
    .await;

    match manifest.status {
        RunStatus::Failed { stage, ref reason } => {
            assert_eq!(stage, Stage::Delivering);
            assert!(reason.contains("Authentication lost"), "{reason}");
        }
        ref other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(manifest.deliveries.len(), 3);
    assert!(manifest.deliveries[0].is_uploaded());
    assert!(matches!(
        manifest.deliveries[2].outcome,
        DeliveryOutcome::Failed {
            error: ItemFailure::NotAttempted { group: 3, .. }
        }
    ));
    assert_eq!(storage.upload_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_storage_stops_the_run() {
    let model = Arc::new(ScriptedModel::pages(vec![
        (1, answer(Some("A-1"), Some("ACME"))),
        (2, answer(Some("A-2"), Some("ACME"))),
        (3, answer(Some("A-3"), Some("ACME"))),
        (4, answer(Some("A-4"), Some("Blue Harbor"))),
    ]));
    let storage = Arc::new(MemoryStorage {
        unreachable_uploads: HashSet::from(["A-2 - ACME.pdf".to_string()]),
        ..Default::default()
    });
    let manifest = pipeline(
        FakeRenderer::default(),
        model,
        storage.clone(),
        token(),
        config(None),
    )
    .run(&batch_pdf(4), CancellationToken::new())
    .await;

    match manifest.status {
        RunStatus::Failed { stage, ref reason } => {
            assert_eq!(stage, Stage::Delivering);
            assert!(reason.contains("Connection lost"), "{reason}");
        }
        ref other => panic!("expected failure, got {other:?}"),
    }
    assert!(manifest.deliveries[0].is_uploaded());
    assert!(matches!(
        manifest.deliveries[1].outcome,
        DeliveryOutcome::Failed {
            error: ItemFailure::Upload { group: 2, .. }
        }
    ));
    for (d, group) in manifest.deliveries[2..].iter().zip(3..) {
        assert!(matches!(
            d.outcome,
            DeliveryOutcome::Failed {
                error: ItemFailure::NotAttempted { group: g, .. }
            } if g == group
        ));
    }
    // No calls after the host went away: Blue Harbor is never looked up.
    assert_eq!(storage.upload_calls.load(Ordering::SeqCst), 2);
    assert_eq!(storage.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_authentication_uploads_nothing() {
    let storage = Arc::new(MemoryStorage::default());
    let manifest = pipeline(
        FakeRenderer::default(),
        reference_model(),
        storage.clone(),
        Arc::new(StaticToken::new("")),
        config(None),
    )
    .run(&batch_pdf(5), CancellationToken::new())
    .await;

    assert!(matches!(
        manifest.status,
        RunStatus::Failed {
            stage: Stage::Delivering,
            ..
        }
    ));
    assert_eq!(manifest.groups.len(), 2);
    assert!(manifest.deliveries.iter().all(|d| !d.is_uploaded()));
    assert_eq!(storage.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_before_start_makes_no_calls() {
    let model = reference_model();
    let storage = Arc::new(MemoryStorage::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let manifest = pipeline(
        FakeRenderer::default(),
        model.clone(),
        storage.clone(),
        token(),
        config(None),
    )
    .run(&batch_pdf(5), cancel)
    .await;

    assert!(matches!(manifest.status, RunStatus::Cancelled { .. }));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(storage.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_during_delivery_keeps_uploaded_files() {
    let cancel = CancellationToken::new();
    let storage = Arc::new(MemoryStorage {
        cancel_after_first_upload: Some(cancel.clone()),
        ..Default::default()
    });
    let manifest = pipeline(
        FakeRenderer::default(),
        reference_model(),
        storage.clone(),
        token(),
        config(None),
    )
    .run(&batch_pdf(5), cancel)
    .await;

    assert_eq!(
        manifest.status,
        RunStatus::Cancelled {
            stage: Stage::Delivering
        }
    );
    assert_eq!(storage.uploaded_names(), vec!["INV-100 - ACME.pdf"]);
    assert!(matches!(
        manifest.deliveries[1].outcome,
        DeliveryOutcome::Failed {
            error: ItemFailure::NotAttempted { .. }
        }
    ));
}

#[tokio::test]
async fn render_failure_degrades_one_page() {
    let renderer = FakeRenderer {
        broken: HashSet::from([2]),
        ..Default::default()
    };
    let manifest = pipeline(
        renderer,
        reference_model(),
        Arc::new(MemoryStorage::default()),
        token(),
        config(None),
    )
    .run(&batch_pdf(5), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    assert_eq!(manifest.pages[1], PageMetadata::unknown(2));
    assert_eq!(manifest.stats.render_failures, 1);
    assert!(matches!(
        manifest.page_failures[0],
        ItemFailure::Render { page: 2, .. }
    ));
    // Page 2 is unknown, so it still joins INV-100.
    assert_eq!(manifest.groups[0].pages, vec![1, 2]);
}

#[tokio::test]
async fn all_pages_unreadable_fails_the_run() {
    let renderer = FakeRenderer {
        broken: HashSet::from([1, 2, 3]),
        ..Default::default()
    };
    let storage = Arc::new(MemoryStorage::default());
    let manifest = pipeline(
        renderer,
        reference_model(),
        storage.clone(),
        token(),
        config(None),
    )
    .run(&batch_pdf(3), CancellationToken::new())
    .await;

    assert!(matches!(
        manifest.status,
        RunStatus::Failed {
            stage: Stage::Rendering,
            ..
        }
    ));
    assert!(manifest.groups.is_empty());
    assert_eq!(storage.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_page_retries_then_succeeds() {
    let model = Arc::new(ScriptedModel::pages(vec![
        (1, answer(Some("INV-1"), Some("ACME"))),
        (2, Err(InferenceError::RateLimited("429".into()))),
        (2, Err(InferenceError::RateLimited("429".into()))),
        (2, answer(Some("INV-2"), Some("ACME"))),
    ]));
    let recorder = Arc::new(Recorder::default());
    let manifest = pipeline(
        FakeRenderer::default(),
        model.clone(),
        Arc::new(MemoryStorage::default()),
        token(),
        config(Some(recorder.clone())),
    )
    .run(&batch_pdf(2), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    assert_eq!(manifest.pages[1].invoice_no.as_deref(), Some("INV-2"));
    assert_eq!(manifest.stats.extraction_retries, 2);
    assert_eq!(
        *recorder.retries.lock().unwrap(),
        vec![(2, 1, 2000), (2, 2, 4000)]
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn concurrent_extraction_keeps_page_order() {
    let mut model = ScriptedModel::pages(vec![
        (1, answer(Some("A"), None)),
        (2, answer(Some("A"), None)),
        (3, answer(Some("B"), None)),
        (4, answer(None, None)),
    ]);
    // Later pages answer first.
    model.delays_ms = HashMap::from([(1, 40), (2, 30), (3, 20), (4, 10)]);
    let config = SplitConfig::builder()
        .concurrency(4)
        .drive(DriveSettings {
            drive_client_id: "client-1".into(),
            drive_folder_id: None,
        })
        .build()
        .unwrap();

    let manifest = pipeline(
        FakeRenderer::default(),
        Arc::new(model),
        Arc::new(MemoryStorage::default()),
        token(),
        config,
    )
    .run(&batch_pdf(4), CancellationToken::new())
    .await;

    let order: Vec<usize> = manifest.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    let groups: Vec<Vec<usize>> = manifest.groups.iter().map(|g| g.pages.clone()).collect();
    assert_eq!(groups, vec![vec![1, 2], vec![3, 4]]);
}

#[tokio::test]
async fn pages_are_rendered_in_batches() {
    let renderer = Arc::new(FakeRenderer::default());
    let manifest = Pipeline::new(
        renderer.clone(),
        Arc::new(ScriptedModel::default()),
        DeliveryClient::new(token(), Arc::new(MemoryStorage::default())),
        config(None),
    )
    .run(&batch_pdf(20), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    let batches = renderer.batches.lock().unwrap();
    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![8, 8, 4]);
    let flat: Vec<usize> = batches.iter().flatten().copied().collect();
    assert_eq!(flat, (1..=20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn run_deadline_fails_the_run() {
    let mut model = ScriptedModel::default();
    model.delays_ms = HashMap::from([(1, 30_000)]);
    let config = SplitConfig::builder()
        .run_timeout_secs(5)
        .drive(DriveSettings {
            drive_client_id: "client-1".into(),
            drive_folder_id: None,
        })
        .build()
        .unwrap();

    let manifest: RunManifest = pipeline(
        FakeRenderer::default(),
        Arc::new(model),
        Arc::new(MemoryStorage::default()),
        token(),
        config,
    )
    .run(&batch_pdf(2), CancellationToken::new())
    .await;

    match manifest.status {
        RunStatus::Failed { ref reason, .. } => assert!(reason.contains("5s deadline"), "{reason}"),
        ref other => panic!("expected deadline failure, got {other:?}"),
    }
}

#[tokio::test]
async fn local_storage_receives_files_by_client() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = Pipeline::new(
        Arc::new(FakeRenderer::default()),
        reference_model(),
        DeliveryClient::new(token(), Arc::new(LocalStorage::new(dir.path()))),
        SplitConfig::default(),
    )
    .run(&batch_pdf(5), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    let acme = dir.path().join("ACME").join("INV-100 - ACME.pdf");
    let blue = dir.path().join("Blue Harbor").join("INV-200 - Blue Harbor.pdf");
    assert_eq!(page_count(&std::fs::read(acme).unwrap()), 2);
    assert_eq!(page_count(&std::fs::read(blue).unwrap()), 3);

    let json = serde_json::to_value(&manifest).expect("manifest serialises");
    assert_eq!(json["status"]["state"], "done");
}

#[tokio::test]
async fn manifest_names_the_file_actually_written() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("ACME")).unwrap();
    std::fs::write(dir.path().join("ACME").join("INV-100 - ACME.pdf"), b"older run").unwrap();

    let manifest = Pipeline::new(
        Arc::new(FakeRenderer::default()),
        reference_model(),
        DeliveryClient::new(token(), Arc::new(LocalStorage::new(dir.path()))),
        SplitConfig::default(),
    )
    .run(&batch_pdf(5), CancellationToken::new())
    .await;

    assert_eq!(manifest.status, RunStatus::Done);
    let acme = &manifest.deliveries[0];
    assert_eq!(acme.file_name, "INV-100 - ACME (2).pdf");
    let written = dir.path().join(&acme.folder_name).join(&acme.file_name);
    assert_eq!(page_count(&std::fs::read(written).unwrap()), 2);
    assert_eq!(
        std::fs::read(dir.path().join("ACME").join("INV-100 - ACME.pdf")).unwrap(),
        b"older run"
    );
}
