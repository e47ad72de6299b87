//! Integration tests for the conversational workflow.
//!
//! Every test drives a real [`Orchestrator`] over a temp staging directory.
//! The engine is a stub that writes small files into the staging directory,
//! and the channel records everything the bot sends.

use async_trait::async_trait;
use docbot::channel::attachment::mime_for_name;
use docbot::{
    ArtifactHandle, ArtifactManager, Attachment, BotConfig, BotConfigBuilder, BotError,
    ChannelError, ConversionEngine, Dispatcher, DownloadedFile, EngineError, EngineOutput,
    EngineRequest, InboundEvent, MessagingChannel, OperationId, OperationObserver,
    OperationParams, Orchestrator, ParamKey, Step, UserId,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

// ── Test doubles ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text(String),
    File(Vec<u8>),
}

/// Channel that remembers every reply. File contents are read at delivery
/// time because the artifact is released right after.
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(UserId, Sent)>>,
}

impl RecordingChannel {
    fn texts(&self, user: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u.as_str() == user)
            .filter_map(|(_, s)| match s {
                Sent::Text(t) => Some(t.clone()),
                Sent::File(_) => None,
            })
            .collect()
    }

    fn files(&self, user: &str) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u.as_str() == user)
            .filter_map(|(_, s)| match s {
                Sent::File(b) => Some(b.clone()),
                Sent::Text(_) => None,
            })
            .collect()
    }

    fn last_text(&self, user: &str) -> String {
        self.texts(user).pop().unwrap_or_default()
    }
}

#[async_trait]
impl MessagingChannel for RecordingChannel {
    async fn reply(&self, user: &UserId, text: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((user.clone(), Sent::Text(text.to_string())));
        Ok(())
    }

    async fn reply_with_file(&self, user: &UserId, file: &ArtifactHandle) -> Result<(), ChannelError> {
        let bytes = tokio::fs::read(file.path()).await?;
        self.sent.lock().unwrap().push((user.clone(), Sent::File(bytes)));
        Ok(())
    }
}

struct MemoryAttachment {
    name: String,
    bytes: Vec<u8>,
}

#[async_trait]
impl Attachment for MemoryAttachment {
    async fn download(&self) -> Result<DownloadedFile, ChannelError> {
        Ok(DownloadedFile {
            bytes: self.bytes.clone(),
            mime_type: mime_for_name(&self.name).to_string(),
            original_name: self.name.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Succeed,
    Fail,
    EmptyOutput,
    Panic,
    PageCountPanic,
    Slow(Duration),
}

/// Engine that writes `result:<operation>` files into the staging directory.
/// `split` produces one file per selected page.
struct StubEngine {
    mode: Mode,
    pages: usize,
    artifacts: Arc<ArtifactManager>,
    requests: Mutex<Vec<EngineRequest>>,
}

impl StubEngine {
    fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn produce(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError> {
        let operation = request.operation.to_string();
        let count = match &request.params {
            OperationParams::Split { pages } => pages.len(),
            _ => 1,
        };
        let mut artifacts = Vec::new();
        for i in 0..count {
            let body = format!("result:{operation}:{i}");
            artifacts.push(
                self.artifacts
                    .stage("pdf", body.as_bytes())
                    .await
                    .map_err(|e| EngineError::staging(&operation, e))?,
            );
        }
        Ok(EngineOutput { artifacts })
    }
}

#[async_trait]
impl ConversionEngine for StubEngine {
    async fn page_count(&self, _document: &ArtifactHandle) -> Result<usize, EngineError> {
        if self.mode == Mode::PageCountPanic {
            panic!("stub page counter exploded");
        }
        Ok(self.pages)
    }

    async fn run(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let operation = request.operation.to_string();

        match self.mode {
            Mode::Fail => Err(EngineError::Failed {
                operation,
                detail: "stub failure".into(),
            }),
            Mode::Panic => panic!("stub engine exploded"),
            Mode::EmptyOutput => {
                let empty = self
                    .artifacts
                    .allocate("pdf")
                    .await
                    .map_err(|e| EngineError::staging(&operation, e))?;
                Ok(EngineOutput {
                    artifacts: vec![empty],
                })
            }
            Mode::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.produce(request).await
            }
            Mode::Succeed | Mode::PageCountPanic => self.produce(request).await,
        }
    }
}

#[derive(Default)]
struct CountingObserver {
    starts: AtomicUsize,
    completes: AtomicUsize,
    errors: AtomicUsize,
}

impl OperationObserver for CountingObserver {
    fn on_operation_start(&self, _user: &UserId, _operation: OperationId, _inputs: usize) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_operation_complete(&self, _user: &UserId, _operation: OperationId, _outputs: usize) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_operation_error(&self, _user: &UserId, _operation: OperationId, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Harness {
    _dir: TempDir,
    bot: Orchestrator,
    channel: Arc<RecordingChannel>,
    engine: Arc<StubEngine>,
}

fn harness(mode: Mode) -> Harness {
    harness_with(mode, BotConfig::builder())
}

fn harness_with(mode: Mode, builder: BotConfigBuilder) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = builder.staging_dir(dir.path().join("staging")).build().unwrap();
    let artifacts =
        Arc::new(ArtifactManager::new(&config.staging_dir, config.artifact_retention).unwrap());
    let engine = Arc::new(StubEngine {
        mode,
        pages: 10,
        artifacts: Arc::clone(&artifacts),
        requests: Mutex::new(Vec::new()),
    });
    let channel = Arc::new(RecordingChannel::default());
    let bot = Orchestrator::new(
        config,
        artifacts,
        Arc::clone(&engine) as Arc<dyn ConversionEngine>,
        Arc::clone(&channel) as Arc<dyn MessagingChannel>,
    );
    Harness {
        _dir: dir,
        bot,
        channel,
        engine,
    }
}

const PDF: &[u8] = b"%PDF-1.7\n%stub\n";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn upload_event(user: &str, name: &str, bytes: &[u8]) -> InboundEvent {
    InboundEvent::file(
        user,
        Arc::new(MemoryAttachment {
            name: name.to_string(),
            bytes: bytes.to_vec(),
        }),
    )
}

impl Harness {
    async fn send(&self, user: &str, text: &str) -> Result<(), BotError> {
        self.bot.handle(InboundEvent::text(user, text)).await
    }

    async fn upload(&self, user: &str, name: &str, bytes: &[u8]) -> Result<(), BotError> {
        self.bot.handle(upload_event(user, name, bytes)).await
    }

    fn session(&self, user: &str) -> docbot::Session {
        self.bot.sessions().get_or_create(&UserId::from(user))
    }

    fn staged_paths(&self, user: &str) -> Vec<PathBuf> {
        self.session(user)
            .uploaded_files
            .iter()
            .map(|f| f.handle.path().to_path_buf())
            .collect()
    }
}

// ── Menu & selection ─────────────────────────────────────────────────────────

#[tokio::test]
async fn menu_lists_every_operation() {
    let h = harness(Mode::Succeed);
    assert_ok!(h.send("u", "/start").await);
    let menu = h.channel.last_text("u");
    assert!(menu.contains(" 1. Merge PDFs"), "{menu}");
    assert!(menu.contains("27. Repair damaged PDF"), "{menu}");
    assert_eq!(h.session("u").step, Step::Idle);
}

#[tokio::test]
async fn unknown_selection_stays_idle() {
    let h = harness(Mode::Succeed);
    let err = assert_err!(h.send("u", "99").await);
    assert!(matches!(err, BotError::InputValidation { .. }));
    assert_eq!(h.session("u").step, Step::Idle);
    assert!(h.channel.last_text("u").contains("not an option"));
}

#[tokio::test]
async fn crop_and_redact_are_dead_ends() {
    let h = harness(Mode::Succeed);
    for code in ["22", "23"] {
        let err = assert_err!(h.send("u", code).await);
        assert!(err.is_user_facing());
        assert!(h.channel.last_text("u").contains("manual coordinate"));
        let s = h.session("u");
        assert_eq!(s.step, Step::Idle);
        assert!(s.selected.is_none());
    }
}

// ── Accumulating uploads ─────────────────────────────────────────────────────

#[tokio::test]
async fn merge_needs_two_files_before_done() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    let err = assert_err!(h.send("u", "done").await);
    assert!(matches!(err, BotError::InputValidation { .. }));

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert_eq!(s.uploaded_files.len(), 1);
    assert!(h.engine.requests().is_empty());
}

#[tokio::test]
async fn merge_runs_after_done_and_resets_session() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    assert_ok!(h.upload("u", "b.pdf", PDF).await);
    assert_eq!(h.session("u").step, Step::AwaitingFile, "merge waits for done");
    let inputs = h.staged_paths("u");

    assert_ok!(h.send("u", "/done").await);

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert!(s.uploaded_files.is_empty());
    assert!(s.metadata.is_empty());
    assert!(s.selected.is_none());

    let requests = h.engine.requests();
    assert_eq!(requests.len(), 1);
    let names: Vec<_> = requests[0]
        .inputs
        .iter()
        .map(|f| f.original_name.as_str())
        .collect();
    assert_eq!(names, ["a.pdf", "b.pdf"], "merge order is upload order");

    assert_eq!(h.channel.files("u"), vec![b"result:merge:0".to_vec()]);
    assert!(inputs.iter().all(|p| !p.exists()), "inputs released");
}

#[tokio::test]
async fn retry_after_short_upload_keeps_files() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    assert_err!(h.send("u", "done").await);
    assert!(h.channel.last_text("u").contains("send 1 to try again"));

    assert_ok!(h.send("u", "1").await);
    assert_eq!(h.session("u").uploaded_files.len(), 1);
    assert_ok!(h.upload("u", "b.pdf", PDF).await);
    assert_ok!(h.send("u", "done").await);

    assert_eq!(h.engine.requests()[0].inputs.len(), 2);
    assert!(h.session("u").uploaded_files.is_empty());
}

// ── Fixed-slot uploads ───────────────────────────────────────────────────────

#[tokio::test]
async fn compare_runs_without_done() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "20").await);
    assert_ok!(h.upload("u", "old.pdf", PDF).await);
    assert_eq!(h.session("u").step, Step::AwaitingFile);
    assert_ok!(h.upload("u", "new.pdf", PDF).await);

    assert_eq!(h.engine.requests().len(), 1);
    assert_eq!(h.engine.requests()[0].operation, OperationId::Compare);
    assert_eq!(h.session("u").step, Step::Idle);
}

#[tokio::test]
async fn sign_fills_slots_in_any_order() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "21").await);
    assert_ok!(h.upload("u", "signature.png", PNG).await);
    let err = assert_err!(h.upload("u", "second.png", PNG).await);
    assert!(matches!(err, BotError::InputValidation { .. }));
    assert!(h.channel.last_text("u").contains("PDF expected"));

    let s = h.session("u");
    assert_eq!(s.uploaded_files.len(), 1, "second image has no slot");
    assert_eq!(s.step, Step::Idle);

    assert_ok!(h.send("u", "21").await);
    assert_ok!(h.upload("u", "contract.pdf", PDF).await);
    assert_eq!(h.engine.requests().len(), 1);
    assert_eq!(h.engine.requests()[0].params, OperationParams::Sign);
}

// ── Follow-up questions ──────────────────────────────────────────────────────

#[tokio::test]
async fn split_resolves_page_selector() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "2").await);
    assert_ok!(h.upload("u", "book.pdf", PDF).await);
    assert_eq!(h.session("u").step, Step::AwaitingMetadata(ParamKey::Pages));
    assert_ok!(h.send("u", "1-3,5").await);

    match &h.engine.requests()[0].params {
        OperationParams::Split { pages } => assert_eq!(pages.to_vec(), vec![1, 2, 3, 5]),
        other => panic!("unexpected params {other:?}"),
    }
    assert_eq!(h.channel.files("u").len(), 4, "one file per page");
}

#[tokio::test]
async fn rotate_asks_each_question_in_order() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "5").await);
    assert_ok!(h.upload("u", "scan.pdf", PDF).await);
    assert_ok!(h.send("u", "all").await);
    assert_eq!(h.session("u").step, Step::AwaitingMetadata(ParamKey::Angle));
    assert_ok!(h.send("u", "90").await);

    match &h.engine.requests()[0].params {
        OperationParams::Rotate { pages, angle } => {
            assert_eq!(pages.len(), 10);
            assert_eq!(angle.degrees(), 90);
        }
        other => panic!("unexpected params {other:?}"),
    }
}

#[tokio::test]
async fn malformed_answer_resets_and_keeps_files() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "5").await);
    assert_ok!(h.upload("u", "scan.pdf", PDF).await);
    let err = assert_err!(h.send("u", "the first page").await);
    assert!(matches!(err, BotError::InputValidation { .. }));

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert!(s.selected.is_none());
    assert!(s.metadata.is_empty());
    assert_eq!(s.uploaded_files.len(), 1);
    assert!(h.channel.last_text("u").contains("send 5 to try again"));

    assert_ok!(h.send("u", "5").await);
    assert_eq!(h.session("u").step, Step::AwaitingMetadata(ParamKey::Pages));
    assert_ok!(h.send("u", "2-3").await);
    assert_ok!(h.send("u", "180").await);
    assert_eq!(h.engine.requests().len(), 1);
}

#[tokio::test]
async fn out_of_range_pages_fail_before_the_engine() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "3").await);
    assert_ok!(h.upload("u", "doc.pdf", PDF).await);
    let err = assert_err!(h.send("u", "99").await);

    assert!(matches!(err, BotError::InputValidation { .. }));
    assert!(h.engine.requests().is_empty());
    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert_eq!(s.uploaded_files.len(), 1);
    assert_eq!(s.metadata.get(&ParamKey::Pages).map(String::as_str), Some("99"));
}

// ── Failures & retry ─────────────────────────────────────────────────────────

#[tokio::test]
async fn engine_failure_keeps_files_and_answers() {
    let h = harness(Mode::Fail);

    assert_ok!(h.send("u", "6").await);
    assert_ok!(h.upload("u", "big.pdf", PDF).await);
    let err = assert_err!(h.send("u", "high").await);
    assert!(matches!(err, BotError::ExternalTool(EngineError::Failed { .. })));

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert!(s.selected.is_none());
    assert_eq!(s.uploaded_files.len(), 1);
    assert_eq!(s.metadata.get(&ParamKey::Level).map(String::as_str), Some("high"));
    assert_eq!(s.retry_of, Some(OperationId::Compress));

    let reply = h.channel.last_text("u");
    assert!(reply.contains("send 6 to try again"), "{reply}");
    assert!(!reply.contains("stub failure"), "engine detail is not shown");
}

#[tokio::test]
async fn reselecting_failed_operation_reasks_questions() {
    let h = harness(Mode::Fail);

    assert_ok!(h.send("u", "6").await);
    assert_ok!(h.upload("u", "big.pdf", PDF).await);
    assert_err!(h.send("u", "low").await);

    assert_ok!(h.send("u", "6").await);
    let s = h.session("u");
    assert_eq!(s.uploaded_files.len(), 1);
    assert_eq!(s.step, Step::AwaitingMetadata(ParamKey::Level));
    assert!(s.metadata.is_empty());
}

#[tokio::test]
async fn selecting_another_operation_releases_files() {
    let h = harness(Mode::Fail);

    assert_ok!(h.send("u", "6").await);
    assert_ok!(h.upload("u", "big.pdf", PDF).await);
    let staged = h.staged_paths("u");
    assert_err!(h.send("u", "medium").await);

    assert_ok!(h.send("u", "14").await);
    assert!(h.session("u").uploaded_files.is_empty());
    assert!(staged.iter().all(|p| !p.exists()));
}

#[tokio::test]
async fn empty_output_is_reported_as_failure() {
    let h = harness(Mode::EmptyOutput);

    assert_ok!(h.send("u", "27").await);
    let err = assert_err!(h.upload("u", "broken.pdf", PDF).await);
    assert!(matches!(err, BotError::ExternalTool(EngineError::NoOutput { .. })));
    assert!(h.channel.files("u").is_empty());
    assert_eq!(h.session("u").uploaded_files.len(), 1);
}

#[tokio::test]
async fn engine_panic_is_contained() {
    let h = harness(Mode::Panic);

    assert_ok!(h.send("u", "24").await);
    let err = assert_err!(h.upload("u", "doc.pdf", PDF).await);
    assert!(matches!(err, BotError::ExternalTool(EngineError::Panicked(_))));
    assert_eq!(h.session("u").step, Step::Idle);

    // The bot keeps working for the same user.
    assert_ok!(h.send("u", "menu").await);
}

#[tokio::test]
async fn page_count_panic_is_contained() {
    let h = harness(Mode::PageCountPanic);

    assert_ok!(h.send("u", "2").await);
    assert_ok!(h.upload("u", "book.pdf", PDF).await);
    let err = assert_err!(h.send("u", "1-3").await);
    assert!(matches!(err, BotError::ExternalTool(EngineError::Panicked(_))));

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert_eq!(s.uploaded_files.len(), 1);
    assert!(h.engine.requests().is_empty());
    assert!(h
        .channel
        .last_text("u")
        .contains("Sorry, Split PDF into single pages failed"));

    assert_ok!(h.send("u", "2").await);
    assert_eq!(h.session("u").step, Step::AwaitingMetadata(ParamKey::Pages));
}

// ── Uploads ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_file_type_is_a_validation_error() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "8").await);
    let err = assert_err!(h.upload("u", "report.pdf", PDF).await);
    assert!(matches!(err, BotError::InputValidation { .. }));

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert!(s.selected.is_none());
    assert!(s.uploaded_files.is_empty());
    let reply = h.channel.last_text("u");
    assert!(reply.contains("does not accept"), "{reply}");
    assert!(reply.contains("send 8 to start again"), "{reply}");
}

#[tokio::test]
async fn wrong_file_type_keeps_earlier_uploads() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    assert_err!(h.upload("u", "photo.png", PNG).await);

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert_eq!(s.uploaded_files.len(), 1);
    assert_eq!(s.retry_of, Some(OperationId::Merge));
}

#[tokio::test]
async fn file_without_selection_is_a_state_error() {
    let h = harness(Mode::Succeed);
    let err = assert_err!(h.upload("u", "a.pdf", PDF).await);
    assert!(matches!(err, BotError::SessionState { .. }));
    assert!(h.session("u").uploaded_files.is_empty());
}

#[tokio::test]
async fn oversize_upload_is_rejected() {
    let h = harness_with(Mode::Succeed, BotConfig::builder().max_upload_bytes(8));

    assert_ok!(h.send("u", "1").await);
    let err = assert_err!(h.upload("u", "huge.pdf", PDF).await);
    assert!(matches!(err, BotError::InputValidation { .. }));
    assert!(h.session("u").uploaded_files.is_empty());
}

// ── Commands ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_keeps_files_then_reports_nothing_to_cancel() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    assert_ok!(h.send("u", "cancel").await);

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert_eq!(s.uploaded_files.len(), 1);

    assert_ok!(h.send("u", "CANCEL").await);
    assert_eq!(h.channel.last_text("u"), "Nothing to cancel.");
}

#[tokio::test]
async fn clear_releases_uploaded_files() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    let staged = h.staged_paths("u");
    assert_ok!(h.send("u", "cancel").await);
    assert_ok!(h.send("u", "clear").await);

    let s = h.session("u");
    assert!(s.uploaded_files.is_empty());
    assert_eq!(s.retry_of, None);
    assert!(staged.iter().all(|p| !p.exists()));
}

#[tokio::test]
async fn menu_mid_workflow_returns_to_idle() {
    let h = harness(Mode::Succeed);

    assert_ok!(h.send("u", "6").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    assert_ok!(h.send("u", "menu").await);

    let s = h.session("u");
    assert_eq!(s.step, Step::Idle);
    assert_eq!(s.uploaded_files.len(), 1);
}

// ── Observer ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn observer_sees_success_and_failure() {
    let observer = Arc::new(CountingObserver::default());
    let ok = harness_with(
        Mode::Succeed,
        BotConfig::builder().observer(Arc::clone(&observer) as Arc<dyn OperationObserver>),
    );
    assert_ok!(ok.send("u", "25").await);
    assert_ok!(ok.upload("u", "a.pdf", PDF).await);

    let failing = harness_with(
        Mode::Fail,
        BotConfig::builder().observer(Arc::clone(&observer) as Arc<dyn OperationObserver>),
    );
    assert_ok!(failing.send("u", "25").await);
    assert_err!(failing.upload("u", "a.pdf", PDF).await);

    assert_eq!(observer.starts.load(Ordering::SeqCst), 2);
    assert_eq!(observer.completes.load(Ordering::SeqCst), 1);
    assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
}

// ── Maintenance ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn idle_sessions_are_swept_with_their_files() {
    let h = harness_with(
        Mode::Succeed,
        BotConfig::builder()
            .session_idle_timeout(Duration::from_millis(100))
            .session_sweep_interval(Duration::from_millis(50)),
    );

    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);
    let staged = h.staged_paths("u");
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(h.bot.sweep_sessions().await, 1);
    assert!(!h.bot.sessions().contains(&UserId::from("u")));
    assert!(staged.iter().all(|p| !p.exists()));

    let fresh = h.session("u");
    assert_eq!(fresh.step, Step::Idle);
    assert!(fresh.uploaded_files.is_empty());
}

#[tokio::test]
async fn session_sweep_spares_a_running_operation() {
    let h = harness_with(
        Mode::Slow(Duration::from_millis(400)),
        BotConfig::builder()
            .session_idle_timeout(Duration::from_millis(100))
            .session_sweep_interval(Duration::from_millis(50)),
    );

    assert_ok!(h.send("u", "27").await);
    let bot = h.bot.clone();
    let running = tokio::spawn(async move { bot.handle(upload_event("u", "a.pdf", PDF)).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let inputs: Vec<PathBuf> = h.engine.requests()[0]
        .inputs
        .iter()
        .map(|f| f.handle.path().to_path_buf())
        .collect();
    assert_eq!(h.bot.sweep_sessions().await, 0);
    assert!(inputs.iter().all(|p| p.exists()), "inputs survive the sweep");

    assert_ok!(running.await.unwrap());
    assert_eq!(h.channel.files("u").len(), 1);
    assert_eq!(h.session("u").step, Step::Idle);
}

#[tokio::test]
async fn artifact_sweep_keeps_fresh_files() {
    let h = harness(Mode::Succeed);
    assert_ok!(h.send("u", "1").await);
    assert_ok!(h.upload("u", "a.pdf", PDF).await);

    assert_eq!(h.bot.sweep_artifacts().await, 0);
    assert!(h.staged_paths("u").iter().all(|p| p.exists()));
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn users_do_not_share_state() {
    let h = harness(Mode::Succeed);
    let dispatcher = Dispatcher::new(h.bot.clone());

    for event in [
        InboundEvent::text("alice", "1"),
        InboundEvent::text("bob", "20"),
        upload_event("alice", "a1.pdf", PDF),
        upload_event("bob", "b1.pdf", PDF),
        upload_event("alice", "a2.pdf", PDF),
        upload_event("bob", "b2.pdf", PDF),
        InboundEvent::text("alice", "done"),
    ] {
        dispatcher.submit(event);
    }
    dispatcher.shutdown().await;

    let mut ops: Vec<_> = h.engine.requests().iter().map(|r| r.operation).collect();
    ops.sort_by_key(|op| op.code());
    assert_eq!(ops, [OperationId::Merge, OperationId::Compare]);

    for request in h.engine.requests() {
        let prefix = match request.operation {
            OperationId::Merge => "a",
            _ => "b",
        };
        assert!(request
            .inputs
            .iter()
            .all(|f| f.original_name.starts_with(prefix)));
    }
    assert_eq!(h.channel.files("alice").len(), 1);
    assert_eq!(h.channel.files("bob").len(), 1);
}

#[tokio::test]
async fn idle_workers_exit() {
    let h = harness(Mode::Succeed);
    let dispatcher = Dispatcher::with_idle_timeout(h.bot.clone(), Duration::from_millis(50));

    dispatcher.submit(InboundEvent::text("alice", "menu"));
    dispatcher.submit(InboundEvent::text("bob", "menu"));
    assert_eq!(dispatcher.active_users(), 2);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(dispatcher.active_users(), 0);
    assert!(h.channel.last_text("alice").contains("Merge PDFs"));

    // A new event starts a new worker.
    dispatcher.submit(InboundEvent::text("alice", "cancel"));
    dispatcher.shutdown().await;
    assert_eq!(h.channel.last_text("alice"), "Nothing to cancel.");
}
