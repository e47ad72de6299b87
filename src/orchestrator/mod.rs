//! The step dispatcher: turns inbound events into session transitions.
//!
//! ```text
//! Idle ──select──▶ AwaitingFile ──files complete──▶ AwaitingMetadata(key)
//!  ▲                    │  ▲                              │
//!  │                    │  └── more files ──┘             ▼
//!  └─────────── success / failure / cancel ◀──────── Processing
//! ```
//!
//! [`Orchestrator::handle`] processes one event to completion. Events of one
//! user must not be handled concurrently; [`Dispatcher`] guarantees that
//! while letting different users proceed in parallel.
//!
//! ## Error recovery
//!
//! Any error returned while handling an event is reported to the user before
//! `handle` returns: validation and state errors verbatim, everything else
//! as a generic failure with the detail logged. The session then goes back
//! to idle with its uploaded files and answers kept, so re-selecting the
//! same operation retries without uploading again. Engine calls run on
//! their own task, so a panicking engine is reported like any other failure.

pub mod command;
pub mod dispatch;

use crate::artifact::{ArtifactHandle, ArtifactManager};
use crate::catalog::{self, Availability, CompletionMode, OperationId, OperationSpec, ParamKey};
use crate::channel::{Attachment, InboundEvent, MessagingChannel};
use crate::config::BotConfig;
use crate::engine::{ConversionEngine, EngineRequest};
use crate::error::{BotError, EngineError};
use crate::params::OperationParams;
use crate::progress::SweepKind;
use crate::schedule::BackgroundTasks;
use crate::session::{FileKind, FileRef, Session, SessionStore, Step, UserId};
use command::Command;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use dispatch::Dispatcher;

const MIB: u64 = 1024 * 1024;

struct Inner {
    config: BotConfig,
    sessions: SessionStore,
    artifacts: Arc<ArtifactManager>,
    engine: Arc<dyn ConversionEngine>,
    channel: Arc<dyn MessagingChannel>,
}

/// Drives every user's workflow. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: BotConfig,
        artifacts: Arc<ArtifactManager>,
        engine: Arc<dyn ConversionEngine>,
        channel: Arc<dyn MessagingChannel>,
    ) -> Self {
        let sessions = SessionStore::new(config.session_idle_timeout);
        Self {
            inner: Arc::new(Inner {
                config,
                sessions,
                artifacts,
                engine,
                channel,
            }),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.inner.artifacts
    }

    /// Handle one inbound event to completion.
    ///
    /// Errors have already been reported to the user and the session
    /// recovered when this returns; the error is handed back for logging.
    pub async fn handle(&self, event: InboundEvent) -> Result<(), BotError> {
        let user = event.sender_id.clone();
        let result = self.route(&user, event).await;
        if let Err(err) = &result {
            self.recover(&user, err).await;
        }
        result
    }

    // ── Routing ───────────────────────────────────────────────────────────

    async fn route(&self, user: &UserId, event: InboundEvent) -> Result<(), BotError> {
        let session = self.inner.sessions.get_or_create(user);

        if let Some(attachment) = event.attachment {
            return self.on_attachment(user, &session, attachment.as_ref()).await;
        }

        let text = event.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Ok(());
        }
        if let Some(command) = Command::parse(text) {
            return self.on_command(user, &session, command).await;
        }

        match session.step {
            Step::Idle => self.on_selection(user, &session, text).await,
            Step::AwaitingFile => {
                let prompt = selected_spec(&session)?.file_prompt(&kinds(&session));
                self.say(user, &format!("{prompt}\nSend cancel to stop.")).await
            }
            Step::AwaitingMetadata(key) => self.on_answer(user, &session, key, text).await,
            Step::Processing => {
                self.say(user, "Still working on your previous request, please wait.")
                    .await
            }
        }
    }

    async fn on_command(&self, user: &UserId, session: &Session, command: Command) -> Result<(), BotError> {
        match command {
            Command::Menu => {
                if !session.step.is_idle() {
                    self.inner.sessions.update(user, Session::interrupt);
                }
                self.say(user, &catalog::menu_text()).await
            }
            Command::Cancel => {
                if session.step.is_idle() {
                    return self.say(user, "Nothing to cancel.").await;
                }
                self.inner.sessions.update(user, Session::interrupt);
                let note = if session.uploaded_files.is_empty() {
                    "Cancelled."
                } else {
                    "Cancelled. Your uploaded files are kept; send clear to delete them."
                };
                self.say(user, note).await
            }
            Command::Clear => {
                let files = self.inner.sessions.clear_files(user);
                self.release_files(&files).await;
                self.inner.sessions.update(user, Session::finish);
                self.say(user, &format!("Cleared {} file(s).", files.len()))
                    .await
            }
            Command::Done => {
                let spec = match (session.step, session.selected) {
                    (Step::AwaitingFile, Some(op)) if op.spec().completion == CompletionMode::UntilDone => {
                        op.spec()
                    }
                    _ => {
                        return Err(BotError::session_state(
                            "There is nothing to finish right now. Send menu to see the options.",
                        ))
                    }
                };
                let received = session.uploaded_files.len();
                if received < spec.files.min {
                    return Err(BotError::validation(format!(
                        "{} needs at least {} {} file(s); you sent {}.",
                        spec.title,
                        spec.files.min,
                        spec.files.accepts.describe(),
                        received
                    )));
                }
                self.advance(user, true).await
            }
        }
    }

    async fn on_selection(&self, user: &UserId, session: &Session, text: &str) -> Result<(), BotError> {
        let spec = catalog::lookup_text(text).ok_or_else(|| {
            BotError::validation(format!(
                "'{}' is not an option. Send a number from 1 to {}, or menu to see the list.",
                text,
                catalog::CATALOG.len()
            ))
        })?;

        if spec.availability == Availability::ManualCoordinatesRequired {
            return Err(BotError::validation(format!(
                "{} needs manual coordinate input, which is not supported here. Choose another operation.",
                spec.title
            )));
        }

        if session.retry_of != Some(spec.id) && !session.uploaded_files.is_empty() {
            let stale = self.inner.sessions.clear_files(user);
            self.release_files(&stale).await;
        }
        self.inner.sessions.update(user, |s| {
            s.selected = Some(spec.id);
            s.metadata.clear();
            s.retry_of = None;
            s.step = Step::AwaitingFile;
        });
        info!("{} selected {}", user, spec.id);

        self.say(user, &format!("{} selected.", spec.title)).await?;
        self.advance(user, false).await
    }

    async fn on_attachment(&self, user: &UserId, session: &Session, attachment: &dyn Attachment) -> Result<(), BotError> {
        if session.step != Step::AwaitingFile {
            return Err(BotError::session_state(
                "I wasn't expecting a file right now. Send menu and choose an operation first.",
            ));
        }
        let spec = selected_spec(session)?;
        let limit = self.inner.config.max_upload_bytes;

        if let Some(size) = attachment.declared_size() {
            if size > limit {
                return Err(too_large(size, limit));
            }
        }
        let file = attachment.download().await?;
        let size = file.bytes.len() as u64;
        if size > limit {
            return Err(too_large(size, limit));
        }

        let kind = FileKind::detect(&file.bytes, &file.mime_type, &file.original_name);
        let current = kinds(session);
        if !spec.accepts_next(&current, kind) {
            let reason = if !matches!(spec.completion, CompletionMode::FixedSlots(_))
                && current.len() >= spec.files.max
            {
                format!("You already sent the maximum of {} {} files.", spec.files.max, spec.title)
            } else {
                let expected = match spec.completion {
                    CompletionMode::FixedSlots(_) => spec
                        .missing_slots(&current)
                        .iter()
                        .map(|k| k.label())
                        .collect::<Vec<_>>()
                        .join(" or "),
                    _ => spec.files.accepts.describe(),
                };
                format!(
                    "'{}' looks like a {}, which {} does not accept ({} expected).",
                    file.original_name,
                    kind.label(),
                    spec.title,
                    expected
                )
            };
            return Err(BotError::validation(reason));
        }

        let handle = self
            .inner
            .artifacts
            .stage(&kind.staging_extension(&file.original_name), &file.bytes)
            .await?;
        debug!("{} uploaded {} ({} bytes) as {}", user, file.original_name, size, handle);

        self.inner.sessions.add_file(
            user,
            FileRef {
                handle,
                kind,
                mime_type: file.mime_type,
                size_bytes: size,
                original_name: file.original_name,
            },
        );
        self.advance(user, false).await
    }

    async fn on_answer(&self, user: &UserId, session: &Session, key: ParamKey, text: &str) -> Result<(), BotError> {
        let spec = selected_spec(session)?;
        let question = spec.question(key).ok_or_else(|| {
            BotError::session_state(format!("{} does not ask for {}. Send menu to start over.", spec.title, key))
        })?;

        (question.validate)(text).map_err(BotError::validation)?;

        self.inner.sessions.update(user, |s| {
            s.metadata.insert(key, text.to_string());
        });
        self.advance(user, true).await
    }

    // ── Transitions ───────────────────────────────────────────────────────

    /// Move the session to its next step: more files, the next unanswered
    /// question, or processing.
    ///
    /// `files_done` is the user's explicit end of an open-ended upload.
    async fn advance(&self, user: &UserId, files_done: bool) -> Result<(), BotError> {
        let session = self.inner.sessions.get_or_create(user);
        let spec = selected_spec(&session)?;
        let current = kinds(&session);

        let collecting = match spec.completion {
            CompletionMode::SingleShot => current.len() < spec.files.min,
            CompletionMode::UntilDone => !files_done,
            CompletionMode::FixedSlots(_) => !spec.missing_slots(&current).is_empty(),
        };
        if collecting {
            self.inner.sessions.update(user, |s| s.step = Step::AwaitingFile);
            return self.say(user, &spec.file_prompt(&current)).await;
        }

        if let Some(question) = spec
            .questions
            .iter()
            .find(|q| !session.metadata.contains_key(&q.key))
        {
            self.inner
                .sessions
                .update(user, |s| s.step = Step::AwaitingMetadata(question.key));
            return self.say(user, question.prompt).await;
        }

        self.process(user, spec).await
    }

    async fn process(&self, user: &UserId, spec: &'static OperationSpec) -> Result<(), BotError> {
        let session = self
            .inner
            .sessions
            .update(user, |s| s.step = Step::Processing);
        check_files(spec, &session.uploaded_files)?;

        let page_count = match session.uploaded_files.first() {
            Some(primary) if spec.needs_page_count() => {
                let engine = Arc::clone(&self.inner.engine);
                let document = primary.handle.clone();
                Some(contained(async move { engine.page_count(&document).await }).await?)
            }
            _ => None,
        };
        let params = OperationParams::from_answers(spec.id, &session.metadata, page_count)?;
        let request = EngineRequest {
            operation: spec.id,
            inputs: session.uploaded_files.clone(),
            params,
        };

        let observer = &self.inner.config.observer;
        observer.on_operation_start(user, spec.id, request.inputs.len());
        self.say(user, &format!("Working on {}...", spec.title)).await?;
        info!("{}: running {} on {} file(s)", user, spec.id, request.inputs.len());

        match self.execute(user, request).await {
            Ok(outputs) => {
                observer.on_operation_complete(user, spec.id, outputs);
                let inputs = self.inner.sessions.clear_files(user);
                self.release_files(&inputs).await;
                self.inner.sessions.update(user, Session::finish);
                info!("{}: {} finished with {} output(s)", user, spec.id, outputs);
                Ok(())
            }
            Err(err) => {
                observer.on_operation_error(user, spec.id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Run the engine, verify and deliver its outputs, release them.
    async fn execute(&self, user: &UserId, request: EngineRequest) -> Result<usize, BotError> {
        let operation = request.operation;
        let engine = Arc::clone(&self.inner.engine);
        let artifacts = contained(async move { engine.run(&request).await })
            .await?
            .artifacts;

        let mut usable = !artifacts.is_empty();
        for artifact in &artifacts {
            usable &= self.inner.artifacts.verify(artifact).await;
        }
        if !usable {
            self.inner.artifacts.release_all(&artifacts).await;
            return Err(EngineError::NoOutput {
                operation: operation.to_string(),
            }
            .into());
        }

        let delivered = self.deliver(user, &artifacts).await;
        self.inner.artifacts.release_all(&artifacts).await;
        delivered.map(|()| artifacts.len())
    }

    async fn deliver(&self, user: &UserId, artifacts: &[ArtifactHandle]) -> Result<(), BotError> {
        let channel = &self.inner.channel;
        for artifact in artifacts {
            channel.reply_with_file(user, artifact).await?;
        }
        channel.reply(user, "Done! Send menu for another operation.").await?;
        Ok(())
    }

    /// Report `err` to the user and return the session to idle, keeping
    /// its files and answers.
    async fn recover(&self, user: &UserId, err: &BotError) {
        let before = self.inner.sessions.get_or_create(user);
        let after = self.inner.sessions.update(user, Session::interrupt);

        let message = if err.is_user_facing() {
            debug!("{}: {}", user, err);
            match (before.selected, after.retry_of) {
                (Some(op), Some(_)) => format!(
                    "{err}\nYour files are kept: send {} to try again.",
                    op.code()
                ),
                (Some(op), None) => format!("{err}\nSend {} to start again.", op.code()),
                _ => err.to_string(),
            }
        } else {
            error!("{}: operation failed ({}): {}", user, err.kind(), err);
            match (before.selected, after.retry_of) {
                (Some(op), Some(_)) => format!(
                    "Sorry, {} failed. Your files are kept: send {} to try again, or menu to start over.",
                    op.spec().title,
                    op.code()
                ),
                _ => "Sorry, something went wrong. Send menu to start over.".to_string(),
            }
        };

        if let Err(e) = self.inner.channel.reply(user, &message).await {
            warn!("Could not report error to {}: {}", user, e);
        }
    }

    async fn say(&self, user: &UserId, text: &str) -> Result<(), BotError> {
        self.inner.channel.reply(user, text).await?;
        Ok(())
    }

    async fn release_files(&self, files: &[FileRef]) {
        self.inner
            .artifacts
            .release_all(files.iter().map(|f| &f.handle))
            .await;
    }

    // ── Maintenance ───────────────────────────────────────────────────────

    /// Evict idle sessions and release the files they held.
    pub async fn sweep_sessions(&self) -> usize {
        let evicted = self.inner.sessions.sweep_expired();
        for session in &evicted {
            self.release_files(&session.uploaded_files).await;
        }
        self.inner.config.observer.on_sweep(SweepKind::Sessions, evicted.len());
        evicted.len()
    }

    /// Delete staged artifacts older than the retention threshold.
    pub async fn sweep_artifacts(&self) -> usize {
        match self.inner.artifacts.sweep().await {
            Ok(report) => {
                self.inner.config.observer.on_sweep(SweepKind::Artifacts, report.removed);
                report.removed
            }
            Err(e) => {
                warn!("Artifact sweep failed: {}", e);
                0
            }
        }
    }

    /// Register both sweeps on `tasks`. The artifact sweep's first tick is
    /// the startup sweep.
    pub fn spawn_maintenance(&self, tasks: &mut BackgroundTasks) {
        let config = &self.inner.config;

        let this = self.clone();
        tasks.spawn_periodic("session sweep", config.session_sweep_interval, move || {
            let this = this.clone();
            async move {
                this.sweep_sessions().await;
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("artifact sweep", config.artifact_sweep_interval, move || {
            let this = this.clone();
            async move {
                this.sweep_artifacts().await;
            }
        });
    }
}

/// Run an engine call on its own task so a panic surfaces as
/// [`EngineError::Panicked`] instead of unwinding through `handle`.
async fn contained<T, F>(call: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => result,
        Err(join) => Err(EngineError::Panicked(join.to_string())),
    }
}

fn selected_spec(session: &Session) -> Result<&'static OperationSpec, BotError> {
    session.selected.map(OperationId::spec).ok_or_else(|| {
        BotError::session_state("No operation is selected. Send menu to choose one.")
    })
}

fn kinds(session: &Session) -> Vec<FileKind> {
    session.uploaded_files.iter().map(|f| f.kind).collect()
}

fn too_large(size: u64, limit: u64) -> BotError {
    BotError::validation(format!(
        "That file is {:.1} MiB; the limit is {:.1} MiB.",
        size as f64 / MIB as f64,
        limit as f64 / MIB as f64
    ))
}

/// Re-check file count and types right before the engine runs.
fn check_files(spec: &OperationSpec, files: &[FileRef]) -> Result<(), BotError> {
    let count = files.len();
    if count < spec.files.min || count > spec.files.max {
        return Err(BotError::validation(format!(
            "{} needs {} {} file(s); you have {}.",
            spec.title,
            if spec.files.min == spec.files.max {
                spec.files.min.to_string()
            } else {
                format!("{} to {}", spec.files.min, spec.files.max)
            },
            spec.files.accepts.describe(),
            count
        )));
    }

    let kinds: Vec<FileKind> = files.iter().map(|f| f.kind).collect();
    let fits = match spec.completion {
        CompletionMode::FixedSlots(_) => spec.missing_slots(&kinds).is_empty(),
        _ => kinds.iter().all(|k| spec.files.accepts.allows(*k)),
    };
    if !fits {
        return Err(BotError::validation(format!(
            "The uploaded files do not match what {} needs ({}).",
            spec.title,
            spec.files.accepts.describe()
        )));
    }
    Ok(())
}
