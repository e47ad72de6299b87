//! # docbot
//!
//! A conversational document-operation orchestrator: many users, each driving
//! a multi-step file workflow (merge, split, convert, OCR, ...) through a
//! turn-based chat channel.
//!
//! ## Why this crate?
//!
//! The conversion itself is somebody else's problem: an office suite, a PDF
//! toolkit, a script. What is hard is the conversation around it: collecting
//! the right number and kind of files, asking the follow-up questions each
//! operation needs, parsing page ranges the same way everywhere, and making
//! sure the temporary files of one user's half-finished request are neither
//! deleted under it nor left on disk forever.
//!
//! ## Flow Overview
//!
//! ```text
//! inbound event
//!  │
//!  ├─ 1. Dispatch   per-user FIFO queue, users run concurrently
//!  ├─ 2. Session    step machine: Idle → AwaitingFile → AwaitingMetadata → Processing
//!  ├─ 3. Upload     download, size check, type detection, stage as artifact
//!  ├─ 4. Params     answers + page selectors → typed OperationParams
//!  ├─ 5. Engine     external ConversionEngine returns explicit output handles
//!  └─ 6. Deliver    verify outputs, reply with files, release artifacts
//! ```
//!
//! Two background sweeps evict idle sessions and delete stale artifacts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbot::{
//!     ArtifactManager, BackgroundTasks, BotConfig, ConsoleChannel, Dispatcher, Orchestrator,
//!     ScriptEngine,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BotConfig::builder().build()?;
//!     let artifacts = Arc::new(ArtifactManager::new(&config.staging_dir, config.artifact_retention)?);
//!     let engine = Arc::new(ScriptEngine::new("./scripts", Arc::clone(&artifacts)));
//!     let channel = Arc::new(ConsoleChannel::stdout("./outbox")?);
//!
//!     let bot = Orchestrator::new(config, artifacts, engine, channel);
//!     let mut tasks = BackgroundTasks::new();
//!     bot.spawn_maintenance(&mut tasks);
//!
//!     let dispatcher = Dispatcher::new(bot);
//!     dispatcher.submit(docbot::InboundEvent::text("alice", "menu"));
//!     dispatcher.shutdown().await;
//!     tasks.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docbot` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the orchestrator in another transport:
//! ```toml
//! docbot = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod params;
pub mod progress;
pub mod schedule;
pub mod selector;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{ArtifactHandle, ArtifactManager, SweepReport};
pub use catalog::{CompletionMode, OperationId, OperationSpec, ParamKey};
pub use channel::{
    Attachment, ConsoleChannel, DownloadedFile, InboundEvent, MessagingChannel, SourceAttachment,
};
pub use config::{BotConfig, BotConfigBuilder};
pub use engine::{ConversionEngine, EngineOutput, EngineRequest, ScriptEngine};
pub use error::{BotError, ChannelError, EngineError, SelectorError};
pub use orchestrator::{Dispatcher, Orchestrator};
pub use params::OperationParams;
pub use progress::{NoopObserver, OperationObserver, SharedObserver, SweepKind};
pub use schedule::BackgroundTasks;
pub use selector::PageSet;
pub use session::{FileKind, FileRef, Session, SessionStore, Step, UserId};
