//! Per-user conversation state and the store that owns it.
//!
//! The store is an ordinary value owned by whoever builds the orchestrator;
//! there is no process-wide table. Every method takes a [`UserId`] and only
//! ever touches that user's record.
//!
//! Timestamps use [`tokio::time::Instant`] so expiry can be driven by a
//! paused clock in tests.

use crate::artifact::ArtifactHandle;
use crate::catalog::{OperationId, ParamKey};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,5}$").unwrap());

/// Opaque identifier of the conversational peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        UserId(id)
    }
}

/// Coarse document family of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Pdf,
    Image,
    Word,
    PowerPoint,
    Excel,
    Html,
    Unknown,
}

impl FileKind {
    /// Classify from content first, then MIME type, then file name.
    pub fn detect(bytes: &[u8], mime_type: &str, file_name: &str) -> FileKind {
        if bytes.starts_with(b"%PDF") {
            return FileKind::Pdf;
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) || bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return FileKind::Image;
        }

        let mime = mime_type.to_ascii_lowercase();
        let by_mime = match mime.as_str() {
            "application/pdf" => Some(FileKind::Pdf),
            m if m.starts_with("image/") => Some(FileKind::Image),
            "text/html" | "application/xhtml+xml" => Some(FileKind::Html),
            "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(FileKind::Word)
            }
            "application/vnd.ms-powerpoint"
            | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Some(FileKind::PowerPoint)
            }
            "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(FileKind::Excel)
            }
            _ => None,
        };
        if let Some(kind) = by_mime {
            return kind;
        }

        match extension_of(file_name).as_deref() {
            Some("pdf") => FileKind::Pdf,
            Some("png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tif" | "tiff") => {
                FileKind::Image
            }
            Some("doc" | "docx" | "odt" | "rtf") => FileKind::Word,
            Some("ppt" | "pptx" | "odp") => FileKind::PowerPoint,
            Some("xls" | "xlsx" | "ods" | "csv") => FileKind::Excel,
            Some("html" | "htm") => FileKind::Html,
            _ => FileKind::Unknown,
        }
    }

    /// Extension used when the original name has none worth keeping.
    pub fn default_extension(self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "png",
            FileKind::Word => "docx",
            FileKind::PowerPoint => "pptx",
            FileKind::Excel => "xlsx",
            FileKind::Html => "html",
            FileKind::Unknown => "bin",
        }
    }

    /// Extension for staging a file of this kind named `file_name`.
    pub fn staging_extension(self, file_name: &str) -> String {
        extension_of(file_name).unwrap_or_else(|| self.default_extension().to_string())
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::Pdf => "PDF",
            FileKind::Image => "image",
            FileKind::Word => "Word document",
            FileKind::PowerPoint => "PowerPoint presentation",
            FileKind::Excel => "Excel spreadsheet",
            FileKind::Html => "HTML page",
            FileKind::Unknown => "unknown file",
        }
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    EXTENSION_RE
        .is_match(ext)
        .then(|| ext.to_ascii_lowercase())
}

/// An uploaded file held by a session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRef {
    pub handle: ArtifactHandle,
    pub kind: FileKind,
    pub mime_type: String,
    pub size_bytes: u64,
    pub original_name: String,
}

/// Where a session is in its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "step", content = "key", rename_all = "snake_case")]
pub enum Step {
    #[default]
    Idle,
    AwaitingFile,
    AwaitingMetadata(ParamKey),
    Processing,
}

impl Step {
    pub fn is_idle(self) -> bool {
        self == Step::Idle
    }
}

/// Conversation state for one user.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: UserId,
    pub uploaded_files: Vec<FileRef>,
    pub step: Step,
    pub selected: Option<OperationId>,
    pub metadata: BTreeMap<ParamKey, String>,
    /// Operation whose failed run left `uploaded_files` behind for a retry.
    pub retry_of: Option<OperationId>,
    #[serde(skip)]
    pub last_activity: Instant,
}

impl Session {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            uploaded_files: Vec::new(),
            step: Step::Idle,
            selected: None,
            metadata: BTreeMap::new(),
            retry_of: None,
            last_activity: Instant::now(),
        }
    }

    /// Abort the workflow, keeping files and answers for a retry.
    pub fn interrupt(&mut self) {
        if self.selected.is_some() && !self.uploaded_files.is_empty() {
            self.retry_of = self.selected;
        }
        self.step = Step::Idle;
        self.selected = None;
    }

    /// Return to the initial state after a successful run.
    pub fn finish(&mut self) {
        self.uploaded_files.clear();
        self.metadata.clear();
        self.step = Step::Idle;
        self.selected = None;
        self.retry_of = None;
    }

    /// A session in [`Step::Processing`] never expires: the running engine
    /// call still reads its files.
    pub fn is_expired(&self, idle_timeout: Duration, now: Instant) -> bool {
        self.step != Step::Processing
            && now.saturating_duration_since(self.last_activity) > idle_timeout
    }
}

/// In-memory session table with idle expiry.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, Session>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Fetch the user's session, creating (or replacing an expired) one.
    pub fn get_or_create(&self, user: &UserId) -> Session {
        self.with_session(user, |s| s.clone())
    }

    /// Apply a partial update and return the resulting session.
    pub fn update(&self, user: &UserId, patch: impl FnOnce(&mut Session)) -> Session {
        self.with_session(user, |s| {
            patch(s);
            s.clone()
        })
    }

    /// Destroy the user's record entirely.
    pub fn clear(&self, user: &UserId) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user)
    }

    pub fn add_file(&self, user: &UserId, file: FileRef) -> Session {
        self.update(user, |s| s.uploaded_files.push(file))
    }

    pub fn list_files(&self, user: &UserId) -> Vec<FileRef> {
        self.with_session(user, |s| s.uploaded_files.clone())
    }

    /// Empty the upload list and return what was in it.
    pub fn clear_files(&self, user: &UserId) -> Vec<FileRef> {
        self.with_session(user, |s| std::mem::take(&mut s.uploaded_files))
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every session idle for longer than the timeout.
    ///
    /// Returns the evicted records so the caller can release their files.
    pub fn sweep_expired(&self) -> Vec<Session> {
        let now = Instant::now();
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<UserId> = sessions
            .values()
            .filter(|s| s.is_expired(self.idle_timeout, now))
            .map(|s| s.user_id.clone())
            .collect();

        let evicted: Vec<Session> = expired
            .iter()
            .filter_map(|user| sessions.remove(user))
            .collect();

        if !evicted.is_empty() {
            info!(
                "Evicted {} idle sessions ({} remain)",
                evicted.len(),
                sessions.len()
            );
        }
        evicted
    }

    fn with_session<T>(&self, user: &UserId, f: impl FnOnce(&mut Session) -> T) -> T {
        let now = Instant::now();
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let session = sessions
            .entry(user.clone())
            .or_insert_with(|| {
                debug!("Creating session for {}", user);
                Session::new(user.clone())
            });
        if session.is_expired(self.idle_timeout, now) {
            debug!("Session for {} expired; starting over", user);
            *session = Session::new(user.clone());
        }
        session.last_activity = now;
        f(session)
    }
}
