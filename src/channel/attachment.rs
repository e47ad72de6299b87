//! Attachments that point at a local path or an HTTP(S) URL.
//!
//! ## Why resolve lazily?
//!
//! The orchestrator decides whether a file is wanted before paying for the
//! download: an upload that arrives in the wrong state is rejected without
//! touching the network or the disk.

use super::{Attachment, DownloadedFile};
use crate::error::ChannelError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default time budget for fetching a URL attachment.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Where an attachment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceAttachment {
    Local(PathBuf),
    Url { url: String, timeout: Duration },
}

impl SourceAttachment {
    /// Classify a user-supplied path or URL.
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        if is_url(source) {
            SourceAttachment::Url {
                url: source.to_string(),
                timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            }
        } else {
            SourceAttachment::Local(PathBuf::from(source))
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            SourceAttachment::Url { url, .. } => SourceAttachment::Url { url, timeout },
            local => local,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

#[async_trait]
impl Attachment for SourceAttachment {
    fn declared_size(&self) -> Option<u64> {
        match self {
            SourceAttachment::Local(path) => std::fs::metadata(path).ok().map(|m| m.len()),
            SourceAttachment::Url { .. } => None,
        }
    }

    async fn download(&self) -> Result<DownloadedFile, ChannelError> {
        match self {
            SourceAttachment::Local(path) => read_local(path).await,
            SourceAttachment::Url { url, timeout } => download_url(url, *timeout).await,
        }
    }
}

async fn read_local(path: &Path) -> Result<DownloadedFile, ChannelError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ChannelError::NotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => ChannelError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ChannelError::Io(e),
    })?;

    let original_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    debug!("Read local attachment {} ({} bytes)", path.display(), bytes.len());

    Ok(DownloadedFile {
        mime_type: mime_for_name(&original_name).to_string(),
        original_name,
        bytes,
    })
}

async fn download_url(url: &str, timeout: Duration) -> Result<DownloadedFile, ChannelError> {
    info!("Downloading attachment from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ChannelError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ChannelError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            ChannelError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ChannelError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let header_mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let original_name = extract_filename(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ChannelError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes as {}", bytes.len(), original_name);

    Ok(DownloadedFile {
        mime_type: header_mime.unwrap_or_else(|| mime_for_name(&original_name).to_string()),
        original_name,
        bytes: bytes.to_vec(),
    })
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "download".to_string()
}

/// MIME type guessed from a file extension.
pub fn mime_for_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
