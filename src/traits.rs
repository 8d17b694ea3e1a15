use crate::error::{MailError, Result};
use crate::sanitize::DEFAULT_ATTACHMENT_NAME;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A provider agnostic outgoing message.
///
/// Address lists may contain anything a user typed; transports sanitize them
/// before they reach the wire.
#[derive(Debug, Clone, Default)]
pub struct Email {
    /// Overrides the provider level from address when set.
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
    pub attachments: Vec<Attachment>,
}

impl Email {
    pub(crate) fn from_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.from.as_deref() {
            Some(from) if !from.trim().is_empty() => from,
            _ => fallback,
        }
    }

    pub(crate) fn content_type(&self) -> &'static str {
        if self.html { "text/html" } else { "text/plain" }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub filename: Option<String>,
    pub path: Option<PathBuf>,
    /// Inline bytes win over `path` when both are set.
    pub content: Option<Vec<u8>>,
}

impl Attachment {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn inline(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: Some(filename.into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Display name before sanitizing: explicit filename, then the base
    /// name of `path`, then the fixed placeholder.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.filename.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_ATTACHMENT_NAME.to_string())
    }

    /// Bytes of the attachment, reading `path` only when no inline content
    /// is present.
    pub fn read_content(&self) -> Result<Vec<u8>> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }

        match &self.path {
            Some(path) => std::fs::read(path).map_err(|e| MailError::AttachmentRead {
                name: path.display().to_string(),
                reason: e.to_string(),
            }),
            None => Err(MailError::AttachmentRead {
                name: self.display_name(),
                reason: "attachment has neither content nor a path".to_string(),
            }),
        }
    }
}

/// A concrete provider able to deliver an [`Email`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Resolves once the provider accepted the message or refused it.
    async fn send(&self, email: &Email) -> Result<()>;

    fn name(&self) -> &'static str;
}
