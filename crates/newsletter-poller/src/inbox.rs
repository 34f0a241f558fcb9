use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared_types::EmailMessage;
use std::fs;
use std::path::{Path, PathBuf};

/// Supplies the raw newsletter messages for one run
pub trait MessageSource {
    fn load_messages(&self) -> Result<Vec<EmailMessage>>;
}

/// Message file as written by the mail downloader
#[derive(Debug, Deserialize)]
struct StoredMessage {
    uid: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    from: String,
    received_at: Option<DateTime<Utc>>,
    /// Older files only carry `body`
    #[serde(default, alias = "body")]
    body_text: Option<String>,
    #[serde(default)]
    body_html: Option<String>,
}

impl From<StoredMessage> for EmailMessage {
    fn from(stored: StoredMessage) -> Self {
        EmailMessage {
            id: stored.uid,
            subject: stored.subject,
            from: stored.from,
            received_at: stored.received_at,
            body_text: stored.body_text.unwrap_or_default(),
            body_html: stored.body_html,
        }
    }
}

/// Directory of `*.json` message files
pub struct JsonInbox {
    dir: PathBuf,
}

impl JsonInbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_message(path: &Path) -> Result<EmailMessage> {
        let content = fs::read_to_string(path).context("Failed to read file")?;
        let stored: StoredMessage =
            serde_json::from_str(&content).context("Failed to parse JSON")?;
        Ok(stored.into())
    }
}

impl MessageSource for JsonInbox {
    /// Newest first; unreadable files are logged and skipped.
    fn load_messages(&self) -> Result<Vec<EmailMessage>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read inbox {}", self.dir.display()))?;

        let mut messages: Vec<EmailMessage> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| match Self::read_message(&path) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!("Skipping {}: {:#}", path.display(), e);
                    None
                }
            })
            .collect();

        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at).then_with(|| a.id.cmp(&b.id)));
        tracing::info!("Loaded {} messages from {}", messages.len(), self.dir.display());
        Ok(messages)
    }
}
