//! Append-only per-conversation diagnostic log.
//!
//! One file per conversation under the log directory. Until the agent
//! assigns an id the log writes to `conversation_<uuid>.log`; [`bind`]
//! renames that file to `conversation_<id>.log` and later lines go there.
//!
//! [`bind`]: ConversationLog::bind

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::activity::RawActivity;

/// Default directory for conversation logs.
pub const DEFAULT_LOGS_DIR: &str = "logs";

/// Diagnostic trail for one conversation.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    dir: PathBuf,
    path: PathBuf,
    bound: bool,
}

impl ConversationLog {
    /// A log under `dir` with a temporary file name.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(file_name(&uuid::Uuid::now_v7().to_string()));
        Self {
            dir,
            path,
            bound: false,
        }
    }

    /// The file currently written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the log is named after a conversation id yet.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Name the log after `conversation_id`, moving anything written so far.
    pub async fn bind(&mut self, conversation_id: &str) -> std::io::Result<()> {
        let target = self.dir.join(file_name(conversation_id));
        if target == self.path {
            self.bound = true;
            return Ok(());
        }
        if tokio::fs::try_exists(&self.path).await? {
            tokio::fs::rename(&self.path, &target).await?;
        }
        tracing::debug!(path = %target.display(), "conversation log bound");
        self.path = target;
        self.bound = true;
        Ok(())
    }

    /// Append one timestamped line.
    pub async fn record(&self, message: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = format!(
            "[{}] {message}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    pub async fn record_user_message(&self, message: &str) -> std::io::Result<()> {
        self.record(&format!("USER: {message}")).await
    }

    /// Record the diagnostic fields of a raw activity as pretty JSON.
    pub async fn record_activity(&self, activity: &RawActivity) -> std::io::Result<()> {
        let entry = json!({
            "type": activity.kind,
            "text": activity.text,
            "name": activity.name,
            "value": activity.value,
            "channel_data": activity.channel_data,
            "entities": activity.entities,
            "id": activity.id,
        });
        let pretty = serde_json::to_string_pretty(&entry).map_err(std::io::Error::other)?;
        self.record(&format!("ACTIVITY: {pretty}")).await
    }
}

fn file_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("conversation_{safe}.log")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(file_name("abc-123"), "conversation_abc-123.log");
        assert_eq!(file_name("a/b:c"), "conversation_a_b_c.log");
    }

    #[tokio::test]
    async fn lines_are_timestamped_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path().join("logs"));
        log.record("first").await.unwrap();
        log.record_user_message("hello").await.unwrap();

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('[') && lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] USER: hello"));
    }

    #[tokio::test]
    async fn bind_moves_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ConversationLog::new(dir.path());
        assert!(!log.is_bound());
        log.record("before id").await.unwrap();
        let temp_path = log.path().to_path_buf();

        log.bind("conv-9").await.unwrap();
        log.record("after id").await.unwrap();

        assert!(log.is_bound());
        assert!(!temp_path.exists());
        assert_eq!(log.path(), dir.path().join("conversation_conv-9.log"));
        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(content.contains("before id"));
        assert!(content.contains("after id"));
    }

    #[tokio::test]
    async fn bind_without_prior_lines_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ConversationLog::new(dir.path());
        log.bind("c1").await.unwrap();
        assert!(!log.path().exists());
    }

    #[tokio::test]
    async fn activity_entry_lists_diagnostic_fields() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path());
        let activity: RawActivity = serde_json::from_value(json!({
            "type": "event",
            "id": "a-1",
            "name": "thinking",
            "channelData": {"k": 1}
        }))
        .unwrap();
        log.record_activity(&activity).await.unwrap();

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(content.contains("ACTIVITY: {"));
        assert!(content.contains("\"channel_data\": {"));
        assert!(content.contains("\"id\": \"a-1\""));
        assert!(content.contains("\"text\": null"));
    }
}
