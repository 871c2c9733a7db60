//! File-backed store — persistent JSONL storage.
//!
//! Two JSONL files under a directory: `messages.jsonl` (one line per
//! message, tagged with its conversation) and `working_memory.jsonl` (one
//! line per scope record). Entries are loaded into memory on creation and
//! flushed to disk on every mutation, giving fast reads with durable
//! writes. Corrupted lines are skipped with a warning.
//!
//! Semantic recall is intentionally not implemented here — the engine's
//! degrade path (recency-only retrieval) covers this store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use taskweave_core::error::MemoryError;
use taskweave_core::memory::{MemoryStore, MessageFilter, ScopeKey, WorkingMemoryRecord};
use taskweave_core::message::Message;

const MESSAGES_FILE: &str = "messages.jsonl";
const WORKING_MEMORY_FILE: &str = "working_memory.jsonl";

#[derive(Serialize, Deserialize)]
struct MessageLine {
    conversation_id: String,
    #[serde(flatten)]
    message: Message,
}

#[derive(Serialize, Deserialize)]
struct WorkingMemoryLine {
    key: ScopeKey,
    record: WorkingMemoryRecord,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, Vec<Message>>,
    working: HashMap<ScopeKey, WorkingMemoryRecord>,
}

/// A file-backed store using JSONL under a directory.
pub struct FileStore {
    dir: PathBuf,
    inner: RwLock<Inner>,
    max_messages: Option<usize>,
}

impl FileStore {
    /// Open (or create) a store at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let inner = Self::load_from_disk(&dir);
        debug!(
            dir = %dir.display(),
            conversations = inner.conversations.len(),
            "File store loaded"
        );
        Self {
            dir,
            inner: RwLock::new(inner),
            max_messages: None,
        }
    }

    /// Keep at most `max` messages per conversation, pruning oldest first.
    pub fn with_retention(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    fn load_from_disk(dir: &Path) -> Inner {
        let mut inner = Inner::default();

        for line in read_lines(&dir.join(MESSAGES_FILE)) {
            match serde_json::from_str::<MessageLine>(&line) {
                Ok(entry) => inner
                    .conversations
                    .entry(entry.conversation_id)
                    .or_default()
                    .push(entry.message),
                Err(e) => warn!(error = %e, "Skipping corrupted message line"),
            }
        }
        for messages in inner.conversations.values_mut() {
            messages.sort_by_key(|m| m.timestamp);
        }

        for line in read_lines(&dir.join(WORKING_MEMORY_FILE)) {
            match serde_json::from_str::<WorkingMemoryLine>(&line) {
                Ok(entry) => {
                    inner.working.insert(entry.key, entry.record);
                }
                Err(e) => warn!(error = %e, "Skipping corrupted working-memory line"),
            }
        }

        inner
    }

    async fn flush_messages(&self) -> Result<(), MemoryError> {
        let inner = self.inner.read().await;
        let mut content = String::new();
        for (conversation_id, messages) in &inner.conversations {
            for message in messages {
                let line = serde_json::to_string(&MessageLine {
                    conversation_id: conversation_id.clone(),
                    message: message.clone(),
                })
                .map_err(|e| MemoryError::Storage(format!("serialize message: {e}")))?;
                content.push_str(&line);
                content.push('\n');
            }
        }
        drop(inner);
        self.write_file(MESSAGES_FILE, &content)
    }

    async fn flush_working_memory(&self) -> Result<(), MemoryError> {
        let inner = self.inner.read().await;
        let mut content = String::new();
        for (key, record) in &inner.working {
            let line = serde_json::to_string(&WorkingMemoryLine {
                key: key.clone(),
                record: record.clone(),
            })
            .map_err(|e| MemoryError::Storage(format!("serialize working memory: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }
        drop(inner);
        self.write_file(WORKING_MEMORY_FILE, &content)
    }

    fn write_file(&self, name: &str, content: &str) -> Result<(), MemoryError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| MemoryError::Storage(format!("create store directory: {e}")))?;
        std::fs::write(self.dir.join(name), content)
            .map_err(|e| MemoryError::Storage(format!("write {name}: {e}")))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect(),
        // File doesn't exist yet — start empty
        Err(_) => Vec::new(),
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), MemoryError> {
        {
            let mut inner = self.inner.write().await;
            let entry = inner
                .conversations
                .entry(conversation_id.to_string())
                .or_default();
            entry.extend(messages);

            if let Some(max) = self.max_messages
                && entry.len() > max
            {
                let excess = entry.len() - max;
                entry.drain(..excess);
                debug!(conversation_id, pruned = excess, "Pruned oldest messages");
            }
        }
        self.flush_messages().await
    }

    async fn messages(
        &self,
        conversation_id: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<Message>, MemoryError> {
        let inner = self.inner.read().await;
        let Some(stored) = inner.conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<Message> = stored
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.timestamp);

        if let Some(limit) = filter.limit
            && matching.len() > limit
        {
            matching.drain(..matching.len() - limit);
        }

        Ok(matching)
    }

    async fn working_memory(
        &self,
        key: &ScopeKey,
    ) -> Result<Option<WorkingMemoryRecord>, MemoryError> {
        Ok(self.inner.read().await.working.get(key).cloned())
    }

    async fn set_working_memory(
        &self,
        key: &ScopeKey,
        record: WorkingMemoryRecord,
    ) -> Result<(), MemoryError> {
        self.inner.write().await.working.insert(key.clone(), record);
        self.flush_working_memory().await
    }

    async fn clear_working_memory(&self, key: &ScopeKey) -> Result<(), MemoryError> {
        let removed = self.inner.write().await.working.remove(key).is_some();
        if removed {
            self.flush_working_memory().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn messages_persist_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();

        let store = FileStore::new(tmp.path());
        store
            .append("c1", vec![Message::user("persisted message")])
            .await
            .unwrap();

        let reopened = FileStore::new(tmp.path());
        let messages = reopened
            .messages("c1", &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "persisted message");
    }

    #[tokio::test]
    async fn working_memory_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let key = ScopeKey::user("u1");

        let store = FileStore::new(tmp.path());
        store
            .set_working_memory(&key, WorkingMemoryRecord::new("remember this"))
            .await
            .unwrap();

        let reopened = FileStore::new(tmp.path());
        let record = reopened.working_memory(&key).await.unwrap().unwrap();
        assert_eq!(record.content, "remember this");
    }

    #[tokio::test]
    async fn retention_applies_and_persists() {
        let tmp = tempfile::tempdir().unwrap();

        let store = FileStore::new(tmp.path()).with_retention(2);
        for i in 0..4 {
            store
                .append("c1", vec![Message::user(format!("msg {i}"))])
                .await
                .unwrap();
        }

        let reopened = FileStore::new(tmp.path());
        let messages = reopened
            .messages("c1", &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "msg 2");
        assert_eq!(messages[1].content, "msg 3");
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();

        let store = FileStore::new(tmp.path());
        store.append("c1", vec![Message::user("valid")]).await.unwrap();

        // Append garbage to the messages file
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(tmp.path().join(MESSAGES_FILE))
            .unwrap();
        writeln!(file, "this is not json").unwrap();

        let reopened = FileStore::new(tmp.path());
        let messages = reopened
            .messages("c1", &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn missing_directory_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path().join("does/not/exist/yet"));
        let messages = store
            .messages("c1", &MessageFilter::default())
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn semantic_recall_reports_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        let err = store.semantic_recall("c1", "query", 4, 0.0).await.unwrap_err();
        assert!(matches!(err, MemoryError::RecallUnsupported));
    }

    #[tokio::test]
    async fn clear_working_memory_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let key = ScopeKey::conversation("c1");

        let store = FileStore::new(tmp.path());
        store
            .set_working_memory(&key, WorkingMemoryRecord::new("temp"))
            .await
            .unwrap();
        store.clear_working_memory(&key).await.unwrap();

        let reopened = FileStore::new(tmp.path());
        assert!(reopened.working_memory(&key).await.unwrap().is_none());
    }
}
