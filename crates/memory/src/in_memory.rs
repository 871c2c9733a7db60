//! In-memory store — useful for testing and ephemeral operations.
//!
//! Messages are held per conversation in append order with an optional
//! retention limit (oldest pruned first). Semantic recall works by vector
//! similarity when an [`Embedder`](crate::vector::Embedder) is attached,
//! and falls back to keyword-overlap scoring otherwise.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use taskweave_core::error::MemoryError;
use taskweave_core::memory::{
    MemoryStore, MessageFilter, ScopeKey, WorkingMemoryRecord,
};
use taskweave_core::message::Message;

use crate::vector::{keyword_score, vector_search, SharedEmbedder};

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, Vec<Message>>,
    working: HashMap<ScopeKey, WorkingMemoryRecord>,
}

/// An in-memory store backed by per-conversation message vectors.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    max_messages: Option<usize>,
    embedder: Option<SharedEmbedder>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_messages: None,
            embedder: None,
        }
    }

    /// Keep at most `max` messages per conversation, pruning oldest first.
    pub fn with_retention(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Attach an embedder: appended messages get embeddings, and semantic
    /// recall ranks by cosine similarity instead of keyword overlap.
    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Total number of stored messages across all conversations.
    pub async fn message_count(&self) -> usize {
        self.inner
            .read()
            .await
            .conversations
            .values()
            .map(|v| v.len())
            .sum()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(
        &self,
        conversation_id: &str,
        mut messages: Vec<Message>,
    ) -> Result<(), MemoryError> {
        if let Some(embedder) = &self.embedder {
            for msg in &mut messages {
                if msg.embedding.is_none() {
                    msg.embedding = Some(embedder.embed(&msg.content));
                }
            }
        }

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

        Ok(())
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

    async fn semantic_recall(
        &self,
        conversation_id: &str,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<Message>, MemoryError> {
        let inner = self.inner.read().await;
        let Some(stored) = inner.conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };

        if let Some(embedder) = &self.embedder {
            let query_embedding = embedder.embed(query);
            return Ok(vector_search(stored, &query_embedding, top_k, min_score));
        }

        // Keyword fallback: overlap fraction of query words.
        let mut scored: Vec<(f32, &Message)> = stored
            .iter()
            .filter_map(|m| {
                let score = keyword_score(&m.content, query);
                (score > 0.0 && score >= min_score).then_some((score, m))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let mut selected: Vec<Message> = scored.into_iter().map(|(_, m)| m.clone()).collect();
        selected.sort_by_key(|m| m.timestamp);
        Ok(selected)
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
        Ok(())
    }

    async fn clear_working_memory(&self, key: &ScopeKey) -> Result<(), MemoryError> {
        self.inner.write().await.working.remove(key);
        Ok(())
    }
}
