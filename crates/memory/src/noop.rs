//! No-op store — disables memory entirely.

use async_trait::async_trait;

use taskweave_core::error::MemoryError;
use taskweave_core::memory::{MemoryStore, MessageFilter, ScopeKey, WorkingMemoryRecord};
use taskweave_core::message::Message;

/// A store that persists nothing. Appends succeed and are dropped; reads
/// are empty.
pub struct NoopStore;

#[async_trait]
impl MemoryStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn append(
        &self,
        _conversation_id: &str,
        _messages: Vec<Message>,
    ) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn messages(
        &self,
        _conversation_id: &str,
        _filter: &MessageFilter,
    ) -> Result<Vec<Message>, MemoryError> {
        Ok(Vec::new())
    }

    async fn working_memory(
        &self,
        _key: &ScopeKey,
    ) -> Result<Option<WorkingMemoryRecord>, MemoryError> {
        Ok(None)
    }

    async fn set_working_memory(
        &self,
        _key: &ScopeKey,
        _record: WorkingMemoryRecord,
    ) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn clear_working_memory(&self, _key: &ScopeKey) -> Result<(), MemoryError> {
        Ok(())
    }
}
