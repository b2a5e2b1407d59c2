//! Local conversation operations.
//!
//! These never wait for the network except [`SyncEngine::delete_conversation`],
//! which makes one best-effort attempt to remove the remote copy.  Every
//! mutation goes through [`Conversation`]'s own helpers so the version
//! counter and `updated_at` move together.

use tracing::{debug, info, warn};

use convsync_shared::constants::DEFAULT_TITLE;
use convsync_shared::{Conversation, ConversationId, Message, MessagePart};
use convsync_store::DeleteOutcome;

use crate::engine::SyncEngine;
use crate::error::EngineError;

impl SyncEngine {
    /// Create and store a fresh conversation.  An empty title falls back to
    /// the default and is replaced by the first user message.
    pub async fn create_conversation(&self, title: &str) -> Result<Conversation, EngineError> {
        let title = match title.trim() {
            "" => DEFAULT_TITLE,
            t => t,
        };
        let conversation = Conversation::new(ConversationId::new(), title);
        self.local.put(&conversation).await?;
        self.refresh_unsynced_count().await;

        info!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    pub async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Conversation, EngineError> {
        self.local
            .get(id)
            .await?
            .ok_or_else(|| EngineError::ConversationNotFound(id.clone()))
    }

    /// Every local conversation, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, EngineError> {
        Ok(self.local.list_all().await?)
    }

    pub async fn append_message(
        &self,
        id: &ConversationId,
        message: Message,
    ) -> Result<Conversation, EngineError> {
        self.mutate(id, |c| {
            c.append_message(message);
            if c.title == DEFAULT_TITLE {
                let derived = c.derive_title();
                if derived != DEFAULT_TITLE {
                    c.title = derived;
                }
            }
        })
        .await
    }

    /// Replace the parts of one message.
    pub async fn edit_message(
        &self,
        id: &ConversationId,
        message_id: &str,
        parts: Vec<MessagePart>,
    ) -> Result<Conversation, EngineError> {
        let mut conversation = self.get_conversation(id).await?;
        if !conversation.edit_message(message_id, parts) {
            return Err(EngineError::MessageNotFound {
                conversation_id: id.clone(),
                message_id: message_id.to_string(),
            });
        }
        self.store(conversation).await
    }

    pub async fn rename_conversation(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<Conversation, EngineError> {
        let title = title.trim().to_string();
        self.mutate(id, |c| c.rename(title)).await
    }

    pub async fn set_persona(
        &self,
        id: &ConversationId,
        persona_id: Option<String>,
    ) -> Result<Conversation, EngineError> {
        self.mutate(id, |c| c.set_persona(persona_id)).await
    }

    pub async fn set_selected_model(
        &self,
        id: &ConversationId,
        model_id: Option<String>,
    ) -> Result<Conversation, EngineError> {
        self.mutate(id, |c| c.set_selected_model(model_id)).await
    }

    /// Delete locally, then try once to remove the remote copy.
    ///
    /// If the remote attempt fails the tombstone stays and the next sync
    /// cycle retries it; the conversation never comes back from a pull in
    /// the meantime.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), EngineError> {
        let outcome = self.local.delete(id).await?;
        self.refresh_unsynced_count().await;

        let tombstone = match outcome {
            DeleteOutcome::Missing => return Err(EngineError::ConversationNotFound(id.clone())),
            DeleteOutcome::LocalOnly => {
                debug!(conversation_id = %id, "deleted never-synced conversation");
                return Ok(());
            }
            DeleteOutcome::PendingRemote(tombstone) => tombstone,
        };

        match self.push_tombstone(&tombstone, None).await {
            Ok(()) => info!(conversation_id = %id, "conversation deleted everywhere"),
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "remote delete deferred to next sync");
            }
        }
        Ok(())
    }

    async fn mutate(
        &self,
        id: &ConversationId,
        apply: impl FnOnce(&mut Conversation),
    ) -> Result<Conversation, EngineError> {
        let mut conversation = self.get_conversation(id).await?;
        apply(&mut conversation);
        self.store(conversation).await
    }

    async fn store(&self, conversation: Conversation) -> Result<Conversation, EngineError> {
        self.local.put(&conversation).await?;
        self.refresh_unsynced_count().await;
        Ok(conversation)
    }
}
