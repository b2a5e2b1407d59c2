//! Contracts of the remote collaborators the engine talks to.
//!
//! Implementations must not cache remote state; the engine re-lists on
//! every cycle.

use async_trait::async_trait;

use convsync_shared::protocol::{ConversationMetadata, ConversationUpsert, RemoteFileEntry};
use convsync_shared::{Conversation, ConversationId, FileId, OwnerId};

use crate::error::RemoteError;

/// Opaque per-conversation file storage.
#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    /// Create or overwrite the blob for `conversation`.
    ///
    /// Overwrites `conversation.drive_file_id` when set, otherwise the blob
    /// already carrying the conversation's name, otherwise creates one.
    /// Saving the same conversation twice yields the same [`FileId`].
    async fn save(&self, owner: &OwnerId, conversation: &Conversation)
        -> Result<FileId, RemoteError>;

    async fn get(&self, owner: &OwnerId, file_id: &FileId) -> Result<Conversation, RemoteError>;

    async fn list(&self, owner: &OwnerId) -> Result<Vec<RemoteFileEntry>, RemoteError>;

    async fn delete(&self, owner: &OwnerId, file_id: &FileId) -> Result<(), RemoteError>;
}

/// Client side of the conversation metadata registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn upsert(
        &self,
        owner: &OwnerId,
        upsert: &ConversationUpsert,
    ) -> Result<ConversationMetadata, RemoteError>;

    async fn delete(&self, owner: &OwnerId, id: &ConversationId) -> Result<(), RemoteError>;
}
