//! Conversation metadata writes.
//!
//! [`ConversationService`] validates incoming metadata and decides which
//! version the registry records.  Concurrent writers resolve last-writer-wins:
//! an update always sets `syncedVersion` to the supplied `localVersion`, even
//! if that moves it backwards.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};

use convsync_shared::protocol::{ConversationMetadata, ConversationUpsert};
use convsync_shared::validate::{validate_conversation_id, validate_title};
use convsync_shared::{ConversationId, FileId, OwnerId, ValidationError};

use crate::error::ServerError;
use crate::registry::MetadataRegistry;

/// Data of a first write.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub conversation_id: ConversationId,
    pub title: String,
    pub drive_file_id: Option<FileId>,
    pub local_version: i64,
}

/// Data of a later write.  `None` keeps the stored value.
#[derive(Debug, Clone)]
pub struct ConversationUpdate {
    pub title: Option<String>,
    pub drive_file_id: Option<FileId>,
    pub local_version: i64,
}

#[derive(Clone)]
pub struct ConversationService {
    registry: Arc<dyn MetadataRegistry>,
}

/// Registry timestamps have millisecond resolution.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn validate_version(version: i64) -> Result<(), ValidationError> {
    if version < 1 {
        return Err(ValidationError::LocalVersionTooLow(version));
    }
    Ok(())
}

impl ConversationService {
    pub fn new(registry: Arc<dyn MetadataRegistry>) -> Self {
        Self { registry }
    }

    /// Record a new conversation, trusting the client's version.
    ///
    /// Creating a conversation the owner already has is treated like an
    /// update.
    pub async fn create(
        &self,
        owner: &OwnerId,
        data: NewConversation,
    ) -> Result<ConversationMetadata, ServerError> {
        validate_conversation_id(&data.conversation_id)?;
        validate_title(&data.title)?;
        validate_version(data.local_version)?;

        let stamp = now();
        let record = ConversationMetadata {
            conversation_id: data.conversation_id.clone(),
            title: data.title.clone(),
            drive_file_id: data.drive_file_id.clone(),
            local_version: data.local_version,
            synced_version: data.local_version,
            created_at: stamp,
            updated_at: stamp,
        };

        if self.registry.insert(owner, &record).await? {
            info!(
                owner = %owner,
                conversation_id = %record.conversation_id,
                version = record.local_version,
                "Conversation registered"
            );
            return Ok(record);
        }

        let update = ConversationUpdate {
            title: Some(data.title),
            drive_file_id: data.drive_file_id,
            local_version: data.local_version,
        };
        self.update(&data.conversation_id, owner, update).await
    }

    /// Accept a newer write for an existing conversation.
    ///
    /// Fails with [`ServerError::NotFound`] when `owner` has no such
    /// conversation, whether it is missing or belongs to someone else.
    pub async fn update(
        &self,
        id: &ConversationId,
        owner: &OwnerId,
        data: ConversationUpdate,
    ) -> Result<ConversationMetadata, ServerError> {
        validate_conversation_id(id)?;
        validate_version(data.local_version)?;
        if let Some(title) = &data.title {
            validate_title(title)?;
        }

        let mut record = self
            .registry
            .get(owner, id)
            .await?
            .ok_or(ServerError::NotFound)?;

        if data.local_version < record.synced_version {
            debug!(
                owner = %owner,
                conversation_id = %id,
                stored = record.synced_version,
                incoming = data.local_version,
                "Accepting older version (last writer wins)"
            );
        }

        if let Some(title) = data.title {
            record.title = title;
        }
        if data.drive_file_id.is_some() {
            record.drive_file_id = data.drive_file_id;
        }
        record.local_version = data.local_version;
        record.synced_version = data.local_version;
        record.updated_at = now().max(record.updated_at);

        // The row may have been deleted since it was read.
        if !self.registry.update(owner, &record).await? {
            return Err(ServerError::NotFound);
        }

        debug!(
            owner = %owner,
            conversation_id = %id,
            version = record.synced_version,
            "Conversation metadata updated"
        );
        Ok(record)
    }

    /// Update when the conversation is known, create it otherwise.
    pub async fn upsert(
        &self,
        owner: &OwnerId,
        upsert: ConversationUpsert,
    ) -> Result<ConversationMetadata, ServerError> {
        let known = self
            .registry
            .get(owner, &upsert.conversation_id)
            .await?
            .is_some();

        if known {
            let update = ConversationUpdate {
                title: Some(upsert.title),
                drive_file_id: upsert.drive_file_id,
                local_version: upsert.drive_version,
            };
            match self.update(&upsert.conversation_id, owner, update.clone()).await {
                Err(ServerError::NotFound) => {}
                other => return other,
            }
            // Deleted between the read and the write; fall through to create.
            return self
                .create(
                    owner,
                    NewConversation {
                        conversation_id: upsert.conversation_id,
                        title: update.title.unwrap_or_default(),
                        drive_file_id: update.drive_file_id,
                        local_version: update.local_version,
                    },
                )
                .await;
        }

        self.create(
            owner,
            NewConversation {
                conversation_id: upsert.conversation_id,
                title: upsert.title,
                drive_file_id: upsert.drive_file_id,
                local_version: upsert.drive_version,
            },
        )
        .await
    }

    /// Lightweight metadata of every conversation, most recently updated
    /// first.
    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<ConversationMetadata>, ServerError> {
        self.registry.list(owner).await
    }

    pub async fn get(
        &self,
        id: &ConversationId,
        owner: &OwnerId,
    ) -> Result<ConversationMetadata, ServerError> {
        self.registry
            .get(owner, id)
            .await?
            .ok_or(ServerError::NotFound)
    }

    /// Remove the metadata row.  Deleting nothing is an error.
    pub async fn delete(&self, id: &ConversationId, owner: &OwnerId) -> Result<(), ServerError> {
        if !self.registry.delete(owner, id).await? {
            return Err(ServerError::NotFound);
        }
        info!(owner = %owner, conversation_id = %id, "Conversation metadata deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SqliteRegistry;

    fn service() -> (ConversationService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = SqliteRegistry::open(&dir.path().join("registry.db")).unwrap();
        (ConversationService::new(Arc::new(registry)), dir)
    }

    fn new_conversation(id: &str, version: i64) -> NewConversation {
        NewConversation {
            conversation_id: ConversationId::from(id),
            title: "Trip".into(),
            drive_file_id: None,
            local_version: version,
        }
    }

    fn bump(version: i64) -> ConversationUpdate {
        ConversationUpdate {
            title: None,
            drive_file_id: Some(FileId::from("f-2")),
            local_version: version,
        }
    }

    #[tokio::test]
    async fn create_trusts_client_version() {
        let (service, _dir) = service();
        let alice = OwnerId::from("alice");

        let meta = service
            .create(&alice, new_conversation("c1", 4))
            .await
            .unwrap();
        assert_eq!(meta.local_version, 4);
        assert_eq!(meta.synced_version, 4);
        assert_eq!(service.list(&alice).await.unwrap(), vec![meta]);
    }

    #[tokio::test]
    async fn update_is_last_writer_wins() {
        let (service, _dir) = service();
        let alice = OwnerId::from("alice");
        let id = ConversationId::from("c1");
        service
            .create(&alice, new_conversation("c1", 5))
            .await
            .unwrap();

        let meta = service.update(&id, &alice, bump(7)).await.unwrap();
        assert_eq!(meta.synced_version, 7);
        assert_eq!(meta.title, "Trip");
        assert_eq!(meta.drive_file_id, Some(FileId::from("f-2")));

        // An older version still wins when written last.
        let meta = service.update(&id, &alice, bump(2)).await.unwrap();
        assert_eq!(meta.synced_version, 2);
        assert_eq!(meta.local_version, 2);
    }

    #[tokio::test]
    async fn foreign_or_missing_rows_are_not_found() {
        let (service, _dir) = service();
        let alice = OwnerId::from("alice");
        let mallory = OwnerId::from("mallory");
        let id = ConversationId::from("c1");
        service
            .create(&alice, new_conversation("c1", 1))
            .await
            .unwrap();

        for result in [
            service.update(&id, &mallory, bump(2)).await.map(|_| ()),
            service.get(&id, &mallory).await.map(|_| ()),
            service.delete(&id, &mallory).await,
            service
                .update(&ConversationId::from("nope"), &alice, bump(2))
                .await
                .map(|_| ()),
        ] {
            assert!(matches!(result, Err(ServerError::NotFound)));
        }

        assert_eq!(service.get(&id, &alice).await.unwrap().local_version, 1);
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let (service, _dir) = service();
        let alice = OwnerId::from("alice");
        let upsert = |version| ConversationUpsert {
            conversation_id: ConversationId::from("c1"),
            title: format!("v{version}"),
            drive_file_id: Some(FileId::from("f-1")),
            drive_version: version,
        };

        let created = service.upsert(&alice, upsert(1)).await.unwrap();
        let updated = service.upsert(&alice, upsert(3)).await.unwrap();

        assert_eq!(created.synced_version, 1);
        assert_eq!(updated.synced_version, 3);
        assert_eq!(updated.title, "v3");
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(service.list(&alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let (service, _dir) = service();
        let alice = OwnerId::from("alice");

        let err = service
            .create(&alice, new_conversation("../escape", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let err = service
            .create(&alice, new_conversation("c1", 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Validation(ValidationError::LocalVersionTooLow(0))
        ));
    }

    #[tokio::test]
    async fn delete_twice_fails_the_second_time() {
        let (service, _dir) = service();
        let alice = OwnerId::from("alice");
        let id = ConversationId::from("c1");
        service
            .create(&alice, new_conversation("c1", 1))
            .await
            .unwrap();

        service.delete(&id, &alice).await.unwrap();
        assert!(matches!(
            service.delete(&id, &alice).await,
            Err(ServerError::NotFound)
        ));
    }
}
