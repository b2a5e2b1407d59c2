//! In-memory remote used by the engine tests, with failure injection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use convsync_shared::protocol::{ConversationMetadata, ConversationUpsert, RemoteFileEntry};
use convsync_shared::{Conversation, ConversationId, FileId, OwnerId};

use crate::error::RemoteError;
use crate::remote::{RegistryClient, RemoteBlobStore};

struct Blob {
    owner: OwnerId,
    name: String,
    modified_time: DateTime<Utc>,
    conversation: Conversation,
}

#[derive(Default)]
struct State {
    blobs: HashMap<FileId, Blob>,
    registry: HashMap<(OwnerId, ConversationId), ConversationMetadata>,

    fail_saves: usize,
    lose_save_responses: usize,
    fail_upserts: usize,
    fail_deletes: bool,
    unauthorized: bool,
    save_delay: Option<Duration>,
    get_delay: Option<Duration>,
    /// Written by "another device" right after the next listing.
    after_next_list: Option<(OwnerId, Conversation)>,

    saves: usize,
    gets: usize,
    lists: usize,
    blob_deletes: usize,
    registry_deletes: usize,
}

impl State {
    fn insert_blob(&mut self, owner: &OwnerId, conversation: &Conversation) -> FileId {
        let name = conversation.id.blob_name();
        let file_id = self
            .blobs
            .iter()
            .find(|(_, b)| &b.owner == owner && b.name == name)
            .map(|(id, _)| id.clone())
            .unwrap_or_default();
        self.blobs.insert(
            file_id.clone(),
            Blob {
                owner: owner.clone(),
                name,
                modified_time: conversation.updated_at,
                conversation: conversation.clone(),
            },
        );
        file_id
    }
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

fn unavailable() -> RemoteError {
    RemoteError::Rejected {
        status: 503,
        message: "injected failure".into(),
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Place a blob directly, as another device would.
    pub fn insert_blob(&self, owner: &OwnerId, conversation: &Conversation) -> FileId {
        self.state().insert_blob(owner, conversation)
    }

    /// Have another device save `conversation` just after the next `list`
    /// returns, so the caller's catalog is already stale.
    pub fn insert_blob_after_next_list(&self, owner: &OwnerId, conversation: &Conversation) {
        self.state().after_next_list = Some((owner.clone(), conversation.clone()));
    }

    pub fn rename_blob(&self, file_id: &FileId, name: &str) {
        if let Some(blob) = self.state().blobs.get_mut(file_id) {
            blob.name = name.to_string();
        }
    }

    pub fn clear_blobs(&self) {
        self.state().blobs.clear();
    }

    pub fn blob(&self, file_id: &FileId) -> Option<Conversation> {
        self.state().blobs.get(file_id).map(|b| b.conversation.clone())
    }

    pub fn blob_count(&self) -> usize {
        self.state().blobs.len()
    }

    pub fn metadata(&self, id: &ConversationId) -> Option<ConversationMetadata> {
        self.state()
            .registry
            .iter()
            .find(|((_, cid), _)| cid == id)
            .map(|(_, meta)| meta.clone())
    }

    pub fn fail_next_saves(&self, n: usize) {
        self.state().fail_saves = n;
    }

    /// The save is applied but the caller sees a failure.
    pub fn lose_next_save_responses(&self, n: usize) {
        self.state().lose_save_responses = n;
    }

    pub fn fail_next_upserts(&self, n: usize) {
        self.state().fail_upserts = n;
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.state().unauthorized = unauthorized;
    }

    pub fn set_save_delay(&self, delay: Option<Duration>) {
        self.state().save_delay = delay;
    }

    pub fn set_get_delay(&self, delay: Option<Duration>) {
        self.state().get_delay = delay;
    }

    pub fn saves(&self) -> usize {
        self.state().saves
    }

    pub fn gets(&self) -> usize {
        self.state().gets
    }

    pub fn lists(&self) -> usize {
        self.state().lists
    }

    pub fn blob_deletes(&self) -> usize {
        self.state().blob_deletes
    }

    pub fn registry_deletes(&self) -> usize {
        self.state().registry_deletes
    }
}

#[async_trait]
impl RemoteBlobStore for MemoryRemote {
    async fn save(
        &self,
        owner: &OwnerId,
        conversation: &Conversation,
    ) -> Result<FileId, RemoteError> {
        let delay = {
            let mut state = self.state();
            state.saves += 1;
            if state.unauthorized {
                return Err(RemoteError::Unauthorized);
            }
            if state.fail_saves > 0 {
                state.fail_saves -= 1;
                return Err(unavailable());
            }
            state.save_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        let name = conversation.id.blob_name();
        let existing = conversation
            .drive_file_id
            .clone()
            .filter(|id| state.blobs.get(id).is_some_and(|b| &b.owner == owner))
            .or_else(|| {
                state
                    .blobs
                    .iter()
                    .find(|(_, b)| &b.owner == owner && b.name == name)
                    .map(|(id, _)| id.clone())
            });
        if let Some(current) = existing.as_ref().and_then(|id| state.blobs.get(id)) {
            if current.modified_time > conversation.updated_at {
                return Err(RemoteError::Conflict(name));
            }
        }
        let file_id = existing.unwrap_or_default();

        state.blobs.insert(
            file_id.clone(),
            Blob {
                owner: owner.clone(),
                name,
                modified_time: conversation.updated_at,
                conversation: conversation.clone(),
            },
        );

        if state.lose_save_responses > 0 {
            state.lose_save_responses -= 1;
            return Err(RemoteError::Network("connection reset".into()));
        }
        Ok(file_id)
    }

    async fn get(&self, owner: &OwnerId, file_id: &FileId) -> Result<Conversation, RemoteError> {
        let delay = {
            let mut state = self.state();
            state.gets += 1;
            if state.unauthorized {
                return Err(RemoteError::Unauthorized);
            }
            state.get_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state()
            .blobs
            .get(file_id)
            .filter(|b| &b.owner == owner)
            .map(|b| b.conversation.clone())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<RemoteFileEntry>, RemoteError> {
        let mut state = self.state();
        state.lists += 1;
        if state.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        let mut entries: Vec<RemoteFileEntry> = state
            .blobs
            .iter()
            .filter(|(_, b)| &b.owner == owner)
            .map(|(id, b)| RemoteFileEntry {
                file_id: id.clone(),
                name: b.name.clone(),
                modified_time: b.modified_time,
            })
            .collect();
        entries.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));

        if let Some((other, conversation)) = state.after_next_list.take() {
            state.insert_blob(&other, &conversation);
        }
        Ok(entries)
    }

    async fn delete(&self, owner: &OwnerId, file_id: &FileId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.blob_deletes += 1;
        if state.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if state.fail_deletes {
            return Err(unavailable());
        }
        let owned = state.blobs.get(file_id).is_some_and(|b| &b.owner == owner);
        if !owned {
            return Err(RemoteError::NotFound(file_id.to_string()));
        }
        state.blobs.remove(file_id);
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for MemoryRemote {
    async fn upsert(
        &self,
        owner: &OwnerId,
        upsert: &ConversationUpsert,
    ) -> Result<ConversationMetadata, RemoteError> {
        let mut state = self.state();
        if state.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if state.fail_upserts > 0 {
            state.fail_upserts -= 1;
            return Err(unavailable());
        }

        let now = Utc::now();
        let key = (owner.clone(), upsert.conversation_id.clone());
        let created_at = state.registry.get(&key).map_or(now, |m| m.created_at);
        let meta = ConversationMetadata {
            conversation_id: upsert.conversation_id.clone(),
            title: upsert.title.clone(),
            drive_file_id: upsert.drive_file_id.clone(),
            local_version: upsert.drive_version,
            synced_version: upsert.drive_version,
            created_at,
            updated_at: now,
        };
        state.registry.insert(key, meta.clone());
        Ok(meta)
    }

    async fn delete(&self, owner: &OwnerId, id: &ConversationId) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.registry_deletes += 1;
        if state.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if state.fail_deletes {
            return Err(unavailable());
        }
        state
            .registry
            .remove(&(owner.clone(), id.clone()))
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
}
