//! File-backed conversation blobs.
//!
//! Layout: `<base>/<hex(owner)>/<file id>.json`.  Each file is a
//! [`StoredBlob`] envelope carrying the blob name and its modified time next
//! to the conversation.  File ids are server-issued UUIDs; anything else is
//! treated as absent, so client input never reaches a path.
//!
//! Blob names are resolved through an in-memory index per owner, built from
//! one directory scan the first time that owner writes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use convsync_shared::protocol::RemoteFileEntry;
use convsync_shared::{Conversation, FileId, OwnerId};

use crate::error::ServerError;

const BLOB_EXTENSION: &str = "json";

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".into()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(base) {
        return Err(ServerError::BadRequest("Path traversal detected".into()));
    }
    Ok(resolved)
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredBlob {
    name: String,
    /// Equal to the stored conversation's `updatedAt`.
    modified_time: DateTime<Utc>,
    conversation: Conversation,
}

/// Catalog fields of a [`StoredBlob`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobHeader {
    name: String,
    modified_time: DateTime<Utc>,
}

#[derive(Debug)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
    /// Blob name to file id, per owner.  Also serializes writers.
    index: Mutex<HashMap<OwnerId, HashMap<String, FileId>>>,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::BlobStorage(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
            index: Mutex::new(HashMap::new()),
        })
    }

    /// Create or overwrite the blob for `conversation`.
    ///
    /// Reuses `conversation.drive_file_id` when it names one of the owner's
    /// blobs for the same conversation, else the blob carrying the same
    /// name, else issues a new id.  Fails with [`ServerError::Conflict`]
    /// when the stored copy is newer than `conversation.updated_at`.
    pub async fn save(
        &self,
        owner: &OwnerId,
        conversation: &Conversation,
    ) -> Result<FileId, ServerError> {
        let name = conversation.id.blob_name();
        let blob = StoredBlob {
            name: name.clone(),
            modified_time: conversation.updated_at,
            conversation: conversation.clone(),
        };
        let data = serde_json::to_vec(&blob)
            .map_err(|e| ServerError::Internal(format!("Failed to encode blob: {e}")))?;
        if data.len() > self.max_size {
            return Err(ServerError::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let mut index = self.index.lock().await;
        let names = match index.entry(owner.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.scan_names(owner).await?),
        };

        let dir = self.owner_dir(owner)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            ServerError::BlobStorage(format!("Failed to create owner directory: {e}"))
        })?;

        let candidates = conversation.drive_file_id.iter().chain(names.get(&name));
        let mut existing = None;
        for id in candidates {
            if let Some(header) = self.read_header(owner, id).await? {
                if header.name == name {
                    existing = Some((id.clone(), header.modified_time));
                    break;
                }
            }
        }

        if let Some((_, stored_time)) = &existing {
            if *stored_time > conversation.updated_at {
                debug!(owner = %owner, name = %name, "Refusing to overwrite newer blob");
                return Err(ServerError::Conflict(name));
            }
        }
        let file_id = existing.map_or_else(FileId::new, |(id, _)| id);

        let path = self
            .blob_path(owner, &file_id)?
            .ok_or_else(|| ServerError::Internal(format!("Unusable file id {file_id}")))?;
        let tmp = ensure_within(&dir, &dir.join(format!(".{}.tmp", Uuid::new_v4())))?;

        fs::write(&tmp, &data)
            .await
            .map_err(|e| ServerError::BlobStorage(format!("Failed to write blob {file_id}: {e}")))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(ServerError::BlobStorage(format!(
                "Failed to commit blob {file_id}: {e}"
            )));
        }
        names.insert(name, file_id.clone());

        debug!(
            owner = %owner,
            file_id = %file_id,
            conversation_id = %conversation.id,
            size = data.len(),
            "Stored blob"
        );
        Ok(file_id)
    }

    pub async fn get(
        &self,
        owner: &OwnerId,
        file_id: &FileId,
    ) -> Result<Conversation, ServerError> {
        let blob = self
            .read_blob(owner, file_id)
            .await?
            .ok_or(ServerError::NotFound)?;
        Ok(blob.conversation)
    }

    /// The owner's catalog, most recently modified first.
    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<RemoteFileEntry>, ServerError> {
        let dir = self.owner_dir(owner)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ServerError::BlobStorage(format!("Failed to list blobs: {e}")));
            }
        };

        let mut catalog = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ServerError::BlobStorage(format!("Failed to read directory entry: {e}"))
        })? {
            let path = entry.path();
            let Some(file_id) = file_id_from_path(&path) else {
                continue;
            };
            match self.read_header(owner, &file_id).await {
                Ok(Some(header)) => catalog.push(RemoteFileEntry {
                    file_id,
                    name: header.name,
                    modified_time: header.modified_time,
                }),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable blob"),
            }
        }

        catalog.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));
        Ok(catalog)
    }

    pub async fn delete(&self, owner: &OwnerId, file_id: &FileId) -> Result<(), ServerError> {
        let mut index = self.index.lock().await;

        let path = self.blob_path(owner, file_id)?.ok_or(ServerError::NotFound)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                if let Some(names) = index.get_mut(owner) {
                    names.retain(|_, id| id != file_id);
                }
                debug!(owner = %owner, file_id = %file_id, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ServerError::NotFound),
            Err(e) => Err(ServerError::BlobStorage(format!(
                "Failed to delete blob {file_id}: {e}"
            ))),
        }
    }

    fn owner_dir(&self, owner: &OwnerId) -> Result<PathBuf, ServerError> {
        ensure_within(&self.base_path, &self.base_path.join(owner.to_hex()))
    }

    /// `None` when `file_id` is not a server-issued id.
    fn blob_path(
        &self,
        owner: &OwnerId,
        file_id: &FileId,
    ) -> Result<Option<PathBuf>, ServerError> {
        let Ok(uuid) = Uuid::parse_str(file_id.as_str()) else {
            return Ok(None);
        };
        let dir = self.owner_dir(owner)?;
        let raw = dir.join(format!("{}.{BLOB_EXTENSION}", uuid.hyphenated()));
        ensure_within(&dir, &raw).map(Some)
    }

    async fn read_file(
        &self,
        owner: &OwnerId,
        file_id: &FileId,
    ) -> Result<Option<Vec<u8>>, ServerError> {
        let Some(path) = self.blob_path(owner, file_id)? else {
            return Ok(None);
        };
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerError::BlobStorage(format!(
                "Failed to read blob {file_id}: {e}"
            ))),
        }
    }

    async fn read_blob(
        &self,
        owner: &OwnerId,
        file_id: &FileId,
    ) -> Result<Option<StoredBlob>, ServerError> {
        self.read_file(owner, file_id)
            .await?
            .map(|data| {
                serde_json::from_slice(&data)
                    .map_err(|e| ServerError::BlobStorage(format!("Corrupt blob {file_id}: {e}")))
            })
            .transpose()
    }

    async fn read_header(
        &self,
        owner: &OwnerId,
        file_id: &FileId,
    ) -> Result<Option<BlobHeader>, ServerError> {
        self.read_file(owner, file_id)
            .await?
            .map(|data| {
                serde_json::from_slice(&data)
                    .map_err(|e| ServerError::BlobStorage(format!("Corrupt blob {file_id}: {e}")))
            })
            .transpose()
    }

    /// Name index for one owner; the newest blob wins a duplicated name.
    async fn scan_names(&self, owner: &OwnerId) -> Result<HashMap<String, FileId>, ServerError> {
        let mut names = HashMap::new();
        for entry in self.list(owner).await? {
            names.entry(entry.name).or_insert(entry.file_id);
        }
        debug!(owner = %owner, blobs = names.len(), "Indexed blob names");
        Ok(names)
    }
}

fn file_id_from_path(path: &Path) -> Option<FileId> {
    if path.extension()? != BLOB_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    Uuid::parse_str(stem).ok()?;
    Some(FileId::from(stem))
}
