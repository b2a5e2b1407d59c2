//! JSON bodies exchanged over the sync HTTP surface.
//!
//! Both the server (axum handlers) and the engine's HTTP client use these
//! types, so the two sides cannot drift apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, FileId};

// ---------------------------------------------------------------------------
// Blob store (/sync/*)
// ---------------------------------------------------------------------------

/// One entry of the remote catalog returned by `GET /sync/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileEntry {
    #[serde(rename = "id")]
    pub file_id: FileId,
    pub name: String,
    pub modified_time: DateTime<Utc>,
}

/// Query string of `GET /sync/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlobQuery {
    pub file_id: FileId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SaveBlobResponse {
    pub file_id: FileId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBlobRequest {
    pub file_id: FileId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteBlobResponse {
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Metadata registry (/conversations)
// ---------------------------------------------------------------------------

/// Body of `POST /conversations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUpsert {
    pub conversation_id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub drive_file_id: Option<FileId>,
    /// The client's `localVersion` at the time of the push.
    pub drive_version: i64,
}

/// Server-side metadata row, without message bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    pub conversation_id: ConversationId,
    pub title: String,
    pub drive_file_id: Option<FileId>,
    pub local_version: i64,
    pub synced_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
