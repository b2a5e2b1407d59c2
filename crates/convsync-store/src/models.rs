//! Store-specific records that live next to the conversations table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convsync_shared::{ConversationId, FileId};

/// A locally deleted conversation whose remote blob still has to go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub conversation_id: ConversationId,
    /// `None` when a save was sent but its response never arrived; the blob
    /// is then found by its name.
    pub drive_file_id: Option<FileId>,
    pub deleted_at: DateTime<Utc>,
}

/// What a local delete did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No conversation with that id existed.
    Missing,
    /// Removed; it was never sent to the blob store, so there is nothing to
    /// delete remotely.
    LocalOnly,
    /// Removed; a tombstone now tracks the pending remote delete.
    PendingRemote(Tombstone),
}

