use std::time::Duration;

use thiserror::Error;

use convsync_shared::ConversationId;
use convsync_store::StoreError;

/// Failures reported by the remote blob store or metadata registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// No valid session; remote work must stop until the user signs in.
    #[error("Unauthorized")]
    Unauthorized,

    /// Missing or not owned by the caller (the two are not distinguished).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote copy is newer than the one being saved.
    #[error("Remote copy is newer: {0}")]
    Conflict(String),

    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Worth retrying on the next cycle without user intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => true,
            RemoteError::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Failure of a single push or pull step.  Never escapes a sync cycle; it
/// is logged and counted in the [`SyncReport`](crate::SyncReport).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob {name} holds conversation {found}")]
    IdMismatch { name: String, found: ConversationId },
}

impl SyncError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::Unauthorized))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Store(e) => e.is_transient(),
            SyncError::IdMismatch { .. } => false,
        }
    }
}

/// Errors returned by the engine's local conversation operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Message {message_id} not found in conversation {conversation_id}")]
    MessageNotFound {
        conversation_id: ConversationId,
        message_id: String,
    },
}
