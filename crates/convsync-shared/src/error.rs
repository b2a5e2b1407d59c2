use thiserror::Error;

/// Reasons a conversation payload is rejected at the API boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Conversation id is empty")]
    EmptyId,

    #[error("Conversation id too long: {len} bytes (max {max})")]
    IdTooLong { len: usize, max: usize },

    #[error("Conversation id contains a forbidden character")]
    InvalidIdCharacter,

    #[error("Title too long: {len} characters (max {max})")]
    TitleTooLong { len: usize, max: usize },

    #[error("Invalid versions: synced {synced} exceeds local {local}")]
    VersionOrder { local: i64, synced: i64 },

    #[error("Local version must be at least 1, got {0}")]
    LocalVersionTooLow(i64),

    #[error("Too many messages: {count} (max {max})")]
    TooManyMessages { count: usize, max: usize },

    #[error("Message {index}: {reason}")]
    Message { index: usize, reason: String },
}
