/// Suffix appended to a conversation id to form its remote blob name.
pub const BLOB_NAME_SUFFIX: &str = ".json";

/// Title given to conversations with no usable user text.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Longest title derived automatically from message content (characters).
pub const AUTO_TITLE_MAX_CHARS: usize = 60;

/// Longest title accepted at the API boundary (characters).
pub const MAX_TITLE_CHARS: usize = 200;

/// Longest conversation id accepted at the API boundary (bytes).
pub const MAX_CONVERSATION_ID_LEN: usize = 128;

/// Maximum number of messages in a single conversation blob.
pub const MAX_MESSAGES_PER_CONVERSATION: usize = 10_000;

/// Maximum number of parts in a single message.
pub const MAX_PARTS_PER_MESSAGE: usize = 64;

/// Default maximum serialized blob size in bytes (8 MiB).
pub const DEFAULT_MAX_BLOB_SIZE: usize = 8 * 1024 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
