//! # convsync-shared
//!
//! Types shared by every convsync crate: the conversation data model, the
//! identifiers that join local records to remote blobs and metadata rows,
//! the JSON shapes exchanged over the sync HTTP surface, and the validation
//! applied to payloads at the API boundary.

pub mod constants;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod types;
pub mod validate;

pub use conversation::{Conversation, Message, MessagePart, Role, ToolInvocationState};
pub use error::ValidationError;
pub use types::{ConversationId, FileId, OwnerId};
