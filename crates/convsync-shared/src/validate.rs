//! Payload validation applied where conversations enter the server.
//!
//! Local edits on a device are never run through these checks; only data
//! crossing the HTTP boundary is.

use crate::constants::{
    MAX_CONVERSATION_ID_LEN, MAX_MESSAGES_PER_CONVERSATION, MAX_PARTS_PER_MESSAGE,
    MAX_TITLE_CHARS,
};
use crate::conversation::{Conversation, Message, MessagePart};
use crate::error::ValidationError;
use crate::types::ConversationId;

/// Conversation ids end up inside blob names, so path separators and control
/// characters are refused.
pub fn validate_conversation_id(id: &ConversationId) -> Result<(), ValidationError> {
    let raw = id.as_str();
    if raw.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if raw.len() > MAX_CONVERSATION_ID_LEN {
        return Err(ValidationError::IdTooLong {
            len: raw.len(),
            max: MAX_CONVERSATION_ID_LEN,
        });
    }
    if raw
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
        || raw.contains("..")
    {
        return Err(ValidationError::InvalidIdCharacter);
    }
    Ok(())
}

pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    let len = title.chars().count();
    if len > MAX_TITLE_CHARS {
        return Err(ValidationError::TitleTooLong {
            len,
            max: MAX_TITLE_CHARS,
        });
    }
    Ok(())
}

pub fn validate_conversation(conversation: &Conversation) -> Result<(), ValidationError> {
    validate_conversation_id(&conversation.id)?;
    validate_title(&conversation.title)?;

    if conversation.local_version < 1 {
        return Err(ValidationError::LocalVersionTooLow(
            conversation.local_version,
        ));
    }
    if !conversation.versions_consistent() {
        return Err(ValidationError::VersionOrder {
            local: conversation.local_version,
            synced: conversation.synced_version,
        });
    }

    if conversation.messages.len() > MAX_MESSAGES_PER_CONVERSATION {
        return Err(ValidationError::TooManyMessages {
            count: conversation.messages.len(),
            max: MAX_MESSAGES_PER_CONVERSATION,
        });
    }

    for (index, message) in conversation.messages.iter().enumerate() {
        validate_message(message).map_err(|reason| ValidationError::Message { index, reason })?;
    }

    Ok(())
}

fn validate_message(message: &Message) -> Result<(), String> {
    if message.id.trim().is_empty() {
        return Err("empty message id".to_string());
    }
    if message.parts.is_empty() {
        return Err("message has no parts".to_string());
    }
    if message.parts.len() > MAX_PARTS_PER_MESSAGE {
        return Err(format!(
            "too many parts: {} (max {})",
            message.parts.len(),
            MAX_PARTS_PER_MESSAGE
        ));
    }

    for part in &message.parts {
        match part {
            MessagePart::Text { .. } => {}
            MessagePart::Image { url, .. } => {
                let allowed = ["https://", "http://", "data:image/"];
                if !allowed.iter().any(|scheme| url.starts_with(scheme)) {
                    return Err(format!("unsupported image url: {url:.40}"));
                }
            }
            MessagePart::ToolInvocation {
                tool_call_id,
                tool_name,
                ..
            } => {
                if tool_call_id.trim().is_empty() || tool_name.trim().is_empty() {
                    return Err("tool invocation without call id or name".to_string());
                }
            }
        }
    }

    Ok(())
}
