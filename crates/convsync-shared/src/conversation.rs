//! Conversation data model.
//!
//! A [`Conversation`] is the unit of synchronization: the whole record,
//! messages included, is pushed and pulled as one JSON document.  Field
//! names are camelCase on the wire so blobs stay readable by the web client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{AUTO_TITLE_MAX_CHARS, DEFAULT_TITLE};
use crate::types::{ConversationId, FileId};

// ---------------------------------------------------------------------------
// Message parts
// ---------------------------------------------------------------------------

/// Lifecycle of a tool call inside an assistant message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    PartialCall,
    Call,
    Result,
}

/// One piece of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolInvocation {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
        state: ToolInvocationState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A single-part text message stamped with the current time.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts: vec![MessagePart::text(text)],
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text of every text part, in order.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(MessagePart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A chat conversation together with its local sync bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Incremented on every local mutation that must reach the remote store.
    pub local_version: i64,
    /// The `local_version` last accepted remotely.
    #[serde(default)]
    pub synced_version: i64,
    #[serde(default)]
    pub synced_to_drive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_file_id: Option<FileId>,
}

impl Conversation {
    /// A fresh, never-synced conversation.
    pub fn new(id: ConversationId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            messages: Vec::new(),
            persona_id: None,
            selected_model_id: None,
            created_at: now,
            updated_at: now,
            last_message_at: None,
            local_version: 1,
            synced_version: 0,
            synced_to_drive: false,
            drive_file_id: None,
        }
    }

    /// Seed the initial messages of a conversation that has not been stored
    /// yet.  Does not count as a separate mutation.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.last_message_at = messages.last().map(|m| m.created_at);
        self.messages = messages;
        self
    }

    /// `true` when local content has diverged from the last pushed state.
    pub fn has_pending_changes(&self) -> bool {
        !self.synced_to_drive || self.synced_version < self.local_version
    }

    /// `false` if the version pair violates `synced_version <= local_version`.
    pub fn versions_consistent(&self) -> bool {
        self.synced_version >= 0 && self.synced_version <= self.local_version
    }

    pub fn append_message(&mut self, message: Message) {
        self.last_message_at = Some(message.created_at);
        self.messages.push(message);
        self.record_mutation();
    }

    /// Replace the parts of an existing message.  Returns `false` if no
    /// message has that id.
    pub fn edit_message(&mut self, message_id: &str, parts: Vec<MessagePart>) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        message.parts = parts;
        self.record_mutation();
        true
    }

    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.record_mutation();
    }

    pub fn set_persona(&mut self, persona_id: Option<String>) {
        self.persona_id = persona_id;
        self.record_mutation();
    }

    pub fn set_selected_model(&mut self, model_id: Option<String>) {
        self.selected_model_id = model_id;
        self.record_mutation();
    }

    /// Title derived from the first user text: its first line, truncated.
    pub fn derive_title(&self) -> String {
        let first_line = self
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(Message::plain_text)
            .find_map(|text| {
                text.lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_string)
            });

        match first_line {
            Some(line) if line.chars().count() > AUTO_TITLE_MAX_CHARS => {
                let cut: String = line.chars().take(AUTO_TITLE_MAX_CHARS - 3).collect();
                format!("{}...", cut.trim_end())
            }
            Some(line) => line,
            None => DEFAULT_TITLE.to_string(),
        }
    }

    /// Bump the local version, refresh `updated_at` and flag the record as
    /// unsynced.
    fn record_mutation(&mut self) {
        self.local_version += 1;
        // Never move backwards, even if the wall clock does.
        self.updated_at = Utc::now().max(self.updated_at);
        self.synced_to_drive = false;
    }
}
