//! Conversation types: messages and typed content items.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Config;

/// Message role. Roles outside the core set are preserved as `Other`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::Other(s) => s,
        }
    }

    /// Parse a role name. Unrecognized names become `Other`.
    pub fn parse(name: &str) -> MessageRole {
        match name {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            other => MessageRole::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageRole {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageRole {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(MessageRole::parse(&s))
    }
}

/// One typed unit of message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        source: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        result: serde_json::Value,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ContentItem::ToolCall { .. })
    }

    /// Plain-text view of the item, used when a step response is bound to a
    /// scope variable.
    pub fn text_value(&self) -> Option<&str> {
        match self {
            ContentItem::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// An ordered message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentItem>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentItem>) -> Self {
        Message { role, content }
    }

    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Message {
            role,
            content: vec![ContentItem::text(text)],
        }
    }

    /// Concatenated text content, for callers that only need plain text.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentItem::text_value)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// The product of a compile pass or chain turn: ordered messages plus the
/// resolved configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Default)]
pub struct Conversation {
    pub messages: Vec<Message>,
    pub config: Config,
}
