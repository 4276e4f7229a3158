//! crates/documind_core/src/domain.rs
//!
//! Defines the pure, core data structures for the client.
//! These structs are independent of the backend's wire format.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Documents
//=========================================================================================

/// The size descriptor the backend reports for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSize {
    Bytes(u64),
    /// Already formatted by the backend (e.g. "1.2 MB").
    Label(String),
}

impl fmt::Display for DocumentSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSize::Label(label) => f.write_str(label),
            DocumentSize::Bytes(bytes) => {
                const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
                let mut value = *bytes as f64;
                let mut unit = 0;
                while value >= 1024.0 && unit < UNITS.len() - 1 {
                    value /= 1024.0;
                    unit += 1;
                }
                if unit == 0 {
                    write!(f, "{} {}", bytes, UNITS[0])
                } else {
                    write!(f, "{:.1} {}", value, UNITS[unit])
                }
            }
        }
    }
}

/// Represents a file uploaded to the backend. Conversations only reference it by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub size: DocumentSize,
}

//=========================================================================================
// Messages
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Delivery state of a message.
///
/// A user message starts out `Pending` while the backend call is in flight and is
/// settled to `Confirmed` or `Failed` once it resolves. Messages loaded from the
/// backend are always `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A single entry in a conversation thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    /// Set only on messages synthesized locally after a failed backend call.
    pub is_error: bool,
    diagram: Option<String>,
    pub sources: Vec<String>,
}

impl Message {
    /// A user message echoed locally before the backend has answered.
    pub fn pending_user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            status: MessageStatus::Pending,
            is_error: false,
            diagram: None,
            sources: Vec::new(),
        }
    }

    /// A confirmed message, as returned by the backend.
    pub fn confirmed(
        id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp,
            status: MessageStatus::Confirmed,
            is_error: false,
            diagram: None,
            sources: Vec::new(),
        }
    }

    /// A local-only error bubble. Never sent to the backend.
    pub fn error(detail: impl fmt::Display) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: format!("Error: {}", detail),
            timestamp: Utc::now(),
            status: MessageStatus::Failed,
            is_error: true,
            diagram: None,
            sources: Vec::new(),
        }
    }

    /// Attaches diagram markup. Blank markup is dropped so that a message
    /// reporting a mind map always carries code for it.
    pub fn with_diagram(mut self, code: Option<String>) -> Self {
        self.diagram = code.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn has_mind_map(&self) -> bool {
        self.diagram.is_some()
    }

    pub fn mermaid_code(&self) -> Option<&str> {
        self.diagram.as_deref()
    }

    /// Wall-clock time shown next to the message bubble.
    pub fn display_time(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}

//=========================================================================================
// Conversations
//=========================================================================================

/// A thread of messages scoped to a set of documents.
///
/// `document_ids` is a client-side cache of a relation the backend owns.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub document_ids: BTreeSet<String>,
    pub messages: Vec<Message>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("New conversation")
    }
}

//=========================================================================================
// Backend replies
//=========================================================================================

/// The assistant's answer to a chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub has_mindmap: bool,
    pub mermaid_code: Option<String>,
    pub sources: Vec<String>,
}

impl ChatReply {
    /// Maps the reply onto an assistant message.
    pub fn into_message(self) -> Message {
        let diagram = if self.has_mindmap { self.mermaid_code } else { None };
        Message::confirmed(Uuid::new_v4().to_string(), Role::Assistant, self.response, self.timestamp)
            .with_diagram(diagram)
            .with_sources(self.sources)
    }
}

/// The result of a standalone diagram request.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramReply {
    pub explanation: Option<String>,
    pub mermaid_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_are_humanized() {
        assert_eq!(DocumentSize::Bytes(512).to_string(), "512 B");
        assert_eq!(DocumentSize::Bytes(2048).to_string(), "2.0 KB");
        assert_eq!(DocumentSize::Bytes(5 * 1024 * 1024).to_string(), "5.0 MB");
        assert_eq!(DocumentSize::Label("3 pages".into()).to_string(), "3 pages");
    }

    #[test]
    fn blank_diagram_never_counts_as_mind_map() {
        let msg = Message::pending_user("hi").with_diagram(Some("   ".into()));
        assert!(!msg.has_mind_map());
        assert_eq!(msg.mermaid_code(), None);
    }

    #[test]
    fn reply_without_mindmap_flag_drops_code() {
        let reply = ChatReply {
            response: "answer".into(),
            timestamp: Utc::now(),
            has_mindmap: false,
            mermaid_code: Some("graph TD\nA-->B".into()),
            sources: vec!["notes.pdf".into()],
        };
        let msg = reply.into_message();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.status, MessageStatus::Confirmed);
        assert!(!msg.has_mind_map());
        assert_eq!(msg.sources, vec!["notes.pdf".to_string()]);
    }

    #[test]
    fn error_message_is_local_and_flagged() {
        let msg = Message::error("backend down");
        assert!(msg.is_error);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Error: backend down");
    }

    #[test]
    fn untitled_conversation_has_fallback_title() {
        let conv = Conversation {
            id: "c1".into(),
            title: Some("  ".into()),
            document_ids: BTreeSet::new(),
            messages: Vec::new(),
            updated_at: None,
        };
        assert_eq!(conv.display_title(), "New conversation");
    }
}
