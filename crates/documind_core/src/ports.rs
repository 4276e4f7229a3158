//! crates/documind_core/src/ports.rs
//!
//! Defines the service contracts (traits) the client core depends on.
//! The backend REST API and the diagram rendering tool are both reached through
//! these traits, so the stores can be driven by in-memory fakes in tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use crate::domain::{ChatReply, Conversation, DiagramReply, Document};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    /// The request never completed (connection refused, timeout, ...).
    #[error("Network failure: {0}")]
    Network(String),
    /// The backend answered with a non-success status.
    #[error("Backend error ({status}): {detail}")]
    Backend { status: u16, detail: String },
    /// The rendering tool rejected the diagram markup.
    #[error("Diagram render failed: {0}")]
    Render(String),
    /// The request was refused locally before anything was sent.
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// The human-readable part of the error, without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            PortError::Network(d)
            | PortError::Render(d)
            | PortError::Validation(d)
            | PortError::NotFound(d)
            | PortError::Unexpected(d) => d,
            PortError::Backend { detail, .. } => detail,
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn upload_document(&self, file_name: &str, data: Bytes) -> PortResult<Document>;

    async fn list_documents(&self) -> PortResult<Vec<Document>>;

    async fn delete_document(&self, document_id: &str) -> PortResult<()>;
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn create_conversation(&self, document_ids: &BTreeSet<String>) -> PortResult<Conversation>;

    async fn list_conversations(&self) -> PortResult<Vec<Conversation>>;

    async fn get_conversation(&self, conversation_id: &str) -> PortResult<Conversation>;

    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> PortResult<()>;

    /// Replaces the full document set of a conversation.
    async fn update_documents(
        &self,
        conversation_id: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<()>;

    async fn delete_conversation(&self, conversation_id: &str) -> PortResult<()>;

    async fn send_message(
        &self,
        conversation_id: &str,
        query: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<ChatReply>;

    async fn request_mindmap(
        &self,
        conversation_id: &str,
        query: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<DiagramReply>;
}

#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    /// Renders normalized diagram markup into an SVG fragment.
    ///
    /// `render_id` is unique among live renders and may be used for scratch files
    /// or element ids.
    async fn render(&self, render_id: &str, source: &str) -> PortResult<String>;
}
