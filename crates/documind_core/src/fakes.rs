//! In-memory port implementations for unit tests.
//!
//! Lock poisoning is not handled: a panic here already fails the test.

use crate::domain::{ChatReply, Conversation, DiagramReply, Document, DocumentSize};
use crate::ports::{ConversationService, DiagramRenderer, DocumentService, PortError, PortResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};

pub fn conversation(id: &str, document_ids: &[&str]) -> Conversation {
    Conversation {
        id: id.to_string(),
        title: None,
        document_ids: document_ids.iter().map(|d| d.to_string()).collect(),
        messages: Vec::new(),
        updated_at: None,
    }
}

pub fn document(id: &str, name: &str) -> Document {
    Document {
        id: id.to_string(),
        name: name.to_string(),
        size: DocumentSize::Bytes(1024),
    }
}

/// A backend whose server-side state is a couple of vectors.
#[derive(Default)]
pub struct FakeBackend {
    conversations: Mutex<Vec<Conversation>>,
    documents: Mutex<Vec<Document>>,
    next_id: AtomicUsize,
    send_error: Mutex<Option<PortError>>,
    fail_lists: AtomicBool,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    sent: Mutex<Vec<BTreeSet<String>>>,
    updated: Mutex<Vec<BTreeSet<String>>>,
    uploads: AtomicUsize,
    send_gate: Mutex<Option<oneshot::Receiver<()>>>,
    send_entered: Notify,
    list_gate: Mutex<Option<oneshot::Receiver<()>>>,
    list_entered: Notify,
}

impl FakeBackend {
    pub fn with_conversations(conversations: Vec<Conversation>) -> Self {
        let backend = Self::default();
        backend.set_conversations(conversations);
        backend
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        let backend = Self::default();
        *backend.documents.lock().unwrap() = documents;
        backend
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn fail_sends(&self, error: PortError) {
        *self.send_error.lock().unwrap() = Some(error);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn sent_document_ids(&self) -> Vec<BTreeSet<String>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn updated_document_ids(&self) -> Vec<BTreeSet<String>> {
        self.updated.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Holds the next chat request until the returned sender fires.
    pub fn gate_next_send(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.send_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub async fn wait_for_send(&self) {
        self.send_entered.notified().await;
    }

    /// Holds the next list request until the returned sender fires.
    pub fn gate_next_list(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.list_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub async fn wait_for_list(&self) {
        self.list_entered.notified().await;
    }

    fn unavailable() -> PortError {
        PortError::Network("backend unavailable".to_string())
    }
}

#[async_trait]
impl ConversationService for FakeBackend {
    async fn create_conversation(&self, document_ids: &BTreeSet<String>) -> PortResult<Conversation> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let id = format!("conv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let created = Conversation {
            id,
            title: None,
            document_ids: document_ids.clone(),
            messages: Vec::new(),
            updated_at: Some(Utc::now()),
        };
        self.conversations.lock().unwrap().insert(0, created.clone());
        Ok(created)
    }

    async fn list_conversations(&self) -> PortResult<Vec<Conversation>> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let snapshot = self.conversations.lock().unwrap().clone();
        let gate = self.list_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.list_entered.notify_one();
            let _ = gate.await;
        }
        Ok(snapshot)
    }

    async fn get_conversation(&self, conversation_id: &str) -> PortResult<Conversation> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| PortError::Backend {
                status: 404,
                detail: "Conversation not found".to_string(),
            })
    }

    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> PortResult<()> {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(c) = conversations.iter_mut().find(|c| c.id == conversation_id) {
            c.title = Some(title.to_string());
        }
        Ok(())
    }

    async fn update_documents(
        &self,
        conversation_id: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.updated.lock().unwrap().push(document_ids.clone());
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(c) = conversations.iter_mut().find(|c| c.id == conversation_id) {
            c.document_ids = document_ids.clone();
        }
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> PortResult<()> {
        self.conversations
            .lock()
            .unwrap()
            .retain(|c| c.id != conversation_id);
        Ok(())
    }

    async fn send_message(
        &self,
        _conversation_id: &str,
        query: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<ChatReply> {
        self.sent.lock().unwrap().push(document_ids.clone());
        let gate = self.send_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.send_entered.notify_one();
            let _ = gate.await;
        }
        if let Some(error) = self.send_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(ChatReply {
            response: format!("Answer to: {}", query),
            timestamp: Utc::now(),
            has_mindmap: true,
            mermaid_code: Some("graph TD\nA-->B".to_string()),
            sources: vec!["report.pdf".to_string()],
        })
    }

    async fn request_mindmap(
        &self,
        _conversation_id: &str,
        query: &str,
        _document_ids: &BTreeSet<String>,
    ) -> PortResult<DiagramReply> {
        Ok(DiagramReply {
            explanation: Some(format!("Overview of {}", query)),
            mermaid_code: Some("graph TD\nA[Topic]-->B[Detail]".to_string()),
        })
    }
}

#[async_trait]
impl DocumentService for FakeBackend {
    async fn upload_document(&self, file_name: &str, data: Bytes) -> PortResult<Document> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let doc = Document {
            id: format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: file_name.to_string(),
            size: DocumentSize::Bytes(data.len() as u64),
        };
        self.documents.lock().unwrap().push(doc.clone());
        Ok(doc)
    }

    async fn list_documents(&self) -> PortResult<Vec<Document>> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self.documents.lock().unwrap().clone())
    }

    async fn delete_document(&self, document_id: &str) -> PortResult<()> {
        let mut documents = self.documents.lock().unwrap();
        let before = documents.len();
        documents.retain(|d| d.id != document_id);
        if documents.len() == before {
            return Err(PortError::Backend {
                status: 404,
                detail: "Document not found".to_string(),
            });
        }
        Ok(())
    }
}

/// A renderer that answers with a stub SVG, or fails every render.
#[derive(Default)]
pub struct FakeRenderer {
    fail: AtomicBool,
    sources: Mutex<Vec<String>>,
}

impl FakeRenderer {
    pub fn failing() -> Self {
        let renderer = Self::default();
        renderer.fail.store(true, Ordering::SeqCst);
        renderer
    }

    /// Normalized sources passed to `render`, in call order.
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiagramRenderer for FakeRenderer {
    async fn render(&self, render_id: &str, source: &str) -> PortResult<String> {
        self.sources.lock().unwrap().push(source.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Render("Parse error on line 2".to_string()));
        }
        Ok(format!("<svg id=\"{}\"></svg>", render_id))
    }
}
