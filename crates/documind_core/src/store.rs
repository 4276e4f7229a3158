//! crates/documind_core/src/store.rs
//!
//! The conversation state store: the single owner of the cached conversation
//! list and of which conversation is current.
//!
//! The backend is authoritative. Every mutation of a conversation's metadata is
//! round-tripped and followed by a full reload; only chat messages are echoed
//! optimistically.

use crate::domain::{Conversation, DiagramReply, Message, MessageStatus};
use crate::ports::{ConversationService, PortError, PortResult};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct StoreState {
    conversations: Vec<Conversation>,
    current: Option<String>,
    /// Generation of the most recently issued list request.
    load_issued: u64,
    /// Generation of the list currently held in `conversations`.
    load_applied: u64,
}

impl StoreState {
    fn position(&self, conversation_id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == conversation_id)
    }

    fn upsert(&mut self, mut conversation: Conversation, sending: &HashSet<String>) {
        match self.position(&conversation.id) {
            Some(idx) => {
                keep_in_flight(&self.conversations[idx], &mut conversation, sending);
                self.conversations[idx] = conversation;
            }
            None => self.conversations.insert(0, conversation),
        }
    }

    /// Swaps in a freshly loaded list, carrying over the pending user messages of
    /// conversations that still have a send outstanding.
    fn replace_all(&mut self, mut conversations: Vec<Conversation>, sending: &HashSet<String>) {
        for fresh in conversations.iter_mut().filter(|c| sending.contains(&c.id)) {
            if let Some(idx) = self.position(&fresh.id) {
                keep_in_flight(&self.conversations[idx], fresh, sending);
            }
        }
        self.conversations = conversations;
    }
}

fn keep_in_flight(cached: &Conversation, fresh: &mut Conversation, sending: &HashSet<String>) {
    if !sending.contains(&fresh.id) {
        return;
    }
    let missing: Vec<Message> = cached
        .messages
        .iter()
        .filter(|m| m.status == MessageStatus::Pending)
        .filter(|m| !fresh.messages.iter().any(|f| f.id == m.id))
        .cloned()
        .collect();
    fresh.messages.extend(missing);
}

type SendingSet = std::sync::Mutex<HashSet<String>>;

fn lock_sending(sending: &SendingSet) -> MutexGuard<'_, HashSet<String>> {
    sending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a conversation as sending for as long as it lives.
struct SendingGuard<'a> {
    sending: &'a SendingSet,
    conversation_id: String,
}

impl<'a> SendingGuard<'a> {
    fn acquire(sending: &'a SendingSet, conversation_id: &str) -> Option<Self> {
        if !lock_sending(sending).insert(conversation_id.to_string()) {
            return None;
        }
        Some(Self {
            sending,
            conversation_id: conversation_id.to_string(),
        })
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        lock_sending(self.sending).remove(&self.conversation_id);
    }
}

/// Owns conversation state and mediates every conversation call to the backend.
///
/// The internal lock is never held across a backend call.
pub struct ConversationStore {
    backend: Arc<dyn ConversationService>,
    state: Mutex<StoreState>,
    /// Conversations with a chat request outstanding. Kept outside `state` so a
    /// dropped send can release its entry without awaiting.
    sending: SendingSet,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn ConversationService>) -> Self {
        Self {
            backend,
            state: Mutex::new(StoreState::default()),
            sending: SendingSet::default(),
        }
    }

    //=====================================================================================
    // Reads
    //=====================================================================================

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().await.conversations.clone()
    }

    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let state = self.state.lock().await;
        state
            .position(conversation_id)
            .map(|idx| state.conversations[idx].clone())
    }

    pub async fn current_id(&self) -> Option<String> {
        self.state.lock().await.current.clone()
    }

    pub async fn current(&self) -> Option<Conversation> {
        let state = self.state.lock().await;
        let id = state.current.as_deref()?;
        state.position(id).map(|idx| state.conversations[idx].clone())
    }

    /// Makes a cached conversation current. Returns `false` if it is unknown.
    pub async fn select(&self, conversation_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.position(conversation_id).is_some() {
            state.current = Some(conversation_id.to_string());
            true
        } else {
            false
        }
    }

    pub async fn is_sending(&self, conversation_id: &str) -> bool {
        lock_sending(&self.sending).contains(conversation_id)
    }

    /// Replaces the cached list with the backend's.
    ///
    /// Never fails: on error the current list is kept and the failure is logged.
    /// A response that arrives after a newer load has been applied is dropped.
    pub async fn load_conversations(&self) -> Vec<Conversation> {
        let generation = {
            let mut state = self.state.lock().await;
            state.load_issued += 1;
            state.load_issued
        };

        let result = self.backend.list_conversations().await;

        let mut state = self.state.lock().await;
        match result {
            Ok(conversations) if generation > state.load_applied => {
                debug!("Loaded {} conversations", conversations.len());
                state.load_applied = generation;
                let sending = lock_sending(&self.sending).clone();
                state.replace_all(conversations, &sending);
            }
            Ok(_) => {
                debug!(
                    "Discarding stale conversation list (generation {} <= {})",
                    generation, state.load_applied
                );
            }
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
            }
        }
        state.conversations.clone()
    }

    /// Fetches one conversation, refreshes its cached copy and makes it current.
    pub async fn open_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        match self.backend.get_conversation(conversation_id).await {
            Ok(conversation) => {
                let id = conversation.id.clone();
                let mut state = self.state.lock().await;
                let sending = lock_sending(&self.sending).clone();
                state.current = Some(id.clone());
                state.upsert(conversation, &sending);
                state.position(&id).map(|idx| state.conversations[idx].clone())
            }
            Err(e) => {
                warn!("Failed to open conversation {}: {}", conversation_id, e);
                None
            }
        }
    }

    //=====================================================================================
    // Writes
    //=====================================================================================

    /// Creates a conversation seeded with `document_ids` and makes it current.
    pub async fn create_conversation(
        &self,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<Conversation> {
        let conversation = self
            .backend
            .create_conversation(document_ids)
            .await
            .map_err(|e| {
                error!("Failed to create conversation: {}", e);
                e
            })?;
        info!(
            "Created conversation {} with {} documents",
            conversation.id,
            document_ids.len()
        );

        {
            let mut state = self.state.lock().await;
            state.current = Some(conversation.id.clone());
            state.upsert(conversation.clone(), &HashSet::new());
        }
        self.load_conversations().await;
        Ok(conversation)
    }

    /// Sends a chat message.
    ///
    /// The user message is appended immediately as `Pending`. When the backend
    /// answers, it is settled and exactly one more message is appended: the
    /// assistant reply, or a local error bubble if the call failed (in which case
    /// the error is also returned).
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> PortResult<Message> {
        if content.trim().is_empty() {
            return Err(PortError::Validation("Message content is empty".to_string()));
        }

        let (guard, pending_id, document_ids) = {
            let mut state = self.state.lock().await;
            let idx = state
                .position(conversation_id)
                .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))?;
            if state.conversations[idx].document_ids.is_empty() {
                return Err(PortError::Validation(
                    "Select at least one document before sending a message".to_string(),
                ));
            }
            let guard = SendingGuard::acquire(&self.sending, conversation_id).ok_or_else(|| {
                PortError::Validation("A message is already being sent in this conversation".to_string())
            })?;

            let pending = Message::pending_user(content);
            let pending_id = pending.id.clone();
            let conversation = &mut state.conversations[idx];
            conversation.messages.push(pending);
            (guard, pending_id, conversation.document_ids.clone())
        };

        let outcome = self
            .backend
            .send_message(conversation_id, content, &document_ids)
            .await;

        let (status, result) = match outcome {
            Ok(reply) => (MessageStatus::Confirmed, Ok(reply.into_message())),
            Err(e) => {
                warn!("Message to conversation {} failed: {}", conversation_id, e);
                (MessageStatus::Failed, Err(e))
            }
        };
        let appended = match &result {
            Ok(reply) => reply.clone(),
            Err(e) => Message::error(e.detail()),
        };

        let mut state = self.state.lock().await;
        drop(guard);
        match state.position(conversation_id) {
            Some(idx) => {
                let conversation = &mut state.conversations[idx];
                match conversation.messages.iter_mut().find(|m| m.id == pending_id) {
                    Some(user_message) => {
                        user_message.status = status;
                        conversation.messages.push(appended);
                    }
                    None => {
                        debug!(
                            "Conversation {} was reloaded while a message was in flight",
                            conversation_id
                        );
                    }
                }
            }
            None => {
                warn!(
                    "Conversation {} disappeared while a message was in flight",
                    conversation_id
                );
            }
        }

        result
    }

    /// Detaches a document, then reloads. The cache is not touched before the
    /// backend has accepted the new set.
    pub async fn remove_document_from_conversation(
        &self,
        conversation_id: &str,
        document_id: &str,
    ) -> PortResult<()> {
        let remaining: BTreeSet<String> = self
            .document_ids_of(conversation_id)
            .await?
            .into_iter()
            .filter(|id| id != document_id)
            .collect();
        self.push_documents(conversation_id, &remaining).await
    }

    /// Attaches a document, then reloads.
    pub async fn add_document_to_conversation(
        &self,
        conversation_id: &str,
        document_id: &str,
    ) -> PortResult<()> {
        let mut document_ids = self.document_ids_of(conversation_id).await?;
        document_ids.insert(document_id.to_string());
        self.push_documents(conversation_id, &document_ids).await
    }

    pub async fn rename_conversation(&self, conversation_id: &str, title: &str) -> PortResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PortError::Validation("Title must not be empty".to_string()));
        }
        self.backend.rename_conversation(conversation_id, title).await?;
        self.load_conversations().await;
        Ok(())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> PortResult<()> {
        self.backend.delete_conversation(conversation_id).await?;
        info!("Deleted conversation {}", conversation_id);
        {
            let mut state = self.state.lock().await;
            if state.current.as_deref() == Some(conversation_id) {
                state.current = None;
            }
        }
        self.load_conversations().await;
        Ok(())
    }

    /// Asks the backend for a standalone diagram. The message list is not touched.
    pub async fn request_diagram(&self, conversation_id: &str, query: &str) -> PortResult<DiagramReply> {
        if query.trim().is_empty() {
            return Err(PortError::Validation("Diagram request is empty".to_string()));
        }
        let document_ids = self.document_ids_of(conversation_id).await?;
        if document_ids.is_empty() {
            return Err(PortError::Validation(
                "Select at least one document before requesting a diagram".to_string(),
            ));
        }
        self.backend
            .request_mindmap(conversation_id, query, &document_ids)
            .await
    }

    async fn document_ids_of(&self, conversation_id: &str) -> PortResult<BTreeSet<String>> {
        let state = self.state.lock().await;
        state
            .position(conversation_id)
            .map(|idx| state.conversations[idx].document_ids.clone())
            .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))
    }

    async fn push_documents(
        &self,
        conversation_id: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<()> {
        self.backend
            .update_documents(conversation_id, document_ids)
            .await?;
        self.load_conversations().await;
        Ok(())
    }
}
