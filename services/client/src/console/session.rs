//! services/client/src/console/session.rs
//!
//! Executes console commands against the stores and formats the results.

use crate::console::command::{Command, HELP};
use bytes::Bytes;
use documind_core::diagram::{DiagramContainer, DiagramView, RenderStatus};
use documind_core::domain::{Conversation, Message, MessageStatus, Role};
use documind_core::library::{DocumentLibrary, UploadPolicy};
use documind_core::ports::{PortError, PortResult};
use documind_core::store::ConversationStore;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// What the input loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct ConsoleSession {
    conversations: Arc<ConversationStore>,
    library: Arc<DocumentLibrary>,
    diagrams: DiagramView,
    output_dir: PathBuf,
}

impl ConsoleSession {
    pub fn new(
        conversations: Arc<ConversationStore>,
        library: Arc<DocumentLibrary>,
        diagrams: DiagramView,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            conversations,
            library,
            diagrams,
            output_dir,
        }
    }

    /// Loads documents and conversations and opens the most recent conversation.
    pub async fn start(&self) -> String {
        let documents = self.library.refresh().await;
        let conversations = self.conversations.load_conversations().await;
        if let Some(latest) = conversations.first() {
            self.conversations.select(&latest.id).await;
        }
        format!(
            "{} documents, {} conversations. Type /help for commands.",
            documents.len(),
            conversations.len()
        )
    }

    /// Runs one command. Failures are reported in the returned text; nothing
    /// here ends the session except `/quit`.
    pub async fn handle(&self, command: Command) -> (Flow, String) {
        let mut out = String::new();
        if let Command::Quit = command {
            return (Flow::Quit, out);
        }
        if let Err(e) = self.dispatch(command, &mut out).await {
            error!("Command failed: {}", e);
            let _ = writeln!(out, "! {}", e);
        }
        (Flow::Continue, out)
    }

    async fn dispatch(&self, command: Command, out: &mut String) -> PortResult<()> {
        match command {
            Command::Help => {
                let _ = writeln!(out, "{}", HELP);
            }
            Command::Quit => {}
            Command::Documents => {
                let documents = self.library.refresh().await;
                if documents.is_empty() {
                    let _ = writeln!(out, "No documents uploaded yet.");
                }
                for doc in documents {
                    let _ = writeln!(out, "  {}  {} ({})", doc.id, doc.name, doc.size);
                }
            }
            Command::Upload { path } => {
                let (file_name, data) = read_upload(Path::new(&path), self.library.policy()).await?;
                let doc = self.library.upload(&file_name, data).await?;
                let _ = writeln!(out, "Uploaded {} as {}", doc.name, doc.id);
            }
            Command::DeleteDocument { document_id } => {
                self.library.delete(&document_id).await?;
                let _ = writeln!(out, "Deleted document {}", document_id);
            }
            Command::NewConversation { document_ids } => {
                let ids: BTreeSet<String> = if document_ids.is_empty() {
                    self.library.ids().await
                } else {
                    document_ids.into_iter().collect()
                };
                let conversation = self.conversations.create_conversation(&ids).await?;
                let _ = writeln!(
                    out,
                    "Started conversation {} with {} documents",
                    conversation.id,
                    conversation.document_ids.len()
                );
            }
            Command::Conversations => {
                let current = self.conversations.current_id().await;
                let list = self.conversations.load_conversations().await;
                if list.is_empty() {
                    let _ = writeln!(out, "No conversations yet. Use /new to start one.");
                }
                for conversation in list {
                    let marker = if current.as_deref() == Some(conversation.id.as_str()) { "*" } else { " " };
                    let _ = writeln!(
                        out,
                        "{} {}  {} ({} messages, {} documents)",
                        marker,
                        conversation.id,
                        conversation.display_title(),
                        conversation.messages.len(),
                        conversation.document_ids.len()
                    );
                }
            }
            Command::Open { conversation_id } => {
                let conversation = self
                    .conversations
                    .open_conversation(&conversation_id)
                    .await
                    .ok_or_else(|| PortError::NotFound(format!("conversation {}", conversation_id)))?;
                self.write_transcript(&conversation, out).await;
            }
            Command::Rename { title } => {
                let id = self.current_id().await?;
                self.conversations.rename_conversation(&id, &title).await?;
                let _ = writeln!(out, "Renamed to \"{}\"", title);
            }
            Command::Delete { conversation_id } => {
                let id = match conversation_id {
                    Some(id) => id,
                    None => self.current_id().await?,
                };
                self.conversations.delete_conversation(&id).await?;
                let _ = writeln!(out, "Deleted conversation {}", id);
            }
            Command::Attach { document_id } => {
                let id = self.current_id().await?;
                self.conversations
                    .add_document_to_conversation(&id, &document_id)
                    .await?;
                self.write_documents(&id, out).await;
            }
            Command::Detach { document_id } => {
                let id = self.current_id().await?;
                self.conversations
                    .remove_document_from_conversation(&id, &document_id)
                    .await?;
                self.write_documents(&id, out).await;
            }
            Command::Diagram { query } => {
                let id = self.current_id().await?;
                let reply = self.conversations.request_diagram(&id, &query).await?;
                if let Some(explanation) = &reply.explanation {
                    let _ = writeln!(out, "{}", explanation);
                }
                match reply.mermaid_code {
                    Some(code) => self.render_to_file(&code, out).await?,
                    None => {
                        let _ = writeln!(out, "The backend did not return a diagram.");
                    }
                }
            }
            Command::Render => {
                let conversation = self
                    .conversations
                    .current()
                    .await
                    .ok_or_else(|| PortError::Validation("No conversation selected".to_string()))?;
                let code = conversation
                    .messages
                    .iter()
                    .rev()
                    .find_map(|m| m.mermaid_code())
                    .ok_or_else(|| PortError::NotFound("diagram in this conversation".to_string()))?
                    .to_string();
                self.render_to_file(&code, out).await?;
            }
            Command::Send { content } => {
                let id = self.current_id().await?;
                match self.conversations.send_message(&id, &content).await {
                    Ok(reply) => write_message(&reply, out),
                    Err(PortError::Validation(detail)) => return Err(PortError::Validation(detail)),
                    Err(e) => {
                        // The store appended an error bubble; show that instead of the raw error.
                        let bubble = self
                            .conversations
                            .conversation(&id)
                            .await
                            .and_then(|c| c.messages.last().filter(|m| m.is_error).cloned());
                        match bubble {
                            Some(bubble) => write_message(&bubble, out),
                            None => return Err(e),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn current_id(&self) -> PortResult<String> {
        self.conversations
            .current_id()
            .await
            .ok_or_else(|| PortError::Validation("No conversation selected. Use /new or /open.".to_string()))
    }

    async fn write_transcript(&self, conversation: &Conversation, out: &mut String) {
        let _ = writeln!(out, "== {} ({})", conversation.display_title(), conversation.id);
        self.write_documents(&conversation.id, out).await;
        for message in &conversation.messages {
            write_message(message, out);
        }
    }

    async fn write_documents(&self, conversation_id: &str, out: &mut String) {
        let Some(conversation) = self.conversations.conversation(conversation_id).await else {
            return;
        };
        let mut names = Vec::new();
        for id in &conversation.document_ids {
            names.push(self.library.name_of(id).await.unwrap_or_else(|| id.clone()));
        }
        if names.is_empty() {
            let _ = writeln!(out, "Documents: none (use /attach <doc id>)");
        } else {
            let _ = writeln!(out, "Documents: {}", names.join(", "));
        }
    }

    async fn render_to_file(&self, code: &str, out: &mut String) -> PortResult<()> {
        let mut container = DiagramContainer::default();
        let result = self.diagrams.render(&mut container, code).await;

        let extension = if container.status == RenderStatus::Rendered { "svg" } else { "html" };
        let file = self
            .output_dir
            .join(format!("diagram-{}.{}", chrono::Utc::now().format("%Y%m%d-%H%M%S%3f"), extension));
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        tokio::fs::write(&file, container.markup.as_bytes())
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        match result {
            Ok(_) => {
                info!("Diagram written to {}", file.display());
                let _ = writeln!(out, "Diagram written to {}", file.display());
                Ok(())
            }
            Err(e) => {
                let _ = writeln!(out, "Error panel written to {}", file.display());
                Err(e)
            }
        }
    }
}

fn write_message(message: &Message, out: &mut String) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let suffix = match message.status {
        MessageStatus::Pending => " (sending...)",
        MessageStatus::Failed if message.role == Role::User => " (not delivered)",
        _ => "",
    };
    let _ = writeln!(out, "[{}] {}: {}{}", message.display_time(), speaker, message.content, suffix);
    if message.has_mind_map() {
        let _ = writeln!(out, "    (diagram available, /render to draw it)");
    }
    if !message.sources.is_empty() {
        let _ = writeln!(out, "    sources: {}", message.sources.join(", "));
    }
}

/// Reads a file for upload. The policy is checked against the file's metadata
/// first so an oversized file is never loaded.
async fn read_upload(path: &Path, policy: &UploadPolicy) -> PortResult<(String, Bytes)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PortError::Validation(format!("{} is not a file path", path.display())))?
        .to_string();
    let unreadable = |e: std::io::Error| PortError::Validation(format!("cannot read {}: {}", path.display(), e));

    let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
    if !metadata.is_file() {
        return Err(PortError::Validation(format!("{} is not a file", path.display())));
    }
    policy.check(&file_name, metadata.len())?;

    let data = tokio::fs::read(path).await.map_err(unreadable)?;
    Ok((file_name, Bytes::from(data)))
}
