//! services/client/src/adapters/http.rs
//!
//! This module contains the REST adapter, the concrete implementation of the
//! `DocumentService` and `ConversationService` ports. It talks to the DocuMind
//! backend over HTTP using `reqwest`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use documind_core::domain::{
    ChatReply, Conversation, DiagramReply, Document, DocumentSize, Message, Role,
};
use documind_core::ports::{ConversationService, DocumentService, PortError, PortResult};
use crate::config::ConfigError;
use crate::error::ClientError;
use reqwest::{multipart, Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A REST adapter that implements the backend ports.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Creates a new `HttpBackend`. Every request shares the same timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let invalid = |reason: String| {
            ClientError::Config(ConfigError::InvalidValue("DOCUMIND_API_URL".to_string(), reason))
        };
        let base_url = Url::parse(base_url).map_err(|e| invalid(format!("'{}' is not a URL: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid(format!("'{}' cannot carry a path", base_url)));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Appends `segments` to the base path. Each segment is percent-encoded, so
    /// an id can never step into another route.
    fn url(&self, segments: &[&str]) -> PortResult<Url> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(PortError::Validation(format!("\"{}\" is not a valid id", bad)));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PortError::Unexpected(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

//=========================================================================================
// Wire Structs
//=========================================================================================

#[derive(Serialize)]
struct DocumentIdsBody<'a> {
    document_ids: &'a BTreeSet<String>,
}

#[derive(Serialize)]
struct TitleBody<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    document_ids: &'a BTreeSet<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeDto {
    Bytes(u64),
    Label(String),
}

#[derive(Deserialize)]
struct DocumentDto {
    #[serde(alias = "document_id", alias = "doc_id")]
    id: String,
    #[serde(alias = "filename", alias = "file_name")]
    name: String,
    #[serde(default)]
    size: Option<SizeDto>,
}
impl DocumentDto {
    fn to_domain(self) -> Document {
        let size = match self.size {
            Some(SizeDto::Bytes(bytes)) => DocumentSize::Bytes(bytes),
            Some(SizeDto::Label(label)) => DocumentSize::Label(label),
            None => DocumentSize::Label("unknown size".to_string()),
        };
        Document {
            id: self.id,
            name: self.name,
            size,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UploadDto {
    Wrapped { document: DocumentDto },
    Bare(DocumentDto),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentListDto {
    Bare(Vec<DocumentDto>),
    Wrapped { documents: Vec<DocumentDto> },
}

#[derive(Deserialize)]
struct MessageDto {
    #[serde(default)]
    id: Option<String>,
    role: String,
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    has_mindmap: bool,
    #[serde(default)]
    mermaid_code: Option<String>,
    #[serde(default)]
    sources: Vec<Value>,
}
impl MessageDto {
    fn to_domain(self) -> Message {
        let role = if self.role.eq_ignore_ascii_case("user") {
            Role::User
        } else {
            Role::Assistant
        };
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let timestamp = parse_timestamp(self.timestamp.as_deref());
        let diagram = if self.has_mindmap { self.mermaid_code } else { None };
        Message::confirmed(id, role, self.content, timestamp)
            .with_diagram(diagram)
            .with_sources(source_names(self.sources))
    }
}

#[derive(Deserialize)]
struct ConversationDto {
    #[serde(alias = "conversation_id")]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    document_ids: Vec<String>,
    #[serde(default)]
    messages: Vec<MessageDto>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}
impl ConversationDto {
    fn to_domain(self) -> Conversation {
        let updated_at = self
            .updated_at
            .or(self.created_at)
            .and_then(|ts| parse_timestamp_strict(&ts));
        Conversation {
            id: self.id,
            title: self.title,
            document_ids: self.document_ids.into_iter().collect(),
            messages: self.messages.into_iter().map(MessageDto::to_domain).collect(),
            updated_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConversationListDto {
    Bare(Vec<ConversationDto>),
    Wrapped { conversations: Vec<ConversationDto> },
}

#[derive(Deserialize)]
struct ChatReplyDto {
    response: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    has_mindmap: bool,
    #[serde(default)]
    mermaid_code: Option<String>,
    #[serde(default)]
    sources: Vec<Value>,
}
impl ChatReplyDto {
    fn to_domain(self) -> ChatReply {
        ChatReply {
            response: self.response,
            timestamp: parse_timestamp(self.timestamp.as_deref()),
            has_mindmap: self.has_mindmap,
            mermaid_code: self.mermaid_code,
            sources: source_names(self.sources),
        }
    }
}

#[derive(Deserialize)]
struct MindmapDto {
    #[serde(default, alias = "response")]
    explanation: Option<String>,
    #[serde(default)]
    mermaid_code: Option<String>,
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Accepts RFC 3339 and the naive ISO-8601 form the backend emits.
fn parse_timestamp_strict(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|ts| ts.and_utc())
        })
}

/// Missing or unreadable timestamps fall back to the local clock.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(parse_timestamp_strict).unwrap_or_else(Utc::now)
}

fn source_names(sources: Vec<Value>) -> Vec<String> {
    sources
        .into_iter()
        .map(|source| match source {
            Value::String(name) => name,
            other => other
                .get("file_name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        })
        .collect()
}

/// Pulls a readable message out of an error body (FastAPI puts it in `detail`).
fn error_detail(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        match json.get("detail") {
            Some(Value::String(detail)) => return detail.clone(),
            Some(Value::Array(items)) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                if !messages.is_empty() {
                    return messages.join("; ");
                }
            }
            Some(other) => return other.to_string(),
            None => {}
        }
    }
    let body = body.trim();
    if body.is_empty() {
        format!("request failed with status {}", status)
    } else {
        body.chars().take(300).collect()
    }
}

fn transport_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Network(format!("request timed out: {}", e))
    } else if e.is_decode() {
        PortError::Unexpected(format!("malformed response body: {}", e))
    } else {
        PortError::Network(e.to_string())
    }
}

async fn check(response: Response) -> PortResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PortError::Backend {
        status: status.as_u16(),
        detail: error_detail(status.as_u16(), &body),
    })
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> PortResult<T> {
    check(response).await?.json::<T>().await.map_err(transport_error)
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

//=========================================================================================
// Port Trait Implementations
//=========================================================================================

#[async_trait]
impl DocumentService for HttpBackend {
    async fn upload_document(&self, file_name: &str, data: Bytes) -> PortResult<Document> {
        debug!("POST /documents/upload ({} bytes)", data.len());
        let part = multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_for(file_name))
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(&["documents", "upload"])?)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let document = match read_json::<UploadDto>(response).await? {
            UploadDto::Wrapped { document } | UploadDto::Bare(document) => document,
        };
        Ok(document.to_domain())
    }

    async fn list_documents(&self) -> PortResult<Vec<Document>> {
        let response = self
            .client
            .get(self.url(&["documents"])?)
            .send()
            .await
            .map_err(transport_error)?;
        let documents = match read_json::<DocumentListDto>(response).await? {
            DocumentListDto::Bare(docs) | DocumentListDto::Wrapped { documents: docs } => docs,
        };
        Ok(documents.into_iter().map(DocumentDto::to_domain).collect())
    }

    async fn delete_document(&self, document_id: &str) -> PortResult<()> {
        let response = self
            .client
            .delete(self.url(&["documents", document_id])?)
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationService for HttpBackend {
    async fn create_conversation(&self, document_ids: &BTreeSet<String>) -> PortResult<Conversation> {
        let response = self
            .client
            .post(self.url(&["conversations"])?)
            .json(&DocumentIdsBody { document_ids })
            .send()
            .await
            .map_err(transport_error)?;
        let mut conversation = read_json::<ConversationDto>(response).await?.to_domain();
        if conversation.document_ids.is_empty() {
            conversation.document_ids = document_ids.clone();
        }
        Ok(conversation)
    }

    async fn list_conversations(&self) -> PortResult<Vec<Conversation>> {
        let response = self
            .client
            .get(self.url(&["conversations"])?)
            .send()
            .await
            .map_err(transport_error)?;
        let conversations = match read_json::<ConversationListDto>(response).await? {
            ConversationListDto::Bare(list) | ConversationListDto::Wrapped { conversations: list } => list,
        };
        Ok(conversations.into_iter().map(ConversationDto::to_domain).collect())
    }

    async fn get_conversation(&self, conversation_id: &str) -> PortResult<Conversation> {
        let response = self
            .client
            .get(self.url(&["conversations", conversation_id])?)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(read_json::<ConversationDto>(response).await?.to_domain())
    }

    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> PortResult<()> {
        let response = self
            .client
            .put(self.url(&["conversations", conversation_id, "title"])?)
            .json(&TitleBody { title })
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    async fn update_documents(
        &self,
        conversation_id: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<()> {
        let response = self
            .client
            .put(self.url(&["conversations", conversation_id, "documents"])?)
            .json(&DocumentIdsBody { document_ids })
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> PortResult<()> {
        let response = self
            .client
            .delete(self.url(&["conversations", conversation_id])?)
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        query: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<ChatReply> {
        debug!(
            "POST /conversations/{}/messages with {} documents",
            conversation_id,
            document_ids.len()
        );
        let response = self
            .client
            .post(self.url(&["conversations", conversation_id, "messages"])?)
            .json(&QueryBody { query, document_ids })
            .send()
            .await
            .map_err(transport_error)?;
        Ok(read_json::<ChatReplyDto>(response).await?.to_domain())
    }

    async fn request_mindmap(
        &self,
        conversation_id: &str,
        query: &str,
        document_ids: &BTreeSet<String>,
    ) -> PortResult<DiagramReply> {
        let response = self
            .client
            .post(self.url(&["conversations", conversation_id, "mindmap"])?)
            .json(&QueryBody { query, document_ids })
            .send()
            .await
            .map_err(transport_error)?;
        let reply = read_json::<MindmapDto>(response).await?;
        Ok(DiagramReply {
            explanation: reply.explanation,
            mermaid_code: reply.mermaid_code.filter(|code| !code.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves a single canned HTTP response and hands back the request head.
    async fn serve_once(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}/api", addr), handle)
    }

    #[test]
    fn conversation_dto_maps_backend_fields() {
        let json = r#"{
            "conversation_id": "c1",
            "title": "Contracts",
            "document_ids": ["d2", "d1"],
            "created_at": "2024-05-01T09:30:00.123456",
            "messages": [
                {"role": "user", "content": "Summarize", "timestamp": "2024-05-01T09:31:00"},
                {"role": "assistant", "content": "Here it is", "timestamp": "2024-05-01T09:31:05Z",
                 "has_mindmap": true, "mermaid_code": "graph TD\nA-->B", "sources": ["a.pdf", {"file_name": "b.pdf"}]}
            ]
        }"#;
        let conversation = serde_json::from_str::<ConversationDto>(json).unwrap().to_domain();

        assert_eq!(conversation.id, "c1");
        assert_eq!(conversation.display_title(), "Contracts");
        assert_eq!(conversation.document_ids.iter().collect::<Vec<_>>(), vec!["d1", "d2"]);
        assert_eq!(conversation.updated_at.unwrap().minute(), 30);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[0].display_time(), "09:31");
        let reply = &conversation.messages[1];
        assert!(reply.has_mind_map());
        assert_eq!(reply.sources, vec!["a.pdf".to_string(), "b.pdf".to_string()]);
    }

    #[test]
    fn chat_reply_without_timestamp_uses_local_clock() {
        let before = Utc::now();
        let reply = serde_json::from_str::<ChatReplyDto>(
            r#"{"response": "ok", "has_mindmap": false, "mermaid_code": null, "sources": []}"#,
        )
        .unwrap()
        .to_domain();
        assert!(reply.timestamp >= before);
        assert!(!reply.has_mindmap);
    }

    #[test]
    fn document_sizes_accept_numbers_and_labels() {
        let docs = serde_json::from_str::<DocumentListDto>(
            r#"{"documents": [{"id": "d1", "filename": "a.pdf", "size": 2048},
                              {"document_id": "d2", "name": "b.txt", "size": "3 KB"},
                              {"id": "d3", "name": "c.docx"}]}"#,
        )
        .unwrap();
        let docs: Vec<Document> = match docs {
            DocumentListDto::Bare(d) | DocumentListDto::Wrapped { documents: d } => {
                d.into_iter().map(DocumentDto::to_domain).collect()
            }
        };
        assert_eq!(docs[0].size, DocumentSize::Bytes(2048));
        assert_eq!(docs[1].size, DocumentSize::Label("3 KB".into()));
        assert_eq!(docs[2].size.to_string(), "unknown size");
    }

    #[test]
    fn error_detail_prefers_fastapi_detail() {
        assert_eq!(error_detail(404, r#"{"detail": "Conversation not found"}"#), "Conversation not found");
        assert_eq!(
            error_detail(422, r#"{"detail": [{"msg": "field required"}, {"msg": "value is not a list"}]}"#),
            "field required; value is not a list"
        );
        assert_eq!(error_detail(502, "Bad Gateway"), "Bad Gateway");
        assert_eq!(error_detail(500, ""), "request failed with status 500");
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_for("report.PDF"), "application/pdf");
        assert_eq!(mime_for("notes.txt"), "text/plain");
        assert_eq!(mime_for("blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn lists_conversations_over_http() {
        let (base, server) = serve_once(
            "200 OK",
            r#"[{"id": "c1", "document_ids": ["d1"], "messages": []}]"#,
        )
        .await;
        let backend = HttpBackend::new(&base, Duration::from_secs(5)).unwrap();

        let conversations = backend.list_conversations().await.unwrap();

        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, "c1");
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/conversations HTTP/1.1"));
    }

    #[tokio::test]
    async fn non_success_status_becomes_backend_error() {
        let (base, server) = serve_once("404 Not Found", r#"{"detail": "Conversation not found"}"#).await;
        let backend = HttpBackend::new(&base, Duration::from_secs(5)).unwrap();

        let err = backend.get_conversation("missing").await.unwrap_err();

        assert_eq!(
            err,
            PortError::Backend {
                status: 404,
                detail: "Conversation not found".to_string()
            }
        );
        assert!(server.await.unwrap().starts_with("GET /api/conversations/missing "));
    }

    #[tokio::test]
    async fn ids_are_escaped_into_a_single_path_segment() {
        let (base, server) = serve_once("200 OK", "{}").await;
        let backend = HttpBackend::new(&base, Duration::from_secs(5)).unwrap();

        backend.delete_conversation("../documents/d1").await.unwrap();

        let request = server.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("DELETE /api/conversations/"), "{}", request_line);
        assert!(!request_line.contains("/api/documents"), "{}", request_line);
        assert!(request_line.contains("%2F"), "{}", request_line);
    }

    #[tokio::test]
    async fn query_and_fragment_characters_stay_in_the_id() {
        let (base, server) = serve_once("404 Not Found", r#"{"detail": "Conversation not found"}"#).await;
        let backend = HttpBackend::new(&(base + "/"), Duration::from_secs(5)).unwrap();

        let _ = backend.get_conversation("c1?x=1#top").await;

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/conversations/c1%3Fx=1%23top "), "{}", request);
    }

    #[tokio::test]
    async fn dot_segments_are_rejected_before_any_request() {
        let backend = HttpBackend::new("http://127.0.0.1:9/api", Duration::from_secs(5)).unwrap();

        for id in ["..", ".", ""] {
            assert!(matches!(
                backend.delete_conversation(id).await,
                Err(PortError::Validation(_))
            ));
        }
    }

    #[test]
    fn base_url_must_be_absolute() {
        assert!(matches!(
            HttpBackend::new("localhost:8000/api", Duration::from_secs(5)),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            HttpBackend::new("/api", Duration::from_secs(5)),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend = HttpBackend::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();

        let err = backend.list_documents().await.unwrap_err();

        assert!(matches!(err, PortError::Network(_)));
    }
}
