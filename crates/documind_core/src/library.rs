//! crates/documind_core/src/library.rs
//!
//! The document library: the top-level list of uploaded documents that
//! conversations refer to by id.

use crate::domain::Document;
use crate::ports::{DocumentService, PortError, PortResult};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Client-side checks applied before a file is sent to the backend.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            allowed_extensions: vec!["pdf".to_string(), "docx".to_string(), "txt".to_string()],
        }
    }
}

impl UploadPolicy {
    pub fn check(&self, file_name: &str, len: u64) -> PortResult<()> {
        if len == 0 {
            return Err(PortError::Validation(format!("{} is empty", file_name)));
        }
        if len > self.max_bytes {
            return Err(PortError::Validation(format!(
                "{} is {} bytes, the limit is {} bytes",
                file_name, len, self.max_bytes
            )));
        }
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.allowed_extensions.iter().any(|a| *a == extension) {
            return Err(PortError::Validation(format!(
                "Unsupported file type for {} (allowed: {})",
                file_name,
                self.allowed_extensions.join(", ")
            )));
        }
        Ok(())
    }
}

pub struct DocumentLibrary {
    backend: Arc<dyn DocumentService>,
    policy: UploadPolicy,
    documents: Mutex<Vec<Document>>,
}

impl DocumentLibrary {
    pub fn new(backend: Arc<dyn DocumentService>, policy: UploadPolicy) -> Self {
        Self {
            backend,
            policy,
            documents: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.documents.lock().await.clone()
    }

    /// All known document ids, used to seed a new conversation.
    pub async fn ids(&self) -> BTreeSet<String> {
        self.documents
            .lock()
            .await
            .iter()
            .map(|d| d.id.clone())
            .collect()
    }

    pub async fn name_of(&self, document_id: &str) -> Option<String> {
        self.documents
            .lock()
            .await
            .iter()
            .find(|d| d.id == document_id)
            .map(|d| d.name.clone())
    }

    /// Reloads the list from the backend. Failures are logged and the current
    /// list is kept.
    pub async fn refresh(&self) -> Vec<Document> {
        match self.backend.list_documents().await {
            Ok(documents) => {
                let mut current = self.documents.lock().await;
                *current = documents;
                current.clone()
            }
            Err(e) => {
                warn!("Failed to load documents: {}", e);
                self.documents.lock().await.clone()
            }
        }
    }

    pub async fn upload(&self, file_name: &str, data: Bytes) -> PortResult<Document> {
        self.policy.check(file_name, data.len() as u64)?;
        let document = self.backend.upload_document(file_name, data).await?;
        info!("Uploaded {} as {}", document.name, document.id);
        self.refresh().await;
        Ok(document)
    }

    pub async fn delete(&self, document_id: &str) -> PortResult<()> {
        self.backend.delete_document(document_id).await?;
        info!("Deleted document {}", document_id);
        self.refresh().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{document, FakeBackend};

    #[test]
    fn policy_rejects_empty_oversized_and_unknown_files() {
        let policy = UploadPolicy {
            max_bytes: 100,
            ..UploadPolicy::default()
        };
        assert!(policy.check("notes.pdf", 0).is_err());
        assert!(policy.check("notes.pdf", 101).is_err());
        assert!(policy.check("notes.exe", 10).is_err());
        assert!(policy.check("README", 10).is_err());
        assert!(policy.check("Notes.PDF", 10).is_ok());
        assert!(policy.check("draft.docx", 100).is_ok());
    }

    #[tokio::test]
    async fn upload_refreshes_the_list() {
        let backend = Arc::new(FakeBackend::with_documents(vec![document("d1", "a.pdf")]));
        let library = DocumentLibrary::new(backend.clone(), UploadPolicy::default());
        library.refresh().await;

        let uploaded = library
            .upload("b.txt", Bytes::from_static(b"hello world"))
            .await
            .unwrap();

        assert_eq!(library.documents().await.len(), 2);
        assert!(library.ids().await.contains(&uploaded.id));
        assert_eq!(library.name_of(&uploaded.id).await.as_deref(), Some("b.txt"));
    }

    #[tokio::test]
    async fn rejected_upload_never_reaches_backend() {
        let backend = Arc::new(FakeBackend::with_documents(Vec::new()));
        let library = DocumentLibrary::new(backend.clone(), UploadPolicy::default());

        let err = library.upload("image.png", Bytes::from_static(b"png")).await.unwrap_err();

        assert!(matches!(err, PortError::Validation(_)));
        assert_eq!(backend.upload_count(), 0);
    }

    #[tokio::test]
    async fn delete_and_failed_refresh() {
        let backend = Arc::new(FakeBackend::with_documents(vec![
            document("d1", "a.pdf"),
            document("d2", "b.pdf"),
        ]));
        let library = DocumentLibrary::new(backend.clone(), UploadPolicy::default());
        library.refresh().await;

        library.delete("d1").await.unwrap();
        assert_eq!(library.ids().await, ["d2".to_string()].into_iter().collect());

        assert!(library.delete("missing").await.is_err());

        backend.fail_lists(true);
        assert_eq!(library.refresh().await.len(), 1);
    }
}
