pub mod diagram;
pub mod domain;
pub mod library;
pub mod ports;
pub mod store;

/// In-memory backends for tests, also used by downstream crates through the
/// `testing` feature.
#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use diagram::{normalize, DiagramContainer, DiagramView, RenderStatus, RendererConfig};
pub use domain::{ChatReply, Conversation, DiagramReply, Document, DocumentSize, Message, MessageStatus, Role};
pub use library::{DocumentLibrary, UploadPolicy};
pub use ports::{ConversationService, DiagramRenderer, DocumentService, PortError, PortResult};
pub use store::ConversationStore;
