pub mod http;
pub mod mermaid_cli;

pub use http::HttpBackend;
pub use mermaid_cli::MermaidCliRenderer;
