//! services/client/src/bin/documind.rs

use client_lib::{
    adapters::{HttpBackend, MermaidCliRenderer},
    config::Config,
    console::{parse, ConsoleSession, Flow},
    error::ClientError,
};
use documind_core::{ConversationStore, DiagramView, DocumentLibrary};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Backend at {}", config.api_base_url);

    // --- 2. Initialize Service Adapters ---
    let backend = Arc::new(HttpBackend::new(&config.api_base_url, config.request_timeout)?);
    let renderer = Arc::new(
        MermaidCliRenderer::initialize(
            config.mmdc_path.clone(),
            std::env::temp_dir().join("documind-mmdc"),
            &config.renderer,
            config.request_timeout,
        )
        .await?,
    );

    // --- 3. Build the Stores ---
    let conversations = Arc::new(ConversationStore::new(backend.clone()));
    let library = Arc::new(DocumentLibrary::new(backend, config.upload_policy()));
    let session = ConsoleSession::new(
        conversations,
        library,
        DiagramView::new(renderer),
        config.diagram_output_dir.clone(),
    );

    // --- 4. Run the Console ---
    println!("{}", session.start().await);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("! {}", e);
                continue;
            }
        };
        let (flow, output) = session.handle(command).await;
        print!("{}", output);
        if flow == Flow::Quit {
            break;
        }
    }

    info!("Console closed.");
    Ok(())
}
