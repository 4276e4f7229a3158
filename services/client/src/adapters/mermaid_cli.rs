//! services/client/src/adapters/mermaid_cli.rs
//!
//! Implements the `DiagramRenderer` port by shelling out to the mermaid-cli
//! (`mmdc`) executable. The mermaid configuration is written once, when the
//! renderer is initialized, and shared by every render.

use async_trait::async_trait;
use documind_core::diagram::RendererConfig;
use documind_core::ports::{DiagramRenderer, PortError, PortResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowchartSettings<'a> {
    curve: &'a str,
    use_max_width: bool,
    html_labels: bool,
}

/// The JSON file handed to `mmdc -c`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MermaidConfigFile<'a> {
    start_on_load: bool,
    theme: &'a str,
    security_level: &'a str,
    font_family: &'a str,
    flowchart: FlowchartSettings<'a>,
}

impl<'a> From<&'a RendererConfig> for MermaidConfigFile<'a> {
    fn from(config: &'a RendererConfig) -> Self {
        Self {
            start_on_load: false,
            theme: &config.theme,
            security_level: &config.security_level,
            font_family: &config.font_family,
            flowchart: FlowchartSettings {
                curve: &config.flowchart_curve,
                use_max_width: config.use_max_width,
                html_labels: true,
            },
        }
    }
}

pub struct MermaidCliRenderer {
    mmdc_path: PathBuf,
    work_dir: PathBuf,
    config_file: PathBuf,
    timeout: Duration,
}

impl MermaidCliRenderer {
    /// Writes the mermaid configuration into `work_dir` and returns a renderer
    /// bound to it. Call once at startup and share the result.
    pub async fn initialize(
        mmdc_path: PathBuf,
        work_dir: PathBuf,
        config: &RendererConfig,
        timeout: Duration,
    ) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&work_dir).await?;
        let config_file = work_dir.join("mermaid-config.json");
        let json = serde_json::to_vec_pretty(&MermaidConfigFile::from(config))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&config_file, json).await?;
        info!(
            "Mermaid renderer initialized (theme: {}, security level: {})",
            config.theme, config.security_level
        );
        Ok(Self {
            mmdc_path,
            work_dir,
            config_file,
            timeout,
        })
    }

    async fn run_mmdc(&self, input: &Path, output: &Path) -> PortResult<()> {
        let mut command = Command::new(&self.mmdc_path);
        command
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-c")
            .arg(&self.config_file)
            .arg("-b")
            .arg("transparent")
            .arg("-q")
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| PortError::Render(format!("mmdc did not finish within {:?}", self.timeout)))?
            .map_err(|e| {
                PortError::Render(format!(
                    "failed to start {}: {}",
                    self.mmdc_path.display(),
                    e
                ))
            })?;

        if result.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let message = stderr
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .take(4)
                .collect::<Vec<_>>()
                .join(" ");
            Err(PortError::Render(if message.is_empty() {
                format!("mmdc exited with {}", result.status)
            } else {
                message
            }))
        }
    }
}

#[async_trait]
impl DiagramRenderer for MermaidCliRenderer {
    async fn render(&self, render_id: &str, source: &str) -> PortResult<String> {
        let input = self.work_dir.join(format!("{}.mmd", render_id));
        let output = self.work_dir.join(format!("{}.svg", render_id));
        tokio::fs::write(&input, source)
            .await
            .map_err(|e| PortError::Unexpected(format!("cannot write {}: {}", input.display(), e)))?;

        debug!("Running mmdc for {}", render_id);
        let outcome = match self.run_mmdc(&input, &output).await {
            Ok(()) => tokio::fs::read_to_string(&output)
                .await
                .map_err(|e| PortError::Render(format!("mmdc produced no output: {}", e))),
            Err(e) => Err(e),
        };

        let _ = tokio::fs::remove_file(&input).await;
        let _ = tokio::fs::remove_file(&output).await;
        outcome
    }
}
