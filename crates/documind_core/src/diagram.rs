//! crates/documind_core/src/diagram.rs
//!
//! Turns model-generated diagram text into markup the rendering tool accepts,
//! and isolates rendering failures behind an error panel.

use crate::ports::{DiagramRenderer, PortError, PortResult};
use chrono::Utc;
use regex::{Captures, Regex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Declaration prepended when the text does not name a diagram type.
pub const DEFAULT_DIAGRAM_HEADER: &str = "graph TD";

/// Diagram-type keywords recognized at the start of the text.
const DIAGRAM_KEYWORDS: [&str; 9] = [
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "erDiagram",
    "journey",
    "gantt",
    "pie",
];

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    // An opening fence with a language hint consumes its line break; a bare
    // fence is removed on its own and its line break is left to the final trim.
    FENCE.get_or_init(|| {
        Regex::new(r"```(?:([A-Za-z][\w-]*)[ \t]*(\r?\n|$))?").expect("fence pattern is valid")
    })
}

/// Drops a fence and its language hint. A hint that is itself a diagram type
/// ("```sequenceDiagram") is part of the diagram and stays.
fn strip_fence(caps: &Captures) -> String {
    match caps.get(1) {
        Some(tag) if declares_diagram_type(tag.as_str()) => {
            format!("{}{}", tag.as_str(), caps.get(2).map_or("", |m| m.as_str()))
        }
        _ => String::new(),
    }
}

/// Normalizes raw diagram text.
///
/// Fence stripping is a plain textual substitution: a literal triple backtick
/// inside a node label is removed as well.
pub fn normalize(raw: &str) -> String {
    let stripped = fence_regex().replace_all(raw.trim(), strip_fence);
    let text = stripped.trim();

    if declares_diagram_type(text) {
        text.to_string()
    } else {
        format!("{}\n{}", DEFAULT_DIAGRAM_HEADER, text)
    }
}

fn declares_diagram_type(text: &str) -> bool {
    DIAGRAM_KEYWORDS.iter().any(|keyword| {
        text.strip_prefix(*keyword)
            .map(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
            .unwrap_or(false)
    })
}

static RENDER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh id for one render attempt, unique within the process.
pub fn next_render_id() -> String {
    let seq = RENDER_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mermaid-{}-{}", Utc::now().timestamp_millis(), seq)
}

//=========================================================================================
// Renderer configuration
//=========================================================================================

/// Process-wide settings for the rendering tool, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    pub theme: String,
    /// `strict` escapes labels and disables click handlers; `loose` allows them.
    pub security_level: String,
    pub font_family: String,
    pub flowchart_curve: String,
    pub use_max_width: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
            security_level: "strict".to_string(),
            font_family: "arial, sans-serif".to_string(),
            flowchart_curve: "basis".to_string(),
            use_max_width: true,
        }
    }
}

//=========================================================================================
// Render target
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Idle,
    Rendering,
    Rendered,
    Errored,
}

/// The slot a diagram is drawn into.
#[derive(Debug, Clone)]
pub struct DiagramContainer {
    pub status: RenderStatus,
    pub markup: String,
}

impl Default for DiagramContainer {
    fn default() -> Self {
        Self {
            status: RenderStatus::Idle,
            markup: String::new(),
        }
    }
}

/// Drives normalization and rendering for diagram containers.
#[derive(Clone)]
pub struct DiagramView {
    renderer: Arc<dyn DiagramRenderer>,
}

impl DiagramView {
    pub fn new(renderer: Arc<dyn DiagramRenderer>) -> Self {
        Self { renderer }
    }

    /// Renders `raw` into `container`.
    ///
    /// On failure the container shows an error panel with the raw input and the
    /// error is also returned, so the caller can update its own state.
    pub async fn render(&self, container: &mut DiagramContainer, raw: &str) -> PortResult<String> {
        let source = normalize(raw);
        let render_id = next_render_id();
        container.status = RenderStatus::Rendering;
        debug!(render_id = %render_id, "Rendering diagram");

        match self.renderer.render(&render_id, &source).await {
            Ok(svg) => {
                container.markup = svg.clone();
                container.status = RenderStatus::Rendered;
                Ok(svg)
            }
            Err(e) => {
                let err = match e {
                    PortError::Render(msg) => PortError::Render(msg),
                    other => PortError::Render(other.to_string()),
                };
                warn!(render_id = %render_id, "Diagram render failed: {}", err);
                container.markup = error_panel(err.detail(), raw);
                container.status = RenderStatus::Errored;
                Err(err)
            }
        }
    }
}

/// HTML shown in place of a diagram that failed to render.
pub fn error_panel(message: &str, raw: &str) -> String {
    format!(
        "<div class=\"diagram-error\">\
         <p><strong>Failed to render diagram</strong></p>\
         <p>{}</p>\
         <details><summary>Show diagram source</summary><pre>{}</pre></details>\
         </div>",
        escape_html(message),
        escape_html(raw)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn strips_fences_and_keeps_declared_type() {
        assert_eq!(normalize("```mermaid\ngraph TD\nA-->B\n```"), "graph TD\nA-->B");
    }

    #[test]
    fn prepends_default_type_when_missing() {
        assert_eq!(normalize("A-->B"), "graph TD\nA-->B");
    }

    #[test]
    fn already_normalized_text_is_unchanged() {
        for text in [
            "graph TD\nA-->B",
            "flowchart LR\nA-->B",
            "sequenceDiagram\nAlice->>Bob: hi",
            "stateDiagram-v2\n[*] --> Idle",
            "pie title Pets\n\"Dogs\" : 3",
        ] {
            assert_eq!(normalize(text), text);
            assert_eq!(normalize(&normalize(text)), text);
        }
    }

    #[test]
    fn keyword_must_end_at_word_boundary() {
        assert_eq!(normalize("graphics-->B"), "graph TD\ngraphics-->B");
    }

    #[test]
    fn fence_tagged_with_a_diagram_type_keeps_it() {
        assert_eq!(
            normalize("```sequenceDiagram\nAlice->>Bob: hi\n```"),
            "sequenceDiagram\nAlice->>Bob: hi"
        );
        assert_eq!(
            normalize("```stateDiagram-v2\n[*] --> Idle\n```"),
            "stateDiagram-v2\n[*] --> Idle"
        );
        assert_eq!(normalize("```graph TD\nA-->B\n```"), "graph TD\nA-->B");
        assert_eq!(normalize("```mermaid\nA-->B\n```"), "graph TD\nA-->B");
    }

    #[test]
    fn bare_fences_and_surrounding_whitespace_are_removed() {
        assert_eq!(normalize("  ```\nA-->B\n```  "), "graph TD\nA-->B");
    }

    #[test]
    fn render_ids_do_not_collide() {
        let ids: HashSet<String> = (0..100).map(|_| next_render_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn error_panel_escapes_raw_source() {
        let panel = error_panel("bad <syntax>", "A-->B[<b>]");
        assert!(panel.contains("<details>"));
        assert!(panel.contains("A--&gt;B[&lt;b&gt;]"));
        assert!(panel.contains("bad &lt;syntax&gt;"));
    }

    struct RecordingRenderer {
        fail: bool,
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DiagramRenderer for RecordingRenderer {
        async fn render(&self, render_id: &str, source: &str) -> PortResult<String> {
            self.seen
                .lock()
                .unwrap()
                .push((render_id.to_string(), source.to_string()));
            if self.fail {
                Err(PortError::Render("Parse error on line 2".into()))
            } else {
                Ok(format!("<svg id=\"{}\"></svg>", render_id))
            }
        }
    }

    #[tokio::test]
    async fn successful_render_fills_container() {
        let renderer = Arc::new(RecordingRenderer { fail: false, seen: Mutex::new(Vec::new()) });
        let view = DiagramView::new(renderer.clone());
        let mut container = DiagramContainer::default();

        let svg = view.render(&mut container, "A-->B").await.unwrap();

        assert_eq!(container.status, RenderStatus::Rendered);
        assert_eq!(container.markup, svg);
        let seen = renderer.seen.lock().unwrap();
        assert_eq!(seen[0].1, "graph TD\nA-->B");
        assert!(svg.contains(&seen[0].0));
    }

    #[tokio::test]
    async fn failed_render_shows_panel_and_returns_error() {
        let renderer = Arc::new(RecordingRenderer { fail: true, seen: Mutex::new(Vec::new()) });
        let view = DiagramView::new(renderer);
        let mut container = DiagramContainer::default();
        let raw = "```mermaid\nA--x\n```";

        let err = view.render(&mut container, raw).await.unwrap_err();

        assert!(matches!(err, PortError::Render(_)));
        assert_eq!(container.status, RenderStatus::Errored);
        assert!(container.markup.contains("Parse error on line 2"));
        assert!(container.markup.contains("```mermaid\nA--x\n```"));
    }
}
