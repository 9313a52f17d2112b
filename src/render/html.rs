/*!
 * HTML snapshot surface.
 *
 * Every distinct visual state of a session is written once as a standalone
 * HTML page: the text template wraps the highlighted span in
 * `<span class="highlight">`, the image template centres the illustration.
 * At session end `frames.json` maps frame ranges to pages, which is what an
 * external recorder replays. With a rasterizer configured, each page is also
 * turned into a PNG still that the ffmpeg encoder can sequence directly.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::Command;

use crate::app_config::{RasterizerConfig, RenderConfig};
use crate::errors::RenderError;
use crate::render::{
    CaptureOutput, Frame, FrameRun, RenderSurface, SessionConfig, SessionHandle, VisualState,
};

#[derive(Debug)]
struct Session {
    dir: PathBuf,
    render: Arc<RenderConfig>,
    title: Option<String>,
    pages: HashMap<VisualState, usize>,
    stills: Vec<Option<PathBuf>>,
    runs: Vec<FrameRun>,
    run_pages: Vec<usize>,
    frames: u64,
}

/// Entry of `frames.json`
#[derive(Debug, Serialize)]
struct PageRun<'a> {
    page: String,
    start_frame: u64,
    frames: u64,
    highlight: Option<&'a str>,
    still: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
struct FrameIndex<'a> {
    fps: u32,
    width: u32,
    height: u32,
    total_frames: u64,
    runs: Vec<PageRun<'a>>,
}

/// Writes one HTML page per visual state
#[derive(Debug, Clone, Default)]
pub struct HtmlSnapshotSurface {
    sessions: Arc<Mutex<HashMap<u64, Session>>>,
    next_id: Arc<AtomicU64>,
    rasterizer: Option<RasterizerConfig>,
}

impl HtmlSnapshotSurface {
    pub fn new(rasterizer: Option<RasterizerConfig>) -> Self {
        Self {
            rasterizer,
            ..Self::default()
        }
    }

    /// Sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    async fn rasterize(
        &self,
        rasterizer: &RasterizerConfig,
        html: &Path,
        render: &RenderConfig,
    ) -> Result<PathBuf, RenderError> {
        let png = html.with_extension("png");
        let args: Vec<String> = rasterizer
            .args
            .iter()
            .map(|arg| {
                arg.replace("{html}", &html.to_string_lossy())
                    .replace("{png}", &png.to_string_lossy())
                    .replace("{width}", &render.width.to_string())
                    .replace("{height}", &render.height.to_string())
            })
            .collect();

        let rasterize_future = Command::new(&rasterizer.program)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let timeout_duration = Duration::from_secs(rasterizer.timeout_secs);
        let output = tokio::select! {
            result = rasterize_future => {
                result.map_err(|e| RenderError::Surface(format!("Failed to run {}: {}", rasterizer.program, e)))?
            },
            _ = tokio::time::sleep(timeout_duration) => {
                return Err(RenderError::Surface(format!("{} timed out after {}s", rasterizer.program, rasterizer.timeout_secs)));
            }
        };

        if !output.status.success() || !png.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Rasterizing {} failed: {}", html.display(), stderr.trim());
            return Err(RenderError::Surface(format!(
                "{} failed on {}: {}",
                rasterizer.program,
                html.display(),
                stderr.trim()
            )));
        }
        Ok(png)
    }
}

#[async_trait]
impl RenderSurface for HtmlSnapshotSurface {
    async fn begin_session(&self, config: &SessionConfig) -> Result<SessionHandle, RenderError> {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().insert(
            id,
            Session {
                dir: config.work_dir.clone(),
                render: config.render.clone(),
                title: config.title.clone(),
                pages: HashMap::new(),
                stills: Vec::new(),
                runs: Vec::new(),
                run_pages: Vec::new(),
                frames: 0,
            },
        );
        debug!("Opened HTML session {} in {}", id, config.work_dir.display());
        Ok(SessionHandle(id))
    }

    async fn advance_to(
        &self,
        handle: SessionHandle,
        time: f64,
        state: &VisualState,
    ) -> Result<Frame, RenderError> {
        let new_page = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(&handle.0)
                .ok_or_else(|| RenderError::UnknownSession(handle.to_string()))?;
            if session.pages.contains_key(state) {
                None
            } else {
                let page = session.pages.len();
                session.pages.insert(state.clone(), page);
                session.stills.push(None);
                let html = render_page(state, &session.render, session.title.as_deref());
                Some((page, session.dir.join(page_name(page)), html, session.render.clone()))
            }
        };

        if let Some((page, path, html, render)) = new_page {
            tokio::fs::write(&path, html).await?;
            if let Some(rasterizer) = &self.rasterizer {
                let still = self.rasterize(rasterizer, &path, &render).await?;
                let mut sessions = self.sessions.lock();
                if let Some(session) = sessions.get_mut(&handle.0) {
                    session.stills[page] = Some(still);
                }
            }
        }

        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&handle.0)
            .ok_or_else(|| RenderError::UnknownSession(handle.to_string()))?;
        let page = session.pages[state];
        match session.runs.last_mut() {
            Some(last) if last.state == *state => last.frames += 1,
            _ => {
                session.runs.push(FrameRun {
                    state: state.clone(),
                    frames: 1,
                    still: session.stills[page].clone(),
                });
                session.run_pages.push(page);
            }
        }
        let index = session.frames;
        session.frames += 1;
        Ok(Frame { index, time })
    }

    async fn end_session(&self, handle: SessionHandle) -> Result<CaptureOutput, RenderError> {
        let session = self
            .sessions
            .lock()
            .remove(&handle.0)
            .ok_or_else(|| RenderError::UnknownSession(handle.to_string()))?;

        let mut start_frame = 0;
        let runs = session
            .runs
            .iter()
            .zip(&session.run_pages)
            .map(|(run, page)| {
                let entry = PageRun {
                    page: page_name(*page),
                    start_frame,
                    frames: run.frames,
                    highlight: run.state.highlighted_text(),
                    still: run.still.as_deref(),
                };
                start_frame += run.frames;
                entry
            })
            .collect();
        let index = FrameIndex {
            fps: session.render.fps,
            width: session.render.width,
            height: session.render.height,
            total_frames: session.frames,
            runs,
        };
        let json = serde_json::to_string_pretty(&index)
            .map_err(|e| RenderError::Surface(format!("Failed to serialize frame index: {}", e)))?;
        tokio::fs::write(session.dir.join("frames.json"), json).await?;

        debug!("Closed HTML session {}: {} pages, {} frames", handle, session.pages.len(), session.frames);
        Ok(CaptureOutput { runs: session.runs, video: None })
    }

    fn abort_session(&self, handle: SessionHandle) {
        if let Some(session) = self.sessions.lock().remove(&handle.0) {
            debug!("Aborted HTML session {} after {} frames", handle, session.frames);
        }
    }
}

fn page_name(page: usize) -> String {
    format!("page_{:04}.html", page)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Segment text with the highlighted span wrapped
fn highlighted_markup(state: &VisualState) -> String {
    let Some(text) = state.text.as_deref() else {
        return String::new();
    };
    match state.highlight.clone().filter(|r| text.get(r.clone()).is_some()) {
        Some(range) => format!(
            "{}<span class=\"highlight\">{}</span>{}",
            escape_html(&text[..range.start]),
            escape_html(&text[range.clone()]),
            escape_html(&text[range.end..])
        ),
        None => escape_html(text),
    }
}

/// Full HTML page for `state`
fn render_page(state: &VisualState, render: &RenderConfig, title: Option<&str>) -> String {
    let heading = match title {
        Some(title) if render.show_chapter_title => {
            format!("<h1 class=\"chapter-title\">{}</h1>\n", escape_html(title))
        }
        _ => String::new(),
    };
    let image = match &state.illustration {
        Some(path) => format!(
            "<div class=\"image-container\"><img src=\"{}\" alt=\"Book Illustration\"></div>\n",
            escape_html(&path.to_string_lossy())
        ),
        None => String::new(),
    };
    let content = if state.text.is_some() {
        format!("<div class=\"content\">{}</div>\n", highlighted_markup(state))
    } else {
        String::new()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
<meta charset="UTF-8">
<style>
body {{ margin: 0; padding: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; background-color: {background}; font-family: {font}; color: {color}; overflow: hidden; }}
.container {{ width: {width}px; height: {height}px; padding: 50px; box-sizing: border-box; display: flex; flex-direction: column; justify-content: center; align-items: center; }}
.content {{ font-size: {font_size}px; line-height: {line_height}; text-align: justify; white-space: pre-line; }}
.highlight {{ background-color: {highlight}; padding: 0 2px; border-radius: 2px; }}
.chapter-title {{ font-size: 24px; font-weight: bold; margin-bottom: 30px; text-align: center; }}
.image-container {{ max-width: 90%; max-height: 80vh; text-align: center; }}
img {{ max-width: 100%; max-height: 100%; object-fit: contain; }}
</style>
</head>
<body>
<div class="container">
{heading}{image}{content}</div>
</body>
</html>
"#,
        background = render.background_color,
        font = render.font_family,
        color = render.text_color,
        width = render.width,
        height = render.height,
        font_size = render.font_size,
        line_height = render.line_height,
        highlight = render.highlight_color,
    )
}
