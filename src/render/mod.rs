/*!
 * Rendering and capture.
 *
 * A `RenderSurface` is the capture capability: it opens a session, is advanced
 * through a timeline of visual states one frame at a time, and hands back what
 * it captured when the session ends. The `RenderDriver` decides which state is
 * visible at every frame time and keeps the captured length equal to the
 * audio length.
 *
 * Surfaces:
 * - `timeline`: in-memory recorder
 * - `html`: one HTML page per distinct state, optionally rasterized to PNG
 */

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app_config::RenderConfig;
use crate::errors::RenderError;

pub mod driver;
pub mod highlight;
pub mod html;
pub mod timeline;

pub use driver::RenderDriver;
pub use highlight::HighlightTimeline;
pub use html::HtmlSnapshotSurface;
pub use timeline::TimelineSurface;

/// What is on screen at one instant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisualState {
    /// Segment text, when the segment is narrated
    pub text: Option<Arc<str>>,

    /// Byte range of `text` shown highlighted
    pub highlight: Option<Range<usize>>,

    /// Illustration shown above the text, or alone
    pub illustration: Option<PathBuf>,
}

impl VisualState {
    /// Highlighted substring, if any
    pub fn highlighted_text(&self) -> Option<&str> {
        match (&self.text, &self.highlight) {
            (Some(text), Some(range)) => text.get(range.clone()),
            _ => None,
        }
    }
}

/// Handle of an open capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Parameters of one capture session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Geometry, fonts and colours
    pub render: Arc<RenderConfig>,

    /// Directory the session may write into; owned by the segment
    pub work_dir: PathBuf,

    /// Human readable label for logs
    pub label: String,

    /// Chapter title, for surfaces that show it
    pub title: Option<String>,
}

/// A captured frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Position in the session, from 0
    pub index: u64,

    /// Timeline time the frame shows
    pub time: f64,
}

/// Consecutive identical frames
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRun {
    pub state: VisualState,

    /// Number of frames
    pub frames: u64,

    /// Still image of the state, when the surface rasterizes
    pub still: Option<PathBuf>,
}

/// What a surface hands back when a session ends
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptureOutput {
    /// Captured frames, run-length encoded
    pub runs: Vec<FrameRun>,

    /// Recorded video, when the surface produces one
    pub video: Option<PathBuf>,
}

/// Visual stream of one segment, length-corrected by the driver
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedMedia {
    pub runs: Vec<FrameRun>,
    pub video: Option<PathBuf>,
    pub fps: u32,
}

impl CapturedMedia {
    pub fn frame_count(&self) -> u64 {
        self.runs.iter().map(|run| run.frames).sum()
    }

    /// Length in seconds at `fps`
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.fps as f64
    }
}

/// Append one frame of `state` to `runs`, merging with the last run when equal
pub fn push_frame(runs: &mut Vec<FrameRun>, state: &VisualState, still: Option<PathBuf>) {
    match runs.last_mut() {
        Some(last) if last.state == *state => last.frames += 1,
        _ => runs.push(FrameRun { state: state.clone(), frames: 1, still }),
    }
}

/// Drop `frames` frames from the end of `runs`
pub fn trim_frames(runs: &mut Vec<FrameRun>, frames: u64) {
    let mut remaining = frames;
    while remaining > 0 {
        let Some(last) = runs.last_mut() else { break };
        if last.frames > remaining {
            last.frames -= remaining;
            break;
        }
        remaining -= last.frames;
        runs.pop();
    }
}

/// Frame capture capability
#[async_trait]
pub trait RenderSurface: Send + Sync + fmt::Debug {
    /// Open an exclusive capture session
    async fn begin_session(&self, config: &SessionConfig) -> Result<SessionHandle, RenderError>;

    /// Show `state` at timeline time `time` and capture one frame
    async fn advance_to(
        &self,
        handle: SessionHandle,
        time: f64,
        state: &VisualState,
    ) -> Result<Frame, RenderError>;

    /// Close the session and return everything it captured
    async fn end_session(&self, handle: SessionHandle) -> Result<CaptureOutput, RenderError>;

    /// Discard the session without collecting it; a no-op for closed handles
    fn abort_session(&self, handle: SessionHandle);
}
