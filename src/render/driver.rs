/*!
 * Render driver.
 *
 * Samples the segment timeline at the video frame rate, pushes each visual
 * state through a capture session and corrects the captured length so it
 * matches the audio frame count. Capture sessions are a bounded pool shared
 * by every worker.
 */

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Semaphore;

use crate::cancel::CancellationToken;
use crate::errors::RenderError;
use crate::file_utils::SegmentScratch;
use crate::render::{
    trim_frames, CaptureOutput, CapturedMedia, FrameRun, HighlightTimeline, RenderSurface,
    SessionConfig, SessionHandle,
};
use crate::segmenter::Segment;
use crate::speech::SpeechResult;

/// Number of frames covering `duration` seconds at `fps`
pub fn frame_count_for(duration: f64, fps: u32) -> u64 {
    (duration.max(0.0) * fps as f64).round() as u64
}

/// Open capture session, aborted on drop unless it was ended
struct OpenSession<'a> {
    surface: &'a dyn RenderSurface,
    handle: Option<SessionHandle>,
}

impl<'a> OpenSession<'a> {
    fn new(surface: &'a dyn RenderSurface, handle: SessionHandle) -> Self {
        Self { surface, handle: Some(handle) }
    }

    async fn end(mut self) -> Result<CaptureOutput, RenderError> {
        let Some(handle) = self.handle else {
            return Ok(CaptureOutput::default());
        };
        let ended = self.surface.end_session(handle).await;
        self.handle = None;
        ended
    }
}

impl Drop for OpenSession<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Capture {} dropped before it ended", handle);
            self.surface.abort_session(handle);
        }
    }
}

/// Drives a render surface through segment timelines
#[derive(Debug, Clone)]
pub struct RenderDriver {
    surface: Arc<dyn RenderSurface>,
    sessions: Arc<Semaphore>,
    max_correction_frames: u32,
}

impl RenderDriver {
    pub fn new(surface: Arc<dyn RenderSurface>, capture_sessions: usize, max_correction_frames: u32) -> Self {
        Self {
            surface,
            sessions: Arc::new(Semaphore::new(capture_sessions.max(1))),
            max_correction_frames,
        }
    }

    /// Capture `segment` for the length of `speech`
    pub async fn render(
        &self,
        segment: &Segment,
        speech: &SpeechResult,
        scratch: &SegmentScratch,
        cancel: &CancellationToken,
    ) -> Result<CapturedMedia, RenderError> {
        let fps = segment.render.fps;
        let expected = frame_count_for(speech.duration, fps);
        let timeline = HighlightTimeline::for_segment(segment, &speech.marks);

        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let _permit = tokio::select! {
            permit = self.sessions.acquire() => {
                permit.map_err(|_| RenderError::Surface("capture pool closed".to_string()))?
            },
            _ = cancel.cancelled() => return Err(RenderError::Cancelled),
        };

        let config = SessionConfig {
            render: segment.render.clone(),
            work_dir: scratch.subdir("capture")?,
            label: format!("{}#{}", segment.chapter_id, segment.index),
            title: Some(segment.chapter_title.clone()),
        };
        let handle = self.surface.begin_session(&config).await?;
        let session = OpenSession::new(self.surface.as_ref(), handle);
        let driven = self.drive(handle, &timeline, expected, fps, cancel).await;
        // Ended whether or not driving succeeded; aborted if this future is dropped first
        let ended = session.end().await;

        driven?;
        let CaptureOutput { mut runs, video } = ended?;

        let captured: u64 = runs.iter().map(|run| run.frames).sum();
        if captured != expected {
            self.correct(&mut runs, captured, expected, &config.label);
        }
        debug!("Captured {} at {} frames ({:.2}s)", config.label, expected, speech.duration);

        Ok(CapturedMedia { runs, video, fps })
    }

    async fn drive(
        &self,
        handle: SessionHandle,
        timeline: &HighlightTimeline,
        frames: u64,
        fps: u32,
        cancel: &CancellationToken,
    ) -> Result<(), RenderError> {
        for index in 0..frames {
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            let time = index as f64 / fps as f64;
            let state = timeline.state_at(time);
            self.surface.advance_to(handle, time, &state).await?;
        }
        Ok(())
    }

    /// Pad by repeating the last frame, or trim from the end, when the
    /// deviation is within `max_correction_frames`
    fn correct(&self, runs: &mut Vec<FrameRun>, captured: u64, expected: u64, label: &str) {
        let deviation = captured.abs_diff(expected);
        if deviation > self.max_correction_frames as u64 {
            warn!(
                "{}: surface captured {} frames for {} expected, beyond correction limit {}",
                label, captured, expected, self.max_correction_frames
            );
            return;
        }

        if captured < expected {
            match runs.last_mut() {
                Some(last) => last.frames += deviation,
                None => return,
            }
        } else {
            trim_frames(runs, deviation);
        }
        debug!("{}: corrected capture from {} to {} frames", label, captured, expected);
    }
}
