//! In-memory render surface.
//!
//! Records every frame it is advanced through as run-length encoded visual
//! states. It is the surface behind the JSON manifest encoder, and its knobs
//! let tests simulate a renderer that fails or finishes early or late.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;

use crate::errors::RenderError;
use crate::render::{
    push_frame, trim_frames, CaptureOutput, Frame, FrameRun, RenderSurface, SessionConfig, SessionHandle,
    VisualState,
};

#[derive(Debug, Default)]
struct Session {
    runs: Vec<FrameRun>,
    frames: u64,
}

/// Records frames in memory
#[derive(Debug, Clone, Default)]
pub struct TimelineSurface {
    sessions: Arc<Mutex<HashMap<u64, Session>>>,
    next_id: Arc<AtomicU64>,
    opened: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
    /// Frames added (positive) or dropped (negative) at session end
    frame_skew: i64,
    /// Number of sessions, in opening order, the skew applies to
    skewed_sessions: usize,
    /// Number of sessions, in opening order, that fail to open
    failing_sessions: usize,
}

impl TimelineSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the first `sessions` captures `skew` frames too long (or short)
    pub fn with_frame_skew(mut self, skew: i64, sessions: usize) -> Self {
        self.frame_skew = skew;
        self.skewed_sessions = sessions;
        self
    }

    /// Make the first `sessions` calls to `begin_session` fail
    pub fn with_failing_sessions(mut self, sessions: usize) -> Self {
        self.failing_sessions = sessions;
        self
    }

    /// Sessions opened so far, failed ones included
    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions currently open
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Largest number of sessions that were open at the same time
    pub fn peak_sessions(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

/// Add `skew` frames (repeating the last state) or remove `-skew` frames
fn apply_skew(runs: &mut Vec<FrameRun>, skew: i64) {
    if skew > 0 {
        if let Some(last) = runs.last_mut() {
            last.frames += skew as u64;
        }
        return;
    }
    trim_frames(runs, skew.unsigned_abs());
}

#[async_trait]
impl RenderSurface for TimelineSurface {
    async fn begin_session(&self, config: &SessionConfig) -> Result<SessionHandle, RenderError> {
        let opened = self.opened.fetch_add(1, Ordering::SeqCst);
        if opened < self.failing_sessions {
            return Err(RenderError::Surface(format!(
                "Simulated surface failure for {}",
                config.label
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().insert(id, Session::default());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        trace!("Opened timeline session {} for {}", id, config.label);
        Ok(SessionHandle(id))
    }

    async fn advance_to(
        &self,
        handle: SessionHandle,
        time: f64,
        state: &VisualState,
    ) -> Result<Frame, RenderError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&handle.0)
            .ok_or_else(|| RenderError::UnknownSession(handle.to_string()))?;

        push_frame(&mut session.runs, state, None);
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
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut runs = session.runs;
        if (handle.0 as usize) < self.skewed_sessions {
            apply_skew(&mut runs, self.frame_skew);
        }
        Ok(CaptureOutput { runs, video: None })
    }

    fn abort_session(&self, handle: SessionHandle) {
        if self.sessions.lock().remove(&handle.0).is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
            trace!("Aborted timeline session {}", handle);
        }
    }
}
