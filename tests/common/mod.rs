/*!
 * Common test utilities for the bookcast test suite
 */

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use bookcast::app_config::{PipelineConfig, RenderConfig, SpeechConfig};
use bookcast::encoder::{BookPlan, CompositionPlan, ManifestEncoder, MediaEncoder};
use bookcast::errors::EncoderError;
use bookcast::pipeline::{ChapterCompositor, ChapterJob, PipelineOrchestrator};
use bookcast::providers::mock::MockSpeechProvider;
use bookcast::render::{RenderDriver, RenderSurface, TimelineSurface};
use bookcast::retry::{Clock, RetryPolicy};
use bookcast::segmenter::Segment;
use bookcast::speech::SpeechTimingClient;

/// Route library logs to the test output
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    std::fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Number of entries in a directory
pub fn dir_entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// Clock that records requested delays and returns immediately
#[derive(Debug, Default)]
pub struct RecordingClock {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// Encoder that writes a partial artifact, then fails
#[derive(Debug, Default)]
pub struct FailingEncoder;

#[async_trait]
impl MediaEncoder for FailingEncoder {
    async fn encode_chapter(&self, _plan: &CompositionPlan<'_>, out_path: &Path) -> Result<(), EncoderError> {
        tokio::fs::write(out_path, b"partial").await?;
        Err(EncoderError::Process("simulated encoder crash".to_string()))
    }

    async fn encode_book(&self, _plan: &BookPlan<'_>, out_path: &Path) -> Result<(), EncoderError> {
        tokio::fs::write(out_path, b"partial").await?;
        Err(EncoderError::Process("simulated encoder crash".to_string()))
    }

    async fn artifact_duration(&self, path: &Path) -> Result<f64, EncoderError> {
        Err(EncoderError::UnknownDuration { path: path.to_path_buf(), reason: "simulated".to_string() })
    }

    fn extension(&self) -> &str {
        "json"
    }
}

/// Small frames at 30 fps
pub fn render_config() -> Arc<RenderConfig> {
    Arc::new(RenderConfig { width: 320, height: 180, fps: 30, ..RenderConfig::default() })
}

/// A narrated segment
pub fn text_segment(chapter_id: &str, index: usize, text: &str) -> Segment {
    Segment {
        index,
        id: format!("{}_{}", chapter_id, index),
        chapter_id: chapter_id.to_string(),
        chapter_title: format!("Chapter {}", chapter_id),
        text: Some(text.to_string()),
        illustration: None,
        render: render_config(),
    }
}

/// A silent illustration segment
pub fn image_segment(chapter_id: &str, index: usize, path: &Path) -> Segment {
    Segment {
        index,
        id: format!("{}_img{}", chapter_id, index),
        chapter_id: chapter_id.to_string(),
        chapter_title: format!("Chapter {}", chapter_id),
        text: None,
        illustration: Some(path.to_path_buf()),
        render: render_config(),
    }
}

/// A chapter job writing into `output_dir`
pub fn chapter_job(chapter_id: &str, texts: &[&str], output_dir: &Path) -> ChapterJob {
    let segments = texts
        .iter()
        .enumerate()
        .map(|(index, text)| text_segment(chapter_id, index, text))
        .collect();
    ChapterJob::new(
        chapter_id,
        format!("Chapter {}", chapter_id),
        segments,
        output_dir.join(format!("{}.json", chapter_id)),
    )
}

/// Pipeline settings for tests
pub fn pipeline_config(worker_count: usize) -> PipelineConfig {
    PipelineConfig {
        worker_count,
        capture_sessions: worker_count.min(2),
        tolerate_partial_failure: false,
        capture_attempts: 2,
        duration_tolerance_frames: 1,
        max_correction_frames: 60,
        strict_gap_check: false,
    }
}

/// Speech settings with a short retry policy
pub fn speech_config() -> SpeechConfig {
    SpeechConfig {
        retry: RetryPolicy::new(3, 100, 2.0),
        illustration_seconds: 2.0,
        cache_enabled: false,
        ..SpeechConfig::default()
    }
}

/// Orchestrator over mock speech, the timeline surface and the manifest encoder
pub struct Harness {
    pub orchestrator: PipelineOrchestrator,
    pub provider: MockSpeechProvider,
    pub surface: TimelineSurface,
    pub clock: Arc<RecordingClock>,
    pub output: TempDir,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new(provider: MockSpeechProvider, surface: TimelineSurface, config: PipelineConfig) -> Result<Self> {
        Self::with_surface(provider, Arc::new(surface.clone()), surface, config)
    }

    /// Capture through `capture`; `surface` is kept only for its counters
    pub fn with_surface(
        provider: MockSpeechProvider,
        capture: Arc<dyn RenderSurface>,
        surface: TimelineSurface,
        config: PipelineConfig,
    ) -> Result<Self> {
        let clock = RecordingClock::new();
        let speech = SpeechTimingClient::new(Arc::new(provider.clone()), &speech_config(), clock.clone());
        let renderer = RenderDriver::new(capture, config.capture_sessions, config.max_correction_frames);
        let compositor = ChapterCompositor::new(Arc::new(ManifestEncoder::new()), render_config());
        let scratch = create_temp_dir()?;
        let orchestrator = PipelineOrchestrator::new(config, speech, renderer, compositor, clock.clone())
            .with_scratch_parent(scratch.path());

        Ok(Self {
            orchestrator,
            provider,
            surface,
            clock,
            output: create_temp_dir()?,
            scratch,
        })
    }

    pub fn working(config: PipelineConfig) -> Result<Self> {
        Self::new(MockSpeechProvider::working(), TimelineSurface::new(), config)
    }

    pub fn job(&self, chapter_id: &str, texts: &[&str]) -> ChapterJob {
        chapter_job(chapter_id, texts, self.output.path())
    }

    /// Scratch parent holds nothing once a run is over
    pub fn scratch_is_empty(&self) -> bool {
        dir_entry_count(self.scratch.path()) == 0
    }
}

/// Parsed chapter manifest written by the manifest encoder
pub fn read_manifest(path: &Path) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// Expected audio length of `text` with the mock provider's default rate
pub fn mock_duration(text: &str) -> f64 {
    let provider = MockSpeechProvider::working();
    provider.timing_marks(text).last().map(|mark| mark.end()).unwrap_or(0.0)
}
