/*!
 * Media encoder capability.
 *
 * The chapter compositor hands an encoder a fully resolved `CompositionPlan`
 * (ordered units with their offsets, plus the background track plan) and a
 * path to write. The book compositor does the same with a `BookPlan` of
 * finished chapter artifacts. Encoders never decide ordering or timing
 * themselves.
 *
 * Implementations:
 * - `manifest`: JSON chapter timeline, no external tools
 * - `ffmpeg`: MP4 through the ffmpeg binary
 */

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::assembly::SegmentUnit;
use crate::errors::EncoderError;

pub mod ffmpeg;
pub mod manifest;

pub use ffmpeg::FfmpegEncoder;
pub use manifest::ManifestEncoder;

/// A unit placed on the chapter timeline
#[derive(Debug, Clone, Copy)]
pub struct PlannedUnit<'a> {
    pub unit: &'a SegmentUnit,

    /// Start within the chapter, in seconds
    pub offset: f64,
}

/// How the background track is fitted to the chapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundFit {
    /// Repeated until the chapter ends, then cut
    Loop,
    /// Longer than the chapter; cut at the end
    Trim,
}

/// Background track mixed under the narration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundPlan {
    pub path: PathBuf,

    /// Linear gain applied to the track
    pub volume: f32,

    /// Track length when it could be measured
    pub source_duration: Option<f64>,

    pub fit: BackgroundFit,

    /// Times the track plays, counting a final partial play
    pub plays: Option<u32>,
}

impl BackgroundPlan {
    pub fn new(path: PathBuf, volume: f32, source_duration: Option<f64>, total_duration: f64) -> Self {
        let (fit, plays) = match source_duration.filter(|d| *d > 0.0) {
            Some(source) if source >= total_duration => (BackgroundFit::Trim, Some(1)),
            Some(source) => (BackgroundFit::Loop, Some((total_duration / source).ceil() as u32)),
            None => (BackgroundFit::Loop, None),
        };
        Self { path, volume, source_duration, fit, plays }
    }
}

/// Everything an encoder needs to write one chapter
#[derive(Debug, Clone)]
pub struct CompositionPlan<'a> {
    pub chapter_id: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub units: Vec<PlannedUnit<'a>>,

    /// Exact sum of the unit durations
    pub total_duration: f64,

    pub background: Option<BackgroundPlan>,
}

/// A finished chapter artifact placed on the book timeline
#[derive(Debug, Clone, Copy)]
pub struct PlannedChapter<'a> {
    pub chapter_id: &'a str,
    pub title: &'a str,
    pub path: &'a Path,

    /// Start within the book, in seconds
    pub offset: f64,

    pub duration: f64,
}

/// Everything an encoder needs to join chapters into one book artifact
#[derive(Debug, Clone)]
pub struct BookPlan<'a> {
    pub book_id: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub chapters: Vec<PlannedChapter<'a>>,

    /// Exact sum of the chapter durations
    pub total_duration: f64,

    pub background: Option<BackgroundPlan>,
}

/// Writes chapter and book artifacts from composition plans
#[async_trait]
pub trait MediaEncoder: Send + Sync + Debug {
    /// Encode `plan` into `out_path`, which already exists and may be overwritten
    async fn encode_chapter(&self, plan: &CompositionPlan<'_>, out_path: &Path) -> Result<(), EncoderError>;

    /// Join the chapter artifacts of `plan`, in order, into `out_path`
    async fn encode_book(&self, plan: &BookPlan<'_>, out_path: &Path) -> Result<(), EncoderError>;

    /// Length in seconds of an artifact this encoder wrote
    async fn artifact_duration(&self, path: &Path) -> Result<f64, EncoderError>;

    /// File extension of the artifact
    fn extension(&self) -> &str;
}
