//! JSON chapter and book timeline encoder.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use serde::Serialize;

use crate::encoder::{BackgroundPlan, BookPlan, CompositionPlan, MediaEncoder};
use crate::errors::EncoderError;

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    chapter_id: &'a str,
    title: &'a str,
    width: u32,
    height: u32,
    fps: u32,
    total_duration: f64,
    total_frames: u64,
    units: Vec<ManifestUnit<'a>>,
    background: Option<&'a BackgroundPlan>,
}

#[derive(Debug, Serialize)]
struct ManifestUnit<'a> {
    index: usize,
    segment_id: &'a str,
    offset: f64,
    duration: f64,
    start_frame: u64,
    frames: u64,
    audio: &'a Path,
    video: Option<&'a Path>,
    illustration: Option<&'a Path>,
    text: Option<&'a str>,
    highlights: Vec<HighlightRun<'a>>,
}

/// A stretch of frames with one highlighted span (character offsets)
#[derive(Debug, Serialize)]
struct HighlightRun<'a> {
    start_frame: u64,
    frames: u64,
    text: &'a str,
    char_start: usize,
    char_end: usize,
    still: Option<&'a PathBuf>,
}

#[derive(Debug, Serialize)]
struct BookManifest<'a> {
    book_id: &'a str,
    title: &'a str,
    width: u32,
    height: u32,
    fps: u32,
    total_duration: f64,
    chapters: Vec<BookManifestChapter<'a>>,
    background: Option<&'a BackgroundPlan>,
}

#[derive(Debug, Serialize)]
struct BookManifestChapter<'a> {
    chapter_id: &'a str,
    title: &'a str,
    manifest: &'a Path,
    offset: f64,
    duration: f64,
}

/// Writes the chapter timeline as JSON
#[derive(Debug, Clone, Default)]
pub struct ManifestEncoder;

impl ManifestEncoder {
    pub fn new() -> Self {
        Self
    }
}

fn build_manifest<'a>(plan: &'a CompositionPlan<'a>) -> Manifest<'a> {
    let mut chapter_frame = 0;
    let units = plan
        .units
        .iter()
        .map(|planned| {
            let unit = planned.unit;
            let start_frame = chapter_frame;
            let frames = unit.media.frame_count();
            chapter_frame += frames;

            let mut run_start = 0;
            let mut highlights = Vec::new();
            for run in &unit.media.runs {
                if let (Some(text), Some(range)) = (run.state.text.as_deref(), run.state.highlight.clone()) {
                    if let Some(span) = text.get(range.clone()) {
                        let char_start = text[..range.start].chars().count();
                        highlights.push(HighlightRun {
                            start_frame: run_start,
                            frames: run.frames,
                            text: span,
                            char_start,
                            char_end: char_start + span.chars().count(),
                            still: run.still.as_ref(),
                        });
                    }
                }
                run_start += run.frames;
            }

            ManifestUnit {
                index: unit.index,
                segment_id: &unit.segment_id,
                offset: planned.offset,
                duration: unit.duration,
                start_frame,
                frames,
                audio: &unit.audio_path,
                video: unit.media.video.as_deref(),
                illustration: unit.illustration.as_deref(),
                text: unit.text.as_deref(),
                highlights,
            }
        })
        .collect();

    Manifest {
        chapter_id: &plan.chapter_id,
        title: &plan.title,
        width: plan.width,
        height: plan.height,
        fps: plan.fps,
        total_duration: plan.total_duration,
        total_frames: chapter_frame,
        units,
        background: plan.background.as_ref(),
    }
}

#[async_trait]
impl MediaEncoder for ManifestEncoder {
    async fn encode_chapter(&self, plan: &CompositionPlan<'_>, out_path: &Path) -> Result<(), EncoderError> {
        let json = serde_json::to_vec_pretty(&build_manifest(plan))?;
        tokio::fs::write(out_path, json).await?;
        debug!("Wrote manifest for chapter {} ({} units)", plan.chapter_id, plan.units.len());
        Ok(())
    }

    async fn encode_book(&self, plan: &BookPlan<'_>, out_path: &Path) -> Result<(), EncoderError> {
        let manifest = BookManifest {
            book_id: &plan.book_id,
            title: &plan.title,
            width: plan.width,
            height: plan.height,
            fps: plan.fps,
            total_duration: plan.total_duration,
            chapters: plan
                .chapters
                .iter()
                .map(|chapter| BookManifestChapter {
                    chapter_id: chapter.chapter_id,
                    title: chapter.title,
                    manifest: chapter.path,
                    offset: chapter.offset,
                    duration: chapter.duration,
                })
                .collect(),
            background: plan.background.as_ref(),
        };
        tokio::fs::write(out_path, serde_json::to_vec_pretty(&manifest)?).await?;
        debug!("Wrote book manifest for {} ({} chapters)", plan.book_id, plan.chapters.len());
        Ok(())
    }

    async fn artifact_duration(&self, path: &Path) -> Result<f64, EncoderError> {
        let content = tokio::fs::read_to_string(path).await?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        value["total_duration"].as_f64().ok_or_else(|| EncoderError::UnknownDuration {
            path: path.to_path_buf(),
            reason: "manifest has no total_duration".to_string(),
        })
    }

    fn extension(&self) -> &str {
        "json"
    }
}
