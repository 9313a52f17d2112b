/*!
 * Whole-book composition.
 *
 * Joins finished chapter artifacts, in book order, into one artifact whose
 * length is the exact sum of the chapter lengths. When configured, the
 * background track is planned over the whole book instead of each chapter.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::app_config::RenderConfig;
use crate::encoder::{BookPlan, MediaEncoder, PlannedChapter};
use crate::errors::CompositionError;
use crate::pipeline::compositor::{plan_background, stage_output, BackgroundTrack, ChapterVideo};

/// A chapter artifact to place in the book
#[derive(Debug, Clone, PartialEq)]
pub struct BookChapter {
    pub chapter_id: String,
    pub title: String,
    pub path: PathBuf,
    pub duration: f64,
}

impl BookChapter {
    pub fn from_video(video: &ChapterVideo, title: impl Into<String>) -> Self {
        Self {
            chapter_id: video.chapter_id.clone(),
            title: title.into(),
            path: video.path.clone(),
            duration: video.duration,
        }
    }
}

/// A finished book artifact
#[derive(Debug, Clone, PartialEq)]
pub struct BookVideo {
    pub path: PathBuf,

    /// Sum of the chapter durations
    pub duration: f64,

    /// Chapter ids in the order they were joined
    pub chapters: Vec<String>,
}

/// Joins chapter artifacts into one book artifact
#[derive(Debug, Clone)]
pub struct BookCompositor {
    encoder: Arc<dyn MediaEncoder>,
    render: Arc<RenderConfig>,
    background: Option<BackgroundTrack>,
}

impl BookCompositor {
    pub fn new(encoder: Arc<dyn MediaEncoder>, render: Arc<RenderConfig>) -> Self {
        Self { encoder, render, background: None }
    }

    pub fn with_background(mut self, track: BackgroundTrack) -> Self {
        self.background = Some(track);
        self
    }

    /// Length of a chapter artifact written by an earlier run
    pub async fn existing_chapter(
        &self,
        chapter_id: &str,
        title: &str,
        path: &Path,
    ) -> Result<BookChapter, CompositionError> {
        if !path.is_file() {
            return Err(CompositionError::MissingChapter(path.to_path_buf()));
        }
        let duration = self.encoder.artifact_duration(path).await?;
        Ok(BookChapter {
            chapter_id: chapter_id.to_string(),
            title: title.to_string(),
            path: path.to_path_buf(),
            duration,
        })
    }

    /// Join `chapters`, in the given order, into `out_path`
    pub async fn compose(
        &self,
        book_id: &str,
        title: &str,
        chapters: &[BookChapter],
        out_path: &Path,
    ) -> Result<BookVideo, CompositionError> {
        if chapters.is_empty() {
            return Err(CompositionError::NoChapters(book_id.to_string()));
        }
        if let Some(missing) = chapters.iter().find(|chapter| !chapter.path.is_file()) {
            return Err(CompositionError::MissingChapter(missing.path.clone()));
        }

        let mut offset = 0.0;
        let planned: Vec<PlannedChapter<'_>> = chapters
            .iter()
            .map(|chapter| {
                let placed = PlannedChapter {
                    chapter_id: &chapter.chapter_id,
                    title: &chapter.title,
                    path: &chapter.path,
                    offset,
                    duration: chapter.duration,
                };
                offset += chapter.duration;
                placed
            })
            .collect();
        let total_duration = offset;

        let background = match &self.background {
            Some(track) => Some(plan_background(track, total_duration)?),
            None => None,
        };

        let plan = BookPlan {
            book_id: book_id.to_string(),
            title: title.to_string(),
            width: self.render.width,
            height: self.render.height,
            fps: self.render.fps,
            chapters: planned,
            total_duration,
            background,
        };

        let staged = stage_output(out_path, self.encoder.extension()).await?;
        debug!("Encoding book {} into {:?}", book_id, staged.path());
        self.encoder.encode_book(&plan, staged.path()).await?;
        staged.persist(out_path).map_err(|e| CompositionError::Io(e.error))?;

        info!(
            "Book {} joined from {} chapters ({:.2}s) -> {:?}",
            book_id,
            chapters.len(),
            total_duration,
            out_path
        );
        Ok(BookVideo {
            path: out_path.to_path_buf(),
            duration: total_duration,
            chapters: chapters.iter().map(|chapter| chapter.chapter_id.clone()).collect(),
        })
    }
}
