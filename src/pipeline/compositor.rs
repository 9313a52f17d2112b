/*!
 * Chapter composition.
 *
 * Places the units of one chapter back to back in ascending index order,
 * plans the background track and hands the plan to the media encoder. The
 * artifact is written to a hidden temporary file next to the output and
 * renamed into place only when encoding succeeded.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::app_config::RenderConfig;
use crate::assembly::SegmentUnit;
use crate::encoder::{BackgroundPlan, CompositionPlan, MediaEncoder, PlannedUnit};
use crate::errors::CompositionError;
use crate::speech::silence::wav_file_duration;

/// A finished chapter artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterVideo {
    pub chapter_id: String,
    pub path: PathBuf,

    /// Sum of the unit durations
    pub duration: f64,

    /// Indices of the segments it was built from, ascending
    pub indices: Vec<usize>,
}

impl ChapterVideo {
    pub fn unit_count(&self) -> usize {
        self.indices.len()
    }
}

/// Background track mixed under the narration
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundTrack {
    pub path: PathBuf,
    pub volume: f32,
}

/// Builds chapter artifacts from ordered units
#[derive(Debug, Clone)]
pub struct ChapterCompositor {
    encoder: Arc<dyn MediaEncoder>,
    render: Arc<RenderConfig>,
    background: Option<BackgroundTrack>,
}

impl ChapterCompositor {
    pub fn new(encoder: Arc<dyn MediaEncoder>, render: Arc<RenderConfig>) -> Self {
        Self { encoder, render, background: None }
    }

    pub fn with_background(mut self, track: BackgroundTrack) -> Self {
        self.background = Some(track);
        self
    }

    /// Extension of the artifacts this compositor writes
    pub fn extension(&self) -> &str {
        self.encoder.extension()
    }

    /// Compose `units` into `out_path`.
    ///
    /// Units must be non-empty and strictly ascending by index. The units,
    /// and the scratch files they hold, are released when this returns.
    pub async fn compose(
        &self,
        chapter_id: &str,
        title: &str,
        units: Vec<SegmentUnit>,
        out_path: &Path,
    ) -> Result<ChapterVideo, CompositionError> {
        if units.is_empty() {
            return Err(CompositionError::NoUnits(chapter_id.to_string()));
        }
        if let Some(pair) = units.windows(2).find(|pair| pair[1].index <= pair[0].index) {
            return Err(CompositionError::OutOfOrder { previous: pair[0].index, next: pair[1].index });
        }

        let mut offset = 0.0;
        let planned: Vec<PlannedUnit<'_>> = units
            .iter()
            .map(|unit| {
                let placed = PlannedUnit { unit, offset };
                offset += unit.duration;
                placed
            })
            .collect();
        let total_duration = offset;

        let background = match &self.background {
            Some(track) => Some(plan_background(track, total_duration)?),
            None => None,
        };

        let plan = CompositionPlan {
            chapter_id: chapter_id.to_string(),
            title: title.to_string(),
            width: self.render.width,
            height: self.render.height,
            fps: self.render.fps,
            units: planned,
            total_duration,
            background,
        };

        let staged = stage_output(out_path, self.encoder.extension()).await?;
        debug!("Encoding chapter {} into {:?}", chapter_id, staged.path());

        self.encoder.encode_chapter(&plan, staged.path()).await?;
        staged.persist(out_path).map_err(|e| CompositionError::Io(e.error))?;

        let indices: Vec<usize> = units.iter().map(|unit| unit.index).collect();
        info!(
            "Chapter {} composed from {} units ({:.2}s) -> {:?}",
            chapter_id,
            indices.len(),
            total_duration,
            out_path
        );

        Ok(ChapterVideo {
            chapter_id: chapter_id.to_string(),
            path: out_path.to_path_buf(),
            duration: total_duration,
            indices,
        })
    }
}

/// Hidden temporary file next to `out_path`, removed on drop unless persisted
pub(crate) async fn stage_output(out_path: &Path, extension: &str) -> Result<NamedTempFile, CompositionError> {
    let parent = match out_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;
    Ok(tempfile::Builder::new()
        .prefix(".bookcast-")
        .suffix(&format!(".{}", extension))
        .tempfile_in(&parent)?)
}

/// Fit `track` to `total` seconds
pub(crate) fn plan_background(track: &BackgroundTrack, total: f64) -> Result<BackgroundPlan, CompositionError> {
    if !track.path.is_file() {
        return Err(CompositionError::MissingBackground(track.path.clone()));
    }
    let source_duration = wav_file_duration(&track.path);
    if source_duration.is_none() {
        debug!("Background track {:?} length unknown; looping", track.path);
    }
    Ok(BackgroundPlan::new(track.path.clone(), track.volume, source_duration, total))
}
