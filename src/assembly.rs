/*!
 * Segment assembly.
 *
 * Pairs a segment's captured visual stream with its narration once the two
 * agree on length, producing the immutable unit the compositor consumes.
 */

use std::path::PathBuf;

use log::trace;

use crate::errors::DurationMismatchError;
use crate::file_utils::SegmentScratch;
use crate::render::CapturedMedia;
use crate::segmenter::Segment;
use crate::speech::{SpeechResult, TimingMark};

/// Finished audio/video pair of one segment
#[derive(Debug)]
pub struct SegmentUnit {
    pub index: usize,
    pub segment_id: String,
    pub chapter_id: String,

    /// Narration length; the unit's length in the chapter
    pub duration: f64,

    pub audio_path: PathBuf,
    pub marks: Vec<TimingMark>,
    pub media: CapturedMedia,
    pub text: Option<String>,
    pub illustration: Option<PathBuf>,

    /// Backing scratch files, released when the unit is dropped
    scratch: Option<SegmentScratch>,
}

impl SegmentUnit {
    /// Keep `scratch` alive for as long as this unit
    pub fn retain_scratch(mut self, scratch: SegmentScratch) -> Self {
        self.scratch = Some(scratch);
        self
    }

    pub fn is_illustration(&self) -> bool {
        self.text.is_none() && self.illustration.is_some()
    }
}

/// Verifies and combines speech and capture
#[derive(Debug, Clone, Copy)]
pub struct SegmentAssembler {
    tolerance_frames: u32,
}

impl SegmentAssembler {
    pub fn new(tolerance_frames: u32) -> Self {
        Self { tolerance_frames }
    }

    /// Combine `speech` and `media` into a unit, or reject a capture whose
    /// length differs from the audio by more than the frame tolerance
    pub fn assemble(
        &self,
        segment: &Segment,
        speech: &SpeechResult,
        media: CapturedMedia,
    ) -> Result<SegmentUnit, DurationMismatchError> {
        let frame = 1.0 / media.fps as f64;
        let actual = media.duration();
        let allowed = self.tolerance_frames as f64 * frame;

        // Half a frame of slack absorbs rounding the audio length to whole frames
        if (actual - speech.duration).abs() > allowed + frame / 2.0 + 1e-9 {
            return Err(DurationMismatchError {
                expected: speech.duration,
                actual,
                tolerance_frames: self.tolerance_frames,
            });
        }

        trace!("Assembled {}#{} ({:.3}s)", segment.chapter_id, segment.index, speech.duration);
        Ok(SegmentUnit {
            index: segment.index,
            segment_id: segment.id.clone(),
            chapter_id: segment.chapter_id.clone(),
            duration: speech.duration,
            audio_path: speech.audio_path.clone(),
            marks: speech.marks.clone(),
            media,
            text: segment.text.clone(),
            illustration: segment.illustration.clone(),
            scratch: None,
        })
    }
}
