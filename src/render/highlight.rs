/*!
 * Which text span is highlighted at a given time.
 *
 * The active mark at `t` is the first mark, in sequence order, whose
 * `[offset, offset + duration)` contains `t`. Its unit is highlighted at the
 * first place it occurs in the segment text, so a word spoken twice lights up
 * the same span both times.
 */

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use crate::render::VisualState;
use crate::segmenter::Segment;
use crate::speech::TimingMark;

/// Byte range of the first occurrence of `unit` in `text`
pub fn first_occurrence(text: &str, unit: &str) -> Option<Range<usize>> {
    if unit.is_empty() {
        return None;
    }
    text.find(unit).map(|start| start..start + unit.len())
}

/// Precomputed highlight schedule of one segment
#[derive(Debug, Clone)]
pub struct HighlightTimeline {
    text: Option<Arc<str>>,
    illustration: Option<PathBuf>,
    marks: Vec<TimingMark>,
    spans: Vec<Option<Range<usize>>>,
}

impl HighlightTimeline {
    pub fn new(text: Option<&str>, illustration: Option<PathBuf>, marks: &[TimingMark]) -> Self {
        let spans = match text {
            Some(text) => marks.iter().map(|m| first_occurrence(text, m.unit())).collect(),
            None => Vec::new(),
        };
        Self {
            text: text.map(Arc::from),
            illustration,
            marks: if text.is_some() { marks.to_vec() } else { Vec::new() },
            spans,
        }
    }

    pub fn for_segment(segment: &Segment, marks: &[TimingMark]) -> Self {
        Self::new(segment.text.as_deref(), segment.illustration.clone(), marks)
    }

    /// Index of the mark active at `t`
    pub fn active_mark(&self, t: f64) -> Option<usize> {
        self.marks.iter().position(|mark| mark.contains(t))
    }

    /// Visual state at `t`
    pub fn state_at(&self, t: f64) -> VisualState {
        let highlight = self
            .active_mark(t)
            .and_then(|index| self.spans.get(index).cloned().flatten());
        VisualState {
            text: self.text.clone(),
            highlight,
            illustration: self.illustration.clone(),
        }
    }

    /// The state shown while nothing is highlighted
    pub fn idle_state(&self) -> VisualState {
        VisualState {
            text: self.text.clone(),
            highlight: None,
            illustration: self.illustration.clone(),
        }
    }
}
