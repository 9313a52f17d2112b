/*!
 * Speech timing client.
 *
 * Wraps a `SpeechProvider` and turns its raw answer into a `SpeechResult`:
 * - transient provider failures are retried with the injected backoff policy
 * - timing marks are checked against the segment text before anything is kept
 * - the audio is staged inside the segment's own scratch partition
 */

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::app_config::SpeechConfig;
use crate::cancel::CancellationToken;
use crate::errors::{ExternalError, SynthesisError, TimingAlignmentError};
use crate::file_utils::SegmentScratch;
use crate::providers::{SpeechOutput, SpeechProvider};
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy, SharedClock};

pub mod cache;
pub mod silence;

pub use cache::SpeechCache;

/// Fallback speaking rate when neither the provider nor the marks give a duration
pub const ESTIMATED_SECONDS_PER_CHAR: f64 = 0.1;

/// One spoken text unit and when it is heard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingMark {
    /// Text unit as it appears in the segment
    pub text: String,

    /// Start, in seconds from the start of the segment audio
    pub offset: f64,

    /// Length in seconds
    pub duration: f64,
}

impl TimingMark {
    pub fn new(text: impl Into<String>, offset: f64, duration: f64) -> Self {
        Self { text: text.into(), offset, duration }
    }

    pub fn end(&self) -> f64 {
        self.offset + self.duration
    }

    /// Whether `t` falls in `[offset, offset + duration)`
    pub fn contains(&self, t: f64) -> bool {
        t >= self.offset && t < self.end()
    }

    /// Text unit without surrounding whitespace
    pub fn unit(&self) -> &str {
        self.text.trim()
    }
}

/// Audio and timing for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechResult {
    /// Audio file inside the segment's scratch partition
    pub audio_path: PathBuf,

    /// Total audio length in seconds
    pub duration: f64,

    /// Ordered timing marks; empty for illustrations
    pub marks: Vec<TimingMark>,
}

/// Check `marks` against `text`.
///
/// Every unit must occur in the text and offsets must not decrease. With
/// `max_gap`, consecutive marks may not leave more than `max_gap` seconds
/// uncovered.
pub fn validate_marks(
    text: &str,
    marks: &[TimingMark],
    max_gap: Option<f64>,
) -> Result<(), TimingAlignmentError> {
    let mut previous: Option<&TimingMark> = None;

    for (index, mark) in marks.iter().enumerate() {
        if !mark.offset.is_finite() || !mark.duration.is_finite() || mark.offset < 0.0 || mark.duration < 0.0 {
            return Err(TimingAlignmentError::InvalidTiming {
                index,
                offset: mark.offset,
                duration: mark.duration,
            });
        }

        let unit = mark.unit();
        if unit.is_empty() || !text.contains(unit) {
            return Err(TimingAlignmentError::UnitNotFound { index, unit: mark.text.clone() });
        }

        if let Some(prev) = previous {
            if mark.offset < prev.offset {
                return Err(TimingAlignmentError::DecreasingOffset {
                    index,
                    previous: prev.offset,
                    offset: mark.offset,
                });
            }
            if let Some(limit) = max_gap {
                let gap = mark.offset - prev.end();
                if gap > limit + 1e-9 {
                    return Err(TimingAlignmentError::GapTooLong { index: index - 1, gap });
                }
            }
        }
        previous = Some(mark);
    }

    Ok(())
}

/// Check that `marks` reach both ends of the audio.
///
/// The first mark may start at most `max_gap` seconds in, and the audio may
/// run at most `max_gap` seconds past the last mark. Illustrations (no marks)
/// always pass.
pub fn validate_coverage(marks: &[TimingMark], duration: f64, max_gap: f64) -> Result<(), TimingAlignmentError> {
    let (Some(first), Some(last_end)) = (marks.first(), marks.iter().map(TimingMark::end).reduce(f64::max)) else {
        return Ok(());
    };
    if first.offset > max_gap + 1e-9 {
        return Err(TimingAlignmentError::LeadingGap { gap: first.offset });
    }
    let trailing = duration - last_end;
    if trailing > max_gap + 1e-9 {
        return Err(TimingAlignmentError::TrailingGap { gap: trailing });
    }
    Ok(())
}

/// Total audio duration: the provider's value, else the end of the last mark,
/// else an estimate from the text length. Never shorter than the marks.
pub fn resolve_duration(reported: Option<f64>, marks: &[TimingMark], text: &str) -> f64 {
    let marks_end = marks.iter().map(TimingMark::end).fold(0.0, f64::max);
    match reported.filter(|d| d.is_finite() && *d > 0.0) {
        Some(duration) => duration.max(marks_end),
        None if marks_end > 0.0 => marks_end,
        None => text.chars().count() as f64 * ESTIMATED_SECONDS_PER_CHAR,
    }
}

/// Obtains audio plus timing marks for segments
#[derive(Debug, Clone)]
pub struct SpeechTimingClient {
    provider: Arc<dyn SpeechProvider>,
    voice: String,
    policy: RetryPolicy,
    clock: SharedClock,
    cache: Option<SpeechCache>,
    max_gap: Option<f64>,
    illustration_seconds: f64,
}

impl SpeechTimingClient {
    pub fn new(provider: Arc<dyn SpeechProvider>, config: &SpeechConfig, clock: SharedClock) -> Self {
        Self {
            provider,
            voice: config.voice.clone(),
            policy: config.retry,
            clock,
            cache: None,
            max_gap: None,
            illustration_seconds: config.illustration_seconds,
        }
    }

    pub fn with_cache(mut self, cache: SpeechCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Reject marks leaving gaps longer than `seconds`
    pub fn with_gap_limit(mut self, seconds: f64) -> Self {
        self.max_gap = Some(seconds);
        self
    }

    /// Cache statistics, when a cache is configured
    pub fn cache_stats(&self) -> Option<(usize, usize, f64)> {
        self.cache.as_ref().map(SpeechCache::stats)
    }

    /// Synthesize `text`, staging the audio in `scratch`
    pub async fn synthesize(
        &self,
        text: &str,
        scratch: &SegmentScratch,
        cancel: &CancellationToken,
    ) -> Result<SpeechResult, SynthesisError> {
        if cancel.is_cancelled() {
            return Err(SynthesisError::Cancelled);
        }

        let cached = self.cache.as_ref().and_then(|cache| cache.get(&self.voice, text));
        let from_cache = cached.is_some();
        let output = match cached {
            Some(output) => output,
            None => self.call_provider(text, cancel).await?,
        };

        validate_marks(text, &output.marks, self.max_gap)?;
        let duration = resolve_duration(output.duration, &output.marks, text);
        if let Some(limit) = self.max_gap {
            validate_coverage(&output.marks, duration, limit)?;
        }

        if !from_cache {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.store(&self.voice, text, &output) {
                    warn!("Failed to cache speech: {}", e);
                }
            }
        }

        let audio_path = scratch.file(&format!("speech.{}", output.extension));
        tokio::fs::write(&audio_path, &output.audio).await?;
        debug!(
            "Synthesized {} chars into {:.2}s with {} marks{}",
            text.chars().count(),
            duration,
            output.marks.len(),
            if from_cache { " (cached)" } else { "" }
        );

        Ok(SpeechResult { audio_path, duration, marks: output.marks })
    }

    /// Silent track of the illustration hold time
    pub async fn silence(&self, scratch: &SegmentScratch) -> Result<SpeechResult, SynthesisError> {
        let duration = self.illustration_seconds;
        let bytes = silence::silent_wav_bytes(duration, silence::SILENCE_SAMPLE_RATE)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let audio_path = scratch.file("silence.wav");
        tokio::fs::write(&audio_path, bytes).await?;
        Ok(SpeechResult { audio_path, duration, marks: Vec::new() })
    }

    async fn call_provider(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<SpeechOutput, SynthesisError> {
        let provider = &self.provider;
        let voice = self.voice.as_str();
        let label = format!("{} synthesis", provider.name());

        retry_with_backoff(&self.policy, self.clock.as_ref(), cancel, &label, |_| async move {
            provider.speak(text, voice).await.map_err(ExternalError::from)
        })
        .await
        .map_err(|outcome| match outcome {
            RetryOutcome::Failed { error, attempts } => {
                debug!("{} gave up after {} attempt(s)", label, attempts);
                SynthesisError::External(error)
            }
            RetryOutcome::Cancelled => SynthesisError::Cancelled,
        })
    }
}
