/*!
 * Mock collaborators for testing and dry runs.
 *
 * `MockSpeechProvider` produces deterministic audio and timing marks without
 * any external program, and can be scripted to fail in the ways real TTS
 * services do.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::errors::ProviderError;
use crate::providers::{SpeechOutput, SpeechProvider, StyleRewriter};
use crate::speech::silence::wav_duration;
use crate::speech::{silence, TimingMark};

/// Sample rate of mock audio
const MOCK_SAMPLE_RATE: u32 = 8_000;

/// Mock behavior configuration
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with word-by-word marks
    Working,

    /// First `times` calls fail with a rate limit, then succeeds
    FailTransient { times: usize },

    /// Every call for a text containing `needle` fails with a rate limit
    FailTransientFor { needle: String },

    /// Always fails with an exhausted quota
    Failing,

    /// Returns a mark whose unit is not in the text
    Misaligned,

    /// Returns marks whose offsets go backwards
    DecreasingOffsets,

    /// Succeeds after a delay
    Slow { delay_ms: u64 },

    /// Reports audio that runs `seconds` past the last mark
    TrailingSilence { seconds: f64 },
}

/// Deterministic TTS provider
#[derive(Debug, Clone)]
pub struct MockSpeechProvider {
    behavior: MockBehavior,
    seconds_per_char: f64,
    request_count: Arc<AtomicUsize>,
    calls_per_text: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockSpeechProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            seconds_per_char: 0.05,
            request_count: Arc::new(AtomicUsize::new(0)),
            calls_per_text: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn failing_transiently(times: usize) -> Self {
        Self::new(MockBehavior::FailTransient { times })
    }

    pub fn failing_for(needle: impl Into<String>) -> Self {
        Self::new(MockBehavior::FailTransientFor { needle: needle.into() })
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn misaligned() -> Self {
        Self::new(MockBehavior::Misaligned)
    }

    pub fn decreasing_offsets() -> Self {
        Self::new(MockBehavior::DecreasingOffsets)
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    pub fn trailing_silence(seconds: f64) -> Self {
        Self::new(MockBehavior::TrailingSilence { seconds })
    }

    /// Speaking rate used to time each unit
    pub fn with_seconds_per_char(mut self, seconds: f64) -> Self {
        self.seconds_per_char = seconds;
        self
    }

    /// Total number of `speak` calls, shared between clones
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Number of `speak` calls for exactly `text`
    pub fn calls_for(&self, text: &str) -> usize {
        self.calls_per_text.lock().get(text).copied().unwrap_or(0)
    }

    /// Gapless marks, one per word (or per character for non-ASCII scripts)
    pub fn timing_marks(&self, text: &str) -> Vec<TimingMark> {
        let mut offset = 0.0;
        split_units(text)
            .into_iter()
            .map(|unit| {
                let duration = unit.chars().count() as f64 * self.seconds_per_char;
                let mark = TimingMark::new(unit, offset, duration);
                offset += duration;
                mark
            })
            .collect()
    }

    fn synthesize(&self, text: &str) -> Result<SpeechOutput, ProviderError> {
        let marks = self.timing_marks(text);
        let duration = marks.last().map(TimingMark::end).unwrap_or(0.0);
        let audio = silence::silent_wav_bytes(duration, MOCK_SAMPLE_RATE)
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        // The encoded length is what a real provider would report
        let duration = wav_duration(&audio).unwrap_or(duration);

        Ok(SpeechOutput {
            audio: Bytes::from(audio),
            extension: "wav".to_string(),
            marks,
            duration: Some(duration),
        })
    }
}

#[async_trait]
impl SpeechProvider for MockSpeechProvider {
    async fn speak(&self, text: &str, _voice: &str) -> Result<SpeechOutput, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        *self.calls_per_text.lock().entry(text.to_string()).or_insert(0) += 1;

        if text.trim().is_empty() {
            return Err(ProviderError::InvalidInput("empty text".to_string()));
        }

        match &self.behavior {
            MockBehavior::Working => self.synthesize(text),

            MockBehavior::FailTransient { times } => {
                if count < *times {
                    Err(ProviderError::RateLimitExceeded(format!(
                        "Simulated rate limit (request #{})",
                        count + 1
                    )))
                } else {
                    self.synthesize(text)
                }
            }

            MockBehavior::FailTransientFor { needle } => {
                if text.contains(needle.as_str()) {
                    Err(ProviderError::ApiError {
                        status_code: 503,
                        message: "Simulated outage".to_string(),
                    })
                } else {
                    self.synthesize(text)
                }
            }

            MockBehavior::Failing => {
                Err(ProviderError::QuotaExhausted("Simulated quota exhaustion".to_string()))
            }

            MockBehavior::Misaligned => {
                let mut output = self.synthesize(text)?;
                if let Some(mark) = output.marks.last_mut() {
                    mark.text = "\u{2603}not-in-text".to_string();
                }
                Ok(output)
            }

            MockBehavior::DecreasingOffsets => {
                let mut output = self.synthesize(text)?;
                output.marks.reverse();
                Ok(output)
            }

            MockBehavior::TrailingSilence { seconds } => {
                let mut output = self.synthesize(text)?;
                output.duration = output.duration.map(|duration| duration + seconds);
                Ok(output)
            }

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(tokio::time::Duration::from_millis(*delay_ms)).await;
                self.synthesize(text)
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Words separated by whitespace; each non-ASCII character is its own unit
pub fn split_units(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() || !c.is_ascii() {
            if let Some(start) = word_start.take() {
                units.push(&text[start..i]);
            }
            if !c.is_whitespace() {
                units.push(&text[i..i + c.len_utf8()]);
            }
        } else if word_start.is_none() {
            word_start = Some(i);
        }
    }
    if let Some(start) = word_start {
        units.push(&text[start..]);
    }

    units
}

/// Rewriter applying fixed replacements
#[derive(Debug, Clone, Default)]
pub struct MockStyleRewriter {
    replacements: Vec<(String, String)>,
    fail_times: usize,
    request_count: Arc<AtomicUsize>,
}

impl MockStyleRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replacing(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.replacements.push((from.into(), to.into()));
        self
    }

    /// Fail the first `times` calls with a server error
    pub fn failing_transiently(mut self, times: usize) -> Self {
        self.fail_times = times;
        self
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StyleRewriter for MockStyleRewriter {
    async fn rewrite(&self, text: &str) -> Result<String, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        if count < self.fail_times {
            return Err(ProviderError::ApiError {
                status_code: 502,
                message: "Simulated gateway error".to_string(),
            });
        }
        Ok(self
            .replacements
            .iter()
            .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to)))
    }
}
