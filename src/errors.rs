/*!
 * Error types for the bookcast pipeline.
 *
 * Errors are layered the same way the pipeline is: raw collaborator failures
 * (`ProviderError`) are classified into transient or permanent external errors,
 * stage errors wrap those, `SegmentError` is what a single segment can fail with,
 * and chapter/run level errors aggregate segment outcomes.
 */

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::retry::Retryable;

/// Errors reported by an external collaborator (TTS, style service, encoder process)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Error when making a request fails
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing a collaborator response fails
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Error returned by a remote API
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The collaborator rejected its input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Account quota is used up
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// The collaborator did not answer in time
    #[error("Timed out after {0}s")]
    Timeout(u64),
}

impl ProviderError {
    /// Whether retrying the same call can plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_)
            | Self::ConnectionError(_)
            | Self::RateLimitExceeded(_)
            | Self::Timeout(_) => true,
            Self::ApiError { status_code, .. } => *status_code == 429 || *status_code >= 500,
            Self::ParseError(_)
            | Self::AuthenticationError(_)
            | Self::InvalidInput(_)
            | Self::QuotaExhausted(_) => false,
        }
    }
}

/// A classified collaborator failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalError {
    /// Retry with backoff, bounded attempts
    #[error("transient external failure: {0}")]
    Transient(ProviderError),

    /// No retry
    #[error("permanent external failure: {0}")]
    Permanent(ProviderError),
}

impl ExternalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Retryable for ExternalError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl From<ProviderError> for ExternalError {
    fn from(error: ProviderError) -> Self {
        if error.is_transient() {
            Self::Transient(error)
        } else {
            Self::Permanent(error)
        }
    }
}

/// Timing marks that cannot be reconciled with the segment text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimingAlignmentError {
    /// A mark's text unit does not occur in the segment text
    #[error("timing mark {index} ('{unit}') not found in segment text")]
    UnitNotFound { index: usize, unit: String },

    /// A mark starts before the previous one
    #[error("timing mark {index} starts at {offset:.3}s, before previous mark at {previous:.3}s")]
    DecreasingOffset { index: usize, previous: f64, offset: f64 },

    /// A mark has a negative or non-finite offset/duration
    #[error("timing mark {index} has invalid timing (offset {offset}, duration {duration})")]
    InvalidTiming { index: usize, offset: f64, duration: f64 },

    /// Two consecutive marks leave an uncovered gap
    #[error("gap of {gap:.3}s after timing mark {index} exceeds one frame")]
    GapTooLong { index: usize, gap: f64 },

    /// The audio starts with more than one frame of unmarked speech
    #[error("first timing mark starts {gap:.3}s into the audio")]
    LeadingGap { gap: f64 },

    /// The audio runs on for more than one frame after the last mark
    #[error("audio continues {gap:.3}s after the last timing mark")]
    TrailingGap { gap: f64 },
}

/// Failure of the speech timing client
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// The TTS collaborator failed
    #[error("synthesis failed: {0}")]
    External(#[from] ExternalError),

    /// The returned marks are inconsistent with the text
    #[error("timing alignment failed: {0}")]
    TimingAlignment(#[from] TimingAlignmentError),

    /// The audio could not be staged to scratch storage
    #[error("failed to stage audio: {0}")]
    Storage(#[from] std::io::Error),

    /// The run was cancelled while waiting on the provider
    #[error("synthesis cancelled")]
    Cancelled,
}

impl SynthesisError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::External(e) if e.is_transient())
    }
}

/// Failure of the render/capture stage
#[derive(Error, Debug)]
pub enum RenderError {
    /// The render surface reported an error
    #[error("render surface error: {0}")]
    Surface(String),

    /// The surface does not know the session handle
    #[error("unknown capture session {0}")]
    UnknownSession(String),

    /// I/O while writing capture artifacts
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled mid-capture
    #[error("capture cancelled")]
    Cancelled,
}

/// Captured video and synthesized audio disagree on duration
#[derive(Error, Debug, Clone, PartialEq)]
#[error("capture lasts {actual:.3}s but audio lasts {expected:.3}s (tolerance {tolerance_frames} frame(s))")]
pub struct DurationMismatchError {
    pub expected: f64,
    pub actual: f64,
    pub tolerance_frames: u32,
}

/// Everything a single segment can fail with
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("style rewrite failed: {0}")]
    Rewrite(ExternalError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    DurationMismatch(#[from] DurationMismatchError),

    #[error("scratch storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

/// A segment that did not produce a unit
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFailure {
    pub index: usize,
    pub reason: String,
}

impl fmt::Display for SegmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.index, self.reason)
    }
}

/// A chapter could not be generated because segments failed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("chapter '{chapter_id}' failed: segments {indices:?} did not complete ({})", join_failures(.failures))]
pub struct ChapterGenerationError {
    pub chapter_id: String,
    pub indices: Vec<usize>,
    pub failures: Vec<SegmentFailure>,
}

impl ChapterGenerationError {
    pub fn new(chapter_id: impl Into<String>, mut failures: Vec<SegmentFailure>) -> Self {
        failures.sort_by_key(|f| f.index);
        Self {
            chapter_id: chapter_id.into(),
            indices: failures.iter().map(|f| f.index).collect(),
            failures,
        }
    }
}

fn join_failures(failures: &[SegmentFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Failure reported by a media encoder
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder process failed: {0}")]
    Process(String),

    #[error("unit {index} has no video stream to encode")]
    MissingVideo { index: usize },

    #[error("encoder I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cannot read the duration of {path}: {reason}")]
    UnknownDuration { path: PathBuf, reason: String },
}

/// Failure of the chapter compositor; nothing is left at the output path
#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("no units to compose for chapter '{0}'")]
    NoUnits(String),

    #[error("units out of order: index {next} follows {previous}")]
    OutOfOrder { previous: usize, next: usize },

    #[error("background track not found: {0}")]
    MissingBackground(PathBuf),

    #[error("no chapter artifacts to join for book '{0}'")]
    NoChapters(String),

    #[error("chapter artifact not found: {0}")]
    MissingChapter(PathBuf),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("failed to write chapter output: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome error for one chapter
#[derive(Error, Debug)]
pub enum ChapterError {
    #[error(transparent)]
    Generation(#[from] ChapterGenerationError),

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

/// Run-level failure of the orchestrator
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("run cancelled")]
    Cancelled,

    #[error("scratch area unavailable: {0}")]
    Scratch(#[from] std::io::Error),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error in the configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from the pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Error from a chapter
    #[error("Chapter error: {0}")]
    Chapter(#[from] ChapterError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
