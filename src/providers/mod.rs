/*!
 * Collaborator clients.
 *
 * The pipeline talks to two unreliable external services through these traits:
 * - `SpeechProvider`: text-to-speech with per-unit timing marks
 * - `StyleRewriter`: optional written-to-spoken register rewrite
 *
 * Implementations:
 * - `command`: external TTS program driven over stdin/stdout
 * - `chat`: OpenAI-compatible chat-completions endpoint for rewriting
 * - `mock`: deterministic in-process voice with scripted failures
 */

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

use crate::errors::ProviderError;
use crate::speech::TimingMark;

/// Raw answer of a TTS collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOutput {
    /// Encoded audio
    pub audio: Bytes,

    /// File extension matching the audio encoding (`mp3`, `wav`, ...)
    pub extension: String,

    /// Timing marks in audio order
    pub marks: Vec<TimingMark>,

    /// Total audio duration when the provider reports it
    pub duration: Option<f64>,
}

/// Common trait for all speech providers
#[async_trait]
pub trait SpeechProvider: Send + Sync + Debug {
    /// Synthesize `text` with `voice`
    ///
    /// # Returns
    /// * `Result<SpeechOutput, ProviderError>` - Audio plus timing marks, or the raw failure
    async fn speak(&self, text: &str, voice: &str) -> Result<SpeechOutput, ProviderError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Rewrites written prose into a spoken register
#[async_trait]
pub trait StyleRewriter: Send + Sync + Debug {
    async fn rewrite(&self, text: &str) -> Result<String, ProviderError>;
}

pub mod chat;
pub mod command;
pub mod mock;
