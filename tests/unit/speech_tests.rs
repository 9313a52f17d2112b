/*!
 * Tests for the speech timing client
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bookcast::CancellationToken;
use bookcast::errors::{SynthesisError, TimingAlignmentError};
use bookcast::file_utils::ScratchArea;
use bookcast::providers::mock::MockSpeechProvider;
use bookcast::speech::cache::SpeechCache;
use bookcast::speech::{SpeechTimingClient, TimingMark, validate_marks};
use crate::common::{self, RecordingClock};

fn client(provider: &MockSpeechProvider, clock: Arc<RecordingClock>) -> SpeechTimingClient {
    SpeechTimingClient::new(Arc::new(provider.clone()), &common::speech_config(), clock)
}

/// Test that marks come back ordered and the audio is staged in scratch
#[tokio::test]
async fn test_synthesize_withWorkingProvider_shouldReturnOrderedMarks() -> Result<()> {
    let scratch_dir = common::create_temp_dir()?;
    let scratch = ScratchArea::new(Some(scratch_dir.path()))?;
    let partition = scratch.partition("c1_0")?;
    let provider = MockSpeechProvider::working();

    let speech = client(&provider, RecordingClock::new())
        .synthesize("Hello brave new world", &partition, &CancellationToken::new())
        .await?;

    assert_eq!(speech.marks.len(), 4);
    assert!(speech.marks.windows(2).all(|pair| pair[0].offset <= pair[1].offset));
    assert!((speech.duration - 0.9).abs() < 1e-6);
    assert!(speech.audio_path.starts_with(partition.path()));
    assert!(speech.audio_path.is_file());
    Ok(())
}

/// Test the backoff delays between transient failures
#[tokio::test]
async fn test_synthesize_withTransientFailures_shouldBackOffExponentially() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let provider = MockSpeechProvider::failing_transiently(2);
    let clock = RecordingClock::new();

    let speech = client(&provider, clock.clone())
        .synthesize("Try again", &partition, &CancellationToken::new())
        .await?;

    assert_eq!(speech.marks.len(), 2);
    assert_eq!(provider.request_count(), 3);
    assert_eq!(clock.delays(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    Ok(())
}

/// Test that retries stop at the policy's attempt limit
#[tokio::test]
async fn test_synthesize_withEndlessTransientFailures_shouldGiveUp() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let provider = MockSpeechProvider::failing_for("down");
    let clock = RecordingClock::new();

    let result = client(&provider, clock.clone())
        .synthesize("service is down", &partition, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SynthesisError::External(ref e)) if e.is_transient()));
    assert_eq!(provider.request_count(), 3);
    assert_eq!(clock.delays().len(), 2);
    Ok(())
}

/// Test that decreasing offsets are reported without a retry
#[tokio::test]
async fn test_synthesize_withDecreasingOffsets_shouldFailAlignment() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let provider = MockSpeechProvider::decreasing_offsets();

    let result = client(&provider, RecordingClock::new())
        .synthesize("one two three", &partition, &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SynthesisError::TimingAlignment(TimingAlignmentError::DecreasingOffset { .. }))
    ));
    assert_eq!(provider.request_count(), 1);
    Ok(())
}

/// Test that a cached result skips the provider
#[tokio::test]
async fn test_synthesize_withCache_shouldReuseAudio() -> Result<()> {
    let cache_dir = common::create_temp_dir()?;
    let scratch = ScratchArea::new(None)?;
    let provider = MockSpeechProvider::working();
    let client = client(&provider, RecordingClock::new()).with_cache(SpeechCache::new(cache_dir.path())?);

    let first = client.synthesize("Cache me", &scratch.partition("a")?, &CancellationToken::new()).await?;
    let second = client.synthesize("Cache me", &scratch.partition("b")?, &CancellationToken::new()).await?;

    assert_eq!(provider.request_count(), 1);
    assert_eq!(first.marks, second.marks);
    assert_eq!(first.duration, second.duration);
    assert_eq!(client.cache_stats().map(|(hits, misses, _)| (hits, misses)), Some((1, 1)));
    Ok(())
}

/// Test that illustration silence lasts the configured time
#[tokio::test]
async fn test_silence_shouldLastIllustrationSeconds() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("img")?;

    let speech = client(&MockSpeechProvider::working(), RecordingClock::new()).silence(&partition).await?;

    assert_eq!(speech.duration, 2.0);
    assert!(speech.marks.is_empty());
    assert!(speech.audio_path.is_file());
    Ok(())
}

/// Test that the gap limit rejects long silences between marks
#[test]
fn test_validate_marks_withGapLimit_shouldRejectLongGap() {
    let marks = vec![TimingMark::new("one", 0.0, 0.2), TimingMark::new("two", 0.5, 0.2)];

    assert!(validate_marks("one two", &marks, None).is_ok());
    assert!(matches!(
        validate_marks("one two", &marks, Some(1.0 / 30.0)),
        Err(TimingAlignmentError::GapTooLong { index: 0, .. })
    ));
}

/// Test that a unit missing from the text is rejected
#[test]
fn test_validate_marks_withUnknownUnit_shouldFail() {
    let marks = vec![TimingMark::new("three", 0.0, 0.2)];

    assert!(matches!(
        validate_marks("one two", &marks, None),
        Err(TimingAlignmentError::UnitNotFound { index: 0, .. })
    ));
}

/// Test that the gap limit also rejects unmarked audio after the last mark
#[tokio::test]
async fn test_synthesize_withGapLimitAndTrailingSilence_shouldFailAlignment() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let provider = MockSpeechProvider::trailing_silence(0.5);
    let strict = client(&provider, RecordingClock::new()).with_gap_limit(1.0 / 30.0);

    let result = strict.synthesize("one two", &partition, &CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(SynthesisError::TimingAlignment(TimingAlignmentError::TrailingGap { .. }))
    ));
    assert_eq!(provider.request_count(), 1);

    let lenient = client(&provider, RecordingClock::new());
    let speech = lenient.synthesize("one two", &partition, &CancellationToken::new()).await?;
    assert!(speech.duration > speech.marks[1].end() + 0.4);
    Ok(())
}
