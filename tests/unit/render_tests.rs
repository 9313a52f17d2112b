/*!
 * Tests for the render driver and surfaces
 */

use std::sync::Arc;

use anyhow::Result;
use bookcast::CancellationToken;
use bookcast::errors::RenderError;
use bookcast::file_utils::ScratchArea;
use bookcast::render::driver::frame_count_for;
use bookcast::render::{HtmlSnapshotSurface, RenderDriver, TimelineSurface};
use bookcast::speech::{SpeechResult, TimingMark};
use crate::common;

fn speech(marks: Vec<TimingMark>) -> SpeechResult {
    let duration = marks.last().map(|m| m.end()).unwrap_or(1.0);
    SpeechResult { audio_path: "speech.wav".into(), duration, marks }
}

fn word_marks() -> Vec<TimingMark> {
    vec![
        TimingMark::new("Quiet", 0.0, 0.4),
        TimingMark::new("river", 0.4, 0.4),
        TimingMark::new("flows", 0.8, 0.4),
    ]
}

/// Test that the capture has exactly the audio frame count
#[tokio::test]
async fn test_render_withTimelineSurface_shouldMatchAudioFrames() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let surface = TimelineSurface::new();
    let driver = RenderDriver::new(Arc::new(surface.clone()), 1, 60);
    let segment = common::text_segment("c1", 0, "Quiet river flows");

    let media = driver.render(&segment, &speech(word_marks()), &partition, &CancellationToken::new()).await?;

    assert_eq!(media.frame_count(), frame_count_for(1.2, 30));
    assert_eq!(media.frame_count(), 36);
    let spoken: Vec<&str> = media.runs.iter().filter_map(|run| run.state.highlighted_text()).collect();
    assert_eq!(spoken, vec!["Quiet", "river", "flows"]);
    assert_eq!(surface.active_sessions(), 0);
    Ok(())
}

/// Test that a short capture is padded with the last frame
#[tokio::test]
async fn test_render_withShortCapture_shouldPadLastFrame() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let surface = TimelineSurface::new().with_frame_skew(-4, 1);
    let driver = RenderDriver::new(Arc::new(surface), 1, 60);
    let segment = common::text_segment("c1", 0, "Quiet river flows");

    let media = driver.render(&segment, &speech(word_marks()), &partition, &CancellationToken::new()).await?;

    assert_eq!(media.frame_count(), 36);
    assert_eq!(media.runs.last().and_then(|run| run.state.highlighted_text()), Some("flows"));
    Ok(())
}

/// Test that a surface failure is reported and no session stays open
#[tokio::test]
async fn test_render_withFailingSurface_shouldReturnSurfaceError() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let surface = TimelineSurface::new().with_failing_sessions(1);
    let driver = RenderDriver::new(Arc::new(surface.clone()), 1, 60);
    let segment = common::text_segment("c1", 0, "Quiet river flows");

    let result = driver.render(&segment, &speech(word_marks()), &partition, &CancellationToken::new()).await;

    assert!(matches!(result, Err(RenderError::Surface(_))));
    assert_eq!(surface.active_sessions(), 0);
    Ok(())
}

/// Test that a cancelled token stops the capture
#[tokio::test]
async fn test_render_withCancelledToken_shouldStop() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let surface = TimelineSurface::new();
    let driver = RenderDriver::new(Arc::new(surface.clone()), 1, 60);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = driver.render(&common::text_segment("c1", 0, "Quiet river flows"), &speech(word_marks()), &partition, &cancel).await;

    assert!(matches!(result, Err(RenderError::Cancelled)));
    assert_eq!(surface.sessions_opened(), 0);
    Ok(())
}

/// Test that the HTML surface writes one page per distinct state
#[tokio::test]
async fn test_render_withHtmlSurface_shouldWritePagesAndIndex() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let driver = RenderDriver::new(Arc::new(HtmlSnapshotSurface::new(None)), 1, 60);
    let segment = common::text_segment("c1", 0, "Quiet river flows");

    let media = driver.render(&segment, &speech(word_marks()), &partition, &CancellationToken::new()).await?;

    assert_eq!(media.frame_count(), 36);
    let capture = partition.path().join("capture");
    for page in ["page_0000.html", "page_0001.html", "page_0002.html"] {
        assert!(capture.join(page).is_file(), "{} missing", page);
    }
    let first_page = std::fs::read_to_string(capture.join("page_0000.html"))?;
    assert!(first_page.contains("Quiet"));

    let index: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(capture.join("frames.json"))?)?;
    assert_eq!(index["total_frames"].as_u64(), Some(36));
    Ok(())
}

/// Test that a capture dropped mid-session leaves no HTML session open
#[tokio::test]
async fn test_render_withDroppedCapture_shouldAbortHtmlSession() -> Result<()> {
    let scratch = ScratchArea::new(None)?;
    let partition = scratch.partition("c1_0")?;
    let surface = HtmlSnapshotSurface::new(None);
    let driver = RenderDriver::new(Arc::new(surface.clone()), 1, 60);
    let words: Vec<String> = (0..400).map(|i| format!("w{}", i)).collect();
    let marks = words
        .iter()
        .enumerate()
        .map(|(i, word)| TimingMark::new(word, i as f64 * 0.1, 0.1))
        .collect();
    let segment = common::text_segment("c1", 0, &words.join(" "));
    let speech = speech(marks);
    let cancel = CancellationToken::new();

    let mut capture = Box::pin(driver.render(&segment, &speech, &partition, &cancel));
    while surface.open_sessions() == 0 {
        assert!(futures::poll!(capture.as_mut()).is_pending(), "capture finished before the session was seen");
        tokio::task::yield_now().await;
    }
    assert_eq!(surface.open_sessions(), 1);
    drop(capture);

    assert_eq!(surface.open_sessions(), 0);
    Ok(())
}
