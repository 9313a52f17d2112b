/*!
 * Tests for chapter and book composition
 */

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use bookcast::assembly::{SegmentAssembler, SegmentUnit};
use bookcast::encoder::ManifestEncoder;
use bookcast::errors::CompositionError;
use bookcast::pipeline::{BackgroundTrack, BookChapter, BookCompositor, ChapterCompositor};
use bookcast::render::{CapturedMedia, FrameRun, VisualState};
use bookcast::speech::silence::silent_wav_bytes;
use bookcast::speech::{SpeechResult, TimingMark};
use crate::common::{self, FailingEncoder};

fn unit(index: usize, duration: f64) -> SegmentUnit {
    let segment = common::text_segment("c1", index, "Hi");
    let speech = SpeechResult {
        audio_path: format!("speech_{}.wav", index).into(),
        duration,
        marks: vec![TimingMark::new("Hi", 0.0, duration)],
    };
    let media = CapturedMedia {
        runs: vec![FrameRun {
            state: VisualState { text: Some(Arc::from("Hi")), highlight: Some(0..2), illustration: None },
            frames: (duration * 30.0).round() as u64,
            still: None,
        }],
        video: None,
        fps: 30,
    };
    SegmentAssembler::new(1).assemble(&segment, &speech, media).expect("capture matches audio")
}

fn manifest_compositor() -> ChapterCompositor {
    ChapterCompositor::new(Arc::new(ManifestEncoder::new()), common::render_config())
}

/// Test that units are placed back to back
#[tokio::test]
async fn test_compose_withOrderedUnits_shouldSumDurations() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let out = dir.path().join("c1.json");

    let video = manifest_compositor()
        .compose("c1", "One", vec![unit(0, 1.0), unit(1, 2.0), unit(3, 0.5)], &out)
        .await?;

    assert_eq!(video.indices, vec![0, 1, 3]);
    assert!((video.duration - 3.5).abs() < 1e-9);
    assert!(out.is_file());

    let manifest = common::read_manifest(&out)?;
    assert_eq!(manifest["units"][2]["offset"].as_f64(), Some(3.0));
    assert_eq!(manifest["total_frames"].as_u64(), Some(105));
    // Only the artifact is left behind
    assert_eq!(common::dir_entry_count(dir.path()), 1);
    Ok(())
}

/// Test that out-of-order units are rejected before encoding
#[tokio::test]
async fn test_compose_withOutOfOrderUnits_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let out = dir.path().join("c1.json");

    let result = manifest_compositor().compose("c1", "One", vec![unit(2, 1.0), unit(1, 1.0)], &out).await;

    assert!(matches!(result, Err(CompositionError::OutOfOrder { previous: 2, next: 1 })));
    assert!(!out.exists());
    Ok(())
}

/// Test that an empty chapter is rejected
#[tokio::test]
async fn test_compose_withNoUnits_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let result = manifest_compositor().compose("c1", "One", Vec::new(), &dir.path().join("c1.json")).await;

    assert!(matches!(result, Err(CompositionError::NoUnits(id)) if id == "c1"));
    Ok(())
}

/// Test that an encoder failure leaves no file behind
#[tokio::test]
async fn test_compose_withFailingEncoder_shouldLeaveNothing() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let out = dir.path().join("c1.json");
    let compositor = ChapterCompositor::new(Arc::new(FailingEncoder), common::render_config());

    let result = compositor.compose("c1", "One", vec![unit(0, 1.0)], &out).await;

    assert!(matches!(result, Err(CompositionError::Encoder(_))));
    assert!(!out.exists());
    assert_eq!(common::dir_entry_count(dir.path()), 0);
    Ok(())
}

/// Test that a missing background track fails the chapter
#[tokio::test]
async fn test_compose_withMissingBackground_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let compositor = manifest_compositor().with_background(BackgroundTrack {
        path: dir.path().join("missing.wav"),
        volume: 0.2,
    });

    let result = compositor.compose("c1", "One", vec![unit(0, 1.0)], &dir.path().join("c1.json")).await;

    assert!(matches!(result, Err(CompositionError::MissingBackground(_))));
    assert_eq!(common::dir_entry_count(dir.path()), 0);
    Ok(())
}

/// Test that a short background track is looped over the chapter
#[tokio::test]
async fn test_compose_withShortBackground_shouldPlanLoop() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let music = dir.path().join("music.wav");
    std::fs::write(&music, silent_wav_bytes(1.0, 8_000)?)?;
    let out = dir.path().join("c1.json");

    manifest_compositor()
        .with_background(BackgroundTrack { path: music, volume: 0.2 })
        .compose("c1", "One", vec![unit(0, 1.0), unit(1, 1.5)], &out)
        .await?;

    let manifest = common::read_manifest(&out)?;
    assert_eq!(manifest["background"]["fit"], "loop");
    assert_eq!(manifest["background"]["plays"].as_u64(), Some(3));
    assert_eq!(manifest["background"]["source_duration"].as_f64(), Some(1.0));
    Ok(())
}

/// Test that the output directory is created when missing
#[tokio::test]
async fn test_compose_withMissingOutputDir_shouldCreateIt() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let out = dir.path().join("nested").join("c1.json");

    manifest_compositor().compose("c1", "One", vec![unit(0, 1.0)], &out).await?;

    assert!(Path::new(&out).is_file());
    Ok(())
}

fn book_chapter(dir: &Path, chapter_id: &str, duration: f64) -> Result<BookChapter> {
    let path = common::create_test_file(dir, &format!("{}.json", chapter_id), "{}")?;
    Ok(BookChapter { chapter_id: chapter_id.to_string(), title: chapter_id.to_uppercase(), path, duration })
}

/// Test that chapters are joined in the given order with exact offsets
#[tokio::test]
async fn test_compose_book_withChapters_shouldSumDurations() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let chapters = vec![book_chapter(dir.path(), "c2", 1.25)?, book_chapter(dir.path(), "c1", 2.5)?];
    let out = dir.path().join("book.json");
    let compositor = BookCompositor::new(Arc::new(ManifestEncoder::new()), common::render_config());

    let video = compositor.compose("tales", "Tales", &chapters, &out).await?;

    assert_eq!(video.chapters, vec!["c2".to_string(), "c1".to_string()]);
    assert!((video.duration - 3.75).abs() < 1e-9);
    let manifest = common::read_manifest(&out)?;
    assert_eq!(manifest["chapters"][1]["offset"].as_f64(), Some(1.25));
    assert_eq!(manifest["chapters"][1]["title"], "C1");
    Ok(())
}

/// Test that a book without chapters is rejected
#[tokio::test]
async fn test_compose_book_withNoChapters_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let out = dir.path().join("book.json");
    let compositor = BookCompositor::new(Arc::new(ManifestEncoder::new()), common::render_config());

    let result = compositor.compose("tales", "Tales", &[], &out).await;

    assert!(matches!(result, Err(CompositionError::NoChapters(id)) if id == "tales"));
    assert!(!out.exists());
    Ok(())
}

/// Test that a failed book encode leaves no book file
#[tokio::test]
async fn test_compose_book_withFailingEncoder_shouldLeaveNothing() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let chapters = vec![book_chapter(dir.path(), "c1", 1.0)?];
    let out = dir.path().join("book.json");
    let compositor = BookCompositor::new(Arc::new(FailingEncoder), common::render_config());

    let result = compositor.compose("tales", "Tales", &chapters, &out).await;

    assert!(matches!(result, Err(CompositionError::Encoder(_))));
    assert!(!out.exists());
    assert_eq!(common::dir_entry_count(dir.path()), 1);
    Ok(())
}
