/*!
 * Integration tests for full controller runs
 */

use std::path::Path;

use anyhow::Result;
use bookcast::CancellationToken;
use bookcast::app_config::{Config, SpeechProviderKind};
use bookcast::app_controller::{Controller, RunSummary};
use bookcast::speech::silence::silent_wav_bytes;
use crate::common;

const BOOK: &str = r#"{
    "id": "tales",
    "title": "Short Tales",
    "chapters": [
        { "id": "c1", "title": "Morning", "blocks": [
            { "type": "text", "id": "p1", "text": "The sun rose. Birds sang loudly." }
        ]},
        { "id": "c2", "title": "Evening", "blocks": [
            { "type": "text", "id": "p1", "text": "The moon rose." },
            { "type": "text", "id": "p2", "text": "Everyone slept." }
        ]}
    ]
}"#;

fn controller(output_dir: &Path, scratch_dir: &Path) -> Result<Controller> {
    controller_with(output_dir, scratch_dir, |_| {})
}

fn controller_with(output_dir: &Path, scratch_dir: &Path, adjust: impl FnOnce(&mut Config)) -> Result<Controller> {
    let mut config = Config::default();
    config.speech.provider = SpeechProviderKind::Mock;
    config.speech.cache_enabled = false;
    config.pipeline.worker_count = 2;
    config.pipeline.capture_sessions = 1;
    config.output.output_dir = output_dir.to_path_buf();
    config.output.temp_dir = Some(scratch_dir.to_path_buf());
    adjust(&mut config);
    Controller::with_config(config)
}

fn total_duration(manifest: &serde_json::Value) -> f64 {
    manifest["total_duration"].as_f64().unwrap_or(-1.0)
}

/// Test that a run writes every chapter and the book info file
#[test]
fn test_run_withMockProvider_shouldWriteChaptersAndInfo() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book_path = common::create_test_file(dir.path(), "book.json", BOOK)?;
    let output = dir.path().join("out");
    let scratch = dir.path().join("scratch");
    let controller = controller(&output, &scratch)?;

    let summary = tokio_test::block_on(async {
        controller.run(&book_path, &[], None, false, &CancellationToken::new()).await
    })?;

    assert_eq!(summary, RunSummary { generated: 2, failed: 0, skipped: 0, book: None });
    assert!(output.join("tales_c1.json").is_file());
    assert!(output.join("tales_c2.json").is_file());

    let info = common::read_manifest(&output.join("tales_info.json"))?;
    assert_eq!(info["book_id"], "tales");
    assert_eq!(info["run_id"].as_str().map(str::len), Some(36));
    assert_eq!(info["chapters"][1]["units"].as_u64(), Some(2));
    assert_eq!(common::dir_entry_count(&scratch), 0);
    Ok(())
}

/// Test that existing outputs are skipped unless forced
#[test]
fn test_run_withExistingOutputs_shouldSkipUnlessForced() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book_path = common::create_test_file(dir.path(), "book.json", BOOK)?;
    let output = dir.path().join("out");
    let controller = controller(&output, &dir.path().join("scratch"))?;
    let selected = vec!["c2".to_string()];

    tokio_test::block_on(async {
        let cancel = CancellationToken::new();
        let first = controller.run(&book_path, &selected, None, false, &cancel).await?;
        let second = controller.run(&book_path, &selected, None, false, &cancel).await?;
        let forced = controller.run(&book_path, &selected, None, true, &cancel).await?;

        assert_eq!(first.generated, 1);
        assert_eq!(second, RunSummary { generated: 0, failed: 0, skipped: 1, book: None });
        assert_eq!(forced.generated, 1);
        Ok::<_, anyhow::Error>(())
    })?;

    assert!(!output.join("tales_c1.json").exists());
    Ok(())
}

/// Test that the plan matches what a run would segment
#[test]
fn test_plan_withSelection_shouldDescribeChapters() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let controller = controller(&dir.path().join("out"), &dir.path().join("scratch"))?;
    let book = bookcast::Book::from_json_str(BOOK)?;

    let plans = controller.plan(&book, &["c2".to_string()]);

    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].segments, 2);
    assert_eq!(plans[0].illustrations, 0);
    assert!(!plans[0].exists);
    assert!(plans[0].output_path.ends_with("tales_c2.json"));
    Ok(())
}

/// Test that the book artifact joins the chapters in book order
#[test]
fn test_run_withWholeBook_shouldJoinChaptersInOrder() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book_path = common::create_test_file(dir.path(), "book.json", BOOK)?;
    let output = dir.path().join("out");
    let controller = controller_with(&output, &dir.path().join("scratch"), |config| {
        config.output.whole_book = true;
    })?;

    let summary = tokio_test::block_on(async {
        controller.run(&book_path, &[], None, false, &CancellationToken::new()).await
    })?;

    assert_eq!(summary.generated, 2);
    assert_eq!(summary.book, Some(output.join("tales.json")));

    let book = common::read_manifest(&output.join("tales.json"))?;
    let c1 = total_duration(&common::read_manifest(&output.join("tales_c1.json"))?);
    let c2 = total_duration(&common::read_manifest(&output.join("tales_c2.json"))?);
    assert_eq!(book["chapters"][0]["chapter_id"], "c1");
    assert_eq!(book["chapters"][1]["chapter_id"], "c2");
    assert_eq!(book["chapters"][1]["offset"].as_f64(), Some(c1));
    assert!((total_duration(&book) - (c1 + c2)).abs() < 1e-9);

    let info = common::read_manifest(&output.join("tales_info.json"))?;
    assert_eq!(info["book"]["chapters"], serde_json::json!(["c1", "c2"]));
    assert!(info["book"]["error"].is_null());
    Ok(())
}

/// Test that chapters kept from an earlier run are read back into the book
#[test]
fn test_run_withWholeBookAndSkippedChapter_shouldReuseExistingArtifact() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book_path = common::create_test_file(dir.path(), "book.json", BOOK)?;
    let output = dir.path().join("out");
    let controller = controller_with(&output, &dir.path().join("scratch"), |config| {
        config.output.whole_book = true;
    })?;

    let summary = tokio_test::block_on(async {
        let cancel = CancellationToken::new();
        controller.run(&book_path, &["c2".to_string()], None, false, &cancel).await?;
        controller.run(&book_path, &[], None, false, &cancel).await
    })?;

    assert_eq!((summary.generated, summary.skipped), (1, 1));
    let book = common::read_manifest(&output.join("tales.json"))?;
    let c2 = total_duration(&common::read_manifest(&output.join("tales_c2.json"))?);
    assert_eq!(book["chapters"].as_array().map(Vec::len), Some(2));
    assert_eq!(book["chapters"][1]["chapter_id"], "c2");
    assert_eq!(book["chapters"][1]["duration"].as_f64(), Some(c2));

    let info = common::read_manifest(&output.join("tales_info.json"))?;
    assert_eq!(info["chapters"][1]["skipped"], true);
    Ok(())
}

/// Test that background music goes under the book instead of each chapter
#[test]
fn test_run_withWholeBookAndMusic_shouldMixAtBookLevel() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book_path = common::create_test_file(dir.path(), "book.json", BOOK)?;
    let music = dir.path().join("music.wav");
    std::fs::write(&music, silent_wav_bytes(1.0, 8_000)?)?;
    let output = dir.path().join("out");
    let controller = controller_with(&output, &dir.path().join("scratch"), |config| {
        config.output.whole_book = true;
        config.output.background_music = Some(music.clone());
    })?;

    tokio_test::block_on(async {
        controller.run(&book_path, &[], None, false, &CancellationToken::new()).await
    })?;

    let chapter = common::read_manifest(&output.join("tales_c1.json"))?;
    let book = common::read_manifest(&output.join("tales.json"))?;
    assert!(chapter["background"].is_null());
    assert_eq!(book["background"]["fit"], "loop");
    assert_eq!(book["background"]["source_duration"].as_f64(), Some(1.0));
    Ok(())
}
