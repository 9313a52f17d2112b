/*!
 * Tests for scratch space and output files
 */

use anyhow::Result;
use bookcast::file_utils::{FileManager, ScratchArea, sanitize_file_name};
use crate::common;

/// Test that the scratch area is removed with its owner
#[test]
fn test_scratch_area_withDrop_shouldRemoveDirectory() -> Result<()> {
    let parent = common::create_temp_dir()?;
    let area = ScratchArea::new(Some(parent.path()))?;
    let root = area.path().to_path_buf();
    let partition = area.partition("c1_00000")?;
    std::fs::write(partition.file("speech.wav"), b"RIFF")?;
    partition.subdir("capture")?;

    drop(partition);
    assert!(area.is_empty()?);
    drop(area);

    assert!(!root.exists());
    assert_eq!(common::dir_entry_count(parent.path()), 0);
    Ok(())
}

/// Test that partition keys are sanitized into file names
#[test]
fn test_partition_withUnsafeKey_shouldStayInsideArea() -> Result<()> {
    let area = ScratchArea::new(None)?;
    let partition = area.partition("../c1/0")?;

    assert!(partition.path().starts_with(area.path()));
    assert_eq!(partition.path().parent(), Some(area.path()));
    Ok(())
}

/// Test that an atomic write replaces an existing file
#[test]
fn test_write_atomic_withExistingFile_shouldReplaceIt() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = common::create_test_file(dir.path(), "info.json", "old")?;

    FileManager::write_atomic(&path, b"new")?;

    assert_eq!(FileManager::read_to_string(&path)?, "new");
    assert_eq!(common::dir_entry_count(dir.path()), 1);
    Ok(())
}

/// Test file name sanitization
#[test]
fn test_sanitize_file_name_withUnsafeCharacters_shouldReplaceThem() {
    assert_eq!(sanitize_file_name("a/b:c"), "a_b_c");
    assert_eq!(sanitize_file_name("  第一章 "), "第一章");
    assert_eq!(sanitize_file_name(".."), "_");
}
