/*!
 * Tests for loading books
 */

use anyhow::Result;
use bookcast::document::{Block, Book};
use crate::common;

const BOOK: &str = r#"{
    "id": "river-tales",
    "title": "River Tales",
    "author": "Anonymous",
    "chapters": [
        { "id": "c1", "title": "Source", "blocks": [
            { "type": "text", "id": "p1", "text": "The spring rises." },
            { "type": "image", "id": "i1", "path": "img/spring.png", "caption": "The spring" }
        ]},
        { "id": "c2", "title": "Delta" }
    ]
}"#;

/// Test that a book file is parsed with its explicit id
#[test]
fn test_from_json_file_withValidBook_shouldKeepId() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = common::create_test_file(dir.path(), "book.json", BOOK)?;

    let book = Book::from_json_file(&path)?;

    assert_eq!(book.id, "river-tales");
    assert_eq!(book.author.as_deref(), Some("Anonymous"));
    assert!(book.chapters[1].blocks.is_empty());
    assert!(matches!(
        &book.chapters[0].blocks[1],
        Block::Image { caption: Some(caption), .. } if caption == "The spring"
    ));
    Ok(())
}

/// Test that the generated id depends only on the content
#[test]
fn test_from_json_str_withoutId_shouldGenerateStableId() -> Result<()> {
    let without_id = BOOK.replace(r#""id": "river-tales","#, "");

    let first = Book::from_json_str(&without_id)?;
    let second = Book::from_json_str(&without_id)?;

    assert_eq!(first.id, second.id);
    assert_eq!(first.id.len(), 12);
    assert!(first.id.chars().all(|c| c.is_ascii_hexdigit()));
    Ok(())
}

/// Test that a book without chapters is rejected
#[test]
fn test_from_json_str_withNoChapters_shouldFail() {
    assert!(Book::from_json_str(r#"{ "title": "Empty", "chapters": [] }"#).is_err());
}

/// Test that a missing file is reported with its path
#[test]
fn test_from_json_file_withMissingFile_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let error = Book::from_json_file(dir.path().join("missing.json")).unwrap_err();

    assert!(error.to_string().contains("missing.json"));
    Ok(())
}
