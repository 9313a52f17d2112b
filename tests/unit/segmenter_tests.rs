/*!
 * Tests for chapter segmentation
 */

use std::sync::Arc;

use bookcast::app_config::RenderConfig;
use bookcast::document::{Block, Chapter};
use bookcast::segmenter::{Segmenter, split_into_sentences, split_text};

fn sentence(len: usize) -> String {
    format!("{}.", "x".repeat(len - 1))
}

fn chapter(blocks: Vec<Block>) -> Chapter {
    Chapter { id: "c1".to_string(), title: "Opening".to_string(), blocks }
}

fn text_block(id: &str, text: &str) -> Block {
    Block::Text { id: id.to_string(), text: text.to_string() }
}

fn segmenter(max_chars: usize) -> Segmenter {
    Segmenter::new(max_chars, Arc::new(RenderConfig::default()))
}

/// Test the 200/250/400 packing example
#[test]
fn test_split_text_withThreeSentences_shouldPackFirstTwo() {
    let text = format!("{}{}{}", sentence(200), sentence(250), sentence(400));

    let chunks = split_text(&text, 500);

    let lengths: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
    assert_eq!(lengths, vec![450, 400]);
}

/// Test that a sentence longer than the limit stays whole
#[test]
fn test_split_text_withOversizedSentence_shouldKeepItWhole() {
    let text = format!("{}{}", sentence(30), sentence(5));

    let chunks = split_text(&text, 10);

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chars().count(), 30);
}

/// Test that whitespace after a terminator counts toward the next sentence
#[test]
fn test_split_text_withSpaceAfterTerminator_shouldCountItForNextSentence() {
    assert_eq!(split_into_sentences("One. Two."), vec!["One.", " Two."]);

    let chunks = split_text("aaaaaaaaa. bbbb. ccc.", 10);

    assert_eq!(chunks, vec!["aaaaaaaaa.", "bbbb.", "ccc."]);
}

/// Test that no chunk exceeds the limit unless it is a single sentence
#[test]
fn test_split_text_withManySentences_shouldRespectLimit() {
    let text = "Short one. Another short one! A third? And the last one.";

    for chunk in split_text(text, 25) {
        assert!(chunk.chars().count() <= 25, "chunk too long: {}", chunk);
    }
}

/// Test that segmenting the same chapter twice gives the same segments
#[test]
fn test_segment_chapter_withSameInput_shouldBeIdempotent() {
    let chapter = chapter(vec![
        text_block("p1", "第一句。第二句！Third sentence? Fourth."),
        Block::Image { id: "img1".to_string(), path: "images/1.png".into(), caption: None },
        text_block("p2", "Closing words."),
    ]);
    let segmenter = segmenter(12);

    let first = segmenter.segment_chapter(&chapter);
    let second = segmenter.segment_chapter(&chapter);

    assert_eq!(first, second);
    let indices: Vec<usize> = first.iter().map(|s| s.index).collect();
    assert_eq!(indices, (0..first.len()).collect::<Vec<_>>());
}

/// Test that images become illustration segments
#[test]
fn test_segment_chapter_withImages_shouldCreateIllustrationSegments() {
    let chapter = chapter(vec![
        text_block("p1", "Look at this."),
        Block::Image { id: "img1".to_string(), path: "images/1.png".into(), caption: None },
        Block::Image { id: "img2".to_string(), path: "images/2.png".into(), caption: Some("A map of the valley".to_string()) },
    ]);

    let segments = segmenter(500).segment_chapter(&chapter);

    assert_eq!(segments.len(), 3);
    assert!(segments[1].is_illustration());
    assert_eq!(segments[1].text, None);
    assert!(!segments[2].is_illustration());
    assert_eq!(segments[2].text.as_deref(), Some("A map of the valley"));
    assert_eq!(segments[2].illustration.as_deref(), Some(std::path::Path::new("images/2.png")));
}

/// Test that whitespace-only text produces no segment
#[test]
fn test_segment_chapter_withBlankText_shouldSkipBlock() {
    let chapter = chapter(vec![text_block("p1", "   \n "), text_block("p2", "Real text.")]);

    let segments = segmenter(500).segment_chapter(&chapter);

    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].index, 0);
    assert_eq!(segments[0].chapter_id, "c1");
    assert_eq!(segments[0].chapter_title, "Opening");
}
