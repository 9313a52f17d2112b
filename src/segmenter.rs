/*!
 * Chapter segmentation.
 *
 * Text blocks are split at sentence boundaries and greedily packed into
 * segments of at most `max_chars` characters. A sentence is never split, so a
 * single sentence longer than the threshold becomes its own oversized segment.
 * Image blocks become illustration segments, narrated with their caption when
 * they have one. Indices are contiguous over
 * the whole chapter, which fixes the final order of the chapter video.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

use crate::app_config::RenderConfig;
use crate::document::{Block, Chapter};

/// Sentence terminators, optionally followed by closing quotes or brackets
static SENTENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s).*?[。！？!?.…]+["'”’」』)）]*"#).unwrap()
});

/// Unit of work: one narrated stretch of text or one illustration
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position within the chapter; defines output order
    pub index: usize,

    /// Stable identifier derived from the block id and content
    pub id: String,

    /// Owning chapter
    pub chapter_id: String,

    /// Chapter title, for renderers that show it
    pub chapter_title: String,

    /// Narrated text; `None` for silent illustrations
    pub text: Option<String>,

    /// Illustration shown above the text, or alone
    pub illustration: Option<PathBuf>,

    /// Rendering parameters
    pub render: Arc<RenderConfig>,
}

impl Segment {
    pub fn is_illustration(&self) -> bool {
        self.text.is_none() && self.illustration.is_some()
    }

    /// Character count of the narrated text
    pub fn char_len(&self) -> usize {
        self.text.as_deref().map(|t| t.chars().count()).unwrap_or(0)
    }
}

/// Splits chapters into bounded segments
#[derive(Debug, Clone)]
pub struct Segmenter {
    max_chars: usize,
    render: Arc<RenderConfig>,
}

impl Segmenter {
    pub fn new(max_chars: usize, render: Arc<RenderConfig>) -> Self {
        Self {
            max_chars: max_chars.max(1),
            render,
        }
    }

    /// Segment every block of `chapter`, numbering segments from 0
    pub fn segment_chapter(&self, chapter: &Chapter) -> Vec<Segment> {
        let mut segments = Vec::new();

        for block in &chapter.blocks {
            match block {
                Block::Text { id, text } => {
                    for chunk in split_text(text, self.max_chars) {
                        segments.push(Segment {
                            index: segments.len(),
                            id: format!("{}_{}", id, short_hash(&chunk)),
                            chapter_id: chapter.id.clone(),
                            chapter_title: chapter.title.clone(),
                            text: Some(chunk),
                            illustration: None,
                            render: self.render.clone(),
                        });
                    }
                }
                Block::Image { id, path, caption } => {
                    let caption = caption
                        .as_deref()
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string);
                    segments.push(Segment {
                        index: segments.len(),
                        id: id.clone(),
                        chapter_id: chapter.id.clone(),
                        chapter_title: chapter.title.clone(),
                        text: caption,
                        illustration: Some(path.clone()),
                        render: self.render.clone(),
                    });
                }
            }
        }

        segments
    }
}

/// Split `text` into sentences, keeping terminators and closing quotes on the
/// sentence they close. Whitespace after a terminator starts the next sentence
/// and counts toward its length.
pub fn split_into_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut last_end = 0;

    for m in SENTENCE_REGEX.find_iter(text) {
        if m.end() > m.start() {
            sentences.push(&text[m.start()..m.end()]);
        }
        last_end = m.end();
    }

    if last_end < text.len() {
        sentences.push(&text[last_end..]);
    }

    sentences
}

/// Greedily pack sentences into chunks of at most `max_chars` characters.
///
/// A sentence that alone exceeds `max_chars` becomes its own chunk.
/// Chunks are trimmed; whitespace-only chunks are dropped.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in split_into_sentences(text) {
        let sentence_len = sentence.chars().count();
        if current_len + sentence_len <= max_chars {
            current.push_str(sentence);
            current_len += sentence_len;
        } else {
            push_trimmed(&mut chunks, &current);
            current = sentence.to_string();
            current_len = sentence_len;
        }
    }
    push_trimmed(&mut chunks, &current);

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, chunk: &str) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// First 8 hex characters of the SHA-256 of `text`
fn short_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))[..8].to_string()
}
