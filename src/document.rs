/*!
 * Parsed book model.
 *
 * Books arrive already split into chapters and blocks by an external parser,
 * serialized as JSON. This module only loads that structure and selects the
 * chapters a run should cover.
 */

use anyhow::{Context, Result, anyhow};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A content block of a chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    /// A paragraph of narrated text
    Text {
        /// Stable block identifier
        id: String,
        /// Normalized paragraph text
        text: String,
    },
    /// An embedded illustration
    Image {
        /// Stable block identifier
        id: String,
        /// Path to the extracted image file
        path: PathBuf,
        /// Optional caption
        #[serde(default)]
        caption: Option<String>,
    },
}

impl Block {
    pub fn id(&self) -> &str {
        match self {
            Block::Text { id, .. } | Block::Image { id, .. } => id,
        }
    }
}

/// One chapter of a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Chapter {
    /// Number of text characters in the chapter
    pub fn text_len(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| match block {
                Block::Text { text, .. } => text.chars().count(),
                Block::Image { .. } => 0,
            })
            .sum()
    }

    /// Number of illustrations in the chapter
    pub fn image_count(&self) -> usize {
        self.blocks.iter().filter(|b| matches!(b, Block::Image { .. })).count()
    }
}

/// A parsed book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub chapters: Vec<Chapter>,
}

impl Book {
    /// Load a book from a JSON document
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read book file: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse book file: {}", path.display()))
    }

    /// Parse a book from JSON, filling a content-derived id when missing
    pub fn from_json_str(content: &str) -> Result<Self> {
        let mut book: Book = serde_json::from_str(content)?;
        if book.chapters.is_empty() {
            return Err(anyhow!("Book '{}' has no chapters", book.title));
        }
        if book.id.trim().is_empty() {
            book.id = book.content_id();
        }
        Ok(book)
    }

    /// Short hash of title and chapter ids
    fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        for chapter in &self.chapters {
            hasher.update(chapter.id.as_bytes());
        }
        format!("{:x}", hasher.finalize())[..12].to_string()
    }

    /// Chapters matching `selected` ids, in book order.
    ///
    /// An empty selection means every chapter. Unknown ids are logged and ignored.
    pub fn select_chapters(&self, selected: &[String]) -> Vec<&Chapter> {
        if selected.is_empty() {
            return self.chapters.iter().collect();
        }

        for id in selected {
            if !self.chapters.iter().any(|c| &c.id == id) {
                warn!("Unknown chapter id '{}' ignored", id);
            }
        }

        self.chapters
            .iter()
            .filter(|c| selected.iter().any(|id| id == &c.id))
            .collect()
    }
}
