/*!
 * On-disk speech cache.
 *
 * Synthesized audio and its timing marks are stored under a key derived from
 * the voice and the exact text, so re-running a book only calls the TTS
 * provider for segments whose text changed.
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::file_utils::FileManager;
use crate::providers::SpeechOutput;
use crate::speech::TimingMark;

/// Metadata stored next to the cached audio
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    extension: String,
    duration: Option<f64>,
    marks: Vec<TimingMark>,
}

/// Speech cache for storing and retrieving synthesized segments
#[derive(Debug, Clone)]
pub struct SpeechCache {
    /// Cache directory
    dir: PathBuf,

    /// Cache hit counter
    hits: Arc<RwLock<usize>>,

    /// Cache miss counter
    misses: Arc<RwLock<usize>>,
}

impl SpeechCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        FileManager::ensure_dir(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            hits: Arc::new(RwLock::new(0)),
            misses: Arc::new(RwLock::new(0)),
        })
    }

    fn key(voice: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(voice.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a previous synthesis of `text` with `voice`
    pub fn get(&self, voice: &str, text: &str) -> Option<SpeechOutput> {
        let key = Self::key(voice, text);
        match self.load(&key) {
            Some(output) => {
                *self.hits.write() += 1;
                debug!("Speech cache hit for {}", &key[..12]);
                Some(output)
            }
            None => {
                *self.misses.write() += 1;
                None
            }
        }
    }

    fn load(&self, key: &str) -> Option<SpeechOutput> {
        let meta_path = self.dir.join(format!("{}.json", key));
        let content = fs::read_to_string(&meta_path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring corrupt speech cache entry {}: {}", meta_path.display(), e);
                return None;
            }
        };
        let audio = fs::read(self.dir.join(format!("{}.{}", key, entry.extension))).ok()?;

        Some(SpeechOutput {
            audio: Bytes::from(audio),
            extension: entry.extension,
            marks: entry.marks,
            duration: entry.duration,
        })
    }

    /// Store a validated synthesis result, replacing any previous entry
    pub fn store(&self, voice: &str, text: &str, output: &SpeechOutput) -> Result<()> {
        let key = Self::key(voice, text);
        FileManager::write_atomic(
            self.dir.join(format!("{}.{}", key, output.extension)),
            &output.audio,
        )?;

        let entry = CacheEntry {
            extension: output.extension.clone(),
            duration: output.duration,
            marks: output.marks.clone(),
        };
        FileManager::write_atomic(
            self.dir.join(format!("{}.json", key)),
            serde_json::to_string(&entry)?.as_bytes(),
        )?;
        Ok(())
    }

    /// (hits, misses, hit rate)
    pub fn stats(&self) -> (usize, usize, f64) {
        let hits = *self.hits.read();
        let misses = *self.misses.read();
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };
        (hits, misses, hit_rate)
    }
}
