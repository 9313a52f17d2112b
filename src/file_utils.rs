use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

// @module: Scratch storage and output file utilities

// @struct: Run-level scratch directory, partitioned per segment
#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
}

impl ScratchArea {
    // @creates: Fresh scratch directory under `parent`, or the system temp dir
    pub fn new(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bookcast-");
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!("Scratch area at {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserve the partition `key`; fails if another holder already owns it
    pub fn partition(&self, key: &str) -> io::Result<SegmentScratch> {
        let path = self.dir.path().join(sanitize_file_name(key));
        fs::create_dir(&path)?;
        Ok(SegmentScratch { path })
    }

    /// Whether every partition has been released
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(fs::read_dir(self.dir.path())?.next().is_none())
    }
}

// @struct: One segment's private scratch directory, removed on drop
#[derive(Debug)]
pub struct SegmentScratch {
    path: PathBuf,
}

impl SegmentScratch {
    pub fn path(&self) -> &Path {
        &self.path
    }

    // @returns: Path of `name` inside this partition
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    // @creates: Sub-directory inside this partition
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.path.join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }
}

impl Drop for SegmentScratch {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Released scratch {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to release scratch {}: {}", self.path.display(), e),
        }
    }
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    // @generates: Whole-book artifact path `{book}.{ext}` in `output_dir`
    pub fn book_output_path<P: AsRef<Path>>(output_dir: P, book_id: &str, extension: &str) -> PathBuf {
        output_dir
            .as_ref()
            .join(format!("{}.{}", sanitize_file_name(book_id), extension))
    }

    // @generates: Chapter artifact path `{book}_{chapter}.{ext}` in `output_dir`
    pub fn chapter_output_path<P: AsRef<Path>>(
        output_dir: P,
        book_id: &str,
        chapter_id: &str,
        extension: &str,
    ) -> PathBuf {
        let file_name = format!(
            "{}_{}.{}",
            sanitize_file_name(book_id),
            sanitize_file_name(chapter_id),
            extension
        );
        output_dir.as_ref().join(file_name)
    }

    /// Write `content` to `path` through a temporary sibling file, so readers
    /// never observe a partial file
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::ensure_dir(parent)?;

        let mut temp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;
        temp.write_all(content)?;
        temp.flush()?;
        temp.persist(path)
            .with_context(|| format!("Failed to write file: {:?}", path))?;
        Ok(())
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }
}

/// Replace characters that are unsafe in file names
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
