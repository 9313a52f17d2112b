use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::app_config::{Config, EncoderKind, SpeechProviderKind, SurfaceKind};
use crate::cancel::CancellationToken;
use crate::document::{Book, Chapter};
use crate::encoder::{FfmpegEncoder, ManifestEncoder, MediaEncoder};
use crate::file_utils::FileManager;
use crate::errors::CompositionError;
use crate::pipeline::{
    BackgroundTrack, BookChapter, BookCompositor, BookVideo, ChapterCompositor, ChapterJob, ChapterReport,
    PipelineOrchestrator,
};
use crate::providers::chat::ChatStyleRewriter;
use crate::providers::command::CommandSpeechProvider;
use crate::providers::mock::MockSpeechProvider;
use crate::providers::SpeechProvider;
use crate::render::{HtmlSnapshotSurface, RenderDriver, RenderSurface, TimelineSurface};
use crate::retry::{SharedClock, TokioClock};
use crate::segmenter::Segmenter;
use crate::speech::cache::SpeechCache;
use crate::speech::SpeechTimingClient;

// @module: Application controller for book-to-video runs

/// What a run would do for one chapter
#[derive(Debug, Clone, Serialize)]
pub struct ChapterPlan {
    pub chapter_id: String,
    pub title: String,
    pub segments: usize,
    pub illustrations: usize,
    pub characters: usize,
    pub output_path: PathBuf,
    pub exists: bool,
}

/// Per-chapter line of the book info file
#[derive(Debug, Clone, Serialize)]
struct ChapterInfo {
    id: String,
    title: String,
    output: Option<PathBuf>,
    duration: Option<f64>,
    units: usize,
    failed_segments: Vec<usize>,
    error: Option<String>,
    /// Output kept from an earlier run
    skipped: bool,
}

/// Whole-book artifact line of the book info file
#[derive(Debug, Clone, Serialize)]
struct BookArtifactInfo {
    output: PathBuf,
    duration: Option<f64>,
    chapters: Vec<String>,
    error: Option<String>,
}

/// Written next to the chapter artifacts after each run
#[derive(Debug, Clone, Serialize)]
struct BookInfo {
    run_id: String,
    book_id: String,
    title: String,
    author: Option<String>,
    generated_at: String,
    chapters: Vec<ChapterInfo>,
    book: Option<BookArtifactInfo>,
}

/// Result of the whole-book step
enum BookOutcome {
    Written(BookVideo),
    UpToDate(PathBuf),
    Failed(PathBuf, CompositionError),
}

/// Outcome counts of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Whole-book artifact written by this run
    pub book: Option<PathBuf>,
}

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn segmenter(&self) -> Segmenter {
        Segmenter::new(self.config.segmenter.max_chars_per_segment, Arc::new(self.config.render.clone()))
    }

    fn output_path(&self, book: &Book, chapter: &Chapter) -> PathBuf {
        FileManager::chapter_output_path(
            &self.config.output.output_dir,
            &book.id,
            &chapter.id,
            self.config.output.encoder.extension(),
        )
    }

    /// Describe the chapters a run over `selected` would generate
    pub fn plan(&self, book: &Book, selected: &[String]) -> Vec<ChapterPlan> {
        let segmenter = self.segmenter();
        book.select_chapters(selected)
            .into_iter()
            .map(|chapter| {
                let segments = segmenter.segment_chapter(chapter);
                let output_path = self.output_path(book, chapter);
                ChapterPlan {
                    chapter_id: chapter.id.clone(),
                    title: chapter.title.clone(),
                    illustrations: segments.iter().filter(|s| s.is_illustration()).count(),
                    characters: segments.iter().map(|s| s.char_len()).sum(),
                    segments: segments.len(),
                    exists: FileManager::file_exists(&output_path),
                    output_path,
                }
            })
            .collect()
    }

    fn build_speech_provider(&self) -> Result<Arc<dyn SpeechProvider>> {
        match self.config.speech.provider {
            SpeechProviderKind::Mock => Ok(Arc::new(MockSpeechProvider::working())),
            SpeechProviderKind::Command => {
                let command = self
                    .config
                    .speech
                    .command
                    .clone()
                    .ok_or_else(|| anyhow!("Speech provider 'command' has no command configured"))?;
                Ok(Arc::new(CommandSpeechProvider::new(command)))
            }
        }
    }

    fn build_surface(&self) -> Arc<dyn RenderSurface> {
        match self.config.output.surface {
            SurfaceKind::Timeline => Arc::new(TimelineSurface::new()),
            SurfaceKind::Html => Arc::new(HtmlSnapshotSurface::new(self.config.output.rasterizer.clone())),
        }
    }

    async fn build_encoder(&self) -> Result<Arc<dyn MediaEncoder>> {
        match self.config.output.encoder {
            EncoderKind::Manifest => Ok(Arc::new(ManifestEncoder::new())),
            EncoderKind::Ffmpeg => {
                let encoder = FfmpegEncoder::new(self.config.output.ffmpeg_binary.clone());
                if !encoder.is_available().await {
                    return Err(anyhow!(
                        "ffmpeg not found at '{}'; install it or choose the manifest encoder",
                        self.config.output.ffmpeg_binary
                    ));
                }
                Ok(Arc::new(encoder))
            }
        }
    }

    /// Wire every collaborator from the configuration
    pub async fn build_orchestrator(&self) -> Result<PipelineOrchestrator> {
        let encoder = self.build_encoder().await?;
        self.orchestrator_with(encoder)
    }

    fn background_track(&self) -> Option<BackgroundTrack> {
        self.config.output.background_music.as_ref().map(|path| BackgroundTrack {
            path: path.clone(),
            volume: self.config.output.background_volume,
        })
    }

    fn orchestrator_with(&self, encoder: Arc<dyn MediaEncoder>) -> Result<PipelineOrchestrator> {
        let config = &self.config;
        let clock: SharedClock = Arc::new(TokioClock);

        let mut speech = SpeechTimingClient::new(self.build_speech_provider()?, &config.speech, clock.clone());
        if config.speech.cache_enabled {
            let dir = config.speech.resolved_cache_dir();
            debug!("Speech cache at {:?}", dir);
            speech = speech.with_cache(SpeechCache::new(dir)?);
        }
        if config.pipeline.strict_gap_check {
            speech = speech.with_gap_limit(config.render.frame_seconds());
        }

        let renderer = RenderDriver::new(
            self.build_surface(),
            config.pipeline.capture_sessions,
            config.pipeline.max_correction_frames,
        );

        let mut compositor = ChapterCompositor::new(encoder, Arc::new(config.render.clone()));
        if !config.output.whole_book {
            if let Some(track) = self.background_track() {
                compositor = compositor.with_background(track);
            }
        }

        let mut orchestrator = PipelineOrchestrator::new(config.pipeline.clone(), speech, renderer, compositor, clock);
        if config.style.enabled {
            let rewriter = ChatStyleRewriter::new(&config.style).map_err(|e| anyhow!("Style rewriter: {}", e))?;
            orchestrator = orchestrator.with_style(Arc::new(rewriter), config.style.retry);
        }
        if let Some(dir) = &config.output.temp_dir {
            FileManager::ensure_dir(dir)?;
            orchestrator = orchestrator.with_scratch_parent(dir.clone());
        }
        Ok(orchestrator)
    }

    /// Generate the selected chapters of the book at `book_path`.
    ///
    /// Existing outputs are skipped unless `force_overwrite`. With
    /// `only_segments`, just those segment indices go into each chapter.
    /// With `output.whole_book`, the chapters are then joined into one book
    /// artifact.
    pub async fn run(
        &self,
        book_path: &Path,
        selected: &[String],
        only_segments: Option<&[usize]>,
        force_overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let start_time = std::time::Instant::now();
        let run_id = Uuid::new_v4();
        let book = Book::from_json_file(book_path)?;
        FileManager::ensure_dir(&self.config.output.output_dir)?;
        let whole_book = self.config.output.whole_book;

        let segmenter = self.segmenter();
        let chapters = book.select_chapters(selected);
        let mut summary = RunSummary::default();
        let mut jobs = Vec::new();
        for chapter in &chapters {
            let output_path = self.output_path(&book, chapter);
            if FileManager::file_exists(&output_path) && !force_overwrite {
                warn!("Skipping chapter {}, output already exists (use -f to force overwrite)", chapter.id);
                summary.skipped += 1;
                continue;
            }
            let mut job = ChapterJob::new(
                chapter.id.clone(),
                chapter.title.clone(),
                segmenter.segment_chapter(chapter),
                output_path,
            );
            if let Some(indices) = only_segments {
                job = job.with_subset(indices);
            }
            jobs.push(job);
        }

        if jobs.is_empty() && !whole_book {
            info!("Nothing to generate for '{}'", book.title);
            return Ok(summary);
        }

        let encoder = self.build_encoder().await?;
        let reports = if jobs.is_empty() {
            Vec::new()
        } else {
            self.generate_chapters(run_id, &book, jobs, encoder.clone(), cancel).await?
        };

        for report in &reports {
            if report.is_success() {
                summary.generated += 1;
            } else {
                summary.failed += 1;
            }
        }

        let book_outcome = if whole_book {
            let outcome = self
                .compose_book(&book, &chapters, &reports, encoder, force_overwrite || summary.generated > 0)
                .await;
            if let BookOutcome::Written(video) = &outcome {
                summary.book = Some(video.path.clone());
            }
            Some(outcome)
        } else {
            None
        };
        self.write_book_info(run_id, &book, &chapters, &reports, book_outcome.as_ref())?;

        info!(
            "Done in {}: {} generated, {} failed, {} skipped",
            Self::format_duration(start_time.elapsed()),
            summary.generated,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    async fn generate_chapters(
        &self,
        run_id: Uuid,
        book: &Book,
        jobs: Vec<ChapterJob>,
        encoder: Arc<dyn MediaEncoder>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChapterReport>> {
        let orchestrator = self.orchestrator_with(encoder)?;
        let total: usize = jobs.iter().map(|job| job.segments.len()).sum();
        info!("Run {}: generating {} chapter(s) of '{}' ({} segments)", run_id, jobs.len(), book.title, total);

        let progress_bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({percent}%) {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%)"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));

        let bar = progress_bar.clone();
        let reports = orchestrator
            .process(jobs, cancel, move |done, _total| bar.set_position(done as u64))
            .await;
        progress_bar.finish_and_clear();
        let reports = reports?;

        if let Some((hits, misses, rate)) = orchestrator.speech_cache_stats() {
            debug!("Speech cache: {} hits, {} misses ({:.1}% hit rate)", hits, misses, rate);
        }
        Ok(reports)
    }

    /// Join the chapter artifacts of `chapters`, in book order, into the
    /// book artifact. Chapters generated this run come from `reports`;
    /// skipped ones are read back from disk.
    async fn compose_book(
        &self,
        book: &Book,
        chapters: &[&Chapter],
        reports: &[ChapterReport],
        encoder: Arc<dyn MediaEncoder>,
        rebuild: bool,
    ) -> BookOutcome {
        let out_path = FileManager::book_output_path(&self.config.output.output_dir, &book.id, encoder.extension());
        if FileManager::file_exists(&out_path) && !rebuild {
            info!("Book output {:?} is up to date", out_path);
            return BookOutcome::UpToDate(out_path);
        }

        let mut compositor = BookCompositor::new(encoder, Arc::new(self.config.render.clone()));
        if let Some(track) = self.background_track() {
            compositor = compositor.with_background(track);
        }

        let mut parts = Vec::new();
        for chapter in chapters {
            match reports.iter().find(|report| report.chapter_id == chapter.id) {
                Some(report) => match &report.result {
                    Ok(video) => parts.push(BookChapter::from_video(video, chapter.title.clone())),
                    Err(_) => warn!("Chapter {} failed; leaving it out of the book", chapter.id),
                },
                None => {
                    let path = self.output_path(book, chapter);
                    match compositor.existing_chapter(&chapter.id, &chapter.title, &path).await {
                        Ok(part) => parts.push(part),
                        Err(e) => warn!("Leaving chapter {} out of the book: {}", chapter.id, e),
                    }
                }
            }
        }

        match compositor.compose(&book.id, &book.title, &parts, &out_path).await {
            Ok(video) => BookOutcome::Written(video),
            Err(e) => {
                error!("Failed to join book '{}': {}", book.title, e);
                BookOutcome::Failed(out_path, e)
            }
        }
    }

    fn write_book_info(
        &self,
        run_id: Uuid,
        book: &Book,
        selected: &[&Chapter],
        reports: &[ChapterReport],
        book_outcome: Option<&BookOutcome>,
    ) -> Result<()> {
        let chapters = selected
            .iter()
            .map(|chapter| {
                let title = chapter.title.clone();
                let Some(report) = reports.iter().find(|report| report.chapter_id == chapter.id) else {
                    return ChapterInfo {
                        id: chapter.id.clone(),
                        title,
                        output: Some(self.output_path(book, chapter)),
                        duration: None,
                        units: 0,
                        failed_segments: Vec::new(),
                        error: None,
                        skipped: true,
                    };
                };
                let failed_segments = report.failures.iter().map(|f| f.index).collect();
                match &report.result {
                    Ok(video) => ChapterInfo {
                        id: report.chapter_id.clone(),
                        title,
                        output: Some(video.path.clone()),
                        duration: Some(video.duration),
                        units: video.unit_count(),
                        failed_segments,
                        error: None,
                        skipped: false,
                    },
                    Err(e) => ChapterInfo {
                        id: report.chapter_id.clone(),
                        title,
                        output: None,
                        duration: None,
                        units: 0,
                        failed_segments,
                        error: Some(e.to_string()),
                        skipped: false,
                    },
                }
            })
            .collect();

        let book_info = book_outcome.map(|outcome| match outcome {
            BookOutcome::Written(video) => BookArtifactInfo {
                output: video.path.clone(),
                duration: Some(video.duration),
                chapters: video.chapters.clone(),
                error: None,
            },
            BookOutcome::UpToDate(path) => BookArtifactInfo {
                output: path.clone(),
                duration: None,
                chapters: Vec::new(),
                error: None,
            },
            BookOutcome::Failed(path, e) => BookArtifactInfo {
                output: path.clone(),
                duration: None,
                chapters: Vec::new(),
                error: Some(e.to_string()),
            },
        });

        let info = BookInfo {
            run_id: run_id.to_string(),
            book_id: book.id.clone(),
            title: book.title.clone(),
            author: book.author.clone(),
            generated_at: chrono::Local::now().to_rfc3339(),
            chapters,
            book: book_info,
        };
        let path = self
            .config
            .output
            .output_dir
            .join(format!("{}_info.json", crate::file_utils::sanitize_file_name(&book.id)));
        FileManager::write_atomic(&path, &serde_json::to_vec_pretty(&info)?)?;
        debug!("Wrote book info to {:?}", path);
        Ok(())
    }

    /// Format a duration as "1h 2m 3s"
    pub fn format_duration(duration: std::time::Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}
