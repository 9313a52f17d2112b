/*!
 * Pipeline orchestration.
 *
 * Segments of every requested chapter are fed, interleaved round-robin, to a
 * bounded pool of workers. Each worker runs one segment through
 * rewrite -> speech -> capture -> assembly in its own scratch partition.
 * Results come back in completion order and are collected per chapter by
 * index; a chapter is composed as soon as its last segment reports.
 *
 * Cancellation stops dispatch, drops in-flight work (releasing scratch and
 * child processes) and returns `PipelineError::Cancelled` without emitting
 * any further chapter.
 */

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;

use crate::app_config::PipelineConfig;
use crate::assembly::{SegmentAssembler, SegmentUnit};
use crate::cancel::CancellationToken;
use crate::errors::{
    ChapterError, ChapterGenerationError, ExternalError, PipelineError, RenderError, SegmentError,
    SegmentFailure, SynthesisError,
};
use crate::file_utils::{ScratchArea, SegmentScratch};
use crate::pipeline::compositor::{ChapterCompositor, ChapterVideo};
use crate::providers::StyleRewriter;
use crate::render::RenderDriver;
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy, SharedClock};
use crate::segmenter::Segment;
use crate::speech::{SpeechResult, SpeechTimingClient};

/// One chapter to generate
#[derive(Debug, Clone)]
pub struct ChapterJob {
    pub chapter_id: String,
    pub title: String,

    /// Segments to process, ascending by index
    pub segments: Vec<Segment>,

    /// Where the chapter artifact is written
    pub output_path: PathBuf,
}

impl ChapterJob {
    pub fn new(chapter_id: impl Into<String>, title: impl Into<String>, segments: Vec<Segment>, output_path: PathBuf) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            title: title.into(),
            segments,
            output_path,
        }
    }

    /// Keep only the segments whose index is listed
    pub fn with_subset(mut self, indices: &[usize]) -> Self {
        self.segments.retain(|segment| indices.contains(&segment.index));
        self
    }
}

/// Outcome of one chapter
#[derive(Debug)]
pub struct ChapterReport {
    pub chapter_id: String,

    /// Segments dispatched for this chapter
    pub total_segments: usize,

    /// Segments that did not produce a unit
    pub failures: Vec<SegmentFailure>,

    pub result: Result<ChapterVideo, ChapterError>,
}

impl ChapterReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Optional rewrite applied to segment text before synthesis
#[derive(Debug, Clone)]
struct StyleStage {
    rewriter: Arc<dyn StyleRewriter>,
    policy: RetryPolicy,
}

/// Units and failures gathered for one chapter while its segments run
struct ChapterCollector {
    chapter_id: String,
    title: String,
    output_path: PathBuf,
    expected: usize,
    reported: usize,
    units: BTreeMap<usize, SegmentUnit>,
    failures: Vec<SegmentFailure>,
}

impl ChapterCollector {
    fn from_job(job: &ChapterJob) -> Self {
        Self {
            chapter_id: job.chapter_id.clone(),
            title: job.title.clone(),
            output_path: job.output_path.clone(),
            expected: job.segments.len(),
            reported: 0,
            units: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.reported >= self.expected
    }
}

/// Runs chapters through the segment pipeline
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    speech: SpeechTimingClient,
    renderer: RenderDriver,
    assembler: SegmentAssembler,
    compositor: ChapterCompositor,
    clock: SharedClock,
    style: Option<StyleStage>,
    scratch_parent: Option<PathBuf>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        speech: SpeechTimingClient,
        renderer: RenderDriver,
        compositor: ChapterCompositor,
        clock: SharedClock,
    ) -> Self {
        Self {
            assembler: SegmentAssembler::new(config.duration_tolerance_frames),
            config,
            speech,
            renderer,
            compositor,
            clock,
            style: None,
            scratch_parent: None,
        }
    }

    /// Rewrite segment text with `rewriter` before synthesis
    pub fn with_style(mut self, rewriter: Arc<dyn StyleRewriter>, policy: RetryPolicy) -> Self {
        self.style = Some(StyleStage { rewriter, policy });
        self
    }

    /// Create scratch areas under `dir` instead of the system temp dir
    pub fn with_scratch_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    /// Speech cache hits, misses and hit rate
    pub fn speech_cache_stats(&self) -> Option<(usize, usize, f64)> {
        self.speech.cache_stats()
    }

    /// Generate a single chapter
    pub async fn process_chapter(
        &self,
        job: ChapterJob,
        cancel: &CancellationToken,
    ) -> Result<ChapterReport, PipelineError> {
        let mut reports = self.process(vec![job], cancel, |_, _| {}).await?;
        reports.pop().ok_or(PipelineError::Cancelled)
    }

    /// Generate every chapter in `jobs`.
    ///
    /// Returns one report per job, in job order. `progress_callback` is called
    /// with (segments finished, segments total) after every segment.
    pub async fn process(
        &self,
        jobs: Vec<ChapterJob>,
        cancel: &CancellationToken,
        progress_callback: impl Fn(usize, usize) + Clone + Send,
    ) -> Result<Vec<ChapterReport>, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let scratch = ScratchArea::new(self.scratch_parent.as_deref())?;
        let total: usize = jobs.iter().map(|job| job.segments.len()).sum();
        let worker_count = self.config.worker_count.max(1);
        info!(
            "Processing {} chapter(s), {} segment(s) with {} worker(s)",
            jobs.len(),
            total,
            worker_count
        );

        let mut collectors: Vec<Option<ChapterCollector>> =
            jobs.iter().map(|job| Some(ChapterCollector::from_job(job))).collect();
        let mut reports: Vec<Option<ChapterReport>> = jobs.iter().map(|_| None).collect();
        let mut compositions: FuturesUnordered<BoxFuture<'_, (usize, ChapterReport)>> = FuturesUnordered::new();

        // Chapters without segments complete immediately
        for (position, collector) in collectors.iter_mut().enumerate() {
            if collector.as_ref().map_or(false, ChapterCollector::is_complete) {
                if let Some(done) = collector.take() {
                    compositions.push(Box::pin(self.finish_chapter(position, done)));
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(worker_count));
        let finished = Arc::new(AtomicUsize::new(0));
        let scratch_ref = &scratch;

        let mut segments = stream::iter(interleave(&jobs))
            .map(|(position, segment)| {
                let semaphore = semaphore.clone();
                let finished = finished.clone();
                let progress_callback = progress_callback.clone();

                async move {
                    let result = match semaphore.acquire().await {
                        Ok(_permit) => self.process_segment(segment, scratch_ref, cancel).await,
                        Err(_) => Err(SegmentError::Cancelled),
                    };
                    let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    progress_callback(done, total);
                    (position, segment.index, result)
                }
            })
            .buffer_unordered(worker_count);

        let mut dispatch_done = false;
        loop {
            if dispatch_done && compositions.is_empty() {
                break;
            }
            tokio::select! {
                next = segments.next(), if !dispatch_done => {
                    let Some((position, index, result)) = next else {
                        dispatch_done = true;
                        continue;
                    };
                    let Some(collector) = collectors[position].as_mut() else { continue };
                    collector.reported += 1;
                    match result {
                        Ok(unit) => {
                            collector.units.insert(index, unit);
                        }
                        Err(SegmentError::Cancelled) => {
                            collector.failures.push(SegmentFailure { index, reason: "cancelled".to_string() });
                        }
                        Err(e) => {
                            error!("Segment {}#{} failed: {}", collector.chapter_id, index, e);
                            collector.failures.push(SegmentFailure { index, reason: e.to_string() });
                        }
                    }
                    if collector.is_complete() && !cancel.is_cancelled() {
                        if let Some(done) = collectors[position].take() {
                            compositions.push(Box::pin(self.finish_chapter(position, done)));
                        }
                    }
                }
                Some((position, report)) = compositions.next(), if !compositions.is_empty() => {
                    reports[position] = Some(report);
                }
                _ = cancel.cancelled() => break,
            }
        }

        // Dropping the streams releases in-flight segments and staged outputs
        drop(segments);
        drop(compositions);
        drop(collectors);

        if cancel.is_cancelled() {
            warn!("Run cancelled; scratch area {:?} released", scratch.path());
            return Err(PipelineError::Cancelled);
        }

        // Every slot is filled once both streams are exhausted
        let reports: Vec<ChapterReport> = reports.into_iter().flatten().collect();
        let succeeded = reports.iter().filter(|report| report.is_success()).count();
        info!("Finished {}/{} chapter(s)", succeeded, reports.len());
        Ok(reports)
    }

    /// Apply the failure policy, then compose what was collected
    async fn finish_chapter(&self, position: usize, collector: ChapterCollector) -> (usize, ChapterReport) {
        let ChapterCollector { chapter_id, title, output_path, expected, units, failures, .. } = collector;

        let abandon = !failures.is_empty() && (!self.config.tolerate_partial_failure || units.is_empty());
        let result = if abandon {
            Err(ChapterError::Generation(ChapterGenerationError::new(chapter_id.clone(), failures.clone())))
        } else {
            if !failures.is_empty() {
                warn!(
                    "Chapter {}: composing {} of {} segment(s), {} failed",
                    chapter_id,
                    units.len(),
                    expected,
                    failures.len()
                );
            }
            let units: Vec<SegmentUnit> = units.into_values().collect();
            self.compositor
                .compose(&chapter_id, &title, units, &output_path)
                .await
                .map_err(ChapterError::from)
        };

        if let Err(e) = &result {
            error!("Chapter {} not generated: {}", chapter_id, e);
        }

        let mut failures = failures;
        failures.sort_by_key(|failure| failure.index);
        (position, ChapterReport { chapter_id, total_segments: expected, failures, result })
    }

    /// Run one segment through every stage
    async fn process_segment(
        &self,
        segment: &Segment,
        scratch: &ScratchArea,
        cancel: &CancellationToken,
    ) -> Result<SegmentUnit, SegmentError> {
        if cancel.is_cancelled() {
            return Err(SegmentError::Cancelled);
        }
        let partition = scratch.partition(&format!("{}_{:05}", segment.chapter_id, segment.index))?;

        let segment = self.rewrite(segment, cancel).await?;
        let speech = self.narrate(&segment, &partition, cancel).await?;
        let unit = self.capture(&segment, &speech, &partition, cancel).await?;

        Ok(unit.retain_scratch(partition))
    }

    async fn rewrite<'s>(
        &self,
        segment: &'s Segment,
        cancel: &CancellationToken,
    ) -> Result<Cow<'s, Segment>, SegmentError> {
        let (Some(style), Some(text)) = (&self.style, segment.text.as_deref()) else {
            return Ok(Cow::Borrowed(segment));
        };

        let rewriter = &style.rewriter;
        let rewritten = retry_with_backoff(&style.policy, self.clock.as_ref(), cancel, "style rewrite", |_| async move {
            rewriter.rewrite(text).await.map_err(ExternalError::from)
        })
        .await
        .map_err(|outcome| match outcome {
            RetryOutcome::Failed { error, .. } => SegmentError::Rewrite(error),
            RetryOutcome::Cancelled => SegmentError::Cancelled,
        })?;

        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            warn!("Empty rewrite for {}#{}; keeping original text", segment.chapter_id, segment.index);
            return Ok(Cow::Borrowed(segment));
        }

        let mut owned = segment.clone();
        owned.text = Some(rewritten.to_string());
        Ok(Cow::Owned(owned))
    }

    async fn narrate(
        &self,
        segment: &Segment,
        partition: &SegmentScratch,
        cancel: &CancellationToken,
    ) -> Result<SpeechResult, SegmentError> {
        let result = match segment.text.as_deref() {
            Some(text) => self.speech.synthesize(text, partition, cancel).await,
            None => self.speech.silence(partition).await,
        };
        result.map_err(|e| match e {
            SynthesisError::Cancelled => SegmentError::Cancelled,
            other => SegmentError::Synthesis(other),
        })
    }

    /// Render and assemble, re-rendering while the capture length is off
    async fn capture(
        &self,
        segment: &Segment,
        speech: &SpeechResult,
        partition: &SegmentScratch,
        cancel: &CancellationToken,
    ) -> Result<SegmentUnit, SegmentError> {
        let attempts = self.config.capture_attempts.max(1);
        let mut attempt = 1;

        loop {
            let media = self
                .renderer
                .render(segment, speech, partition, cancel)
                .await
                .map_err(|e| match e {
                    RenderError::Cancelled => SegmentError::Cancelled,
                    other => SegmentError::Render(other),
                })?;

            match self.assembler.assemble(segment, speech, media) {
                Ok(unit) => return Ok(unit),
                Err(mismatch) if attempt < attempts => {
                    warn!(
                        "{}#{}: {} (capture attempt {}/{})",
                        segment.chapter_id, segment.index, mismatch, attempt, attempts
                    );
                    attempt += 1;
                }
                Err(mismatch) => return Err(mismatch.into()),
            }

            if cancel.is_cancelled() {
                return Err(SegmentError::Cancelled);
            }
            debug!("Re-capturing {}#{}", segment.chapter_id, segment.index);
        }
    }
}

/// Segments of all jobs, taking one from each chapter in turn
fn interleave(jobs: &[ChapterJob]) -> Vec<(usize, &Segment)> {
    let longest = jobs.iter().map(|job| job.segments.len()).max().unwrap_or(0);
    let mut order = Vec::with_capacity(jobs.iter().map(|job| job.segments.len()).sum());
    for round in 0..longest {
        for (position, job) in jobs.iter().enumerate() {
            if let Some(segment) = job.segments.get(round) {
                order.push((position, segment));
            }
        }
    }
    order
}
