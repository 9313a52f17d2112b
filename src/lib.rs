/*!
 * # bookcast - narrated book videos
 *
 * A Rust library that turns a parsed book into one narrated video per
 * chapter: synthesized speech, text highlighted word by word in sync with
 * the narration, illustrations held on screen, optional background music.
 *
 * ## Features
 *
 * - Chapter segmentation at sentence boundaries
 * - Speech synthesis with per-word timing marks, retries and an on-disk cache
 * - Optional rewrite of written prose into a spoken register
 * - Frame-accurate highlight rendering through pluggable render surfaces
 * - Concurrent segment processing with per-chapter ordered composition
 * - JSON timeline or MP4 (ffmpeg) chapter output
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `document`: Parsed book model
 * - `segmenter`: Chapter to segment splitting
 * - `providers`: Speech and style collaborators:
 *   - `providers::command`: External TTS program
 *   - `providers::chat`: Chat-completions style rewriter
 *   - `providers::mock`: Deterministic in-process collaborators
 * - `speech`: Timing-aware synthesis client and speech cache
 * - `render`: Highlight timeline, render surfaces and the render driver
 * - `assembly`: Audio/video pairing per segment
 * - `encoder`: Chapter encoders (manifest, ffmpeg)
 * - `pipeline`: Orchestrator and chapter compositor
 * - `retry` / `cancel`: Backoff and cancellation primitives
 * - `file_utils`: Scratch space and atomic file output
 * - `app_controller`: Main application controller
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod assembly;
pub mod cancel;
pub mod document;
pub mod encoder;
pub mod errors;
pub mod file_utils;
pub mod pipeline;
pub mod providers;
pub mod render;
pub mod retry;
pub mod segmenter;
pub mod speech;

// Re-export main types for easier usage
pub use app_config::Config;
pub use cancel::CancellationToken;
pub use document::{Block, Book, Chapter};
pub use errors::{AppError, ChapterError, PipelineError, ProviderError, SegmentError};
pub use pipeline::{ChapterCompositor, ChapterJob, ChapterReport, ChapterVideo, PipelineOrchestrator};
pub use segmenter::{Segment, Segmenter};
