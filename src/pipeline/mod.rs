/*!
 * Chapter generation pipeline.
 *
 * - `orchestrator`: concurrent segment processing and per-chapter collection
 * - `compositor`: ordered chapter assembly into one artifact
 * - `book`: chapter artifacts joined into one book artifact
 */

pub mod book;
pub mod compositor;
pub mod orchestrator;

pub use book::{BookChapter, BookCompositor, BookVideo};
pub use compositor::{BackgroundTrack, ChapterCompositor, ChapterVideo};
pub use orchestrator::{ChapterJob, ChapterReport, PipelineOrchestrator};
