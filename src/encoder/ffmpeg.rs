/*!
 * MP4 encoding through the system `ffmpeg` binary.
 *
 * Each unit is encoded to an intermediate MP4 of exactly its duration:
 * - a recorded video is held on its last frame (`tpad`) and cut with `-t`
 * - rasterized stills are sequenced with the concat demuxer
 * - a bare illustration is looped as a still (`-loop 1`)
 *
 * The narration is padded with silence and cut to the same length, so the
 * concatenated chapter lasts exactly the sum of its units. The background
 * track is looped (`-stream_loop -1`), attenuated and mixed under the
 * narration, then cut to the chapter length.
 *
 * A book is the chapter MP4s joined with the same concat step, with the
 * background track mixed once over the whole book.
 */

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::encoder::{BackgroundPlan, BookPlan, CompositionPlan, MediaEncoder, PlannedUnit};
use crate::errors::EncoderError;

static DURATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration: (\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap()
});

/// Encodes chapters with ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: String,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Whether the configured binary runs
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn run(&self, args: &[String]) -> Result<(), EncoderError> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EncoderError::Process(format!("failed to spawn {} (is it installed and on PATH?): {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let message = tail.into_iter().rev().collect::<Vec<_>>().join(" | ");
            error!("ffmpeg failed ({}): {}", output.status, message);
            return Err(EncoderError::Process(format!("ffmpeg exited with {}: {}", output.status, message)));
        }
        Ok(())
    }

    /// Concatenate the files listed in `list_path` into `out_path`, cut to
    /// `total_duration`, mixing `background` under the audio when given
    async fn concat(
        &self,
        list_path: &Path,
        total_duration: f64,
        background: Option<&BackgroundPlan>,
        out_path: &Path,
    ) -> Result<(), EncoderError> {
        let mut args: Vec<String> = vec!["-f".into(), "concat".into(), "-safe".into(), "0".into(), "-i".into(), path_arg(list_path)];
        match background {
            Some(background) => {
                args.extend([
                    "-stream_loop".into(),
                    "-1".into(),
                    "-i".into(),
                    path_arg(&background.path),
                    "-filter_complex".into(),
                    format!(
                        "[1:a]volume={:.3}[bg];[0:a][bg]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[a]",
                        background.volume
                    ),
                    "-map".into(),
                    "0:v".into(),
                    "-map".into(),
                    "[a]".into(),
                    "-c:v".into(),
                    "copy".into(),
                    "-c:a".into(),
                    "aac".into(),
                ]);
            }
            None => args.extend(["-c".into(), "copy".into()]),
        }
        args.extend([
            "-t".into(),
            format!("{:.3}", total_duration),
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
            path_arg(out_path),
        ]);
        self.run(&args).await
    }

    /// Encode one unit to `out`, exactly `unit.duration` long
    async fn encode_unit(
        &self,
        planned: &PlannedUnit<'_>,
        plan: &CompositionPlan<'_>,
        work_dir: &Path,
        out: &Path,
    ) -> Result<(), EncoderError> {
        let unit = planned.unit;
        let duration = format!("{:.3}", unit.duration);
        let fit = video_fit_filter(plan.width, plan.height, plan.fps);
        let mut args: Vec<String> = Vec::new();

        let has_stills = !unit.media.runs.is_empty() && unit.media.runs.iter().all(|run| run.still.is_some());
        if let Some(video) = &unit.media.video {
            args.extend(["-i".into(), path_arg(video)]);
            args.extend(["-i".into(), path_arg(&unit.audio_path)]);
            args.extend([
                "-filter_complex".into(),
                format!("[0:v]tpad=stop_mode=clone:stop_duration={},{}[v]", duration, fit),
                "-map".into(),
                "[v]".into(),
                "-map".into(),
                "1:a".into(),
            ]);
        } else if has_stills {
            let list = work_dir.join(format!("stills_{:04}.txt", unit.index));
            tokio::fs::write(&list, stills_concat_list(planned, plan.fps)).await?;
            args.extend(["-f".into(), "concat".into(), "-safe".into(), "0".into(), "-i".into(), path_arg(&list)]);
            args.extend(["-i".into(), path_arg(&unit.audio_path)]);
            args.extend(["-vf".into(), fit, "-map".into(), "0:v".into(), "-map".into(), "1:a".into()]);
        } else if let Some(image) = &unit.illustration {
            args.extend(["-loop".into(), "1".into(), "-i".into(), path_arg(image)]);
            args.extend(["-i".into(), path_arg(&unit.audio_path)]);
            args.extend(["-vf".into(), fit, "-map".into(), "0:v".into(), "-map".into(), "1:a".into()]);
        } else {
            return Err(EncoderError::MissingVideo { index: unit.index });
        }

        args.extend([
            "-af".into(),
            "apad".into(),
            "-t".into(),
            duration,
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-c:a".into(),
            "aac".into(),
            "-ar".into(),
            "44100".into(),
            "-ac".into(),
            "2".into(),
            path_arg(out),
        ]);
        self.run(&args).await
    }
}

/// Scale and pad to the output geometry at a constant frame rate
fn video_fit_filter(width: u32, height: u32, fps: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps={fps},format=yuv420p",
        w = width,
        h = height,
        fps = fps
    )
}

/// Seconds from the `Duration: HH:MM:SS.ss` line of ffmpeg's input header
fn parse_duration(stderr: &str) -> Option<f64> {
    let captures = DURATION_REGEX.captures(stderr)?;
    let hours: f64 = captures[1].parse().ok()?;
    let minutes: f64 = captures[2].parse().ok()?;
    let seconds: f64 = captures[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Quote a path for a concat demuxer list
fn concat_entry(path: &Path) -> String {
    format!("file '{}'\n", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Concat demuxer list showing each still for its run length
fn stills_concat_list(planned: &PlannedUnit<'_>, fps: u32) -> String {
    let mut list = String::new();
    let mut last: Option<&PathBuf> = None;
    for run in &planned.unit.media.runs {
        if let Some(still) = &run.still {
            list.push_str(&concat_entry(still));
            let _ = writeln!(list, "duration {:.6}", run.frames as f64 / fps as f64);
            last = Some(still);
        }
    }
    // The demuxer ignores the last duration unless the file is listed again
    if let Some(still) = last {
        list.push_str(&concat_entry(still));
    }
    list
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn encode_chapter(&self, plan: &CompositionPlan<'_>, out_path: &Path) -> Result<(), EncoderError> {
        let work_dir = tempfile::Builder::new().prefix("bookcast-encode-").tempdir()?;

        let mut concat_list = String::new();
        for planned in &plan.units {
            let unit_path = work_dir.path().join(format!("unit_{:04}.mp4", planned.unit.index));
            self.encode_unit(planned, plan, work_dir.path(), &unit_path).await?;
            concat_list.push_str(&concat_entry(&unit_path));
        }
        let list_path = work_dir.path().join("units.txt");
        tokio::fs::write(&list_path, concat_list).await?;
        self.concat(&list_path, plan.total_duration, plan.background.as_ref(), out_path).await?;

        debug!("Encoded chapter {} ({} units, {:.2}s)", plan.chapter_id, plan.units.len(), plan.total_duration);
        Ok(())
    }

    async fn encode_book(&self, plan: &BookPlan<'_>, out_path: &Path) -> Result<(), EncoderError> {
        let work_dir = tempfile::Builder::new().prefix("bookcast-book-").tempdir()?;
        let concat_list: String = plan.chapters.iter().map(|chapter| concat_entry(chapter.path)).collect();
        let list_path = work_dir.path().join("chapters.txt");
        tokio::fs::write(&list_path, concat_list).await?;
        self.concat(&list_path, plan.total_duration, plan.background.as_ref(), out_path).await?;

        debug!("Encoded book {} ({} chapters, {:.2}s)", plan.book_id, plan.chapters.len(), plan.total_duration);
        Ok(())
    }

    async fn artifact_duration(&self, path: &Path) -> Result<f64, EncoderError> {
        // Without an output file ffmpeg exits non-zero, but still prints the input header
        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-i"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EncoderError::Process(format!("failed to spawn {}: {}", self.binary, e)))?;

        parse_duration(&String::from_utf8_lossy(&output.stderr)).ok_or_else(|| EncoderError::UnknownDuration {
            path: path.to_path_buf(),
            reason: "no Duration in ffmpeg output".to_string(),
        })
    }

    fn extension(&self) -> &str {
        "mp4"
    }
}
