use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::retry::RetryPolicy;

// @module: Application configuration, loaded from and saved to JSON

/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Visual layout and video geometry
    #[serde(default)]
    pub render: RenderConfig,

    /// Segmentation settings
    #[serde(default)]
    pub segmenter: SegmenterConfig,

    /// Speech synthesis settings
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Optional spoken-register rewrite
    #[serde(default)]
    pub style: StyleConfig,

    /// Worker pool and failure policy
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output location and encoding
    #[serde(default)]
    pub output: OutputConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Rendering parameters shared by every segment of a run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RenderConfig {
    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Target video frame rate; also the render sampling rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// CSS font family
    #[serde(default = "default_font_family")]
    pub font_family: String,

    /// Font size in pixels
    #[serde(default = "default_font_size")]
    pub font_size: u32,

    /// Line height multiplier
    #[serde(default = "default_line_height")]
    pub line_height: f32,

    /// Page background colour
    #[serde(default = "default_background_color")]
    pub background_color: String,

    /// Body text colour
    #[serde(default = "default_text_color")]
    pub text_color: String,

    /// Highlight colour for the active unit
    #[serde(default = "default_highlight_color")]
    pub highlight_color: String,

    /// Show the chapter title above the text
    #[serde(default)]
    pub show_chapter_title: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            font_family: default_font_family(),
            font_size: default_font_size(),
            line_height: default_line_height(),
            background_color: default_background_color(),
            text_color: default_text_color(),
            highlight_color: default_highlight_color(),
            show_chapter_title: false,
        }
    }
}

impl RenderConfig {
    /// Length of one frame in seconds
    pub fn frame_seconds(&self) -> f64 {
        1.0 / self.fps as f64
    }
}

/// Segmenter settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Maximum characters per segment; longer single sentences stay whole
    #[serde(default = "default_max_chars_per_segment")]
    pub max_chars_per_segment: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_chars_per_segment: default_max_chars_per_segment(),
        }
    }
}

/// Which speech collaborator to use
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeechProviderKind {
    /// External program, see `CommandConfig`
    #[default]
    Command,
    /// Deterministic in-process voice for dry runs
    Mock,
}

/// External speech program invocation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CommandConfig {
    /// Program to run
    pub program: String,

    /// Arguments; `{audio}` is replaced by the output path and `{voice}` by the voice name
    #[serde(default)]
    pub args: Vec<String>,

    /// Extension of the audio file the program writes
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,

    /// Kill the program after this many seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Speech synthesis settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpeechConfig {
    /// Provider type
    #[serde(default)]
    pub provider: SpeechProviderKind,

    /// Command provider settings (required for `command`)
    #[serde(default)]
    pub command: Option<CommandConfig>,

    /// Voice name passed to the provider
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Reuse synthesized audio across runs
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Cache location; defaults to the platform cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Retry policy for transient TTS failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// How long an illustration stays on screen, in seconds
    #[serde(default = "default_illustration_seconds")]
    pub illustration_seconds: f64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: SpeechProviderKind::default(),
            command: None,
            voice: default_voice(),
            cache_enabled: true,
            cache_dir: None,
            retry: RetryPolicy::default(),
            illustration_seconds: default_illustration_seconds(),
        }
    }
}

impl SpeechConfig {
    /// Effective cache directory
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("bookcast")
                .join("speech")
        })
    }
}

/// Spoken-register rewrite settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StyleConfig {
    /// Whether to rewrite segment text before synthesis
    #[serde(default)]
    pub enabled: bool,

    /// Chat-completions endpoint URL
    #[serde(default = "default_style_endpoint")]
    pub endpoint: String,

    /// API key; falls back to BOOKCAST_STYLE_API_KEY
    #[serde(default = "String::new")]
    pub api_key: String,

    /// Model name
    #[serde(default = "default_style_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_style_temperature")]
    pub temperature: f32,

    /// Completion token limit
    #[serde(default = "default_style_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_style_endpoint(),
            api_key: String::new(),
            model: default_style_model(),
            temperature: default_style_temperature(),
            max_tokens: default_style_max_tokens(),
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StyleConfig {
    /// API key from the config, or from the environment
    pub fn resolved_api_key(&self) -> String {
        if self.api_key.is_empty() {
            std::env::var("BOOKCAST_STYLE_API_KEY").unwrap_or_default()
        } else {
            self.api_key.clone()
        }
    }
}

/// Worker pool and failure policy
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Segments processed concurrently
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Concurrent capture sessions; at most `worker_count`
    #[serde(default = "default_capture_sessions")]
    pub capture_sessions: usize,

    /// Compose a chapter from the segments that succeeded
    #[serde(default)]
    pub tolerate_partial_failure: bool,

    /// Render attempts per segment when the capture duration is off
    #[serde(default = "default_capture_attempts")]
    pub capture_attempts: u32,

    /// Accepted audio/video duration difference, in frames
    #[serde(default = "default_duration_tolerance_frames")]
    pub duration_tolerance_frames: u32,

    /// Largest frame deficit/excess the render driver pads or trims away
    #[serde(default = "default_max_correction_frames")]
    pub max_correction_frames: u32,

    /// Reject timing marks that leave gaps longer than one frame
    #[serde(default)]
    pub strict_gap_check: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            capture_sessions: default_capture_sessions(),
            tolerate_partial_failure: false,
            capture_attempts: default_capture_attempts(),
            duration_tolerance_frames: default_duration_tolerance_frames(),
            max_correction_frames: default_max_correction_frames(),
            strict_gap_check: false,
        }
    }
}

/// Encoder used by the chapter compositor
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// JSON chapter timeline
    #[default]
    Manifest,
    /// MP4 through the ffmpeg binary
    Ffmpeg,
}

impl EncoderKind {
    /// File extension of the chapter artifact
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Manifest => "json",
            Self::Ffmpeg => "mp4",
        }
    }
}

/// Which render surface captures frames
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// In-memory frame timeline
    #[default]
    Timeline,
    /// One HTML page per visual state
    Html,
}

/// Output settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutputConfig {
    /// Directory for chapter artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Parent directory for per-run scratch space; system temp when unset
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Background music mixed under the narration
    #[serde(default)]
    pub background_music: Option<PathBuf>,

    /// Linear gain applied to the background track
    #[serde(default = "default_background_volume")]
    pub background_volume: f32,

    /// Also join the chapters into one book artifact; the background track
    /// then goes under the book instead of each chapter
    #[serde(default)]
    pub whole_book: bool,

    /// Chapter encoder
    #[serde(default)]
    pub encoder: EncoderKind,

    /// Render surface
    #[serde(default)]
    pub surface: SurfaceKind,

    /// ffmpeg executable
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,

    /// Program turning HTML pages into PNG stills (html surface only)
    #[serde(default)]
    pub rasterizer: Option<RasterizerConfig>,
}

/// External HTML-to-PNG program
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RasterizerConfig {
    /// Program to run
    pub program: String,

    /// Arguments; `{html}`, `{png}`, `{width}` and `{height}` are substituted
    #[serde(default)]
    pub args: Vec<String>,

    /// Kill the program after this many seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            temp_dir: None,
            background_music: None,
            background_volume: default_background_volume(),
            whole_book: false,
            encoder: EncoderKind::default(),
            surface: SurfaceKind::default(),
            ffmpeg_binary: default_ffmpeg_binary(),
            rasterizer: None,
        }
    }
}

/// Log level configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Matching `log` filter
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Config {
    /// Load a configuration file, writing the defaults first when it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let config: Config = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize default config to JSON")?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write default config to file: {}", path.display()))?;
            Ok(config)
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let render = &self.render;
        if render.width == 0 || render.height == 0 {
            return Err(anyhow!("Render width and height must be non-zero"));
        }
        if render.width % 2 != 0 || render.height % 2 != 0 {
            return Err(anyhow!("Render width and height must be even (yuv420p output)"));
        }
        if render.fps == 0 {
            return Err(anyhow!("Render fps must be non-zero"));
        }

        if self.segmenter.max_chars_per_segment == 0 {
            return Err(anyhow!("max_chars_per_segment must be greater than zero"));
        }

        if self.speech.provider == SpeechProviderKind::Command && self.speech.command.is_none() {
            return Err(anyhow!("Speech provider 'command' requires a [speech.command] section"));
        }
        if !(self.speech.illustration_seconds > 0.0) {
            return Err(anyhow!("illustration_seconds must be positive"));
        }
        validate_retry("speech.retry", &self.speech.retry)?;

        if self.style.enabled {
            url::Url::parse(&self.style.endpoint)
                .with_context(|| format!("Invalid style endpoint: {}", self.style.endpoint))?;
            validate_retry("style.retry", &self.style.retry)?;
        }

        let pipeline = &self.pipeline;
        if pipeline.worker_count == 0 {
            return Err(anyhow!("worker_count must be greater than zero"));
        }
        if pipeline.capture_sessions == 0 || pipeline.capture_sessions > pipeline.worker_count {
            return Err(anyhow!(
                "capture_sessions must be between 1 and worker_count ({})",
                pipeline.worker_count
            ));
        }
        if pipeline.capture_attempts == 0 {
            return Err(anyhow!("capture_attempts must be at least 1"));
        }

        if !(0.0..=1.0).contains(&self.output.background_volume) {
            return Err(anyhow!("background_volume must be between 0.0 and 1.0"));
        }

        Ok(())
    }
}

fn validate_retry(name: &str, policy: &RetryPolicy) -> Result<()> {
    if policy.max_attempts == 0 {
        return Err(anyhow!("{}.max_attempts must be at least 1", name));
    }
    if policy.multiplier < 1.0 {
        return Err(anyhow!("{}.multiplier must be >= 1.0", name));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_fps() -> u32 {
    30
}

fn default_font_family() -> String {
    "'Noto Serif SC', serif".to_string()
}

fn default_font_size() -> u32 {
    18
}

fn default_line_height() -> f32 {
    1.7
}

fn default_background_color() -> String {
    "#F5F5DC".to_string()
}

fn default_text_color() -> String {
    "#333333".to_string()
}

fn default_highlight_color() -> String {
    "#FFFF00".to_string()
}

fn default_max_chars_per_segment() -> usize {
    500
}

fn default_audio_extension() -> String {
    "mp3".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_voice() -> String {
    "zh-CN-XiaochenNeural".to_string()
}

fn default_illustration_seconds() -> f64 {
    5.0
}

fn default_style_endpoint() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}

fn default_style_model() -> String {
    "deepseek-chat".to_string()
}

fn default_style_temperature() -> f32 {
    0.3
}

fn default_style_max_tokens() -> u32 {
    2000
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn default_capture_sessions() -> usize {
    default_worker_count().min(4)
}

fn default_capture_attempts() -> u32 {
    2
}

fn default_duration_tolerance_frames() -> u32 {
    1
}

fn default_max_correction_frames() -> u32 {
    60
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_background_volume() -> f32 {
    0.2
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}
