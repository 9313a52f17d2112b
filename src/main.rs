// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

use bookcast::app_config::{self, Config, EncoderKind, SurfaceKind};
use bookcast::app_controller::Controller;
use bookcast::{Book, CancellationToken};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for EncoderKind
#[derive(Debug, Clone, ValueEnum)]
enum CliEncoder {
    Manifest,
    Ffmpeg,
}

impl From<CliEncoder> for EncoderKind {
    fn from(cli_encoder: CliEncoder) -> Self {
        match cli_encoder {
            CliEncoder::Manifest => EncoderKind::Manifest,
            CliEncoder::Ffmpeg => EncoderKind::Ffmpeg,
        }
    }
}

/// CLI Wrapper for SurfaceKind
#[derive(Debug, Clone, ValueEnum)]
enum CliSurface {
    Timeline,
    Html,
}

impl From<CliSurface> for SurfaceKind {
    fn from(cli_surface: CliSurface) -> Self {
        match cli_surface {
            CliSurface::Timeline => SurfaceKind::Timeline,
            CliSurface::Html => SurfaceKind::Html,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate chapter videos for a parsed book
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// List the chapters of a parsed book
    List {
        /// Parsed book (JSON)
        #[arg(value_name = "BOOK")]
        book: PathBuf,
    },

    /// Show how chapters would be segmented, without generating anything
    Plan {
        /// Parsed book (JSON)
        #[arg(value_name = "BOOK")]
        book: PathBuf,

        /// Chapter ids to include, comma separated (default: all)
        #[arg(short, long = "chapters", alias = "chapter", value_delimiter = ',')]
        chapters: Vec<String>,
    },

    /// Generate shell completions for bookcast
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Parsed book (JSON)
    #[arg(value_name = "BOOK")]
    book: PathBuf,

    /// Chapter ids to generate, comma separated (default: all)
    #[arg(short, long = "chapters", alias = "chapter", value_delimiter = ',')]
    chapters: Vec<String>,

    /// Only these segment indices, comma separated
    #[arg(long, value_delimiter = ',')]
    segments: Option<Vec<usize>>,

    /// Force overwrite of existing output files
    #[arg(short, long, alias = "force")]
    force_overwrite: bool,

    /// Background music mixed under the narration
    #[arg(long, value_name = "PATH")]
    bgm: Option<PathBuf>,

    /// Maximum characters per segment
    #[arg(long)]
    max_chars: Option<usize>,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Chapter encoder
    #[arg(short, long, value_enum)]
    encoder: Option<CliEncoder>,

    /// Render surface
    #[arg(long, value_enum)]
    surface: Option<CliSurface>,

    /// Concurrent segment workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Compose chapters from the segments that succeeded
    #[arg(long)]
    tolerate_partial: bool,

    /// Also join the chapters into one book artifact
    #[arg(long)]
    whole_book: bool,
}

/// bookcast - narrated videos from parsed books
#[derive(Parser, Debug)]
#[command(name = "bookcast")]
#[command(version)]
#[command(about = "Narrated, word-highlighted chapter videos from parsed books")]
#[command(long_about = "bookcast narrates each chapter of a parsed book, highlights the spoken words in sync
with the audio and writes one video (or JSON timeline) per chapter.

EXAMPLES:
    bookcast list book.json                      # Show chapters
    bookcast plan book.json -c ch01              # Show segmentation of one chapter
    bookcast generate book.json --bgm music.wav  # Mix background music
    bookcast generate book.json                  # Generate every chapter
    bookcast generate book.json -c ch01 -e ffmpeg  # One chapter as MP4
    bookcast generate book.json --segments 0,1,2 # Only the first segments
    bookcast generate book.json --whole-book     # Chapters plus one book artifact
    bookcast completions bash > bookcast.bash    # Generate bash completions

CONFIGURATION:
    Configuration is stored in bookcast.json by default. You can specify a different
    config file with --config. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long = "config", alias = "config-path", global = true, default_value = "bookcast.json")]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger::new(level)))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Marker and ANSI color for a level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌ ", "1;31"),
            Level::Warn => ("🚧 ", "1;33"),
            Level::Info => ("", "1;32"),
            Level::Debug => ("🔍 ", "1;36"),
            Level::Trace => ("📋 ", "1;35"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (marker, color) = Self::style_for_level(record.level());
            let _ = writeln!(std::io::stderr(), "\x1B[{}m{} {}{}\x1B[0m", color, now, marker, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // The logger accepts everything; the max level filters
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();
    if let Some(level) = &cli.log_level {
        let level: app_config::LogLevel = level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "bookcast", &mut std::io::stdout());
            Ok(())
        }
        Commands::List { book } => list_chapters(&book),
        Commands::Plan { book, chapters } => {
            let config = load_config(&cli.config_path, cli.log_level.is_some())?;
            plan_chapters(config, &book, &chapters)
        }
        Commands::Generate(args) => {
            let mut config = load_config(&cli.config_path, cli.log_level.is_some())?;
            apply_overrides(&mut config, &args);
            run_generate(config, args).await
        }
    }
}

fn load_config(path: &Path, log_level_from_cli: bool) -> Result<Config> {
    if !path.exists() {
        warn!("Config file not found at {:?}, creating default config.", path);
    }
    let config = Config::load_or_create(path)?;
    if !log_level_from_cli {
        log::set_max_level(config.log_level.to_level_filter());
    }
    Ok(config)
}

fn apply_overrides(config: &mut Config, args: &GenerateArgs) {
    if let Some(dir) = &args.output_dir {
        config.output.output_dir = dir.clone();
    }
    if let Some(encoder) = &args.encoder {
        config.output.encoder = encoder.clone().into();
    }
    if let Some(surface) = &args.surface {
        config.output.surface = surface.clone().into();
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_count = workers;
        config.pipeline.capture_sessions = config.pipeline.capture_sessions.min(workers.max(1));
    }
    if let Some(bgm) = &args.bgm {
        config.output.background_music = Some(bgm.clone());
    }
    if let Some(max_chars) = args.max_chars {
        config.segmenter.max_chars_per_segment = max_chars;
    }
    if args.tolerate_partial {
        config.pipeline.tolerate_partial_failure = true;
    }
    if args.whole_book {
        config.output.whole_book = true;
    }
}

fn list_chapters(book_path: &Path) -> Result<()> {
    let book = Book::from_json_file(book_path)?;
    println!("{} ({})", book.title, book.id);
    for chapter in &book.chapters {
        println!(
            "  {:<12} {:<40} {:>4} blocks {:>7} chars {:>3} images",
            chapter.id,
            chapter.title,
            chapter.blocks.len(),
            chapter.text_len(),
            chapter.image_count()
        );
    }
    Ok(())
}

fn plan_chapters(config: Config, book_path: &Path, chapters: &[String]) -> Result<()> {
    let controller = Controller::with_config(config)?;
    let book = Book::from_json_file(book_path)?;
    for plan in controller.plan(&book, chapters) {
        println!(
            "{:<12} {:>4} segments ({} illustrations, {} chars) -> {}{}",
            plan.chapter_id,
            plan.segments,
            plan.illustrations,
            plan.characters,
            plan.output_path.display(),
            if plan.exists { " [exists]" } else { "" }
        );
    }
    Ok(())
}

async fn run_generate(config: Config, args: GenerateArgs) -> Result<()> {
    let controller = Controller::with_config(config)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run...");
            signal_token.cancel();
        }
    });

    let summary = controller
        .run(&args.book, &args.chapters, args.segments.as_deref(), args.force_overwrite, &cancel)
        .await?;

    if let Some(book) = &summary.book {
        info!("Book written to {:?}", book);
    }
    if summary.failed > 0 {
        error!("{} chapter(s) failed", summary.failed);
        return Err(anyhow!("{} chapter(s) failed", summary.failed));
    }
    info!("Success");
    Ok(())
}
