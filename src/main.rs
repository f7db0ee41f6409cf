use anyhow::{Context, Result};
use clap::parser::ValueSource;
use clap::{value_parser, ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use gif_fit::config::{self, MAX_MAX_SIZE_MB, MIN_MAX_SIZE_MB};
use gif_fit::ffmpeg::{even_width, FfmpegCli, SourceInfo};
use gif_fit::fit::{attempt_schedule, fit_to_size, initial_fps, AttemptParams};
use gif_fit::notice::Notice;
use gif_fit::selection::{validate_destination, SelectedVideo, Session, DEFAULT_OUTPUT_FILE};
use gif_fit::{bytes_to_megabytes, logging, megabytes_to_bytes};
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video file to convert (mp4, avi, mov or mkv)
    #[arg(value_parser = value_parser!(PathBuf))]
    input_file: PathBuf,

    /// Where to save the GIF
    #[arg(value_parser = value_parser!(PathBuf), default_value = DEFAULT_OUTPUT_FILE)]
    output_file: PathBuf,

    /// Maximum GIF size in MB
    #[arg(
        short,
        long,
        value_name = "MB",
        default_value_t = 5,
        value_parser = value_parser!(u32).range(MIN_MAX_SIZE_MB as i64..=MAX_MAX_SIZE_MB as i64),
        id = "max_size_mb"
    )]
    max_size_mb: u32,

    /// Path to the configuration file
    #[arg(short, long, value_parser = value_parser!(PathBuf))]
    config_file: Option<PathBuf>,

    /// ffmpeg binary to run (defaults to `ffmpeg` on PATH)
    #[arg(long, value_parser = value_parser!(PathBuf))]
    ffmpeg: Option<PathBuf>,

    /// ffprobe binary to run (defaults to `ffprobe` on PATH)
    #[arg(long, value_parser = value_parser!(PathBuf))]
    ffprobe: Option<PathBuf>,

    /// Print source details and the attempt schedule, then exit
    #[arg(long, default_value_t = false)]
    probe: bool,

    /// Output format for --probe: text|json
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(Serialize)]
struct ProbeAttempt {
    #[serde(flatten)]
    params: AttemptParams,
    width: Option<u32>,
}

#[derive(Serialize)]
struct ProbeReport {
    source: SourceInfo,
    max_size_bytes: u64,
    initial_fps: Option<u32>,
    attempts: Vec<ProbeAttempt>,
}

fn cli_value_provided(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|src| matches!(src, ValueSource::CommandLine))
}

fn apply_config_overrides(args: &mut Args, cfg: &config::Config, matches: &ArgMatches) {
    if !cli_value_provided(matches, "max_size_mb") {
        if let Some(max_size_mb) = cfg.max_size_mb {
            args.max_size_mb = max_size_mb;
        }
    }

    if args.ffmpeg.is_none() {
        args.ffmpeg = cfg.ffmpeg.clone();
    }

    if args.ffprobe.is_none() {
        args.ffprobe = cfg.ffprobe.clone();
    }
}

fn build_tool(args: &Args) -> FfmpegCli {
    let defaults = FfmpegCli::default();
    FfmpegCli::new(
        args.ffmpeg
            .clone()
            .unwrap_or_else(|| defaults.ffmpeg().to_path_buf()),
        args.ffprobe
            .clone()
            .unwrap_or_else(|| defaults.ffprobe().to_path_buf()),
    )
}

fn probe_report(tool: &FfmpegCli, video: &SelectedVideo, max_size_bytes: u64) -> Result<ProbeReport> {
    let source = tool.probe_source(video.path())?;
    let initial = source.frame_rate.map(initial_fps);
    let attempts = initial
        .map(attempt_schedule)
        .unwrap_or_default()
        .into_iter()
        .map(|params| ProbeAttempt {
            params,
            width: source.width.map(|w| even_width(w, params.scale)),
        })
        .collect();
    Ok(ProbeReport {
        source,
        max_size_bytes,
        initial_fps: initial,
        attempts,
    })
}

fn print_probe_text(report: &ProbeReport) {
    let source = &report.source;
    let or_unknown = |value: Option<String>| value.unwrap_or_else(|| "unknown".to_string());
    println!("Source: {}", source.path);
    println!(
        "  Resolution: {}x{}",
        or_unknown(source.width.map(|w| w.to_string())),
        or_unknown(source.height.map(|h| h.to_string()))
    );
    println!(
        "  Frame rate: {}",
        or_unknown(source.frame_rate.map(|r| format!("{:.3} fps", r)))
    );
    println!(
        "  Duration: {}",
        or_unknown(source.duration_secs.map(|d| format!("{:.2} s", d)))
    );
    println!(
        "Size limit: {:.2} MB ({} bytes)",
        bytes_to_megabytes(report.max_size_bytes),
        report.max_size_bytes
    );
    println!("Attempt schedule:");
    for attempt in &report.attempts {
        println!(
            "  #{} scale {:.3} fps {} width {}",
            attempt.params.attempt,
            attempt.params.scale,
            attempt.params.fps,
            or_unknown(attempt.width.map(|w| w.to_string()))
        );
    }
}

fn run(matches: &ArgMatches, mut args: Args) -> Result<Option<Notice>> {
    let loaded_config = config::load(args.config_file.as_deref())?;
    if let Some((cfg, source)) = &loaded_config {
        match source {
            config::ConfigSource::Env(path) => info!(
                "Loaded configuration from '{}' (via {}).",
                path.display(),
                config::CONFIG_ENV_VAR
            ),
            config::ConfigSource::Cli(path) | config::ConfigSource::Default(path) => {
                info!("Loaded configuration from '{}'.", path.display())
            }
        }
        apply_config_overrides(&mut args, cfg, matches);
    }
    logging::log_relevant_env();

    let tool = build_tool(&args);
    let max_size_bytes = megabytes_to_bytes(args.max_size_mb);
    debug!(
        "Using ffmpeg '{}', ffprobe '{}', limit {} MB",
        tool.ffmpeg().display(),
        tool.ffprobe().display(),
        args.max_size_mb
    );

    let mut session = Session::new();
    let video = session.select(&args.input_file)?;
    debug!("Source container: {}", video.container());

    if args.probe {
        let report = session.convert(|video| probe_report(&tool, video, max_size_bytes))?;
        match args.output {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize probe report")?
            ),
            OutputFormat::Text => print_probe_text(&report),
        }
        return Ok(None);
    }

    let outcome = session.convert(|video| {
        let output = validate_destination(&args.output_file, video.path())?;
        info!(
            "Converting '{}' -> '{}' (limit {} MB)",
            video.path().display(),
            output.display(),
            args.max_size_mb
        );
        fit_to_size(&tool, video.path(), &output, max_size_bytes)
    })?;
    debug!("{}", session.status_line());

    Ok(Some(Notice::from_outcome(&outcome, args.max_size_mb)))
}

fn main() -> ExitCode {
    logging::init();

    let matches = Args::command().get_matches();
    let args = match Args::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };

    match run(&matches, args) {
        Ok(Some(notice)) => {
            notice.emit();
            notice.exit_code()
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(err) => {
            let notice = Notice::from_error(&err);
            notice.emit();
            notice.exit_code()
        }
    }
}
