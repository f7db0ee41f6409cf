//! Thin wrappers around the `ffprobe` / `ffmpeg` command-line tools.
//!
//! Every invocation is synchronous. A non-zero exit status is an error and
//! nothing here retries; retries belong to [`crate::fit`].

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, trace, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_FFPROBE: &str = "ffprobe";

const PALETTE_SUFFIX: &str = "_palette.png";
const SCALE_FLAGS: &str = "lanczos";
const MIN_ENCODE_WIDTH: u32 = 2;
const STDERR_TAIL_LINES: usize = 8;

/// Scale and frame rate for a single encode.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EncodeParams {
    pub scale: f64,
    pub fps: u32,
}

/// What the conversion driver needs from the external media tooling.
pub trait MediaTool {
    /// Native frame rate of the first video stream.
    fn probe_frame_rate(&self, input: &Path) -> Result<f64>;

    /// Pixel width of the first video stream.
    fn probe_width(&self, input: &Path) -> Result<u32>;

    /// Two-pass palette encode of `input` into the GIF at `output`.
    fn encode_gif(&self, input: &Path, output: &Path, params: EncodeParams) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FfmpegCli {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegCli {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG, DEFAULT_FFPROBE)
    }
}

impl FfmpegCli {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }

    fn probe_stream_entry(&self, input: &Path, entry: &str) -> Result<String> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg(format!("stream={entry}"))
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input);
        let output = run_tool(&mut cmd, "ffprobe")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let value = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "ffprobe reported no '{}' for the first video stream of '{}'",
                    entry,
                    input.display()
                )
            })?;
        trace!("ffprobe {} for '{}': {}", entry, input.display(), value);
        Ok(value.to_string())
    }

    /// Collects the metadata shown by `--probe`. Missing fields are `None`.
    pub fn probe_source(&self, input: &Path) -> Result<SourceInfo> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg("stream=width,height,r_frame_rate,avg_frame_rate:format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1")
            .arg(input);
        let output = run_tool(&mut cmd, "ffprobe")?;
        let fields = parse_key_values(&String::from_utf8_lossy(&output.stdout));

        Ok(SourceInfo {
            path: input.display().to_string(),
            width: fields.get("width").and_then(|v| v.parse().ok()),
            height: fields.get("height").and_then(|v| v.parse().ok()),
            frame_rate: fields
                .get("r_frame_rate")
                .and_then(|v| parse_frame_rate(v))
                .or_else(|| fields.get("avg_frame_rate").and_then(|v| parse_frame_rate(v))),
            duration_secs: fields
                .get("duration")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d >= 0.0),
        })
    }
}

impl MediaTool for FfmpegCli {
    fn probe_frame_rate(&self, input: &Path) -> Result<f64> {
        let raw = self.probe_stream_entry(input, "r_frame_rate")?;
        if let Some(rate) = parse_frame_rate(&raw) {
            return Ok(rate);
        }
        debug!(
            "r_frame_rate '{}' unusable for '{}'; falling back to avg_frame_rate",
            raw,
            input.display()
        );
        let avg = self.probe_stream_entry(input, "avg_frame_rate")?;
        parse_frame_rate(&avg).ok_or_else(|| {
            anyhow!(
                "Unable to determine frame rate of '{}' (r_frame_rate={}, avg_frame_rate={})",
                input.display(),
                raw,
                avg
            )
        })
    }

    fn probe_width(&self, input: &Path) -> Result<u32> {
        let raw = self.probe_stream_entry(input, "width")?;
        let width: u32 = raw.parse().with_context(|| {
            format!("ffprobe returned invalid width '{}' for '{}'", raw, input.display())
        })?;
        if width == 0 {
            bail!("ffprobe returned zero width for '{}'", input.display());
        }
        Ok(width)
    }

    fn encode_gif(&self, input: &Path, output: &Path, params: EncodeParams) -> Result<()> {
        let source_width = self.probe_width(input)?;
        let width = even_width(source_width, params.scale);
        debug!(
            "Encoding '{}' at {} fps, width {} (source {} x {:.3})",
            input.display(),
            params.fps,
            width,
            source_width,
            params.scale
        );

        let palette = PaletteGuard::new(palette_path(output));

        let mut palettegen = Command::new(&self.ffmpeg);
        palettegen
            .args(["-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(palettegen_filter(params.fps, width))
            .arg("-y")
            .arg(palette.path());
        run_tool(&mut palettegen, "ffmpeg palettegen")?;

        let mut paletteuse = Command::new(&self.ffmpeg);
        paletteuse
            .args(["-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(input)
            .arg("-i")
            .arg(palette.path())
            .arg("-lavfi")
            .arg(paletteuse_filter(params.fps, width))
            .arg("-y")
            .arg(output);
        run_tool(&mut paletteuse, "ffmpeg paletteuse")?;

        Ok(())
    }
}

/// Removes the intermediate palette image when the encode finishes or fails.
struct PaletteGuard {
    path: PathBuf,
}

impl PaletteGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PaletteGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "Failed to remove palette file '{}': {}",
                    self.path.display(),
                    err
                );
            }
        } else {
            trace!("Removed palette file '{}'.", self.path.display());
        }
    }
}

fn run_tool(cmd: &mut Command, label: &str) -> Result<Output> {
    debug!("Running {}: {:?}", label, cmd);
    let output = cmd
        .output()
        .with_context(|| format!("Failed to launch {} ({:?})", label, cmd.get_program()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr_tail(&stderr);
        if tail.is_empty() {
            bail!("{} exited with {}", label, output.status);
        }
        bail!("{} exited with {}: {}", label, output.status, tail);
    }
    Ok(output)
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("; ")
}

fn parse_key_values(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(_, value)| !value.is_empty() && value != "N/A")
        .collect()
}

/// Largest even width not above `source_width * scale`, never below 2.
pub fn even_width(source_width: u32, scale: f64) -> u32 {
    let scaled = (source_width as f64 * scale).floor();
    let scaled = if scaled.is_finite() && scaled > 0.0 {
        scaled as u32
    } else {
        0
    };
    (scaled - scaled % 2).max(MIN_ENCODE_WIDTH)
}

/// Parses ffprobe rates such as `30000/1001` or `25`.
pub fn parse_frame_rate(value: &str) -> Option<f64> {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// `<output>_palette.png`, next to the destination.
pub fn palette_path(output: &Path) -> PathBuf {
    let mut raw: OsString = output.as_os_str().to_owned();
    raw.push(PALETTE_SUFFIX);
    PathBuf::from(raw)
}

fn sampling_filter(fps: u32, width: u32) -> String {
    format!("fps={fps},scale={width}:-1:flags={SCALE_FLAGS}")
}

pub fn palettegen_filter(fps: u32, width: u32) -> String {
    format!("{},palettegen", sampling_filter(fps, width))
}

pub fn paletteuse_filter(fps: u32, width: u32) -> String {
    format!("{} [x]; [x][1:v] paletteuse", sampling_filter(fps, width))
}
