//! Size-bounded GIF conversion: encode, measure, shrink, retry.

use crate::bytes_to_megabytes;
use crate::ffmpeg::{EncodeParams, MediaTool};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Retries allowed after the first encode.
pub const MAX_RETRIES: u32 = 5;
pub const SCALE_STEP: f64 = 0.7;
pub const FPS_STEP: f64 = 0.8;
pub const MIN_INITIAL_FPS: u32 = 10;
pub const MIN_RETRY_FPS: u32 = 5;

/// Parameters of the `attempt`-th encode (0 is the first try).
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct AttemptParams {
    pub attempt: u32,
    pub scale: f64,
    pub fps: u32,
}

impl AttemptParams {
    pub fn encode_params(&self) -> EncodeParams {
        EncodeParams {
            scale: self.scale,
            fps: self.fps,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FitOutcome {
    Fit {
        path: PathBuf,
        size: u64,
        attempts: u32,
        params: AttemptParams,
    },
    SizeTargetMissed {
        ceiling: u64,
        last_size: u64,
        attempts: u32,
    },
}

/// Half the source rate, never below [`MIN_INITIAL_FPS`].
pub fn initial_fps(source_fps: f64) -> u32 {
    let half = (source_fps / 2.0).floor();
    let half = if half.is_finite() && half > 0.0 {
        half as u32
    } else {
        0
    };
    half.max(MIN_INITIAL_FPS)
}

/// Schedule entry for attempt `n`: scale 0.7^n, fps max(5, floor(initial * 0.8^n)).
pub fn attempt_params(attempt: u32, initial_fps: u32) -> AttemptParams {
    if attempt == 0 {
        return AttemptParams {
            attempt,
            scale: 1.0,
            fps: initial_fps,
        };
    }
    let mut scale = 1.0;
    for _ in 0..attempt {
        scale *= SCALE_STEP;
    }
    let fps = (initial_fps as f64 * FPS_STEP.powi(attempt as i32)).floor() as u32;
    AttemptParams {
        attempt,
        scale,
        fps: fps.max(MIN_RETRY_FPS),
    }
}

/// Every attempt the driver may run, in order.
pub fn attempt_schedule(initial_fps: u32) -> Vec<AttemptParams> {
    (0..=MAX_RETRIES)
        .map(|attempt| attempt_params(attempt, initial_fps))
        .collect()
}

fn output_size(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path)
        .with_context(|| format!("Encoder did not produce '{}'", path.display()))?;
    Ok(meta.len())
}

fn remove_output(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err)
            .with_context(|| format!("Failed to remove oversized output '{}'", path.display())),
    }
}

/// Converts `input` into a GIF at `output` no larger than `ceiling` bytes.
///
/// Hard failures (probe/encode/file errors) are `Err`; running out of
/// retries is [`FitOutcome::SizeTargetMissed`] and leaves no file behind.
pub fn fit_to_size<T: MediaTool + ?Sized>(
    tool: &T,
    input: &Path,
    output: &Path,
    ceiling: u64,
) -> Result<FitOutcome> {
    if ceiling == 0 {
        bail!("Size ceiling must be positive");
    }

    let source_fps = tool
        .probe_frame_rate(input)
        .with_context(|| format!("Failed to read frame rate of '{}'", input.display()))?;
    let start_fps = initial_fps(source_fps);
    debug!(
        "Source frame rate {:.3} fps; starting at {} fps",
        source_fps, start_fps
    );

    let mut params = attempt_params(0, start_fps);
    let mut size = encode_attempt(tool, input, output, params)?;

    while size > ceiling && params.attempt < MAX_RETRIES {
        remove_output(output)?;
        params = attempt_params(params.attempt + 1, start_fps);
        info!(
            "Output is {:.2} MB (limit {:.2} MB); retrying at scale {:.3}, {} fps ({}/{})",
            bytes_to_megabytes(size),
            bytes_to_megabytes(ceiling),
            params.scale,
            params.fps,
            params.attempt,
            MAX_RETRIES
        );
        size = encode_attempt(tool, input, output, params)?;
    }

    let attempts = params.attempt + 1;
    if size > ceiling {
        remove_output(output)?;
        warn!(
            "Smallest encode was {:.2} MB after {} attempts; removed '{}'",
            bytes_to_megabytes(size),
            attempts,
            output.display()
        );
        return Ok(FitOutcome::SizeTargetMissed {
            ceiling,
            last_size: size,
            attempts,
        });
    }

    Ok(FitOutcome::Fit {
        path: output.to_path_buf(),
        size,
        attempts,
        params,
    })
}

fn encode_attempt<T: MediaTool + ?Sized>(
    tool: &T,
    input: &Path,
    output: &Path,
    params: AttemptParams,
) -> Result<u64> {
    tool.encode_gif(input, output, params.encode_params())
        .with_context(|| {
            if params.attempt == 0 {
                "FFmpeg conversion failed".to_string()
            } else {
                format!(
                    "FFmpeg conversion failed during resize attempt {}",
                    params.attempt
                )
            }
        })?;
    let size = output_size(output)?;
    debug!(
        "Attempt {} produced {} bytes (scale {:.3}, {} fps)",
        params.attempt, size, params.scale, params.fps
    );
    Ok(size)
}
