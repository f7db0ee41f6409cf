#![allow(dead_code)]

use assert_cmd::prelude::*;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub fn ffmpeg_available() -> bool {
    let ok = |bin: &str| {
        Command::new(bin)
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    };
    if ok("ffmpeg") && ok("ffprobe") {
        true
    } else {
        eprintln!("ffmpeg/ffprobe not found on PATH; skipping");
        false
    }
}

/// Command for the binary with config discovery pointed at `tmp`.
pub fn gif_fit_cmd(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gif_fit").expect("gif_fit binary");
    cmd.current_dir(tmp.path());
    cmd.env_remove("GIF_FIT_CONFIG");
    cmd.env("HOME", tmp.path());
    cmd.env("XDG_CONFIG_HOME", tmp.path().join("xdg"));
    cmd
}

/// Placeholder source for tests that never reach a real decoder.
pub fn fake_video(tmp: &TempDir, name: &str) -> PathBuf {
    let path = tmp.path().join(name);
    fs::write(&path, b"not a real video").expect("write fake video");
    path
}

/// Generates a short synthetic clip with ffmpeg's test source.
pub fn gen_test_clip(tmp: &TempDir, name: &str, size: &str, rate: u32, secs: u32) -> PathBuf {
    let path = tmp.path().join(name);
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "lavfi",
            "-i",
            &format!("testsrc=size={size}:rate={rate}:duration={secs}"),
            "-pix_fmt",
            "yuv420p",
            &path.to_string_lossy(),
        ])
        .status()
        .expect("run ffmpeg test source");
    assert!(status.success(), "ffmpeg test clip generation failed");
    path
}

pub fn ffprobe_stream_value(path: &Path, entry: &str) -> Result<String, Box<dyn Error>> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            &format!("stream={entry}"),
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            path.to_str().expect("path utf8"),
        ])
        .output()?;
    if !output.status.success() {
        return Err(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }
    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod script");
}

/// Stand-ins for ffmpeg/ffprobe. Every ffmpeg run writes `output_bytes`
/// to its last argument and appends its arguments to `calls.log`.
#[cfg(unix)]
pub struct FakeTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub log: PathBuf,
}

#[cfg(unix)]
impl FakeTools {
    pub fn new(tmp: &TempDir, output_bytes: u64, fail: bool) -> Self {
        let bin = tmp.path().join("bin");
        fs::create_dir_all(&bin).expect("create bin dir");
        let ffmpeg = bin.join("ffmpeg");
        let ffprobe = bin.join("ffprobe");
        let log = tmp.path().join("calls.log");

        let run = if fail {
            "echo 'Invalid data found when processing input' >&2\nexit 1\n".to_string()
        } else {
            format!("head -c {output_bytes} /dev/zero > \"$last\"\n")
        };
        write_script(
            &ffmpeg,
            &format!(
                "#!/bin/sh\nfor last; do :; done\necho \"$*\" >> '{}'\n{}",
                log.display(),
                run
            ),
        );
        write_script(
            &ffprobe,
            "#!/bin/sh\ncase \"$*\" in\n  *stream=width*) echo 640 ;;\n  *r_frame_rate*) echo 30/1 ;;\n  *) exit 1 ;;\nesac\n",
        );

        Self {
            ffmpeg,
            ffprobe,
            log,
        }
    }

    /// Rewrites the ffprobe stand-in so it reports the given `r_frame_rate`
    /// and `avg_frame_rate`, both for single-entry queries and for the
    /// multi-entry `--probe` query.
    pub fn set_frame_rates(&self, r_frame_rate: &str, avg_frame_rate: &str) {
        fs::write(
            &self.ffprobe,
            format!(
                "#!/bin/sh\ncase \"$*\" in\n  \
                 *format=duration*) printf 'width=640\\nheight=360\\nr_frame_rate={r}\\navg_frame_rate={avg}\\nduration=2.000000\\n' ;;\n  \
                 *stream=width*) echo 640 ;;\n  \
                 *stream=r_frame_rate*) echo {r} ;;\n  \
                 *stream=avg_frame_rate*) echo {avg} ;;\n  \
                 *) exit 1 ;;\nesac\n",
                r = r_frame_rate,
                avg = avg_frame_rate
            ),
        )
        .expect("rewrite ffprobe script");
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn encode_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|line| line.contains("paletteuse"))
            .collect()
    }

    pub fn apply(&self, cmd: &mut Command) {
        cmd.arg("--ffmpeg")
            .arg(&self.ffmpeg)
            .arg("--ffprobe")
            .arg(&self.ffprobe);
    }
}
