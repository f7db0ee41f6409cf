//! Source/destination validation and the select-then-convert session.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use std::fs::File;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

pub const DEFAULT_OUTPUT_FILE: &str = "output.gif";
const GIF_EXTENSION: &str = "gif";
const IDLE_STATUS: &str = "Select a video file to convert to GIF.";

/// Containers accepted as conversion sources.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum VideoContainer {
    Mp4,
    Avi,
    Mov,
    Mkv,
}

impl VideoContainer {
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// e.g. `mp4, avi, mov, mkv`
    pub fn supported_list() -> String {
        Self::iter()
            .map(|container| container.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedVideo {
    path: PathBuf,
    container: VideoContainer,
}

impl SelectedVideo {
    /// Accepts `path` only if it is an existing, readable file with a
    /// supported container extension.
    pub fn select(path: &Path) -> Result<Self> {
        let container = VideoContainer::from_path(path).ok_or_else(|| {
            anyhow!(
                "Unsupported video file '{}'; expected one of: {}",
                path.display(),
                VideoContainer::supported_list()
            )
        })?;

        let meta = path
            .metadata()
            .with_context(|| format!("Video file '{}' does not exist", path.display()))?;
        if !meta.is_file() {
            bail!("'{}' is not a regular file", path.display());
        }
        File::open(path)
            .with_context(|| format!("Video file '{}' is not readable", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            container,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn container(&self) -> VideoContainer {
        self.container
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Checks that `output` is a `.gif` path in an existing directory that does
/// not point at the source video.
pub fn validate_destination(output: &Path, input: &Path) -> Result<PathBuf> {
    if same_file(output, input) {
        bail!(
            "Output file '{}' would overwrite the source video",
            output.display()
        );
    }

    let is_gif = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(GIF_EXTENSION));
    if !is_gif {
        bail!(
            "Output file '{}' must have a .{} extension",
            output.display(),
            GIF_EXTENSION
        );
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            bail!(
                "Output directory '{}' does not exist",
                parent.display()
            );
        }
    }

    if output.exists() {
        debug!(
            "Output file '{}' exists and will be overwritten",
            output.display()
        );
    }

    Ok(output.to_path_buf())
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Holds at most one selected source. Converting consumes the selection,
/// so every conversion starts from a fresh pick whatever its outcome.
#[derive(Debug, Default)]
pub struct Session {
    selected: Option<SelectedVideo>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current selection. An invalid pick leaves the session
    /// without a selection.
    pub fn select(&mut self, path: &Path) -> Result<&SelectedVideo> {
        self.selected = None;
        let video = SelectedVideo::select(path)?;
        info!("Selected Video: {}", video.file_name());
        Ok(&*self.selected.insert(video))
    }

    pub fn can_convert(&self) -> bool {
        self.selected.is_some()
    }

    pub fn status_line(&self) -> String {
        match &self.selected {
            Some(video) => format!("Selected Video: {}", video.file_name()),
            None => IDLE_STATUS.to_string(),
        }
    }

    /// Runs `convert` on the selected source and resets the selection.
    pub fn convert<R>(&mut self, convert: impl FnOnce(&SelectedVideo) -> Result<R>) -> Result<R> {
        let video = self
            .selected
            .take()
            .ok_or_else(|| anyhow!("Please select a video file first."))?;
        convert(&video)
    }
}
