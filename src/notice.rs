//! User-facing conversion reports and the process exit codes they map to.

use crate::bytes_to_megabytes;
use crate::fit::FitOutcome;
use log::{error, info, warn};
use std::process::ExitCode;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Information,
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: &'static str,
    pub message: String,
}

impl Notice {
    pub fn from_outcome(outcome: &FitOutcome, max_size_mb: u32) -> Self {
        match outcome {
            FitOutcome::Fit { path, size, .. } => Notice {
                severity: Severity::Information,
                title: "Success",
                message: format!(
                    "GIF saved to: {}\nFinal size: {:.2} MB",
                    path.display(),
                    bytes_to_megabytes(*size)
                ),
            },
            FitOutcome::SizeTargetMissed { .. } => Notice {
                severity: Severity::Warning,
                title: "Error",
                message: format!(
                    "Could not reduce GIF to under {} MB. \
                     Try reducing the video length or choosing a larger file size limit.",
                    max_size_mb
                ),
            },
        }
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        Notice {
            severity: Severity::Critical,
            title: "Error",
            message: format!("Failed to convert video to GIF:\n{:#}", err),
        }
    }

    /// The message split into log lines, the first one prefixed with the title.
    pub fn log_lines(&self) -> Vec<String> {
        self.message
            .lines()
            .enumerate()
            .map(|(i, line)| match i {
                0 => format!("{}: {}", self.title, line),
                _ => line.to_string(),
            })
            .collect()
    }

    pub fn emit(&self) {
        for line in self.log_lines() {
            match self.severity {
                Severity::Information => info!("{}", line),
                Severity::Warning => warn!("{}", line),
                Severity::Critical => error!("{}", line),
            }
        }
    }

    /// 0 when the GIF fits, 2 when the size target was missed, 1 on error.
    pub fn exit_status(&self) -> u8 {
        match self.severity {
            Severity::Information => 0,
            Severity::Warning => 2,
            Severity::Critical => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}
