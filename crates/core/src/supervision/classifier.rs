//! Outcome classification for finished generation jobs.
//!
//! The generator's exit code is unreliable: it can exit non-zero after
//! writing the video, or exit zero after logging a traceback. Log markers
//! therefore take precedence over the exit code.

use std::io::SeekFrom;
use std::path::Path;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Number of trailing log lines inspected.
pub const DEFAULT_TAIL_LINES: usize = 100;

/// Number of trailing lines quoted when only the exit code explains a failure.
const EXIT_CONTEXT_LINES: usize = 5;

/// Upper bound on bytes read from the end of the log for a tail.
const TAIL_WINDOW_BYTES: u64 = 1024 * 1024;

pub const DEFAULT_SUCCESS_MARKERS: &[&str] = &["Generation finished.Saving generated video to"];

pub const DEFAULT_FAILURE_MARKERS: &[&str] = &[
    "Error:",
    "Exception:",
    "Traceback",
    "CUDA out of memory",
    "RuntimeError",
    "AssertionError",
    "ValueError",
    "KeyError",
    "FileNotFoundError",
    "❌",
];

/// Substrings that classify log content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            success: DEFAULT_SUCCESS_MARKERS.iter().map(|m| m.to_string()).collect(),
            failure: DEFAULT_FAILURE_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

/// What decided a [`Verdict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictBasis {
    SuccessMarker(String),
    FailureMarker(String),
    ExitCode,
    /// The log file was missing; only the exit code was available.
    LogMissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub error_message: Option<String>,
    pub basis: VerdictBasis,
}

impl Verdict {
    fn success(basis: VerdictBasis) -> Self {
        Self {
            outcome: Outcome::Success,
            error_message: None,
            basis,
        }
    }

    fn failed(message: String, basis: VerdictBasis) -> Self {
        Self {
            outcome: Outcome::Failed,
            error_message: Some(message),
            basis,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Classify a finished job.
///
/// `exit_code` is `None` when the supervisor no longer owns the child and
/// cannot read its status; `tail` is `None` when the log file is missing.
/// An unknown exit code with no markers is a tentative success that the
/// caller confirms against the output artifact.
pub fn classify(exit_code: Option<i32>, tail: Option<&[String]>, markers: &MarkerSet) -> Verdict {
    let Some(lines) = tail else {
        return match exit_code {
            Some(code) if code != 0 => {
                Verdict::failed("log file not found".to_string(), VerdictBasis::LogMissing)
            }
            _ => Verdict::success(VerdictBasis::LogMissing),
        };
    };

    if let Some(marker) = markers
        .success
        .iter()
        .find(|m| lines.iter().any(|line| line.contains(m.as_str())))
    {
        return Verdict::success(VerdictBasis::SuccessMarker(marker.clone()));
    }

    if let Some(marker) = markers
        .failure
        .iter()
        .find(|m| lines.iter().any(|line| line.contains(m.as_str())))
    {
        let needle = marker.to_lowercase();
        let message = lines
            .iter()
            .find(|line| line.to_lowercase().contains(&needle))
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .unwrap_or_else(|| format!("found error marker: {marker}"));
        return Verdict::failed(message, VerdictBasis::FailureMarker(marker.clone()));
    }

    match exit_code {
        None | Some(0) => Verdict::success(VerdictBasis::ExitCode),
        Some(code) => {
            let start = lines.len().saturating_sub(EXIT_CONTEXT_LINES);
            let context = lines[start..].join("\n");
            let context = context.trim();
            let message = if context.is_empty() {
                format!("process exited with code {code}")
            } else {
                context.to_string()
            };
            Verdict::failed(message, VerdictBasis::ExitCode)
        }
    }
}

/// Read the last `lines` lines of the log at `path`.
///
/// Returns `Ok(None)` when the file does not exist. At most the final
/// [`TAIL_WINDOW_BYTES`] of the file are read.
pub async fn read_tail(path: &Path, lines: usize) -> std::io::Result<Option<Vec<String>>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let len = file.metadata().await?.len();
    let offset = len.saturating_sub(TAIL_WINDOW_BYTES);
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buf).await?;

    let text = String::from_utf8_lossy(&buf);
    let mut all: Vec<&str> = text.lines().collect();
    // The first line of a mid-file window is usually partial.
    if offset > 0 && !all.is_empty() {
        all.remove(0);
    }
    let start = all.len().saturating_sub(lines);
    Ok(Some(all[start..].iter().map(|l| l.to_string()).collect()))
}
