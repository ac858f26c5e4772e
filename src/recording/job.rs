//! Recording jobs and output paths

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::engine::RecordingPipeline;
use crate::registry::ConnectionId;

/// The one running recording
pub struct RecordingJob {
    /// Session that started it
    pub holder: ConnectionId,

    /// Engine handle writing the file
    pub(crate) pipeline: Box<dyn RecordingPipeline>,

    /// Monotonic start time
    pub started_at: Instant,

    /// Auto-stop deadline, if any
    pub max_duration: Option<Duration>,

    /// Distinguishes this job from later ones for the auto-stop timer
    pub(crate) generation: u64,
}

impl RecordingJob {
    /// File being written
    pub fn path(&self) -> &Path {
        self.pipeline.path()
    }

    /// Time since the recording started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Output path for a recording started at `now`
///
/// `<root>/record/<YYYY-MM-DD>/motion-<YYYY-MM-DD_HH-MM-SS>.mkv`, with a
/// numeric suffix if a file of that name already exists.
pub fn output_path(root: &Path, now: DateTime<Local>) -> PathBuf {
    let dir = root.join("record").join(now.format("%F").to_string());
    let stem = format!("motion-{}", now.format("%F_%H-%M-%S"));

    let mut path = dir.join(format!("{}.mkv", stem));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}-{}.mkv", stem, n));
        n += 1;
    }
    path
}
