//! Recording Controller
//!
//! At most one recording runs at a time, whoever asks for it. The first
//! session to ask claims it; later requests get
//! [`StartOutcome::AlreadyActive`] and tell their own viewer. Any session may
//! stop the recording; the holder's teardown stops it too, and an optional
//! timer stops it after a maximum duration.

pub mod controller;
pub mod job;

pub use controller::{Recorder, StartOutcome};
pub use job::{output_path, RecordingJob};
