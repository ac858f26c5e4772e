//! Synthetic frame producer
//!
//! Drives the bus from a dedicated thread at a fixed rate, the way a capture
//! pipeline's streaming thread would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::bus::{FrameBus, MediaFrame};

/// Highest rate the test source will run at
pub const MAX_FPS: u32 = 1000;

/// Time between frames at `fps`, clamped to `1..=MAX_FPS`
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs(1) / fps.clamp(1, MAX_FPS)
}

/// Handle to a running test source; stops the thread on drop
pub struct TestSource {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<u64>>,
}

impl TestSource {
    /// Start producing `fps` video frames (plus one audio frame each) per second
    pub fn spawn(bus: Arc<FrameBus>, fps: u32) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let fps = fps.clamp(1, MAX_FPS);
        let interval = frame_interval(fps);

        let thread = thread::Builder::new()
            .name("test-source".into())
            .spawn(move || {
                let video = Bytes::from(vec![0u8; 1200]);
                let audio = Bytes::from(vec![0u8; 160]);
                let mut produced = 0u64;

                while flag.load(Ordering::Relaxed) {
                    let pts = produced * 1000 / u64::from(fps);
                    let keyframe = produced % u64::from(fps) == 0;
                    bus.on_frame(&MediaFrame::video(pts, video.clone(), keyframe));
                    bus.on_frame(&MediaFrame::audio(pts, audio.clone()));
                    produced += 1;
                    thread::sleep(interval);
                }
                produced
            })?;

        tracing::info!(fps, "Test source started");
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Stop producing and wait for the thread
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.running.store(false, Ordering::Relaxed);
        match self.thread.take().map(|t| t.join()) {
            Some(Ok(produced)) => {
                tracing::info!(produced, "Test source stopped");
                produced
            }
            Some(Err(_)) => {
                tracing::error!("Test source thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for TestSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}
