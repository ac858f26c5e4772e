//! Statistics and metrics for the relay

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live per-subscriber counters, updated from the producer thread
#[derive(Debug, Default)]
pub struct SubscriberCounters {
    delivered_video: AtomicU64,
    delivered_audio: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriberCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a frame accepted by one of the sinks
    pub fn record_delivered(&self, is_video: bool) {
        if is_video {
            self.delivered_video.fetch_add(1, Ordering::Relaxed);
        } else {
            self.delivered_audio.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a frame dropped because a sink was full
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy
    pub fn snapshot(&self) -> SubscriberStats {
        SubscriberStats {
            delivered_video: self.delivered_video.load(Ordering::Relaxed),
            delivered_audio: self.delivered_audio.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one subscriber's delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Video frames accepted by the video sink
    pub delivered_video: u64,
    /// Audio frames accepted by the audio sink
    pub delivered_audio: u64,
    /// Frames dropped on a full sink
    pub dropped: u64,
}

impl SubscriberStats {
    /// Total frames accepted
    pub fn delivered(&self) -> u64 {
        self.delivered_video + self.delivered_audio
    }
}

/// Bus-wide counters
#[derive(Debug, Default)]
pub struct BusCounters {
    frames_in: AtomicU64,
    bytes_in: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl BusCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one frame handed to the bus
    pub fn record_frame(&self, bytes: usize) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a subscriber removed because its sink was released
    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, subscribers: usize) -> BusStats {
        BusStats {
            subscribers,
            frames_in: self.frames_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Current subscriber count
    pub subscribers: usize,
    /// Frames handed to the bus
    pub frames_in: u64,
    /// Payload bytes handed to the bus
    pub bytes_in: u64,
    /// Per-subscriber deliveries
    pub delivered: u64,
    /// Per-subscriber drops on full sinks
    pub dropped: u64,
    /// Subscribers removed because their sink was released
    pub evicted: u64,
}

impl BusStats {
    /// Fraction of deliveries lost to backpressure
    pub fn drop_ratio(&self) -> f64 {
        let attempts = self.delivered + self.dropped;
        if attempts == 0 {
            0.0
        } else {
            self.dropped as f64 / attempts as f64
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Sessions opened since start
    pub total_sessions: u64,
    /// Sessions currently registered
    pub active_sessions: usize,
    /// Whether a recording job is running
    pub recording: bool,
    /// Playback jobs finished by the work pool
    pub jobs_completed: u64,
    /// Frame bus counters
    pub bus: BusStats,
    /// Uptime
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_counters() {
        let counters = SubscriberCounters::new();
        counters.record_delivered(true);
        counters.record_delivered(true);
        counters.record_delivered(false);
        counters.record_dropped();

        let snap = counters.snapshot();
        assert_eq!(snap.delivered_video, 2);
        assert_eq!(snap.delivered_audio, 1);
        assert_eq!(snap.delivered(), 3);
        assert_eq!(snap.dropped, 1);
    }

    #[test]
    fn test_drop_ratio() {
        let counters = BusCounters::new();
        assert_eq!(counters.snapshot(0).drop_ratio(), 0.0);

        for _ in 0..3 {
            counters.record_delivered();
        }
        counters.record_dropped();

        let stats = counters.snapshot(1);
        assert!((stats.drop_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bytes_accumulate() {
        let counters = BusCounters::new();
        counters.record_frame(100);
        counters.record_frame(50);

        let stats = counters.snapshot(0);
        assert_eq!(stats.frames_in, 2);
        assert_eq!(stats.bytes_in, 150);
    }
}
