//! Ingestion points
//!
//! A `FrameSink` is the entry of a session's private send path. The bus only
//! ever calls `try_push`, which must not block.

use tokio::sync::mpsc;

use super::frame::MediaFrame;

/// Result of offering a frame to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued
    Accepted,
    /// Sink is saturated; the frame was dropped
    Full,
    /// Sink has been released; its subscriber should be removed
    Closed,
}

/// Non-blocking frame ingestion point
pub trait FrameSink: Send + Sync {
    /// Offer a frame without blocking
    fn try_push(&self, frame: MediaFrame) -> PushOutcome;
}

/// Bounded queue in front of a pipeline's appsrc
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MediaFrame>,
}

impl ChannelSink {
    /// Create a sink with room for `capacity` frames and the receiving end
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MediaFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Whether the receiving end is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FrameSink for ChannelSink {
    fn try_push(&self, frame: MediaFrame) -> PushOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => PushOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => PushOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(pts: u64) -> MediaFrame {
        MediaFrame::audio(pts, Bytes::from_static(b"opus"))
    }

    #[test]
    fn test_push_until_full() {
        let (sink, mut rx) = ChannelSink::new(2);

        assert_eq!(sink.try_push(frame(0)), PushOutcome::Accepted);
        assert_eq!(sink.try_push(frame(1)), PushOutcome::Accepted);
        assert_eq!(sink.try_push(frame(2)), PushOutcome::Full);

        assert_eq!(rx.try_recv().unwrap().pts, 0);
        assert_eq!(sink.try_push(frame(3)), PushOutcome::Accepted);
    }

    #[test]
    fn test_push_after_release() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);

        assert!(sink.is_closed());
        assert_eq!(sink.try_push(frame(0)), PushOutcome::Closed);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (sink, _rx) = ChannelSink::new(0);
        assert_eq!(sink.try_push(frame(0)), PushOutcome::Accepted);
    }
}
