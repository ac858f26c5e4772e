//! Frame bus implementation
//!
//! Holds the subscriber set and forwards each frame from the producer to
//! every subscriber's ingestion points.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::frame::{FrameKind, MediaFrame};
use super::sink::{FrameSink, PushOutcome};
use crate::registry::ConnectionId;
use crate::stats::{BusCounters, BusStats, SubscriberCounters, SubscriberStats};

/// Handle returned by [`FrameBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    /// Session that owns the sinks
    owner: ConnectionId,

    video: Arc<dyn FrameSink>,

    audio: Arc<dyn FrameSink>,

    counters: SubscriberCounters,
}

impl Subscriber {
    fn sink(&self, kind: FrameKind) -> &Arc<dyn FrameSink> {
        match kind {
            FrameKind::Video => &self.video,
            FrameKind::Audio => &self.audio,
        }
    }
}

/// Fan-out of encoded frames to every subscribed session
///
/// The producer calls [`on_frame`](FrameBus::on_frame) from its own thread.
/// Delivery happens under a read lock; subscribe and unsubscribe take the
/// write lock, so a frame is delivered either to the whole set as it stood
/// before a change or to the whole set after it.
pub struct FrameBus {
    /// Current subscriber set
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,

    /// Next subscriber id
    next_id: AtomicU64,

    /// Bus-wide counters
    counters: BusCounters,
}

impl FrameBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            counters: BusCounters::new(),
        }
    }

    /// Add a session's ingestion points to the subscriber set
    pub fn subscribe(
        &self,
        owner: ConnectionId,
        video: Arc<dyn FrameSink>,
        audio: Arc<dyn FrameSink>,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write();
        subscribers.insert(
            id,
            Subscriber {
                owner,
                video,
                audio,
                counters: SubscriberCounters::new(),
            },
        );

        tracing::debug!(
            subscriber = %id,
            session = %owner,
            subscribers = subscribers.len(),
            "Subscriber added"
        );

        id
    }

    /// Remove a subscriber
    ///
    /// Returns `false` if it was not subscribed. Once this returns, no
    /// further frame reaches the removed sinks.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id);

        match removed {
            Some(sub) => {
                let stats = sub.counters.snapshot();
                tracing::debug!(
                    subscriber = %id,
                    session = %sub.owner,
                    delivered = stats.delivered(),
                    dropped = stats.dropped,
                    "Subscriber removed"
                );
                true
            }
            None => false,
        }
    }

    /// Forward one frame to every current subscriber
    ///
    /// Never blocks: a full sink drops the frame, a released sink gets its
    /// subscriber evicted. Returns the number of sinks that accepted it.
    pub fn on_frame(&self, frame: &MediaFrame) -> usize {
        self.counters.record_frame(frame.size());

        let mut accepted = 0;
        let mut released = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (id, sub) in subscribers.iter() {
                match sub.sink(frame.kind).try_push(frame.clone()) {
                    PushOutcome::Accepted => {
                        accepted += 1;
                        sub.counters.record_delivered(frame.is_video());
                        self.counters.record_delivered();
                    }
                    PushOutcome::Full => {
                        sub.counters.record_dropped();
                        self.counters.record_dropped();
                        tracing::trace!(
                            subscriber = %id,
                            session = %sub.owner,
                            pts = frame.pts,
                            "Sink full, frame dropped"
                        );
                    }
                    PushOutcome::Closed => released.push(*id),
                }
            }
        }

        for id in released {
            if self.unsubscribe(id) {
                self.counters.record_evicted();
                tracing::debug!(subscriber = %id, "Evicted subscriber with released sink");
            }
        }

        accepted
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether a subscriber is still in the set
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    /// Delivery counters for one subscriber
    pub fn subscriber_stats(&self, id: SubscriberId) -> Option<SubscriberStats> {
        self.subscribers
            .read()
            .get(&id)
            .map(|sub| sub.counters.snapshot())
    }

    /// Bus-wide counters
    pub fn stats(&self) -> BusStats {
        self.counters.snapshot(self.subscriber_count())
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}
