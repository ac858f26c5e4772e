//! Frame Broadcast Bus
//!
//! One producer (the media engine's streaming thread) hands every encoded
//! frame to the bus; the bus forwards it to the matching ingestion point of
//! every subscribed session.
//!
//! # Architecture
//!
//! ```text
//!                     Arc<FrameBus>
//!              ┌──────────────────────────┐
//!              │ subscribers: RwLock<Map< │
//!              │   SubscriberId,          │
//!              │   (video sink,           │
//!              │    audio sink)           │
//!              │ >>                       │
//!              └────────────┬─────────────┘
//!                           │ read lock, try_push
//!         ┌─────────────────┼─────────────────┐
//!         ▼                 ▼                 ▼
//!    [session 1]       [session 2]       [session 3]
//!    send pipeline     send pipeline     (queue full: frame dropped)
//! ```
//!
//! # Backpressure
//!
//! Delivery never blocks the producer. A sink that cannot take a frame drops
//! it; a sink whose owner has already gone away is unsubscribed on the spot.
//!
//! `bytes::Bytes` is reference counted, so every subscriber shares the same
//! frame allocation.

pub mod frame;
pub mod sink;
pub mod store;

pub use frame::{FrameKind, MediaFrame};
pub use sink::{ChannelSink, FrameSink, PushOutcome};
pub use store::{FrameBus, SubscriberId};
