//! camera-relay: fan one captured camera out to many WebRTC viewers
//!
//! The crate is the session and fan-out core of a WebRTC camera server. The
//! capture/encode pipeline and the peer-connection internals are owned by a
//! [`MediaEngine`](engine::MediaEngine) implementation; this crate decides who
//! is connected, which frames go where, and who may record.
//!
//! # Architecture
//!
//! ```text
//!   producer thread                         transport (axum WebSocket)
//!   (engine clock)                                     │
//!        │                                             ▼
//!        │ on_frame()                        ┌───────────────────┐
//!        ▼                                   │  Signaling Gateway│
//!   ┌──────────┐   try_push (drop on full)   │  server::connection│
//!   │ FrameBus │ ──────────────┐             └─────────┬─────────┘
//!   └──────────┘               │                       │ open / deliver / close
//!                              ▼                       ▼
//!                     ┌────────────────┐      ┌──────────────────┐
//!                     │ send pipeline  │◄─────│ Session (inbox)  │
//!                     │ (per viewer)   │      │ state machine    │
//!                     └────────────────┘      └────────┬─────────┘
//!                                                      │
//!                          ┌───────────────────────────┼──────────────┐
//!                          ▼                           ▼              ▼
//!                  SessionRegistry               Recorder        WorkPool
//!                  (single teardown)           (single-flight)  (playback)
//! ```
//!
//! All shared services are constructed once in a
//! [`ServerContext`](server::ServerContext) and handed to every connection;
//! there are no process-wide singletons.

pub mod auth;
pub mod bus;
pub mod engine;
pub mod error;
pub mod pool;
pub mod presence;
pub mod protocol;
pub mod recording;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use bus::{FrameBus, FrameKind, MediaFrame};
pub use error::{Error, Result};
pub use recording::{Recorder, StartOutcome};
pub use registry::{ConnectionId, SessionRegistry};
pub use server::{RelayServer, ServerConfig, ServerContext};
pub use session::{Session, SignalingState};
