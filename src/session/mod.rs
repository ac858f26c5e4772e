//! Viewer sessions
//!
//! One [`Session`] per signaling connection. It owns the viewer's send
//! pipeline, optional talk-back path, data channels, and any in-flight
//! upload, and releases all of them in one teardown.
//!
//! # Event flow
//!
//! ```text
//!  signaling socket ──► deliver() ─┐
//!                                  ├──► inbox ──► worker ──► state machine
//!  engine callbacks ──► emit() ────┘                │
//!                                                   ▼
//!                                   outbound socket / bus / recorder / pool
//! ```

pub mod event;
pub mod handle;
pub mod state;
pub mod transfer;

pub use event::{EngineEvents, SessionEvent};
pub use handle::{OutboundTx, Session, SessionDeps};
pub use state::{CandidateAction, CandidateQueue, Negotiation, SignalingState};
pub use transfer::{FileTransfer, TransferProgress};
