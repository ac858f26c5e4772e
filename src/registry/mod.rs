//! Session registry
//!
//! Maps connection identities to live sessions. The gateway registers a
//! session once its send path exists and unregisters it when the connection
//! closes; unregistering runs the session's teardown.
//!
//! # Architecture
//!
//! ```text
//!                   Arc<ServerContext>
//!             ┌────────────────────────────┐
//!             │ registry: SessionRegistry  │
//!             │   RwLock<HashMap<          │
//!             │     ConnectionId,          │
//!             │     Arc<Session>           │
//!             │   >>                       │
//!             └─────────────┬──────────────┘
//!                           │
//!        ┌──────────────────┼──────────────────┐
//!        ▼                  ▼                  ▼
//!   connection 1       connection 2       broadcast_presence()
//!   register()         unregister()       (read lock)
//!                      └► teardown()
//! ```

pub mod key;
pub mod store;

pub use key::ConnectionId;
pub use store::SessionRegistry;
