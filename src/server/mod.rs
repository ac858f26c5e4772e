//! Signaling gateway
//!
//! HTTP front end for the relay: static viewer assets plus the signaling
//! WebSocket. Each accepted socket becomes one session registered in the
//! [`ServerContext`].

pub mod assets;
pub mod config;
pub mod connection;
pub mod context;
pub mod listener;

pub use config::{AuthConfig, ServerConfig};
pub use context::ServerContext;
pub use listener::RelayServer;
