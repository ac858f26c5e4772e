//! Viewer authentication
//!
//! The gateway challenges every request with HTTP Digest when auth is
//! enabled. Accounts come from a [`CredentialStore`]; the relay ships an
//! in-memory one filled from the config file.

pub mod digest;
pub mod store;

pub use digest::{Denied, DigestAuth, DEFAULT_REALM};
pub use store::{Credential, CredentialStore, MemoryCredentialStore};
