//! Host configuration synchronization engine.
//!
//! Turns host records (proxy, redirection, dead and stream hosts) into an
//! nginx configuration tree, validates the tree as a whole before anything
//! is committed, and reloads the server once per batch of changes.

// Core pipeline
pub mod host;
pub mod render;
pub mod store;
pub mod validate;
pub mod reload;
pub mod status;
pub mod engine;
pub mod error;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod admin;

pub use config::schema::EngineConfig;
pub use engine::{Engine, EngineBuilder, HostnameCheck};
pub use error::EngineError;
pub use host::{HostKey, HostRecord, HostType};
pub use lifecycle::Shutdown;
pub use status::{CommitOutcome, CommitStatus};
