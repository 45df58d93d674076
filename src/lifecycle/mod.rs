//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → commit worker and admin server stop → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Force a commit cycle (retries a failed reload)
//! ```
//!
//! # Design Decisions
//! - Callers waiting on a cycle when shutdown fires get an error, never a hang
//! - A cycle already running finishes before the worker exits

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
