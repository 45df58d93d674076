//! Status reporting subsystem.
//!
//! # Data Flow
//! ```text
//! commit cycle
//!     → CommitOutcome { key, status, diagnostic, removed, updated_at }
//!     → reporter.rs (last outcome per key, JSON file under the store root)
//!     → returned to the caller of apply/remove
//!     → outcome.merge_into_meta() → meta.nginx_online / meta.nginx_err
//! ```
//!
//! # Design Decisions
//! - Reporting is a side output; persisting host records stays with the caller
//! - A failed validation is an outcome, never an error

pub mod outcome;
pub mod reporter;

pub use outcome::{CommitOutcome, CommitStatus};
pub use reporter::StatusReporter;
