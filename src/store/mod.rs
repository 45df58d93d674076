//! Configuration file store.
//!
//! # Data Flow
//! ```text
//! apply/remove (any caller)
//!     → stage / stage_removal  (last write wins per key)
//! commit cycle (single worker)
//!     → claim          (staged → in-flight)
//!     → snapshot_tree_with(keys) → validation
//!     → commit         (temp file + rename, then swap the active tree)
//!       or rollback    (drop candidate, active untouched)
//! ```
//!
//! # On-Disk Layout
//! ```text
//! <root>/proxy_host/<id>.conf
//! <root>/redirection_host/<id>.conf
//! <root>/dead_host/<id>.conf
//! <root>/stream/<id>.conf
//! <root>/<type>/<id>.conf.err   rejected candidate, not included
//! ```
//!
//! # Design Decisions
//! - The active tree is an immutable `ConfigTree` behind `ArcSwap`; readers
//!   never block the commit cycle and never see a partial update
//! - Files are only ever replaced by rename, never edited in place

pub mod atomic;
pub mod file_store;
pub mod tree;

pub use file_store::{ConfigArtifact, ConfigFileStore, StagedCandidate, StoreError};
pub use tree::ConfigTree;
