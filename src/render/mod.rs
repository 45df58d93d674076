//! Template rendering subsystem.
//!
//! # Data Flow
//! ```text
//! HostRecord + Option<ResolvedCertificate>
//!     → renderer.rs (structural checks, template context)
//!     → templates/<type>.hbs (skeleton per host type)
//!     → RenderedConfig { key, content, source_version }
//! ```
//!
//! # Design Decisions
//! - Pure: no I/O, no shared state besides the version counter
//! - Deterministic: identical input renders byte-identical content
//! - `advanced_config` is spliced verbatim; only whole-tree validation can
//!   judge it

pub mod renderer;

pub use renderer::{RenderedConfig, Renderer, TemplateError};
