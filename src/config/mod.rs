//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! host-sync.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → engine, admin API, observability
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<SchedulerConfig> read by the commit worker
//! ```
//!
//! # Design Decisions
//! - Only `scheduler.debounce_ms` is hot-reloadable; timeouts and every
//!   other section are fixed when the engine is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::EngineConfig;
pub use schema::SchedulerConfig;
