//! Reload scheduling subsystem.
//!
//! # Data Flow
//! ```text
//! callers (concurrent)
//!     → store.stage(key)          (render already done)
//!     → SchedulerHandle::submit   (mpsc, one message per caller)
//!
//! worker (scheduler.rs, one task)
//!     wait for first message → debounce → drain queue into a Batch
//!     → claim candidates → ValidationRunner::isolate
//!     → rollback rejected / commit accepted
//!     → one reload if the active tree changed or a reload is pending
//!     → answer every caller of the batch
//! ```
//!
//! # Design Decisions
//! - A channel and one worker, not a lock per caller: edits that arrive
//!   together are validated and reloaded together
//! - Requests that arrive during a cycle wait for the next one
//! - A failed reload leaves committed content active and is retried by the
//!   next cycle

pub mod batch;
pub mod reloader;
pub mod scheduler;

pub use reloader::{CommandReloader, NoopReloader, ReloadError, Reloader};
pub use scheduler::{ReloadScheduler, SchedulerHandle};
