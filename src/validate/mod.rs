//! Validation subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigTree (active + claimed candidates)
//!     → runner.rs materializes it under <work_dir>/candidate-<uuid>/
//!     → checker.rs judges the directory as a whole
//!         builtin: syntax.rs lexical scan
//!         command: `nginx -t` style argv via command.rs
//!     → Ok | ValidationError { diagnostic } | CheckerError
//!
//! Batch failure:
//!     runner.rs isolate() retries keys one at a time in key order
//!     → Isolation { accepted, rejected }
//! ```
//!
//! # Design Decisions
//! - The tree is the unit of validation; single files are never checked alone
//! - A checker that cannot run is an error, not a failed validation
//! - Scratch trees are deleted as soon as the checker returns

pub mod checker;
pub mod command;
pub mod runner;
pub mod syntax;

pub use checker::{CheckReport, CheckerError, CommandChecker, ConfigChecker, SyntaxChecker};
pub use runner::{Isolation, RunnerError, ValidationError, ValidationRunner};
