//! Engine-level errors returned to callers of `apply` and `remove`.
//!
//! A validation failure is not an error: it comes back as an `Errored`
//! outcome. Everything here means the caller's change did not get a verdict,
//! or got committed without the server picking it up.

use thiserror::Error;

use crate::reload::ReloadError;
use crate::render::TemplateError;
use crate::store::StoreError;
use crate::validate::CheckerError;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The host record is structurally invalid; nothing was staged.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The change was committed but the server did not reload. The next
    /// cycle retries the reload.
    #[error(transparent)]
    Reload(#[from] ReloadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration checker could not run; the cycle was rolled back.
    #[error(transparent)]
    Checker(#[from] CheckerError),

    /// The scheduler stopped before answering.
    #[error("engine is shutting down")]
    Shutdown,
}
