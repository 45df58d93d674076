//! Host records as handed over by the persistence layer.
//!
//! # Data Flow
//! ```text
//! Persistence layer (JSON snapshot)
//!     → record.rs (HostRecord, typed per host kind)
//!     → certificate.rs (certificate_id → ResolvedCertificate)
//!     → render (one config file per HostKey)
//! ```
//!
//! # Design Decisions
//! - Records are immutable snapshots; the engine never writes them back
//! - Type-specific settings live in a tagged enum so a record can't carry
//!   settings for the wrong host type
//! - `HostKey` doubles as the relative path of the host's config file

pub mod certificate;
pub mod record;

pub use certificate::{CertificateProvider, CertificateResolver, FileCertificateResolver, ResolvedCertificate};
pub use record::{
    ForwardScheme, HostKey, HostKind, HostRecord, HostType, ParseHostKeyError, ProxySettings,
    RedirectScheme, RedirectionSettings, StreamSettings, TlsOptions,
};
