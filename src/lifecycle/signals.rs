//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP forces a commit cycle, not shutdown

use tokio::sync::mpsc;

use crate::lifecycle::shutdown::Shutdown;

/// What a received signal asks the daemon to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Retry a pending reload.
    Flush,
}

/// Listen for signals until shutdown. SIGTERM/SIGINT trigger `shutdown`;
/// SIGHUP is forwarded on `events`.
#[cfg(unix)]
pub async fn listen(shutdown: &Shutdown, events: mpsc::UnboundedSender<SignalEvent>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                break;
            }
            _ = interrupt.recv() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, flushing");
                let _ = events.send(SignalEvent::Flush);
            }
        }
    }

    shutdown.trigger();
    Ok(())
}

#[cfg(not(unix))]
pub async fn listen(shutdown: &Shutdown, _events: mpsc::UnboundedSender<SignalEvent>) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");
    shutdown.trigger();
    Ok(())
}
