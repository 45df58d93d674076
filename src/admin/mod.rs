//! Read-only admin API.
//!
//! ```text
//! GET /admin/status                 engine summary
//! GET /admin/hosts                  active hosts with their last outcome
//! GET /admin/hosts/{type}/{id}      active content, staged candidate, outcome
//! GET /admin/hostnames/{hostname}   collision query (?ignore=proxy_host/1)
//! ```
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod handlers;
pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::get,
    Router,
    middleware,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::lifecycle::Shutdown;
use self::handlers::*;
use self::auth::admin_auth_middleware;

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<Engine>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/hosts", get(get_hosts))
        .route("/admin/hosts/{host_type}/{id}", get(get_host))
        .route("/admin/hostnames/{hostname}", get(get_hostname))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
