use std::collections::BTreeSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::engine::HostnameCheck;
use crate::host::{HostKey, HostType};
use crate::status::CommitOutcome;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_hosts: usize,
    pub errored_hosts: usize,
    /// The server is running an older tree than the active one.
    pub reload_pending: bool,
}

#[derive(Serialize)]
pub struct HostSummary {
    pub key: HostKey,
    pub path: String,
    pub server_names: Vec<String>,
    pub status: Option<CommitOutcome>,
}

#[derive(Serialize)]
pub struct StagedSummary {
    pub version: u64,
    pub removal: bool,
}

#[derive(Serialize)]
pub struct HostDetail {
    pub key: HostKey,
    pub active: Option<String>,
    pub staged: Option<StagedSummary>,
    pub status: Option<CommitOutcome>,
}

#[derive(Deserialize)]
pub struct HostnameQuery {
    /// Host to leave out, as `proxy_host/1`.
    pub ignore: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let (active, errored) = state.engine.status_summary();
    let reload_pending = state.engine.reload_pending();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if reload_pending { "reload_pending" } else { "operational" },
        active_hosts: active,
        errored_hosts: errored,
        reload_pending,
    })
}

/// Every host that is active or has a recorded outcome, in key order.
pub async fn get_hosts(State(state): State<AdminState>) -> Json<Vec<HostSummary>> {
    let tree = state.engine.active_tree();
    let statuses = state.engine.statuses();

    let keys: BTreeSet<HostKey> = tree
        .keys()
        .copied()
        .chain(statuses.iter().map(|o| o.key))
        .collect();

    let hosts = keys
        .into_iter()
        .map(|key| HostSummary {
            key,
            path: key.relative_path().display().to_string(),
            server_names: tree.server_names(&key),
            status: statuses.iter().find(|o| o.key == key).cloned(),
        })
        .collect();

    Json(hosts)
}

pub async fn get_host(
    State(state): State<AdminState>,
    Path((host_type, id)): Path<(String, u64)>,
) -> Result<Json<HostDetail>, StatusCode> {
    let host_type: HostType = host_type.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let key = HostKey::new(host_type, id);

    let artifact = state.engine.artifact(key);
    let status = state.engine.get_status(&key);
    if artifact.active.is_none() && artifact.staged.is_none() && status.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(HostDetail {
        key,
        active: artifact.active.map(|c| c.to_string()),
        staged: artifact.staged.map(|s| StagedSummary {
            version: s.version,
            removal: s.is_removal(),
        }),
        status,
    }))
}

pub async fn get_hostname(
    State(state): State<AdminState>,
    Path(hostname): Path<String>,
    Query(query): Query<HostnameQuery>,
) -> Result<Json<HostnameCheck>, StatusCode> {
    let ignore = query
        .ignore
        .map(|key| key.parse::<HostKey>())
        .transpose()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Json(state.engine.is_hostname_taken(&hostname, ignore)))
}
