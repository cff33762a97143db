use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::LimitsConfig;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct ClientSummary {
    /// Clients currently holding a pacing slot.
    pub tracked_clients: usize,
    pub sweep_every_calls: u64,
    pub idle_grace_secs: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn get_policy(State(state): State<AdminState>) -> Json<LimitsConfig> {
    Json(state.engine.limits().clone())
}

pub async fn get_clients(State(state): State<AdminState>) -> Json<ClientSummary> {
    Json(ClientSummary {
        tracked_clients: state.engine.tracked_clients(),
        sweep_every_calls: state.config.pacing.sweep_every_calls,
        idle_grace_secs: state.config.pacing.idle_grace_secs,
    })
}
