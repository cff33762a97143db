pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::admission::AdmissionEngine;
use crate::config::ProxyConfig;

/// State for the admin API listener.
#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<AdmissionEngine>,
    pub config: Arc<ProxyConfig>,
    pub started: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/policy", get(get_policy))
        .route("/admin/clients", get(get_clients))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
