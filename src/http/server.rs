//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (timeout, request ID, tracing, compression)
//! - Stream request bodies into the admission engine
//! - Apply the computed pacing delay, then forward to the upstream
//! - Relay upstream responses back with byte accounting
//!
//! # Design Decisions
//! - The pacing delay suspends only this request's future; a client that
//!   disconnects while waiting drops the future and the forward never
//!   happens
//! - Forwarding is single-shot: admission already decided, so there is no
//!   retry or re-validation after the delay

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{uri::Authority, uri::Scheme, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::StreamExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admission::{AdmissionEngine, BodyBuffer, RawRequest};
use crate::config::ProxyConfig;
use crate::http::request::{RequestId, RequestIdLayer, X_REQUEST_ID};
use crate::http::response::{self, MeteredBody};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AdmissionEngine>,
    pub client: Client<HttpConnector, Body>,
    pub config: Arc<ProxyConfig>,
    /// Parsed upstream authority; `None` only if the configured host does
    /// not form a valid authority, which validation normally prevents.
    pub upstream_authority: Option<Authority>,
    /// Monotonic origin for the pacing clock.
    pub started: Instant,
}

/// HTTP server for the search proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and engine.
    pub fn new(config: ProxyConfig, engine: Arc<AdmissionEngine>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let upstream_authority =
            Authority::from_str(&format!("{}:{}", config.upstream.host, config.upstream.port))
                .ok();
        if upstream_authority.is_none() {
            tracing::error!(
                host = %config.upstream.host,
                port = config.upstream.port,
                "Upstream does not form a valid authority"
            );
        }

        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        let state = AppState {
            engine,
            client,
            config: Arc::new(config),
            upstream_authority,
            started: Instant::now(),
        };

        let router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new());

        Self { router }
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler: assemble, admit, delay, forward.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let identity = parts
        .headers
        .get(state.config.security.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    // Assemble the body chunk by chunk, enforcing the size cap as it grows.
    let max_body_size = state.config.security.max_body_size;
    let mut buffer = BodyBuffer::new();
    let mut frames = body.into_data_stream();
    while let Some(chunk) = frames.next().await {
        match chunk {
            Ok(chunk) => {
                if buffer.len() + chunk.len() > max_body_size {
                    tracing::warn!(
                        request_id = %request_id,
                        request = %target,
                        limit = max_body_size,
                        "request body over limit"
                    );
                    metrics::record_request(&method, 413, start_time);
                    return response::body_too_large(max_body_size);
                }
                buffer.append(&chunk);
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "request body read failed");
                metrics::record_request(&method, 400, start_time);
                return (StatusCode::BAD_REQUEST, "request body error").into_response();
            }
        }
    }
    let body_bytes = buffer.finish();

    // Admission decision.
    let raw = RawRequest {
        path: parts.uri.path().to_string(),
        method: method.clone(),
        identity,
        body: body_bytes.clone(),
    };
    let now_ms = state.started.elapsed().as_millis() as u64;
    let decision = state.engine.admit(&raw, now_ms);

    if !decision.granted {
        let reason = decision.reason.unwrap_or_default();
        tracing::warn!(
            event = "RQ_DECLINED",
            request_id = %request_id,
            request = %target,
            reason = %reason,
            request_size = body_bytes.len(),
            "request declined"
        );
        metrics::record_request(&method, 403, start_time);
        return response::declined(&reason, &target, body_bytes.len());
    }

    // Advisory pacing delay; dispatch is unconditional afterwards. A client
    // disconnect during the sleep cancels this future and nothing is sent.
    let delay_ms = decision.delay_ms.unwrap_or(0);
    if delay_ms > 0 {
        tracing::info!(
            event = "RQ_DELAY",
            request_id = %request_id,
            request = %target,
            request_delay = delay_ms,
            request_size = body_bytes.len(),
            "request delayed"
        );
        metrics::record_delay(delay_ms);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    // Forward upstream.
    let Some(authority) = state.upstream_authority.clone() else {
        metrics::record_request(&method, 502, start_time);
        return response::upstream_error("invalid upstream address", &target);
    };

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(authority);
    let uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "upstream URI rewrite failed");
            metrics::record_request(&method, 502, start_time);
            return response::upstream_error("upstream URI rewrite failed", &target);
        }
    };

    let mut upstream_request = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .version(parts.version);
    if let Some(headers) = upstream_request.headers_mut() {
        for (name, value) in parts.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if let Ok(value) = axum::http::HeaderValue::from_str(&request_id) {
            headers.insert(X_REQUEST_ID.clone(), value);
        }
    }
    let upstream_request = match upstream_request.body(Body::from(body_bytes.clone())) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "upstream request build failed");
            metrics::record_request(&method, 502, start_time);
            return response::upstream_error("upstream request build failed", &target);
        }
    };

    match state.client.request(upstream_request).await {
        Ok(upstream_response) => {
            let status = upstream_response.status();
            metrics::record_request(&method, status.as_u16(), start_time);

            let (resp_parts, incoming) = upstream_response.into_parts();
            let metered = MeteredBody::new(
                incoming,
                request_id,
                target,
                body_bytes.len(),
                delay_ms,
                start_time,
            );
            Response::from_parts(resp_parts, metered.into_body()).into_response()
        }
        Err(e) => {
            tracing::error!(
                event = "RQ_ERROR",
                request_id = %request_id,
                request = %target,
                error = %e,
                "upstream request failed"
            );
            metrics::record_upstream_error();
            metrics::record_request(&method, 502, start_time);
            response::upstream_error(&e.to_string(), &target)
        }
    }
}
