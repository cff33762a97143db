//! Response construction and upstream relay accounting.
//!
//! # Responsibilities
//! - Build the JSON bodies for declined and failed requests
//! - Relay upstream responses as a stream, counting relayed bytes
//! - Emit the terminal RQ_END event with response size and elapsed time
//!
//! # Design Decisions
//! - Streaming relay: the upstream body is never buffered; frames pass
//!   through with only a byte count taken on the way
//! - Decline bodies carry the reason, request path and body size so the
//!   caller and the audit log see the same record

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use serde_json::json;

use crate::observability::metrics;

/// 403 decline carrying the admission reason.
pub fn declined(reason: &str, path: &str, request_size: usize) -> Response {
    let body = json!({
        "event": "RQ_DECLINED",
        "error": true,
        "reason": reason,
        "request": path,
        "request_size": request_size,
    });
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// 502 for upstream transport failures.
pub fn upstream_error(error: &str, path: &str) -> Response {
    let body = json!({
        "event": "RQ_ERROR",
        "error": true,
        "reason": error,
        "request": path,
    });
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

/// 413 for bodies over the configured cap.
pub fn body_too_large(limit: usize) -> Response {
    let body = json!({
        "error": true,
        "reason": format!("request body exceeds maximum of {} bytes", limit),
    });
    (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response()
}

/// Upstream body wrapper that counts relayed bytes and emits RQ_END once the
/// stream completes.
pub struct MeteredBody {
    inner: Incoming,
    relayed: u64,
    finished: bool,
    request_id: String,
    request_path: String,
    request_size: usize,
    delay_ms: u64,
    started: Instant,
}

impl MeteredBody {
    pub fn new(
        inner: Incoming,
        request_id: String,
        request_path: String,
        request_size: usize,
        delay_ms: u64,
        started: Instant,
    ) -> Self {
        Self {
            inner,
            relayed: 0,
            finished: false,
            request_id,
            request_path,
            request_size,
            delay_ms,
            started,
        }
    }

    /// Wrap into an axum body for `Response::from_parts`.
    pub fn into_body(self) -> Body {
        Body::new(self)
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let elapsed = self.started.elapsed();
        tracing::info!(
            event = "RQ_END",
            request_id = %self.request_id,
            request = %self.request_path,
            request_size = self.request_size,
            request_delay = self.delay_ms,
            response_time = elapsed.as_millis() as u64,
            response_size = self.relayed,
            "request completed"
        );
        metrics::record_upstream_response(self.relayed, elapsed);
    }
}

impl HttpBody for MeteredBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.relayed += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_declined_body_shape() {
        let response = declined("no user auth", "/idx/_search", 42);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let value = body_json(response).await;
        assert_eq!(value["event"], "RQ_DECLINED");
        assert_eq!(value["error"], true);
        assert_eq!(value["reason"], "no user auth");
        assert_eq!(value["request"], "/idx/_search");
        assert_eq!(value["request_size"], 42);
    }

    #[tokio::test]
    async fn test_upstream_error_body_shape() {
        let response = upstream_error("connection refused", "/idx/_search");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let value = body_json(response).await;
        assert_eq!(value["event"], "RQ_ERROR");
        assert_eq!(value["reason"], "connection refused");
    }

    #[tokio::test]
    async fn test_body_too_large_names_the_limit() {
        let response = body_too_large(1024);
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let value = body_json(response).await;
        assert!(value["reason"].as_str().unwrap().contains("1024"));
    }
}
