//! Admission-controlling reverse proxy for a search backend.
//!
//! Sits in front of a search cluster and decides, per query, whether to
//! forward, reject or delay it based on query shape: time-range width,
//! facet count and term-aggregation usage.

pub mod admin;
pub mod admission;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use admission::{AdmissionDecision, AdmissionEngine, RawRequest};
pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
