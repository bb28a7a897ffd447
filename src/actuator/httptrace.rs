//! HTTP exchange tracing
//!
//! A middleware records every request/response pair that does not target the
//! actuator itself into a bounded repository, newest first, in the JSON shape
//! boot-admin expects from an `httptrace` endpoint. Request metrics are
//! recorded by the same middleware.

use crate::actuator::metrics::SharedMetrics;
use axum::{
    extract::{Request, State},
    http::{header::HOST, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Default number of exchanges kept
pub const DEFAULT_CAPACITY: usize = 100;

/// Replacement for header values whose name looks sensitive
pub const MASK: &str = "******";

const SENSITIVE_NAME_PARTS: &[&str] = &[
    "password",
    "secret",
    "key",
    "token",
    "credentials",
    "vcap_services",
];

/// Whether a header name should have its values masked
pub fn is_sensitive(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_NAME_PARTS.iter().any(|part| name.contains(part))
}

/// Header map as a name -> values list, sensitive values masked
pub fn scrub_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let value = if is_sensitive(name.as_str()) {
            MASK.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        out.entry(name.as_str().to_string()).or_default().push(value);
    }
    out
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceRequest {
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceResponse {
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
}

/// One recorded request/response exchange
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTrace {
    pub timestamp: DateTime<Utc>,
    pub principal: Option<String>,
    pub session: Option<String>,
    pub request: TraceRequest,
    pub response: TraceResponse,
    /// Milliseconds between receiving the request and producing the response
    pub time_taken: u64,
}

/// Body of the `httptrace` endpoint
#[derive(Debug, Serialize)]
pub struct TracesResponse {
    pub traces: Vec<HttpTrace>,
}

/// Bounded, shared repository of recorded exchanges
#[derive(Debug, Clone)]
pub struct HttpTraces {
    inner: Arc<Mutex<VecDeque<HttpTrace>>>,
    capacity: usize,
}

impl Default for HttpTraces {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HttpTraces {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn record(&self, trace: HttpTrace) {
        let mut traces = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if traces.len() == self.capacity {
            traces.pop_back();
        }
        traces.push_front(trace);
    }

    /// Recorded exchanges, newest first
    pub fn snapshot(&self) -> Vec<HttpTrace> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// State handed to the tracing middleware
#[derive(Clone)]
pub struct TraceLayerState {
    pub traces: HttpTraces,
    pub metrics: SharedMetrics,
    /// Requests under this path prefix are not traced
    pub actuator_path: String,
}

impl TraceLayerState {
    fn is_actuator_path(&self, path: &str) -> bool {
        match path.strip_prefix(self.actuator_path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Middleware recording each exchange and its metrics
pub async fn record_exchange(
    State(state): State<TraceLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if state.is_actuator_path(&path) {
        return next.run(request).await;
    }

    let timestamp = Utc::now();
    let started = Instant::now();
    let method = request.method().to_string();
    let uri = full_uri(&request);
    let request_headers = scrub_headers(request.headers());

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    state
        .metrics
        .record_request(&method, status, elapsed.as_secs_f64());

    state.traces.record(HttpTrace {
        timestamp,
        principal: None,
        session: None,
        request: TraceRequest {
            method,
            uri,
            headers: request_headers,
        },
        response: TraceResponse {
            status,
            headers: scrub_headers(response.headers()),
        },
        time_taken: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    });

    response
}

/// Absolute URL of the request, rebuilt from the Host header
fn full_uri(request: &Request) -> String {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    match request.headers().get(HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{}{}", host, path_and_query),
        None => request.uri().to_string(),
    }
}
