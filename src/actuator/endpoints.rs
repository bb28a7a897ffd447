//! Actuator endpoints
//!
//! - `{path}` - index of links to the endpoints below
//! - `{path}/health` - UP once the listener is ready, DOWN otherwise
//! - `{path}/info` - application name merged with caller-supplied info
//! - `{path}/logfile` - captured log, with single byte-range support
//! - `{path}/httptrace` - recorded exchanges, newest first
//! - `{path}/prometheus` - request metrics in Prometheus text format

use super::httptrace::{HttpTraces, TracesResponse};
use super::logfile::{ByteRange, LogCapture};
use super::metrics::SharedMetrics;
use crate::server::ReadinessState;
use axum::{
    extract::State,
    http::{
        header::{ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE, RANGE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};

/// Names of the endpoints listed in the index, in display order
pub const ENDPOINTS: &[&str] = &["health", "info", "logfile", "httptrace", "prometheus"];

/// State shared by all actuator handlers
#[derive(Clone)]
pub struct ActuatorState {
    pub status_url: String,
    pub app_name: String,
    pub additional_app_info: Map<String, Value>,
    pub readiness: ReadinessState,
    pub logs: LogCapture,
    pub traces: HttpTraces,
    pub metrics: SharedMetrics,
}

async fn index(State(state): State<ActuatorState>) -> Json<Value> {
    let mut links = Map::new();
    links.insert(
        "self".to_string(),
        json!({ "href": state.status_url, "templated": false }),
    );
    for name in ENDPOINTS {
        links.insert(
            name.to_string(),
            json!({ "href": format!("{}/{}", state.status_url, name), "templated": false }),
        );
    }
    Json(json!({ "_links": links }))
}

async fn health(State(state): State<ActuatorState>) -> (StatusCode, Json<Value>) {
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "UP", "details": {} })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "DOWN", "details": {} })),
        )
    }
}

async fn info(State(state): State<ActuatorState>) -> Json<Value> {
    let mut body = Map::new();
    body.insert(
        "app".to_string(),
        json!({ "name": state.app_name, "description": Value::Null }),
    );
    for (key, value) in state.additional_app_info {
        body.insert(key, value);
    }
    Json(Value::Object(body))
}

async fn logfile(State(state): State<ActuatorState>, headers: HeaderMap) -> Response {
    let contents = state.logs.contents().into_bytes();
    let len = contents.len() as u64;
    let text = [(CONTENT_TYPE, "text/plain; charset=utf-8"), (ACCEPT_RANGES, "bytes")];

    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);
    let Some(range) = range else {
        return (StatusCode::OK, text, contents).into_response();
    };

    match range.resolve(len) {
        Some((first, last)) => {
            // first/last are bounded by len, which came from a usize
            let body = contents[first as usize..=last as usize].to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                text,
                [(CONTENT_RANGE, format!("bytes {}-{}/{}", first, last, len))],
                body,
            )
                .into_response()
        }
        None => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(CONTENT_RANGE, format!("bytes */{}", len))],
        )
            .into_response(),
    }
}

async fn httptrace(State(state): State<ActuatorState>) -> Json<TracesResponse> {
    Json(TracesResponse {
        traces: state.traces.snapshot(),
    })
}

async fn prometheus(State(state): State<ActuatorState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the actuator router, mounted at `path`
pub fn build_router(path: &str, state: ActuatorState) -> Router {
    let path = path.trim_end_matches('/');
    Router::new()
        .route(path, get(index))
        .route(&format!("{}/health", path), get(health))
        .route(&format!("{}/info", path), get(info))
        .route(&format!("{}/logfile", path), get(logfile))
        .route(&format!("{}/httptrace", path), get(httptrace))
        .route(&format!("{}/prometheus", path), get(prometheus))
        .with_state(state)
}
