//! Demo endpoints observed by the actuator
//!
//! - `GET /logfile_test_repeater?repeated_string=S` - logs S at error level
//!   and echoes it back
//! - `GET /httptrace_test_url?sleep_sec=N` - optionally waits N seconds, then
//!   replies with fixed content and two response headers

use crate::error::HandlerError;
use axum::{
    extract::Query,
    http::{HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

/// Placeholder rendered for a missing query parameter or header
pub const ABSENT: &str = "None";

pub const TRACE_BODY: &str = "my content";
pub const TRACE_SECRET: &str = "my password";

#[derive(Debug, Default, Deserialize)]
pub struct RepeaterQuery {
    pub repeated_string: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TraceQuery {
    pub sleep_sec: Option<String>,
}

impl TraceQuery {
    /// Requested delay; empty or absent means none
    pub fn sleep(&self) -> Result<Option<Duration>, HandlerError> {
        let Some(raw) = self.sleep_sec.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| HandlerError::InvalidParameter {
                name: "sleep_sec",
                value: raw.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn logfile_test_repeater(Query(query): Query<RepeaterQuery>) -> String {
    let repeated = query.repeated_string.unwrap_or_else(|| ABSENT.to_string());
    error!("{}", repeated);
    repeated
}

async fn httptrace_test_url(
    Query(query): Query<TraceQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    if let Some(delay) = query.sleep()? {
        info!(seconds = delay.as_secs(), "Sleeping before replying");
        tokio::time::sleep(delay).await;
    }

    // Echoed byte for byte, the value need not be valid UTF-8
    let user_data = headers
        .get("User-Data")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(ABSENT));

    let mut response_headers = HeaderMap::new();
    response_headers.insert("resp-data", user_data);
    response_headers.insert("response-secret", HeaderValue::from_static(TRACE_SECRET));
    Ok((response_headers, TRACE_BODY))
}

/// Application router with the two demo endpoints
pub fn build_router() -> Router {
    Router::new()
        .route("/logfile_test_repeater", get(logfile_test_repeater))
        .route("/httptrace_test_url", get(httptrace_test_url))
}
