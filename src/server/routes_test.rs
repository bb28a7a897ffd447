//! Tests for the demo endpoints, served without the lifecycle wrapper

use super::routes::*;
use crate::error::HandlerError;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

async fn serve_demo_routes() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, build_router()).await });
    addr
}

#[test]
fn test_sleep_parameter_parsing() {
    let none = TraceQuery { sleep_sec: None };
    let empty = TraceQuery {
        sleep_sec: Some(String::new()),
    };
    let two = TraceQuery {
        sleep_sec: Some("2".to_string()),
    };

    assert_eq!(none.sleep(), Ok(None));
    assert_eq!(empty.sleep(), Ok(None));
    assert_eq!(two.sleep(), Ok(Some(Duration::from_secs(2))));
}

#[test]
fn test_non_numeric_sleep_is_invalid_parameter() {
    let query = TraceQuery {
        sleep_sec: Some("soon".to_string()),
    };

    let err = query.sleep().unwrap_err();

    assert!(matches!(
        err,
        HandlerError::InvalidParameter { name: "sleep_sec", ref value, .. } if value == "soon"
    ));
}

#[tokio::test]
async fn test_repeater_echoes_query() {
    let addr = serve_demo_routes().await;

    let response = reqwest::get(format!(
        "http://{}/logfile_test_repeater?repeated_string=hello%20world",
        addr
    ))
    .await
    .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_repeater_without_parameter_returns_placeholder() {
    let addr = serve_demo_routes().await;

    let body = reqwest::get(format!("http://{}/logfile_test_repeater", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, ABSENT);
}

#[tokio::test]
async fn test_trace_url_echoes_user_data() {
    let addr = serve_demo_routes().await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/httptrace_test_url", addr))
        .header("User-Data", "abc")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["resp-data"], "abc");
    assert_eq!(response.headers()["response-secret"], TRACE_SECRET);
    assert_eq!(response.text().await.unwrap(), TRACE_BODY);
}

#[tokio::test]
async fn test_trace_url_without_user_data_or_sleep() {
    let addr = serve_demo_routes().await;
    let started = Instant::now();

    let response = reqwest::get(format!("http://{}/httptrace_test_url", addr))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(response.headers()["resp-data"], ABSENT);
}

#[tokio::test]
async fn test_trace_url_sleeps_requested_seconds() {
    let addr = serve_demo_routes().await;
    let started = Instant::now();

    let response = reqwest::get(format!("http://{}/httptrace_test_url?sleep_sec=1", addr))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_trace_url_rejects_malformed_sleep() {
    let addr = serve_demo_routes().await;

    let response = reqwest::get(format!("http://{}/httptrace_test_url?sleep_sec=abc", addr))
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("sleep_sec"));
}

#[tokio::test]
async fn test_trace_url_echoes_non_utf8_user_data_unchanged() {
    let addr = serve_demo_routes().await;
    let latin1 = reqwest::header::HeaderValue::from_bytes(b"caf\xE9").unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://{}/httptrace_test_url", addr))
        .header("User-Data", latin1)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["resp-data"].as_bytes(), b"caf\xE9");
}
