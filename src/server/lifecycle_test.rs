//! Lifecycle tests driving real servers from synchronous code

use super::lifecycle::*;
use crate::actuator::registration::MockAdminClient;
use crate::actuator::{AdminClient, Deregistration, RegistrationRequest};
use crate::config::{PortAllocator, ServerConfig};
use crate::error::{RegistrationError, ServerError};
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// High range so tests do not collide with the process-wide allocator
static TEST_PORTS: PortAllocator = PortAllocator::new(18600);

fn local_config(name: &str) -> ServerConfig {
    ServerConfig::new(name, TEST_PORTS.next().unwrap())
        .with_bind_addr(Ipv4Addr::LOCALHOST.into())
        .with_registration_url(None)
        .with_timeouts(Duration::from_secs(5), Duration::from_secs(5))
}

fn url(server: &TestServer, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", server.port(), path)
}

type AdminEvents = Arc<Mutex<Vec<String>>>;

/// Boot-admin stand-in recording "register" and "deregister <id>" events
fn spawn_mock_admin() -> (String, AdminEvents) {
    let events: AdminEvents = Arc::default();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    async fn register(State(events): State<AdminEvents>) -> Json<Value> {
        events.lock().unwrap().push("register".to_string());
        Json(json!({ "id": "testbed-1" }))
    }

    async fn deregister(State(events): State<AdminEvents>, Path(id): Path<String>) {
        events.lock().unwrap().push(format!("deregister {}", id));
    }

    let app = Router::new()
        .route("/register", post(register))
        .route("/register/{id}", delete(deregister))
        .with_state(events.clone());

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    (format!("http://{}/register", addr), events)
}

fn deregistrations(events: &AdminEvents) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("deregister"))
        .cloned()
        .collect()
}

fn wait_for_registration(server: &TestServer) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let registration = server.actuator().registration().unwrap();
    while registration.registered_id().is_none() {
        assert!(Instant::now() < deadline, "server never registered");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_start_returns_once_listener_accepts() {
    let mut server = TestServer::new(local_config("start")).unwrap();
    assert_eq!(server.state(), LifecycleState::Created);
    assert!(!server.is_ready());

    let addr = server.start().unwrap();

    assert_eq!(server.state(), LifecycleState::Running);
    assert!(server.is_ready());
    assert_eq!(addr.port(), server.port());
    assert!(TcpStream::connect(("127.0.0.1", server.port())).is_ok());

    server.stop().unwrap();
}

#[test]
fn test_stop_closes_listener_and_joins_thread() {
    let mut server = TestServer::new(local_config("stop")).unwrap();
    server.start().unwrap();

    server.stop().unwrap();

    assert_eq!(server.state(), LifecycleState::Stopped);
    assert!(!server.is_ready());
    assert!(TcpStream::connect(("127.0.0.1", server.port())).is_err());
}

#[test]
fn test_second_stop_is_noop() {
    let mut server = TestServer::new(local_config("double-stop")).unwrap();
    server.start().unwrap();

    server.stop().unwrap();
    server.stop().unwrap();

    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[test]
fn test_stop_before_start_is_noop() {
    let mut server = TestServer::new(local_config("early-stop")).unwrap();

    server.stop().unwrap();

    assert_eq!(server.state(), LifecycleState::Created);
}

#[test]
fn test_start_twice_is_rejected() {
    let mut server = TestServer::new(local_config("double-start")).unwrap();
    server.start().unwrap();

    let err = server.start().unwrap_err();

    assert!(matches!(err, ServerError::AlreadyStarted));
    server.stop().unwrap();
}

#[test]
fn test_port_in_use_is_startup_failure() {
    let config = local_config("busy");
    let _occupant = std::net::TcpListener::bind(("127.0.0.1", config.port)).unwrap();
    let mut server = TestServer::new(config).unwrap();

    let err = server.start().unwrap_err();

    assert!(matches!(err, ServerError::StartupFailure(_)), "got {:?}", err);
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[test]
fn test_echo_is_logged_and_returned() {
    let mut server = TestServer::new(local_config("echo")).unwrap();
    server.start().unwrap();
    let client = reqwest::blocking::Client::new();

    let body = client
        .get(url(&server, "/logfile_test_repeater?repeated_string=hello"))
        .send()
        .unwrap()
        .text()
        .unwrap();
    let logfile = client
        .get(url(&server, "/pyctuator/logfile"))
        .send()
        .unwrap()
        .text()
        .unwrap();

    assert_eq!(body, "hello");
    assert!(
        logfile
            .lines()
            .any(|line| line.contains("ERROR") && line.ends_with("hello")),
        "error record missing from logfile:\n{}",
        logfile
    );
    server.stop().unwrap();
}

#[test]
fn test_timed_echo_round_trip_is_traced() {
    let mut server = TestServer::new(local_config("trace")).unwrap();
    server.start().unwrap();
    let client = reqwest::blocking::Client::new();

    let started = Instant::now();
    let response = client
        .get(url(&server, "/httptrace_test_url?sleep_sec=1"))
        .header("User-Data", "abc")
        .send()
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["resp-data"], "abc");
    assert_eq!(response.headers()["response-secret"], "my password");
    assert_eq!(response.text().unwrap(), "my content");

    let traces: Value = client
        .get(url(&server, "/pyctuator/httptrace"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let trace = &traces["traces"][0];
    assert_eq!(trace["response"]["headers"]["resp-data"][0], "abc");
    assert_eq!(trace["response"]["headers"]["response-secret"][0], "******");
    assert!(trace["timeTaken"].as_u64().unwrap() >= 1000);

    server.stop().unwrap();
}

#[test]
fn test_stop_deregisters_exactly_once() {
    let (admin_url, events) = spawn_mock_admin();
    let config = local_config("registered")
        .with_registration_url(Some(admin_url))
        .with_registration_interval(Duration::from_millis(100));
    let mut server = TestServer::new(config).unwrap();
    server.start().unwrap();
    wait_for_registration(&server);

    server.stop().unwrap();
    let exit = server.atexit().unwrap();

    assert_eq!(exit, Some(Deregistration::AlreadyAttempted));
    assert_eq!(deregistrations(&events), vec!["deregister testbed-1"]);
}

#[test]
fn test_exit_hook_deregisters_when_stop_never_called() {
    let (admin_url, events) = spawn_mock_admin();
    let config = local_config("exit-hook")
        .with_registration_url(Some(admin_url))
        .with_registration_interval(Duration::from_millis(100));
    let mut server = TestServer::new(config).unwrap();
    server.start().unwrap();
    wait_for_registration(&server);

    let exit = server.atexit().unwrap();
    server.stop().unwrap();

    assert_eq!(
        exit,
        Some(Deregistration::Deregistered("testbed-1".to_string()))
    );
    assert_eq!(deregistrations(&events), vec!["deregister testbed-1"]);
}

#[test]
fn test_drop_stops_running_server() {
    let port;
    {
        let mut server = TestServer::new(local_config("drop")).unwrap();
        server.start().unwrap();
        port = server.port();
    }

    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
}

#[test]
fn test_atexit_without_registration_is_none() {
    let server = TestServer::new(local_config("no-admin")).unwrap();

    assert_eq!(server.atexit().unwrap(), None);
}

#[test]
fn test_unready_server_is_startup_timeout() {
    let config = local_config("slow-start").with_timeouts(Duration::ZERO, Duration::from_secs(5));
    let mut server = TestServer::new(config).unwrap();

    let err = server.start().unwrap_err();

    assert!(matches!(err, ServerError::StartupTimeout(_)), "{:?}", err);
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert!(server.stop().is_ok());
}

/// Admin client whose deregistration hangs well past any test timeout
struct HangingDeregisterClient;

#[async_trait]
impl AdminClient for HangingDeregisterClient {
    async fn register(
        &self,
        _url: &str,
        _request: &RegistrationRequest,
    ) -> Result<String, RegistrationError> {
        Ok("hanging-1".to_string())
    }

    async fn deregister(&self, _url: &str, _id: &str) -> Result<(), RegistrationError> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(())
    }
}

#[test]
fn test_stuck_teardown_is_shutdown_timeout() {
    let config = local_config("slow-stop")
        .with_registration_url(Some("http://admin.invalid/register".to_string()))
        .with_registration_interval(Duration::from_millis(20))
        .with_timeouts(Duration::from_secs(5), Duration::from_millis(200));
    let mut server =
        TestServer::with_admin_client(config, Arc::new(HangingDeregisterClient)).unwrap();
    server.start().unwrap();
    wait_for_registration(&server);

    let started = Instant::now();
    let err = server.stop().unwrap_err();

    assert!(matches!(err, ServerError::ShutdownTimeout(_)), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[test]
fn test_startup_metadata_is_stamped_when_listener_binds() {
    let client = Arc::new(MockAdminClient::default());
    let created = Utc::now();
    let config = local_config("startup-stamp")
        .with_registration_url(Some("http://admin.invalid/register".to_string()))
        .with_registration_interval(Duration::from_millis(20));
    let mut server = TestServer::with_admin_client(config, client.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    server.start().unwrap();
    wait_for_registration(&server);
    server.stop().unwrap();

    let registrations = client.registrations.lock().unwrap();
    let startup = DateTime::parse_from_rfc3339(&registrations[0].metadata["startup"])
        .unwrap()
        .with_timezone(&Utc);
    assert!(
        startup >= created + chrono::Duration::milliseconds(40),
        "startup {} stamped before the server started (created {})",
        startup,
        created
    );
}

/// Admin client whose registrations are slow, logging each completed exchange
#[derive(Default)]
struct SlowRegisterClient {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl AdminClient for SlowRegisterClient {
    async fn register(
        &self,
        _url: &str,
        _request: &RegistrationRequest,
    ) -> Result<String, RegistrationError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.events.lock().unwrap().push("register".to_string());
        Ok("slow-1".to_string())
    }

    async fn deregister(&self, _url: &str, id: &str) -> Result<(), RegistrationError> {
        self.events.lock().unwrap().push(format!("deregister {}", id));
        Ok(())
    }
}

#[test]
fn test_exit_hook_is_final_even_with_registration_in_flight() {
    let client = Arc::new(SlowRegisterClient::default());
    let config = local_config("slow-register")
        .with_registration_url(Some("http://admin.invalid/register".to_string()))
        .with_registration_interval(Duration::from_millis(10));
    let mut server = TestServer::with_admin_client(config, client.clone()).unwrap();
    server.start().unwrap();
    wait_for_registration(&server);

    let outcome = server.atexit().unwrap();
    std::thread::sleep(Duration::from_millis(700));

    assert_eq!(
        outcome,
        Some(Deregistration::Deregistered("slow-1".to_string()))
    );
    let events = client.events.lock().unwrap().clone();
    let deregistered_at = events
        .iter()
        .position(|e| e.starts_with("deregister"))
        .unwrap();
    assert_eq!(
        deregistered_at,
        events.len() - 1,
        "registered again after deregistration: {:?}",
        events
    );
}
