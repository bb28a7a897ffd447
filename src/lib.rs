//! Actuator testbed
//!
//! An HTTP server with two demo endpoints, instrumented by a small actuator
//! (health, info, logfile, httptrace, prometheus) that registers with a
//! boot-admin server. `TestServer` runs it on a background thread with a
//! blocking start/stop lifecycle for use from test suites.

pub mod actuator;
pub mod config;
pub mod error;
pub mod server;

pub use config::{next_port, normalize_actuator_path, PortAllocator, ServerConfig};
pub use error::{ConfigError, HandlerError, RegistrationError, ServerError};
pub use server::{LifecycleState, TestServer};
