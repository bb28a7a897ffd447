//! HTTP test server
//!
//! Serves two demo endpoints used to exercise the actuator:
//! - `/logfile_test_repeater` - echo, logged at error level
//! - `/httptrace_test_url` - delayed fixed response with echoed headers
//!
//! and manages the server's background thread through `TestServer`.

pub mod lifecycle;
mod readiness;
pub mod routes;
pub mod shutdown;

pub use lifecycle::{LifecycleState, TestServer};
pub use readiness::ReadinessState;
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[path = "routes_test.rs"]
mod routes_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod lifecycle_tests;
