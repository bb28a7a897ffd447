//! Server configuration and port allocation
//!
//! Configuration is read from environment variables by the binary:
//! - TESTBED_APP_NAME: application name announced to the admin server
//! - TESTBED_PORT: port to listen on (default: next allocated port)
//! - TESTBED_HOST: host used to build the advertised URLs (default: localhost)
//! - TESTBED_ACTUATOR_PATH: path the actuator endpoints are mounted under
//! - TESTBED_REGISTRATION_URL: boot-admin registration endpoint ("" disables)
//! - TESTBED_REGISTRATION_INTERVAL_SECS: seconds between registrations
//! - TESTBED_METADATA: JSON object of string metadata
//! - TESTBED_APP_INFO: JSON object merged into the info endpoint

use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

/// First port handed out by the process-wide allocator
pub const FIRST_PORT: u16 = 6000;

/// Default boot-admin registration endpoint
pub const DEFAULT_REGISTRATION_URL: &str = "http://localhost:8001/register";

/// Default path the actuator endpoints are mounted under
pub const DEFAULT_ACTUATOR_PATH: &str = "/pyctuator";

pub const DEFAULT_APP_NAME: &str = "Actuator Testbed";

/// Hands out strictly increasing port numbers
///
/// Safe to share between threads; a value is never returned twice.
#[derive(Debug)]
pub struct PortAllocator {
    next: AtomicU16,
    exhausted: AtomicBool,
}

impl PortAllocator {
    pub const fn new(first: u16) -> Self {
        Self {
            next: AtomicU16::new(first),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Allocate the next port
    pub fn next(&self) -> Result<u16, ConfigError> {
        // u16::MAX itself is handed out once, then the allocator is spent
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(ConfigError::PortsExhausted);
        }
        match self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_add(1))
        {
            Ok(port) => Ok(port),
            Err(port) => {
                if self.exhausted.swap(true, Ordering::SeqCst) {
                    Err(ConfigError::PortsExhausted)
                } else {
                    Ok(port)
                }
            }
        }
    }
}

static PORTS: PortAllocator = PortAllocator::new(FIRST_PORT);

/// Allocate a port from the process-wide allocator
pub fn next_port() -> Result<u16, ConfigError> {
    PORTS.next()
}

/// Canonical form of an actuator mount path: leading `/`, no trailing `/`
///
/// The root path is rejected, the actuator would shadow the application.
pub fn normalize_actuator_path(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("actuator_path", format!("{:?} mounts at the root", raw)));
    }
    Ok(format!("/{}", trimmed))
}

/// Everything needed to run one testbed server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub app_name: String,
    /// Host used in the advertised base and status URLs
    pub host: String,
    /// Interface the listener binds to
    pub bind_addr: IpAddr,
    pub port: u16,
    pub actuator_path: String,
    /// `None` disables boot-admin registration
    pub registration_url: Option<String>,
    pub registration_interval: Duration,
    pub metadata: BTreeMap<String, String>,
    pub additional_app_info: Map<String, Value>,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Default configuration for the given port
    pub fn new(app_name: impl Into<String>, port: u16) -> Self {
        Self {
            app_name: app_name.into(),
            host: "localhost".to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            actuator_path: DEFAULT_ACTUATOR_PATH.to_string(),
            registration_url: Some(DEFAULT_REGISTRATION_URL.to_string()),
            registration_interval: Duration::from_secs(1),
            metadata: BTreeMap::new(),
            additional_app_info: Map::new(),
            startup_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Default configuration on the next port from the process-wide allocator
    pub fn allocate(app_name: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self::new(app_name, next_port()?))
    }

    pub fn with_registration_url(mut self, url: Option<String>) -> Self {
        self.registration_url = url;
        self
    }

    pub fn with_registration_interval(mut self, interval: Duration) -> Self {
        self.registration_interval = interval;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_additional_app_info(mut self, info: Map<String, Value>) -> Self {
        self.additional_app_info = info;
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Mount the actuator under `path`, normalised
    pub fn with_actuator_path(mut self, path: &str) -> Result<Self, ConfigError> {
        self.actuator_path = normalize_actuator_path(path)?;
        Ok(self)
    }

    pub fn with_timeouts(mut self, startup: Duration, shutdown: Duration) -> Self {
        self.startup_timeout = startup;
        self.shutdown_timeout = shutdown;
        self
    }

    /// URL the application itself is served from
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// URL of the actuator index
    pub fn status_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url(),
            self.actuator_path.trim_end_matches('/')
        )
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_name = lookup("TESTBED_APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

        let port = match lookup("TESTBED_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| invalid("TESTBED_PORT", e))?,
            None => next_port()?,
        };

        let mut config = Self::new(app_name, port);

        if let Some(host) = lookup("TESTBED_HOST") {
            config.host = host;
        }

        if let Some(path) = lookup("TESTBED_ACTUATOR_PATH") {
            config.actuator_path = normalize_actuator_path(&path)
                .map_err(|_| invalid("TESTBED_ACTUATOR_PATH", "must name a non-root path"))?;
        }

        if let Some(url) = lookup("TESTBED_REGISTRATION_URL") {
            config.registration_url = if url.is_empty() { None } else { Some(url) };
        }

        if let Some(raw) = lookup("TESTBED_REGISTRATION_INTERVAL_SECS") {
            let secs = raw
                .parse::<u64>()
                .map_err(|e| invalid("TESTBED_REGISTRATION_INTERVAL_SECS", e))?;
            if secs == 0 {
                return Err(invalid("TESTBED_REGISTRATION_INTERVAL_SECS", "must be positive"));
            }
            config.registration_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("TESTBED_METADATA") {
            config.metadata =
                serde_json::from_str(&raw).map_err(|e| invalid("TESTBED_METADATA", e))?;
        }

        if let Some(raw) = lookup("TESTBED_APP_INFO") {
            config.additional_app_info =
                serde_json::from_str(&raw).map_err(|e| invalid("TESTBED_APP_INFO", e))?;
        }

        Ok(config)
    }
}

fn invalid(key: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
