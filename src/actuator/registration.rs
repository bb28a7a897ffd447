//! Boot-admin registration
//!
//! While the server runs, the registration request is POSTed to the admin
//! server every interval. Teardown deregisters with a DELETE of the id the
//! admin server handed back. Deregistration is guarded by a single-use flag,
//! so `stop()`, the exit hook and `Drop` together attempt it at most once.
//! Registration and deregistration exchanges are serialised, so no POST can
//! land at the admin server after the DELETE.

use crate::error::RegistrationError;
use crate::server::ShutdownSignal;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a single request to the admin server
pub const ADMIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Body POSTed to the admin server
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub name: String,
    pub management_url: String,
    pub health_url: String,
    pub service_url: String,
    pub metadata: BTreeMap<String, String>,
}

impl RegistrationRequest {
    pub fn new(
        name: &str,
        service_url: &str,
        management_url: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            management_url: management_url.to_string(),
            health_url: format!("{}/health", management_url),
            service_url: service_url.to_string(),
            metadata: metadata.clone(),
        }
    }

    /// Record when the application started serving
    pub fn stamp_startup(&mut self, startup: DateTime<Utc>) {
        self.metadata.insert(
            "startup".to_string(),
            startup.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    id: String,
}

/// Transport to the admin server
///
/// Production code uses `HttpAdminClient`; tests substitute an in-memory
/// recorder.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Register and return the id assigned by the admin server
    async fn register(
        &self,
        url: &str,
        request: &RegistrationRequest,
    ) -> Result<String, RegistrationError>;

    async fn deregister(&self, url: &str, id: &str) -> Result<(), RegistrationError>;
}

/// Admin client speaking JSON over HTTP
pub struct HttpAdminClient {
    client: reqwest::Client,
}

impl HttpAdminClient {
    pub fn new() -> Result<Self, RegistrationError> {
        Self::with_timeout(ADMIN_REQUEST_TIMEOUT)
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, RegistrationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistrationError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AdminClient for HttpAdminClient {
    async fn register(
        &self,
        url: &str,
        request: &RegistrationRequest,
    ) -> Result<String, RegistrationError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| RegistrationError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RegistrationError::Status(response.status().as_u16()));
        }

        let body: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| RegistrationError::Parse(e.to_string()))?;
        Ok(body.id)
    }

    async fn deregister(&self, url: &str, id: &str) -> Result<(), RegistrationError> {
        let response = self
            .client
            .delete(format!("{}/{}", url.trim_end_matches('/'), id))
            .send()
            .await
            .map_err(|e| RegistrationError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RegistrationError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Outcome of a deregistration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deregistration {
    /// DELETE sent for this id
    Deregistered(String),
    /// Never got an id from the admin server, nothing to remove
    NotRegistered,
    /// An earlier teardown path already made the attempt
    AlreadyAttempted,
}

/// Registration state for one server lifecycle
pub struct Registration {
    client: Arc<dyn AdminClient>,
    url: String,
    request: Mutex<RegistrationRequest>,
    interval: Duration,
    registered_id: Mutex<Option<String>>,
    deregistered: AtomicBool,
    /// Held across every admin exchange
    exchange: tokio::sync::Mutex<()>,
}

impl Registration {
    pub fn new(
        client: Arc<dyn AdminClient>,
        url: impl Into<String>,
        request: RegistrationRequest,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            request: Mutex::new(request),
            // tokio intervals reject a zero period
            interval: interval.max(Duration::from_millis(10)),
            registered_id: Mutex::new(None),
            deregistered: AtomicBool::new(false),
            exchange: tokio::sync::Mutex::new(()),
        }
    }

    /// Stamp the startup time announced with every following registration
    pub fn stamp_startup(&self, startup: DateTime<Utc>) {
        self.request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stamp_startup(startup);
    }

    /// Request body as it will be sent next
    pub fn current_request(&self) -> RegistrationRequest {
        self.request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Id from the most recent successful registration
    pub fn registered_id(&self) -> Option<String> {
        self.registered_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_deregistered(&self) -> bool {
        self.deregistered.load(Ordering::SeqCst)
    }

    /// Register once
    ///
    /// Returns `Ok(None)` without contacting the admin server once
    /// deregistration has started.
    pub async fn register_once(&self) -> Result<Option<String>, RegistrationError> {
        let _exchange = self.exchange.lock().await;
        if self.is_deregistered() {
            return Ok(None);
        }
        let request = self.current_request();
        let id = self.client.register(&self.url, &request).await?;
        *self.registered_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.clone());
        Ok(Some(id))
    }

    /// Re-register every interval until shutdown or deregistration
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            if self.is_deregistered() {
                break;
            }
            match self.register_once().await {
                Ok(Some(id)) => debug!(id = %id, url = %self.url, "Registered with admin server"),
                Ok(None) => break,
                Err(e) => warn!(error = %e, url = %self.url, "Registration with admin server failed"),
            }
        }
        debug!("Registration loop finished");
    }

    /// Deregister from the admin server, at most once per lifecycle
    pub async fn deregister(&self) -> Result<Deregistration, RegistrationError> {
        if self.deregistered.swap(true, Ordering::SeqCst) {
            return Ok(Deregistration::AlreadyAttempted);
        }

        // Wait out an in-flight registration so its id is the one removed
        let _exchange = self.exchange.lock().await;
        let id = self
            .registered_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(id) = id else {
            info!("Not registered with admin server, skipping deregistration");
            return Ok(Deregistration::NotRegistered);
        };

        self.client.deregister(&self.url, &id).await?;
        info!(id = %id, "Deregistered from admin server");
        Ok(Deregistration::Deregistered(id))
    }
}

/// Admin client recording calls in memory
#[cfg(test)]
#[derive(Default)]
pub struct MockAdminClient {
    pub registrations: Mutex<Vec<RegistrationRequest>>,
    pub deregistrations: Mutex<Vec<String>>,
    pub fail_register: AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl AdminClient for MockAdminClient {
    async fn register(
        &self,
        _url: &str,
        request: &RegistrationRequest,
    ) -> Result<String, RegistrationError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(RegistrationError::Status(503));
        }
        #[allow(clippy::unwrap_used)]
        let mut registrations = self.registrations.lock().unwrap();
        registrations.push(request.clone());
        Ok(format!("instance-{}", registrations.len()))
    }

    async fn deregister(&self, _url: &str, id: &str) -> Result<(), RegistrationError> {
        #[allow(clippy::unwrap_used)]
        self.deregistrations.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
