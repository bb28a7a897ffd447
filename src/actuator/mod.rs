//! Actuator: status endpoints, log capture, HTTP tracing and admin registration
//!
//! One `Actuator` is attached to each `TestServer`. It contributes the
//! actuator routes and the tracing middleware to the application router and
//! owns the boot-admin registration for the server's lifecycle.

pub mod endpoints;
pub mod httptrace;
pub mod logfile;
pub mod metrics;
pub mod registration;

pub use endpoints::ActuatorState;
pub use httptrace::{HttpTrace, HttpTraces};
pub use logfile::LogCapture;
pub use metrics::{create_metrics, SharedMetrics};
pub use registration::{
    AdminClient, Deregistration, HttpAdminClient, Registration, RegistrationRequest,
};

use crate::config::{normalize_actuator_path, ServerConfig};
use crate::error::{RegistrationError, ServerError};
use crate::server::{ReadinessState, ShutdownSignal};
use axum::{middleware, Router};
use chrono::Utc;
use httptrace::TraceLayerState;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Actuator {
    state: ActuatorState,
    actuator_path: String,
    registration: Option<Arc<Registration>>,
    registration_task: Mutex<Option<JoinHandle<()>>>,
}

impl Actuator {
    /// Actuator registering over HTTP when a registration URL is configured
    pub fn new(config: &ServerConfig, readiness: ReadinessState) -> Result<Self, ServerError> {
        let client = HttpAdminClient::new()?;
        Self::with_admin_client(config, readiness, Arc::new(client))
    }

    pub fn with_admin_client(
        config: &ServerConfig,
        readiness: ReadinessState,
        client: Arc<dyn AdminClient>,
    ) -> Result<Self, ServerError> {
        let metrics = create_metrics()
            .map_err(|e| ServerError::StartupFailure(format!("metrics registry: {}", e)))?;

        let actuator_path = normalize_actuator_path(&config.actuator_path)?;
        let status_url = format!("{}{}", config.base_url(), actuator_path);
        let registration = config.registration_url.as_ref().map(|url| {
            let request = RegistrationRequest::new(
                &config.app_name,
                &config.base_url(),
                &status_url,
                &config.metadata,
            );
            Arc::new(Registration::new(
                client,
                url.clone(),
                request,
                config.registration_interval,
            ))
        });

        Ok(Self {
            state: ActuatorState {
                status_url,
                app_name: config.app_name.clone(),
                additional_app_info: config.additional_app_info.clone(),
                readiness,
                logs: LogCapture::default(),
                traces: HttpTraces::default(),
                metrics,
            },
            actuator_path,
            registration,
            registration_task: Mutex::new(None),
        })
    }

    /// Log capture layer feeding the logfile endpoint
    pub fn logs(&self) -> &LogCapture {
        &self.state.logs
    }

    pub fn traces(&self) -> &HttpTraces {
        &self.state.traces
    }

    pub fn registration(&self) -> Option<&Arc<Registration>> {
        self.registration.as_ref()
    }

    /// Add the actuator routes and the tracing middleware to `app`
    pub fn attach(&self, app: Router) -> Router {
        let trace_state = TraceLayerState {
            traces: self.state.traces.clone(),
            metrics: self.state.metrics.clone(),
            actuator_path: self.actuator_path.clone(),
        };
        app.merge(endpoints::build_router(
            &self.actuator_path,
            self.state.clone(),
        ))
        .layer(middleware::from_fn_with_state(
            trace_state,
            httptrace::record_exchange,
        ))
    }

    /// Start the registration loop on the current runtime
    ///
    /// Called once the listener is bound; that moment is announced as the
    /// application's startup time.
    pub fn start_registration(&self, shutdown: ShutdownSignal) {
        let Some(registration) = self.registration.clone() else {
            info!("No registration URL configured, skipping admin registration");
            return;
        };
        registration.stamp_startup(Utc::now());
        let handle = tokio::spawn(async move { registration.run(shutdown).await });
        *self
            .registration_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop registering and deregister from the admin server
    ///
    /// Expects the shutdown signal given to `start_registration` to have
    /// fired. The loop is awaited rather than aborted, so an in-flight
    /// registration completes and its id is the one deregistered.
    /// Deregistration failures are logged, not returned: the listener must
    /// still be torn down.
    pub async fn stop(&self) {
        let task = self
            .registration_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if let Some(registration) = &self.registration {
            if let Err(e) = registration.deregister().await {
                warn!(error = %e, "Deregistration from admin server failed");
            }
        }
    }

    /// Deregister from synchronous code, e.g. at process exit
    ///
    /// Runs on a throwaway runtime in a scoped helper thread, so it is safe
    /// to call from inside or outside an async context. `Ok(None)` means
    /// registration is disabled.
    pub fn deregister_blocking(&self) -> Result<Option<Deregistration>, RegistrationError> {
        let Some(registration) = &self.registration else {
            return Ok(None);
        };
        if registration.is_deregistered() {
            return Ok(Some(Deregistration::AlreadyAttempted));
        }

        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|e| RegistrationError::Http(e.to_string()))?;
                    runtime.block_on(registration.deregister())
                })
                .join()
                .unwrap_or_else(|_| {
                    Err(RegistrationError::Http(
                        "deregistration thread panicked".to_string(),
                    ))
                })
        })
        .map(Some)
    }
}

#[cfg(test)]
#[path = "endpoints_test.rs"]
mod endpoints_tests;

#[cfg(test)]
#[path = "httptrace_test.rs"]
mod httptrace_tests;

#[cfg(test)]
#[path = "logfile_test.rs"]
mod logfile_tests;

#[cfg(test)]
#[path = "registration_test.rs"]
mod registration_tests;
