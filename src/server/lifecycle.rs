//! Start/stop lifecycle of a `TestServer`
//!
//! The server runs on a dedicated thread hosting a current-thread tokio
//! runtime. `start()` blocks until the listener is bound (or fails, or the
//! startup timeout expires); `stop()` requests shutdown, which deregisters
//! from the admin server before the listener drains, then joins the thread.
//!
//! `Created -> Starting -> Running -> StopRequested -> Stopped`

use super::readiness::ReadinessState;
use super::routes;
use super::shutdown::{shutdown_channel, ShutdownController, ShutdownSignal};
use crate::actuator::{Actuator, AdminClient, Deregistration};
use crate::config::ServerConfig;
use crate::error::ServerError;
use std::net::SocketAddr;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    StopRequested,
    Stopped,
}

/// An HTTP server with the demo endpoints and an attached actuator
pub struct TestServer {
    config: ServerConfig,
    actuator: Arc<Actuator>,
    readiness: ReadinessState,
    state: LifecycleState,
    local_addr: Option<SocketAddr>,
    shutdown: Option<ShutdownController>,
    finished: Option<mpsc::Receiver<()>>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

/// Everything the server thread needs
struct Background {
    config: ServerConfig,
    actuator: Arc<Actuator>,
    readiness: ReadinessState,
    shutdown: ShutdownSignal,
}

impl TestServer {
    /// Server registering with the admin server over HTTP
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let readiness = ReadinessState::new();
        let actuator = Actuator::new(&config, readiness.clone())?;
        Ok(Self::assemble(config, actuator, readiness))
    }

    /// Server using a custom admin client
    pub fn with_admin_client(
        config: ServerConfig,
        client: Arc<dyn AdminClient>,
    ) -> Result<Self, ServerError> {
        let readiness = ReadinessState::new();
        let actuator = Actuator::with_admin_client(&config, readiness.clone(), client)?;
        Ok(Self::assemble(config, actuator, readiness))
    }

    fn assemble(config: ServerConfig, actuator: Actuator, readiness: ReadinessState) -> Self {
        Self {
            config,
            actuator: Arc::new(actuator),
            readiness,
            state: LifecycleState::Created,
            local_addr: None,
            shutdown: None,
            finished: None,
            thread: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Address the listener is bound to, once running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }

    /// Start the server and block until it accepts connections
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.state != LifecycleState::Created {
            return Err(ServerError::AlreadyStarted);
        }
        self.state = LifecycleState::Starting;
        info!(port = self.config.port, "Starting server");

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (finished_tx, finished_rx) = mpsc::sync_channel(1);
        let (controller, signal) = shutdown_channel();

        let background = Background {
            config: self.config.clone(),
            actuator: self.actuator.clone(),
            readiness: self.readiness.clone(),
            shutdown: signal,
        };

        let spawned = std::thread::Builder::new()
            .name(format!("testbed-{}", self.config.port))
            .spawn(move || {
                let result = run_in_thread(background, ready_tx);
                let _ = finished_tx.send(());
                result
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.state = LifecycleState::Stopped;
                return Err(ServerError::StartupFailure(format!(
                    "failed to spawn server thread: {}",
                    e
                )));
            }
        };

        match ready_rx.recv_timeout(self.config.startup_timeout) {
            Ok(Ok(addr)) => {
                self.state = LifecycleState::Running;
                self.local_addr = Some(addr);
                self.shutdown = Some(controller);
                self.finished = Some(finished_rx);
                self.thread = Some(thread);
                info!(addr = %addr, "Server started");
                Ok(addr)
            }
            Ok(Err(e)) => {
                self.state = LifecycleState::Stopped;
                let _ = thread.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // Leave the thread detached; it exits on its own if it ever binds
                self.state = LifecycleState::Stopped;
                controller.shutdown();
                warn!(
                    timeout = ?self.config.startup_timeout,
                    "Server did not become ready in time"
                );
                Err(ServerError::StartupTimeout(self.config.startup_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.state = LifecycleState::Stopped;
                Err(match thread.join() {
                    Ok(Err(e)) => e,
                    _ => ServerError::BackgroundPanicked,
                })
            }
        }
    }

    /// Stop the server and block until its thread has exited
    ///
    /// A no-op unless the server is running.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        if self.state != LifecycleState::Running {
            debug!(state = ?self.state, "Stop ignored, server not running");
            return Ok(());
        }
        info!(port = self.config.port, "Stopping server");
        self.state = LifecycleState::StopRequested;

        if let Some(controller) = &self.shutdown {
            controller.shutdown();
        }

        let timeout = self.config.shutdown_timeout;
        if let Some(finished) = self.finished.take() {
            if let Err(RecvTimeoutError::Timeout) = finished.recv_timeout(timeout) {
                // Thread stays detached, there is nothing left to join safely
                self.state = LifecycleState::Stopped;
                self.thread = None;
                warn!(timeout = ?timeout, "Server did not shut down in time");
                return Err(ServerError::ShutdownTimeout(timeout));
            }
        }

        let result = match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or(Err(ServerError::BackgroundPanicked)),
            None => Ok(()),
        };
        self.state = LifecycleState::Stopped;
        info!(port = self.config.port, "Server stopped");
        result
    }

    /// Deregister from the admin server at process exit
    ///
    /// Shares the single-use guard with `stop()`, so it does nothing when
    /// `stop()` already deregistered. `Ok(None)` means registration is off.
    pub fn atexit(&self) -> Result<Option<Deregistration>, ServerError> {
        Ok(self.actuator.deregister_blocking()?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let result = if self.state == LifecycleState::Running {
            self.stop()
        } else {
            self.atexit().map(|_| ())
        };
        if let Err(e) = result {
            warn!(error = %e, "Teardown on drop failed");
        }
    }
}

/// Body of the server thread
fn run_in_thread(
    background: Background,
    ready: SyncSender<Result<SocketAddr, ServerError>>,
) -> Result<(), ServerError> {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return Err(report_startup_failure(&ready, format!("runtime: {}", e))),
    };

    // Everything the server logs runs on this thread, so a thread-local
    // subscriber is enough to feed the logfile endpoint.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(
            background
                .actuator
                .logs()
                .clone()
                .with_filter(LevelFilter::INFO),
        );
    let _guard = tracing::subscriber::set_default(subscriber);

    runtime.block_on(serve(background, ready))
}

async fn serve(
    background: Background,
    ready: SyncSender<Result<SocketAddr, ServerError>>,
) -> Result<(), ServerError> {
    let Background {
        config,
        actuator,
        readiness,
        shutdown,
    } = background;

    let addr = SocketAddr::new(config.bind_addr, config.port);
    info!(addr = %addr, "Preparing to start server");

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            return Err(report_startup_failure(
                &ready,
                format!("bind {}: {}", addr, e),
            ))
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(local_addr) => local_addr,
        Err(e) => return Err(report_startup_failure(&ready, e.to_string())),
    };

    let app = actuator.attach(routes::build_router());
    actuator.start_registration(shutdown.clone());

    readiness.set_ready();
    info!(addr = %local_addr, "Server listening");
    // The caller may have given up waiting; the server still honours shutdown
    let _ = ready.send(Ok(local_addr));

    let teardown_actuator = actuator.clone();
    let teardown_readiness = readiness.clone();
    let mut signal = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.wait().await;
            info!("Shutting down server");
            teardown_actuator.stop().await;
            teardown_readiness.set_not_ready();
        })
        .await?;

    info!("Server is shut down");
    Ok(())
}

fn report_startup_failure(
    ready: &SyncSender<Result<SocketAddr, ServerError>>,
    message: String,
) -> ServerError {
    let _ = ready.send(Err(ServerError::StartupFailure(message.clone())));
    ServerError::StartupFailure(message)
}
