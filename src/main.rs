use actuator_testbed::server::wait_for_signal;
use actuator_testbed::{ServerConfig, TestServer};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(
        app = %config.app_name,
        base_url = %config.base_url(),
        registration_url = config.registration_url.as_deref().unwrap_or("disabled"),
        "Starting actuator testbed"
    );

    let mut server = TestServer::new(config)?;
    let addr = server.start()?;
    info!(addr = %addr, "Serving until SIGTERM/SIGINT");

    // The server owns its own runtime; this one only waits for a signal
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    match runtime.block_on(wait_for_signal()) {
        Ok(signal) => info!(signal = signal, "Initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Cannot wait for termination signal, shutting down"),
    }

    server.stop()?;
    info!("Actuator testbed shut down gracefully");
    Ok(())
}
