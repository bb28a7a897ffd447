//! Shutdown signalling between the controlling thread and the server runtime
//!
//! The controller lives with `TestServer` on the caller's thread; the signal
//! is moved into the background runtime and awaited by the graceful-shutdown
//! future. The flag flips false -> true exactly once.

use tokio::sync::watch;
use tracing::info;

/// Receiving half, awaited inside the server runtime
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown is requested
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Controller dropped, nobody can stop us any more
                break;
            }
        }
    }

    /// Check whether shutdown was requested (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Sending half, owned by whoever may stop the server
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Request shutdown
    ///
    /// Returns `true` only for the call that actually flipped the flag.
    pub fn shutdown(&self) -> bool {
        let flipped = self.sender.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        });
        if flipped {
            info!("Shutdown requested");
        }
        flipped
    }

    pub fn is_requested(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Create a new shutdown pair
///
/// Returns (controller, signal); the signal may be cloned for every task
/// that has to observe shutdown.
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT
///
/// Returns the name of the signal that arrived.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received termination signal");
    Ok(name)
}

/// Wait for Ctrl+C (non-unix)
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok("CTRL_C")
}
