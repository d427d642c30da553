//! Signal handling for graceful shutdown
//!
//! A Ctrl+C or SIGTERM is turned into a broadcast on the pipeline's
//! shutdown channel, which stops listeners and dispatchers.

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Forwards process signals to the pipeline's shutdown channel
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<()>,
}

impl SignalHandler {
    pub fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    /// Spawn the task that waits for Ctrl+C or SIGTERM
    ///
    /// Abort the returned handle once the run has finished on its own.
    pub fn setup(&self) -> JoinHandle<()> {
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            let name = termination().await;
            info!("{} received, stopping dispatch", name);
            if shutdown_tx.send(()).is_err() {
                warn!("Pipeline already stopped before {}", name);
            }
        })
    }
}

/// Resolves with the name of the first termination signal
async fn termination() -> &'static str {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}

/// Create a shutdown signal broadcaster
pub fn create_shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    broadcast::channel(1)
}
