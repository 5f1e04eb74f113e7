use tracing::info;

use crate::poller::Poller;

/// Handles graceful teardown of the watch-mode poll loops
///
/// Waits for a shutdown signal (SIGTERM, SIGINT/CTRL+C), then stops every
/// registered poller and waits for its loop to wind down, so no callback
/// fires and no timer survives past teardown.
pub struct ShutdownCoordinator {
    pollers: Vec<(&'static str, Poller)>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            pollers: Vec::new(),
        }
    }

    /// Hand a poller to the coordinator; it is stopped on shutdown in
    /// registration order.
    pub fn register(&mut self, name: &'static str, poller: Poller) {
        self.pollers.push((name, poller));
    }

    /// Block until either CTRL+C or SIGTERM (Unix) arrives, then stop all
    /// registered pollers.
    pub async fn wait_for_shutdown(self) {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received CTRL+C signal, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
        }

        self.shutdown().await;
    }

    /// Stop every registered poller and wait for each loop to exit.
    pub async fn shutdown(self) {
        for (name, poller) in self.pollers {
            info!("Stopping {} poller...", name);
            poller.shutdown().await;
        }
        info!("Graceful shutdown completed");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
