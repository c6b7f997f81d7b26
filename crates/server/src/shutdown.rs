//! Shutdown coordination
//!
//! Every long-running task (connection workers, reconciliation, end-of-day
//! scheduler, HTTP listener) receives a child of one root
//! `CancellationToken`; cancelling the root stops them all.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller that cancels itself on Ctrl+C.
    pub fn with_ctrl_c() -> Self {
        let controller = Self::new();
        let token = controller.token.clone();

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    token.cancel();
                }
                Err(e) => {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
            }
        });

        controller
    }

    /// Cancelled with the controller, or on its own without affecting it.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn shutdown(&self) {
        info!("Shutdown triggered");
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_cancels_children() {
        let controller = ShutdownController::new();
        let child = controller.child_token();
        assert!(!controller.is_cancelled());

        child.cancel();
        assert!(!controller.is_cancelled());

        let other = controller.child_token();
        controller.shutdown();
        assert!(other.is_cancelled());
        other.cancelled().await;
    }
}
