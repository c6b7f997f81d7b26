//! HTTP listener for the query surface
//!
//! Wraps an Axum router with bind, bound-address reporting and graceful
//! shutdown on a `CancellationToken`.

use axum::Router;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::listener::ServerConfig;
use crate::error::{Result, ServerError};

#[derive(Clone)]
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
    running: Arc<AtomicBool>,
    bound_addr: Arc<RwLock<Option<SocketAddr>>>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self {
            config,
            router: router.layer(TraceLayer::new_for_http()),
            running: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(RwLock::new(None)),
        }
    }

    /// Address actually bound, once listening
    pub fn address(&self) -> Option<SocketAddr> {
        *self.bound_addr.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Serve until `shutdown` is cancelled, then drain open requests.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.addr()?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;
        let local_addr = listener.local_addr()?;
        *self.bound_addr.write() = Some(local_addr);
        info!(%local_addr, "HTTP server listening");

        self.running.store(true, Ordering::SeqCst);
        let result = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("HTTP server received shutdown signal");
            })
            .await;
        self.running.store(false, Ordering::SeqCst);
        *self.bound_addr.write() = None;

        match result {
            Ok(()) => {
                info!("HTTP server shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!(%e, "HTTP server error");
                Err(ServerError::Io(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::time::Duration;

    #[tokio::test]
    async fn test_http_server_binds_and_shuts_down() {
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let server = HttpServer::new(ServerConfig::new("127.0.0.1", 0), router);
        let token = CancellationToken::new();

        let handle = {
            let server = server.clone();
            let token = token.clone();
            tokio::spawn(async move { server.run(token).await })
        };

        for _ in 0..50 {
            if server.address().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let addr = server.address().expect("server should bind");
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "Server should shutdown within timeout");
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_bind_error_on_bad_address() {
        let server = HttpServer::new(ServerConfig::new("256.0.0.1", 0), Router::new());
        let err = server.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress(_)));
    }
}
