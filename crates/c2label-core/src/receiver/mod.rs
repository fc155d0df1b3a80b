//! CloudEvents receiver
//!
//! Accepts Falco alerts pushed over HTTP and hands each one to the
//! [`Responder`].

pub mod cloudevent;
pub mod handlers;
pub mod routes;

pub use cloudevent::EnvelopeError;
pub use handlers::AppState;
pub use routes::create_router;

use std::future::Future;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::{Error, Result};
use crate::responder::Responder;

/// HTTP receiver server
pub struct ReceiverServer {
    state: AppState,
}

impl ReceiverServer {
    /// Create a new receiver server
    pub fn new(responder: Arc<Responder>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            state: AppState { responder, metrics },
        }
    }

    /// Bind `addr` and serve until `shutdown` resolves
    pub async fn serve<F>(self, addr: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(self.state);

        info!("Receiver listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;

        info!("Receiver stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl+C received, shutting down..."),
        () = terminate => info!("SIGTERM received, shutting down..."),
    }
}
