//! HTTP probe server.
//!
//! The surface platform probes and uptime monitors poll:
//!
//! | Path | Behavior |
//! |---|---|
//! | `/`, `/ready` | Deep or shallow, per configuration |
//! | `/healthz` | Always deep |

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{PulseError, PulseResult};
use crate::health::{HealthResponder, ProbeResponse};

/// HTTP server exposing the probe endpoints.
#[derive(Clone)]
pub struct ProbeServer {
    responder: Arc<HealthResponder>,
}

impl ProbeServer {
    /// Create a server around `responder`.
    #[must_use]
    pub fn new(responder: Arc<HealthResponder>) -> Self {
        Self { responder }
    }

    /// Serve until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve(&self, addr: SocketAddr) -> PulseResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PulseError::BindFailed(addr, e))?;

        info!(addr = %addr, "probe server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| PulseError::Server(e.to_string()))?;

        Ok(())
    }

    /// Serve until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(&self, addr: SocketAddr, shutdown: F) -> PulseResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PulseError::BindFailed(addr, e))?;

        info!(addr = %addr, "probe server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| PulseError::Server(e.to_string()))?;

        info!("probe server shut down");
        Ok(())
    }

    /// Create the router without starting the server. Useful for testing or
    /// embedding in another server.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(readiness))
            .route("/ready", get(readiness))
            .route("/healthz", get(liveness))
            .with_state(Arc::clone(&self.responder))
            .layer(TraceLayer::new_for_http())
    }
}

/// Handle GET `/` and `/ready` - mode per configuration.
async fn readiness(State(responder): State<Arc<HealthResponder>>) -> Response {
    into_response(responder.readiness())
}

/// Handle GET `/healthz` - always deep.
async fn liveness(State(responder): State<Arc<HealthResponder>>) -> Response {
    into_response(responder.liveness())
}

fn into_response(probe: ProbeResponse) -> Response {
    let status =
        StatusCode::from_u16(probe.status.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(probe.body)).into_response()
}
