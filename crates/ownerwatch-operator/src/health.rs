//! Health check HTTP server for Kubernetes probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) endpoints.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use kube::Client;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Default port for health check server.
pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// API server reachability check used by readiness.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// `Ok(true)` when the API server answers.
    async fn check_readiness(&self) -> Result<bool, kube::Error>;
}

#[async_trait]
impl ClusterProbe for Client {
    async fn check_readiness(&self) -> Result<bool, kube::Error> {
        self.apiserver_version().await.map(|_| true)
    }
}

/// Shared state for health check endpoints.
pub struct HealthState<P: ClusterProbe> {
    /// Whether every registered controller has been bound.
    bound: AtomicBool,
    probe: Arc<P>,
}

impl<P: ClusterProbe> HealthState<P> {
    pub fn new(probe: Arc<P>) -> Self {
        Self {
            bound: AtomicBool::new(false),
            probe,
        }
    }

    /// Mark controllers as bound; readiness may succeed from now on.
    pub fn mark_bound(&self) {
        self.bound.store(true, Ordering::SeqCst);
        info!("Health check: controllers bound");
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }
}

/// Run the health check HTTP server until it fails.
pub async fn run_health_server<P: ClusterProbe + 'static>(
    state: Arc<HealthState<P>>,
    port: u16,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<P>))
        .with_state(state);

    let addr = health_addr(port);
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, "Health check server listening");

    axum::serve(listener, app).await
}

/// Listen on every interface; the kubelet probes the pod IP.
fn health_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// Liveness probe: 200 while the process is alive.
async fn healthz() -> StatusCode {
    debug!("Liveness probe: OK");
    StatusCode::OK
}

/// Readiness probe.
///
/// 503 until controllers are bound, and whenever the API server is
/// unreachable.
async fn readyz<P: ClusterProbe + 'static>(State(state): State<Arc<HealthState<P>>>) -> StatusCode {
    if !state.is_bound() {
        debug!("Readiness probe: NOT READY (controllers not bound)");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match state.probe().check_readiness().await {
        Ok(true) => {
            debug!("Readiness probe: OK");
            StatusCode::OK
        }
        Ok(false) => {
            debug!("Readiness probe: NOT READY (API server not ready)");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(e) => {
            warn!(error = %e, "Readiness probe: NOT READY (API server unreachable)");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
