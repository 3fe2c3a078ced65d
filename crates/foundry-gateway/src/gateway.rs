//! Routes and server lifecycle

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use foundry_core::{ApprovalGuard, BuildLoop, DeploymentManager, PendingApproval};

use crate::{GatewayError, Result};

/// Services shared across handlers. Only the guard is mandatory; the
/// standalone binary serves approvals alone.
#[derive(Clone)]
pub struct GatewayState {
    pub guard: Arc<ApprovalGuard>,
    pub deployments: Option<Arc<DeploymentManager>>,
    pub build_loop: Option<Arc<BuildLoop>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GatewayState {
    pub fn new(guard: Arc<ApprovalGuard>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            guard,
            deployments: None,
            build_loop: None,
            shutdown_tx,
        }
    }

    pub fn with_deployments(mut self, deployments: Arc<DeploymentManager>) -> Self {
        self.deployments = Some(deployments);
        self
    }

    pub fn with_build_loop(mut self, build_loop: Arc<BuildLoop>) -> Self {
        self.build_loop = Some(build_loop);
        self
    }

    fn deployments(&self) -> Result<&DeploymentManager> {
        self.deployments
            .as_deref()
            .ok_or(GatewayError::Unavailable("deployment manager"))
    }

    fn build_loop(&self) -> Result<&BuildLoop> {
        self.build_loop
            .as_deref()
            .ok_or(GatewayError::Unavailable("build loop"))
    }
}

/// Main Gateway
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    pub fn new(state: GatewayState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/api/approvals", get(list_pending))
            .route("/api/approvals/all", get(list_all))
            .route("/api/approvals/clear", post(clear_resolved))
            .route("/api/approvals/:id", get(get_approval))
            .route("/api/approvals/:id/approve", post(approve))
            .route("/api/approvals/:id/deny", post(deny))
            .route("/api/instances", get(list_instances))
            .route("/api/loop", get(loop_status))
            .route("/api/loop/stop", post(stop_loop))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until [`shutdown`](Self::shutdown) is called
    pub async fn start(&self, addr: SocketAddr) -> Result<()> {
        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "gateway listening");

        let mut shutdown_rx = self.state.shutdown_tx.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        tracing::info!("gateway stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
        tracing::info!("gateway shutdown initiated");
    }
}

type AppState = State<Arc<GatewayState>>;

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION
    }))
}

async fn list_pending(State(state): AppState) -> Json<Vec<PendingApproval>> {
    Json(state.guard.list_pending().await)
}

async fn list_all(State(state): AppState) -> Json<Vec<PendingApproval>> {
    Json(state.guard.list_all().await)
}

async fn get_approval(State(state): AppState, Path(id): Path<String>) -> Result<Json<PendingApproval>> {
    state
        .guard
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("approval {id} not found")))
}

async fn approve(State(state): AppState, Path(id): Path<String>) -> Result<Json<PendingApproval>> {
    resolved(&id, state.guard.approve(&id).await?)
}

async fn deny(State(state): AppState, Path(id): Path<String>) -> Result<Json<PendingApproval>> {
    resolved(&id, state.guard.deny(&id).await?)
}

fn resolved(id: &str, entry: Option<PendingApproval>) -> Result<Json<PendingApproval>> {
    entry
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("approval {id} not found or not pending")))
}

async fn clear_resolved(State(state): AppState) -> Result<impl IntoResponse> {
    let removed = state.guard.clear_resolved().await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn list_instances(State(state): AppState) -> Result<impl IntoResponse> {
    let deployments = state.deployments()?;
    Ok(Json(serde_json::json!({
        "live": deployments.live_instance().map(|i| i.id),
        "instances": deployments.instances(),
    })))
}

async fn loop_status(State(state): AppState) -> Result<impl IntoResponse> {
    Ok(Json(state.build_loop()?.status()))
}

async fn stop_loop(State(state): AppState) -> Result<impl IntoResponse> {
    let build_loop = state.build_loop()?;
    build_loop.stop();
    Ok(Json(build_loop.status()))
}
