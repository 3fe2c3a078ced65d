//! Route behaviour through the full router, without a socket

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use foundry_core::agent::{AgentOutput, Agents, Collaborator, TaskContext};
use foundry_core::build_loop::{BuildLoop, LoopServices};
use foundry_core::config::{DeploySettings, LoopSettings, ProjectSettings};
use foundry_core::deploy::{DeploymentManager, FlyProvisioner, LoggingRouter};
use foundry_core::publish::{GitCli, VersionControlPublisher};
use foundry_core::scoring::{SandboxTestRunner, ScoringEngine};
use foundry_core::{ApprovalGuard, Result};
use foundry_gateway::{Gateway, GatewayState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct Silent;

#[async_trait]
impl Collaborator for Silent {
    fn name(&self) -> &str {
        "silent"
    }

    async fn invoke(&self, _task: &str, _context: &TaskContext) -> Result<AgentOutput> {
        Ok(AgentOutput::new(""))
    }
}

async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn guard(dir: &TempDir) -> Arc<ApprovalGuard> {
    Arc::new(ApprovalGuard::open(dir.path().join("approvals.json")).unwrap())
}

fn full_state(dir: &TempDir) -> GatewayState {
    let deployments = Arc::new(
        DeploymentManager::new(
            Arc::new(FlyProvisioner::new(dir.path().join("deploy"))),
            Arc::new(LoggingRouter),
            &DeploySettings::default(),
        )
        .unwrap(),
    );
    let silent: Arc<dyn Collaborator> = Arc::new(Silent);
    let services = LoopServices {
        agents: Agents {
            planner: silent.clone(),
            builder: silent.clone(),
            refiner: silent,
        },
        scoring: ScoringEngine::builtin(),
        tests: Arc::new(SandboxTestRunner::new(
            None,
            "artifact.py",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )),
        publisher: Arc::new(VersionControlPublisher::new(Arc::new(GitCli::new(dir.path())))),
        deployments: deployments.clone(),
    };
    let build_loop =
        BuildLoop::new(services, LoopSettings::default(), ProjectSettings::default()).unwrap();

    GatewayState::new(guard(dir))
        .with_deployments(deployments)
        .with_build_loop(Arc::new(build_loop))
}

#[tokio::test]
async fn health() {
    let dir = TempDir::new().unwrap();
    let router = Gateway::new(GatewayState::new(guard(&dir))).build_router();

    let (status, body) = call(&router, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn approval_review_flow() {
    let dir = TempDir::new().unwrap();
    let guard = guard(&dir);
    let first = guard
        .request_approval("backend/main.py", "a", "entry point")
        .await
        .unwrap();
    let second = guard
        .request_approval("backend/api.py", "b", "routes")
        .await
        .unwrap();
    let router = Gateway::new(GatewayState::new(guard.clone())).build_router();

    let (status, body) = call(&router, "GET", "/api/approvals").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = call(&router, "GET", &format!("/api/approvals/{}", first.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file_path"], "backend/main.py");

    let uri = format!("/api/approvals/{}/approve", first.id);
    let (status, body) = call(&router, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    // Already resolved
    let (status, _) = call(&router, "POST", &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&router, "POST", &format!("/api/approvals/{}/deny", first.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&router, "GET", "/api/approvals").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], second.id.as_str());

    let (status, body) = call(&router, "GET", "/api/approvals/all").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = call(&router, "POST", "/api/approvals/clear").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);
    assert_eq!(guard.list_all().await.len(), 1);
}

#[tokio::test]
async fn unknown_approval_is_not_found() {
    let dir = TempDir::new().unwrap();
    let router = Gateway::new(GatewayState::new(guard(&dir))).build_router();

    let (status, body) = call(&router, "GET", "/api/approvals/deadbeef").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("deadbeef"));

    let (status, _) = call(&router, "POST", "/api/approvals/deadbeef/deny").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn detached_services_are_unavailable() {
    let dir = TempDir::new().unwrap();
    let router = Gateway::new(GatewayState::new(guard(&dir))).build_router();

    for (method, uri) in [("GET", "/api/instances"), ("GET", "/api/loop"), ("POST", "/api/loop/stop")] {
        let (status, _) = call(&router, method, uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{method} {uri}");
    }
}

#[tokio::test]
async fn loop_and_instances() {
    let dir = TempDir::new().unwrap();
    let router = Gateway::new(full_state(&dir)).build_router();

    let (status, body) = call(&router, "GET", "/api/instances").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["live"].is_null());
    assert!(body["instances"].as_array().unwrap().is_empty());

    let (status, body) = call(&router, "GET", "/api/loop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["iteration"], 0);
    assert_eq!(body["phase"], "idle");
    assert!(body["last_report"].is_null());

    let (status, body) = call(&router, "POST", "/api/loop/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
}
