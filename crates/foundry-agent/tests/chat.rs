//! Chat collaborators against an in-process completions endpoint

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use foundry_agent::{ChatClient, ChatCollaborator};
use foundry_core::agent::{Collaborator, Role, TaskContext};
use foundry_core::error::FoundryError;
use foundry_core::guard::ApprovalGuard;
use foundry_core::tools::WriteTool;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone)]
struct Fake {
    status: StatusCode,
    reply: &'static str,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    fake.seen.lock().unwrap().push((auth, body));

    if !fake.status.is_success() {
        return (fake.status, Json(json!({"error": {"message": "model overloaded"}})));
    }
    (
        fake.status,
        Json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": fake.reply}}],
            "usage": {"total_tokens": 42}
        })),
    )
}

async fn serve(status: StatusCode, reply: &'static str) -> (String, Fake) {
    let fake = Fake {
        status,
        reply,
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), fake)
}

#[tokio::test]
async fn planner_round_trip() {
    let (base_url, fake) = serve(StatusCode::OK, "Add caching\nAdd retry logic\n").await;
    let client = ChatClient::new(base_url, "test-model").with_api_key(Some("sk-test".into()));
    let planner = ChatCollaborator::new(Role::Planner, client);

    let context = TaskContext::new().with("iteration", 3);
    let output = planner.invoke("Plan the next features", &context).await.unwrap();
    assert_eq!(output.output, "Add caching\nAdd retry logic\n");

    let seen = fake.seen.lock().unwrap();
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["messages"][0]["role"], "system");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.starts_with("Plan the next features"));
    assert!(user.contains("- iteration: 3"));
}

#[tokio::test]
async fn api_error_becomes_collaborator_error() {
    let (base_url, _fake) = serve(StatusCode::SERVICE_UNAVAILABLE, "").await;
    let builder = ChatCollaborator::new(Role::Builder, ChatClient::new(base_url, "m"));

    let err = builder.invoke("Build it", &TaskContext::new()).await.unwrap_err();
    match err {
        FoundryError::Collaborator { role, message } => {
            assert_eq!(role, Role::Builder);
            assert!(message.contains("503"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn builder_saves_files_through_the_guard() {
    let reply = "```python backend/cache.py\nCACHE = {}\n```\n\
                 ```python backend/main.py\nimport cache\n```\n\
                 ```text .env\nSECRET=1\n```\n";
    let (base_url, _fake) = serve(StatusCode::OK, reply).await;

    let dir = TempDir::new().unwrap();
    let guard = Arc::new(ApprovalGuard::open(dir.path().join(".foundry/approvals.json")).unwrap());
    let tool = Arc::new(WriteTool::new(dir.path(), guard.clone()));
    let builder =
        ChatCollaborator::new(Role::Builder, ChatClient::new(base_url, "m")).with_write_tool(tool);

    let output = builder
        .invoke("Build the following feature: Add caching", &TaskContext::new())
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("backend/cache.py")).unwrap(),
        "CACHE = {}\n"
    );
    assert!(!dir.path().join("backend/main.py").exists());
    assert!(!dir.path().join(".env").exists());

    let pending = guard.list_pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_path, "backend/main.py");

    assert!(output.output.contains("Successfully wrote to backend/cache.py"));
    assert!(output.output.contains("QUEUED FOR APPROVAL"));
    assert!(output.output.contains("BLOCKED"));
}
