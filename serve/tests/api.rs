//! Router-level integration tests: mock provider, temp store, oneshot
//! requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use choraleia::{
    CancelRegistry, MockProvider, Orchestrator, OrchestratorSettings, StoreAssetResolver,
    ToolRegistry, WorkspaceRuntimeManager,
};
use choraleia_store::{RuntimeDescriptor, Store};
use config::LlmModelConfig;
use remote_fs::{FsRegistry, SshPool};
use serve::AppState;
use stream_chunk::{DeltaEvent, FinishReason};

fn test_model() -> LlmModelConfig {
    serde_json::from_value(json!({
        "id": "test-model",
        "provider": "mock",
        "model": "test-model",
        "base_url": "http://localhost:0",
        "domain": "language",
        "limits": {"max_tokens": 4096, "context_window": 100000}
    }))
    .unwrap()
}

struct TestApp {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    state: AppState,
}

impl TestApp {
    fn router(&self) -> axum::Router {
        serve::router(self.state.clone())
    }
}

async fn app(scripts: Vec<Vec<DeltaEvent>>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("t.db")).unwrap());
    let pool = SshPool::new();
    let resolver = Arc::new(StoreAssetResolver::new(Arc::clone(&store)));
    let fs_registry = FsRegistry::new(Arc::clone(&pool), resolver.clone());
    let runtime = WorkspaceRuntimeManager::new(pool, resolver, Arc::clone(&store));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::new(MockProvider::new(scripts)),
        Arc::new(ToolRegistry::new()),
        runtime,
        Arc::new(CancelRegistry::new()),
        OrchestratorSettings::default(),
    ));
    let state = AppState::new(
        Arc::clone(&store),
        orchestrator,
        fs_registry,
        vec![test_model()],
    );
    TestApp {
        _dir: dir,
        store,
        state,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}

fn stop_script(text: &str) -> Vec<DeltaEvent> {
    vec![
        DeltaEvent::Text(text.to_string()),
        DeltaEvent::Finish {
            reason: FinishReason::Stop,
            usage: None,
        },
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_completion_round_trip() {
    let app = app(vec![stop_script("hello from the model")]).await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/chat/completions",
            json!({
                "model": "test-model",
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = body_string(response).await;
    assert!(body.contains("\"role\":\"assistant\""));
    assert!(body.contains("hello from the model"));
    assert!(body.contains("\"finish_reason\":\"stop\""));
    assert!(body.trim_end().ends_with("data: [DONE]"));

    // One conversation with two messages exists afterwards.
    let conversations = app.store.list_conversations(None, None).await.unwrap();
    assert_eq!(conversations.len(), 1);
    let messages = app
        .store
        .list_messages(&conversations[0].id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1].status,
        choraleia_store::MessageStatus::Completed
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn non_streaming_completion_returns_object() {
    let app = app(vec![stop_script("plain answer")]).await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/chat/completions",
            json!({
                "model": "test-model",
                "stream": false,
                "messages": [{"role": "user", "content": "hi"}],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "plain answer");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(body["conversation_id"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_user_message_is_bad_request() {
    let app = app(vec![]).await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/chat/completions",
            json!({"model": "test-model", "messages": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_model_is_not_found() {
    let app = app(vec![]).await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/chat/completions",
            json!({
                "model": "no-such-model",
                "messages": [{"role": "user", "content": "hi"}],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_without_stream_is_404_and_status_reports_idle() {
    let app = app(vec![]).await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/chat/cancel",
            json!({"conversation_id": "nope"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router()
        .oneshot(get("/api/v1/chat/status/nope"))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["is_streaming"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn conversations_crud_and_branch_listing() {
    let app = app(vec![stop_script("a1")]).await;
    let workspace = app
        .store
        .create_workspace("w", RuntimeDescriptor::LocalHost, None)
        .await
        .unwrap();

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/conversations",
            json!({"workspace_id": workspace.id, "title": "t1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let conversation_id = created["id"].as_str().unwrap().to_string();

    // Drive one exchange through the completion endpoint.
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/chat/completions",
            json!({
                "model": "test-model",
                "stream": false,
                "conversation_id": conversation_id,
                "messages": [{"role": "user", "content": "q1"}],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router()
        .oneshot(get(&format!(
            "/api/v1/conversations/{}/messages",
            conversation_id
        )))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);

    // Patch, then soft delete.
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/v1/conversations/{}", conversation_id))
                .header("content-type", "application/json")
                .body(Body::from(json!({"status": "archived"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/conversations/{}", conversation_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router()
        .oneshot(get(&format!(
            "/api/v1/conversations/{}/messages",
            conversation_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn generate_title_uses_provider() {
    let app = app(vec![stop_script("answer"), stop_script("Deploy pipeline fixes")]).await;
    // A pre-titled conversation keeps the automatic title job out of the
    // script queue; the explicit endpoint overwrites the title anyway.
    let conversation = app
        .store
        .create_conversation(Some("placeholder"), None, None, None)
        .await
        .unwrap();
    let conversation_id = conversation.id.clone();
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/chat/completions",
            json!({
                "model": "test-model",
                "stream": false,
                "conversation_id": conversation_id,
                "messages": [{"role": "user", "content": "fix the deploy"}],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router()
        .oneshot(get(&format!(
            "/api/v1/conversations/{}/generateTitle",
            conversation_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["title"], "Deploy pipeline fixes");

    let conversation = app.store.get_conversation(&conversation_id).await.unwrap();
    assert_eq!(conversation.title.as_deref(), Some("Deploy pipeline fixes"));
}

#[tokio::test(flavor = "multi_thread")]
async fn fs_api_write_read_round_trip() {
    let app = app(vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = format!("{}/data/file.txt", dir.path().display());

    let response = app
        .router()
        .oneshot(post_json(
            "/api/fs/write",
            json!({"endpoint": "local", "path": path, "content": "round trip"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router()
        .oneshot(get(&format!(
            "/api/fs/read?endpoint=local&path={}",
            path.replace('/', "%2F")
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "round trip");

    let parent = format!("{}/data", dir.path().display());
    let response = app
        .router()
        .oneshot(get(&format!(
            "/api/fs/ls?path={}",
            parent.replace('/', "%2F")
        )))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["entries"][0]["name"], "file.txt");

    // overwrite=false against the existing file: conflict, content intact.
    let response = app
        .router()
        .oneshot(post_json(
            "/api/fs/write",
            json!({"path": path, "content": "clobber", "overwrite": false}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "round trip");
}

#[tokio::test(flavor = "multi_thread")]
async fn fs_upload_binary_is_byte_identical() {
    let app = app(vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = format!("{}/x.bin", dir.path().display());
    let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/api/fs/upload?endpoint=local&path={}",
                    path.replace('/', "%2F")
                ))
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router()
        .oneshot(get(&format!(
            "/api/fs/read?path={}",
            path.replace('/', "%2F")
        )))
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), payload.as_slice());
}
