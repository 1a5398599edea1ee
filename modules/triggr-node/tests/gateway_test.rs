//! HTTP-level tests driving the real gateway router: auth, envelopes,
//! project creation via multipart, document CRUD, and trigger validation.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

use triggr_common::Config;
use triggr_node::{build_router, AppState, PubSub, PubSubSink, TriggerRouter};
use triggr_registry::{ProjectRegistry, TriggerRegistry};
use triggr_store::{DocumentStore, KvEngine};

const JWT_SECRET: &str = "test-console-secret";

fn test_config() -> Config {
    Config {
        data_dir: String::new(),
        web_host: "127.0.0.1".into(),
        web_port: 0,
        chain_url: String::new(),
        console_jwt_secret: JWT_SECRET.into(),
        request_timeout_secs: 30,
        trigger_budget_ms: 2_000,
        ws_write_timeout_secs: 5,
        subscriber_queue_len: 256,
        intake_queue_len: 64,
        rate_limit_per_min: 0,
    }
}

struct Gateway {
    app: Router,
    _shutdown: watch::Sender<bool>,
}

fn gateway_with(config: Config) -> Gateway {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(KvEngine::open(dir.keep()).unwrap());
    let pubsub = Arc::new(PubSub::new(config.subscriber_queue_len));
    let docs = Arc::new(DocumentStore::new(
        kv.clone(),
        Arc::new(PubSubSink(pubsub.clone())),
    ));
    let projects = Arc::new(ProjectRegistry::load(kv.clone()).unwrap());
    let triggers = Arc::new(TriggerRegistry::new(kv));
    let router = Arc::new(TriggerRouter::new(
        projects.clone(),
        triggers.clone(),
        docs.clone(),
        Duration::from_millis(config.trigger_budget_ms),
    ));

    let (intake_tx, intake_rx) = mpsc::channel(config.intake_queue_len);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(router.clone().run(intake_rx, shutdown_rx));

    let state = Arc::new(AppState::new(
        config, projects, triggers, docs, pubsub, router, intake_tx, None,
    ));
    Gateway {
        app: build_router(state),
        _shutdown: shutdown_tx,
    }
}

fn gateway() -> Gateway {
    gateway_with(test_config())
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: usize,
}

fn bearer(owner: &str) -> String {
    let claims = Claims {
        sub: owner.into(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

fn descriptor_json() -> String {
    serde_json::json!({
        "source": {"hash": "0xhash"},
        "contract": {"name": "flipper"},
        "version": "4",
        "types": [{"id": 0, "type": {"def": {"primitive": "u64"}}}],
        "spec": {"events": [
            {"label": "ValueChanged", "args": [{"label": "value", "type": {"type": 0}}]}
        ]}
    })
    .to_string()
}

fn multipart_project_body(boundary: &str) -> String {
    let descriptor = descriptor_json();
    format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"project_name\"\r\n\r\ndemo\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"contract_addr\"\r\n\r\n0xc0ffee\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"description\"\r\n\r\na demo project\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"contracts_json\"; filename=\"contracts.json\"\r\n\
         Content-Type: application/json\r\n\r\n{descriptor}\r\n\
         --{boundary}--\r\n"
    )
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Create a project through the console surface; returns its API key.
async fn create_project(app: &Router) -> String {
    let boundary = "triggrtestboundary";
    let request = Request::builder()
        .method("POST")
        .uri("/api/console/project")
        .header(header::AUTHORIZATION, bearer("owner-1"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(multipart_project_body(boundary)))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["project"]["project_name"], "demo");
    body["data"]["secret"].as_str().unwrap().to_string()
}

fn json_request(method: &str, uri: &str, api_key: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", api_key)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn console_requires_bearer_token() {
    let gw = gateway();
    let request = Request::builder()
        .method("GET")
        .uri("/api/console/projects")
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn project_creation_returns_secret_once() {
    let gw = gateway();
    let secret = create_project(&gw.app).await;
    assert_eq!(secret.len(), 64);

    // The stored project never exposes the key again, only the schema.
    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/console/project/{secret}"))
        .header(header::AUTHORIZATION, bearer("owner-1"))
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["event_schema"][0]["name"], "ValueChanged");
    assert!(body["data"].get("api_key_digest").is_none());
}

#[tokio::test]
async fn foreign_owner_is_forbidden() {
    let gw = gateway();
    let secret = create_project(&gw.app).await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/console/project/{secret}"))
        .header(header::AUTHORIZATION, bearer("intruder"))
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn document_insert_conflict_on_second_write() {
    let gw = gateway();
    let key = create_project(&gw.app).await;
    let body = serde_json::json!({"id": "u1", "data": {"score": 1}});

    let first = gw
        .app
        .clone()
        .oneshot(json_request("POST", "/api/db/collections/users/docs", &key, body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = body_json(first).await;
    assert_eq!(first_body["data"]["metadata"]["version"], 1);

    let second = gw
        .app
        .clone()
        .oneshot(json_request("POST", "/api/db/collections/users/docs", &key, body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let second_body = body_json(second).await;
    assert_eq!(second_body["code"], "conflict");
}

#[tokio::test]
async fn document_roundtrip_through_the_api() {
    let gw = gateway();
    let key = create_project(&gw.app).await;

    let insert = serde_json::json!({"id": "u1", "data": {"score": 1}});
    gw.app
        .clone()
        .oneshot(json_request("POST", "/api/db/collections/users/docs", &key, insert))
        .await
        .unwrap();

    let patch = serde_json::json!({"data": {"name": "ada"}});
    let patched = gw
        .app
        .clone()
        .oneshot(json_request("PATCH", "/api/db/collections/users/docs/u1", &key, patch))
        .await
        .unwrap();
    assert_eq!(patched.status(), StatusCode::OK);
    let body = body_json(patched).await;
    assert_eq!(body["data"]["data"]["score"], 1);
    assert_eq!(body["data"]["data"]["name"], "ada");
    assert_eq!(body["data"]["metadata"]["version"], 2);

    let missing = Request::builder()
        .method("GET")
        .uri("/api/db/collections/users/docs/ghost")
        .header("x-api-key", &key)
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_trigger_reference_is_rejected_with_line() {
    let gw = gateway();
    let key = create_project(&gw.app).await;

    let body = serde_json::json!({
        "id": "t1",
        "contract_addr": "0xc0ffee",
        "description": "",
        "trigger": "fn main(events) {\n  insert @t: { x: events.Foo.bar }\n}",
    });
    let response = gw
        .app
        .clone()
        .oneshot(json_request("POST", "/api/trigger", &key, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["details"]["line"], 2);

    // Nothing was stored.
    let list = Request::builder()
        .method("GET")
        .uri("/api/trigger/0xc0ffee")
        .header("x-api-key", &key)
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(list).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn trigger_lifecycle_over_http() {
    let gw = gateway();
    let key = create_project(&gw.app).await;

    let body = serde_json::json!({
        "id": "t1",
        "contract_addr": "0xc0ffee",
        "description": "reacts to value changes",
        "trigger": "fn main(events) { insert @log: { v: events.ValueChanged.value } }",
    });
    let response = gw
        .app
        .clone()
        .oneshot(json_request("POST", "/api/trigger", &key, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let flip = serde_json::json!({"active": false});
    let response = gw
        .app
        .clone()
        .oneshot(json_request("PUT", "/api/trigger/0xc0ffee/t1/state", &key, flip))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["active"], false);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/trigger/0xc0ffee/t1")
        .header("x-api-key", &key)
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_api_key_is_unauthorized() {
    let gw = gateway();
    create_project(&gw.app).await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/db/collections")
        .header("x-api-key", "0".repeat(64))
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rate_limit_returns_429() {
    let mut config = test_config();
    config.rate_limit_per_min = 2;
    let gw = gateway_with(config);
    let key = create_project(&gw.app).await;

    for _ in 0..2 {
        let request = Request::builder()
            .method("GET")
            .uri("/api/db/collections")
            .header("x-api-key", &key)
            .body(Body::empty())
            .unwrap();
        let response = gw.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = Request::builder()
        .method("GET")
        .uri("/api/db/collections")
        .header("x-api-key", &key)
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["code"], "rate_limited");
}
