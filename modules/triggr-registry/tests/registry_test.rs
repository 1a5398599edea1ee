//! Integration tests: project persistence across reopen, API-key lookup,
//! and cascade deletion of triggers and documents.

use std::sync::Arc;

use triggr_common::Value;
use triggr_registry::{parse_descriptor, ProjectRegistry, TriggerRegistry};
use triggr_store::{DocumentStore, KvEngine, NullSink};

fn descriptor_json() -> serde_json::Value {
    serde_json::json!({
        "source": {"hash": "0xhash"},
        "contract": {"name": "flipper"},
        "version": "4",
        "types": [{"id": 0, "type": {"def": {"primitive": "u64"}}}],
        "spec": {"events": [
            {"label": "ValueChanged", "args": [{"label": "value", "type": {"type": 0}}]}
        ]}
    })
}

#[tokio::test]
async fn projects_survive_reopen_and_resolve_by_api_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.keep();
    let descriptor = parse_descriptor(&descriptor_json()).unwrap();

    let (project_id, secret) = {
        let kv = Arc::new(KvEngine::open(&path).unwrap());
        let registry = ProjectRegistry::load(kv).unwrap();
        let (project, secret) = registry
            .create_project("demo", "a demo", "0xc0ffee", "owner-1", &descriptor)
            .await
            .unwrap();
        (project.id, secret)
    };

    let kv = Arc::new(KvEngine::open(&path).unwrap());
    let registry = ProjectRegistry::load(kv).unwrap();

    let found = registry.find_by_api_key(&secret).await.unwrap();
    assert_eq!(found.id, project_id);
    assert_eq!(found.contract_address, "0xc0ffee");
    assert_eq!(found.event_schema.len(), 1);
    assert_eq!(found.event_schema[0].name, "ValueChanged");

    assert!(registry.find_by_api_key("not-the-key").await.is_none());
}

#[tokio::test]
async fn delete_project_cascades_to_triggers_and_documents() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(KvEngine::open(dir.keep()).unwrap());
    let registry = ProjectRegistry::load(kv.clone()).unwrap();
    let triggers = TriggerRegistry::new(kv.clone());
    let docs = DocumentStore::new(kv, Arc::new(NullSink));

    let descriptor = parse_descriptor(&descriptor_json()).unwrap();
    let (project, _secret) = registry
        .create_project("demo", "", "0xc0ffee", "owner-1", &descriptor)
        .await
        .unwrap();

    triggers
        .create(project.id, "t1", "", "fn main(events) { delete @users:u1 }")
        .await
        .unwrap();
    docs.insert_doc(
        project.id,
        "users",
        Some("u1".into()),
        Value::obj([("x".to_string(), Value::Int(1))]),
    )
    .await
    .unwrap();

    registry.delete_project(project.id, &docs).await.unwrap();

    assert!(registry.get(project.id).await.is_err());
    assert!(triggers.list(project.id).unwrap().is_empty());
    assert!(docs.list_docs(project.id, "users").unwrap().is_empty());
    assert!(docs.list_collections(project.id).unwrap().is_empty());
}

#[tokio::test]
async fn owner_scoped_listing() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(KvEngine::open(dir.keep()).unwrap());
    let registry = ProjectRegistry::load(kv).unwrap();
    let descriptor = parse_descriptor(&descriptor_json()).unwrap();

    registry
        .create_project("one", "", "0xaa", "alice", &descriptor)
        .await
        .unwrap();
    registry
        .create_project("two", "", "0xbb", "alice", &descriptor)
        .await
        .unwrap();
    registry
        .create_project("three", "", "0xcc", "bob", &descriptor)
        .await
        .unwrap();

    assert_eq!(registry.list_by_owner("alice").await.len(), 2);
    assert_eq!(registry.list_by_owner("bob").await.len(), 1);
    assert_eq!(registry.list_by_owner("carol").await.len(), 0);
}
