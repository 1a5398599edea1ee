//! HTTP handlers: console project management, document-store access, and
//! trigger CRUD.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use triggr_common::{TriggrError, Value};
use triggr_dsl::compile;
use triggr_registry::{parse_descriptor, EventDecl, Project};

use crate::gateway::auth::{ApiKeyAuth, ConsoleUser};
use crate::gateway::envelope::{created, ok, ok_with_message, ApiError};
use crate::gateway::AppState;

// --- Views ---

/// Project as returned to the console. The API-key digest never leaves the
/// node; the plaintext key appears only in the create response's `secret`.
#[derive(Serialize)]
pub struct ProjectView {
    pub id: String,
    pub project_name: String,
    pub description: String,
    pub contract_address: String,
    pub contract_hash: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub event_schema: Vec<EventDecl>,
}

impl From<&Project> for ProjectView {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.to_string(),
            project_name: project.project_name.clone(),
            description: project.description.clone(),
            contract_address: project.contract_address.clone(),
            contract_hash: project.contract_hash.clone(),
            owner_id: project.owner_id.clone(),
            created_at: project.created_at,
            event_schema: project.event_schema.clone(),
        }
    }
}

// --- Console ---

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    user: ConsoleUser,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut project_name = None;
    let mut contract_addr = None;
    let mut description = String::new();
    let mut contracts_json = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TriggrError::validation(format!("bad multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "project_name" => project_name = Some(read_text(field).await?),
            "contract_addr" => contract_addr = Some(read_text(field).await?),
            "description" => description = read_text(field).await?,
            "contracts_json" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| TriggrError::validation(format!("bad contracts_json: {e}")))?;
                let json: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| TriggrError::validation(format!("contracts_json is not valid JSON: {e}")))?;
                contracts_json = Some(json);
            }
            _ => {}
        }
    }

    let project_name =
        project_name.ok_or_else(|| TriggrError::validation("project_name is required"))?;
    let contract_addr =
        contract_addr.ok_or_else(|| TriggrError::validation("contract_addr is required"))?;
    let contracts_json =
        contracts_json.ok_or_else(|| TriggrError::validation("contracts_json file is required"))?;

    let descriptor = parse_descriptor(&contracts_json)?;
    let (project, secret) = state
        .projects
        .create_project(
            &project_name,
            &description,
            &contract_addr,
            &user.owner_id,
            &descriptor,
        )
        .await?;

    info!(project = %project.id, owner = %user.owner_id, "project created");
    Ok(created(serde_json::json!({
        "project": ProjectView::from(&project),
        "secret": secret,
    })))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError(TriggrError::validation(format!("bad multipart field: {e}"))))
}

/// Bad JSON bodies surface as our validation error shape, not the framework
/// default rejection.
fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(inner)| inner)
        .map_err(|e| ApiError(TriggrError::validation(format!("bad JSON body: {e}"))))
}

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    user: ConsoleUser,
) -> Result<Response, ApiError> {
    let projects = state.projects.list_by_owner(&user.owner_id).await;
    let views: Vec<ProjectView> = projects.iter().map(|p| ProjectView::from(p.as_ref())).collect();
    Ok(ok(views))
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    user: ConsoleUser,
    Path(api_key): Path<String>,
) -> Result<Response, ApiError> {
    let project = owned_project(&state, &user, &api_key).await?;
    Ok(ok(ProjectView::from(project.as_ref())))
}

pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    user: ConsoleUser,
    Path(api_key): Path<String>,
) -> Result<Response, ApiError> {
    let project = owned_project(&state, &user, &api_key).await?;

    state.projects.delete_project(project.id, &state.docs).await?;
    state.router.remove_project(project.id).await;
    state.pubsub.close_project(project.id, "project deleted").await;

    info!(project = %project.id, owner = %user.owner_id, "project deleted");
    Ok(ok_with_message(serde_json::Value::Null, "project deleted"))
}

pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
    _user: ConsoleUser,
) -> Result<Response, ApiError> {
    let intake_capacity = state.intake.max_capacity();
    let intake_depth = intake_capacity - state.intake.capacity();

    let chain = match &state.ingest_status {
        Some(status) => serde_json::json!({
            "configured": true,
            "connected": status.is_connected(),
            "blocks_seen": status.blocks_seen(),
            "decode_failures": status.decode_failures(),
        }),
        None => serde_json::json!({ "configured": false }),
    };

    Ok(ok(serde_json::json!({
        "chain": chain,
        "intake": { "capacity": intake_capacity, "depth": intake_depth },
        "subscriptions": state.pubsub.subscription_count().await,
    })))
}

async fn owned_project(
    state: &AppState,
    user: &ConsoleUser,
    api_key: &str,
) -> Result<Arc<Project>, ApiError> {
    let project = state
        .projects
        .find_by_api_key(api_key)
        .await
        .ok_or_else(|| TriggrError::NotFound("project".into()))?;
    if project.owner_id != user.owner_id {
        return Err(ApiError(TriggrError::Forbidden(
            "project belongs to another owner".into(),
        )));
    }
    Ok(project)
}

// --- Document store ---

#[derive(Deserialize)]
pub struct CreateCollectionBody {
    pub name: String,
}

pub async fn list_collections(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
) -> Result<Response, ApiError> {
    Ok(ok(state.docs.list_collections(auth.project.id)?))
}

pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    body: Result<Json<CreateCollectionBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = parse_body(body)?;
    let meta = state
        .docs
        .create_collection(auth.project.id, &body.name)
        .await?;
    Ok(created(meta))
}

#[derive(Deserialize)]
pub struct InsertDocBody {
    #[serde(default)]
    pub id: Option<String>,
    pub data: Value,
}

#[derive(Deserialize)]
pub struct DocBody {
    pub data: Value,
}

pub async fn list_docs(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path(collection): Path<String>,
) -> Result<Response, ApiError> {
    Ok(ok(state.docs.list_docs(auth.project.id, &collection)?))
}

pub async fn insert_doc(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path(collection): Path<String>,
    body: Result<Json<InsertDocBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = parse_body(body)?;
    let doc = state
        .docs
        .insert_doc(auth.project.id, &collection, body.id, body.data)
        .await?;
    Ok(created(doc))
}

pub async fn get_doc(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path((collection, doc_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    Ok(ok(state.docs.get_doc(auth.project.id, &collection, &doc_id)?))
}

pub async fn put_doc(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path((collection, doc_id)): Path<(String, String)>,
    body: Result<Json<DocBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = parse_body(body)?;
    let doc = state
        .docs
        .put_doc(auth.project.id, &collection, &doc_id, body.data)
        .await?;
    Ok(ok(doc))
}

pub async fn patch_doc(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path((collection, doc_id)): Path<(String, String)>,
    body: Result<Json<DocBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = parse_body(body)?;
    let doc = state
        .docs
        .patch_doc(auth.project.id, &collection, &doc_id, body.data)
        .await?;
    Ok(ok(doc))
}

pub async fn delete_doc(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path((collection, doc_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let doc = state
        .docs
        .delete_doc(auth.project.id, &collection, &doc_id)
        .await?;
    Ok(ok_with_message(doc, "document deleted"))
}

// --- Triggers ---

#[derive(Deserialize)]
pub struct CreateTriggerBody {
    pub id: String,
    pub contract_addr: String,
    #[serde(default)]
    pub description: String,
    /// DSL source.
    pub trigger: String,
}

#[derive(Deserialize)]
pub struct TriggerStateBody {
    pub active: bool,
}

pub async fn create_trigger(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    body: Result<Json<CreateTriggerBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = parse_body(body)?;
    check_contract(&auth, &body.contract_addr)?;

    let compiled = compile(&body.trigger, &auth.project.event_schema)?;
    let record = state
        .triggers
        .create(
            auth.project.id,
            &body.id,
            &body.description,
            &compiled.stripped_source,
        )
        .await?;
    state
        .router
        .insert_compiled(auth.project.id, &body.id, compiled)
        .await;

    info!(project = %auth.project.id, trigger = %body.id, "trigger created");
    Ok(created(record))
}

pub async fn list_triggers(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path(contract): Path<String>,
) -> Result<Response, ApiError> {
    check_contract(&auth, &contract)?;
    Ok(ok(state.triggers.list(auth.project.id)?))
}

pub async fn set_trigger_state(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path((contract, trigger_id)): Path<(String, String)>,
    body: Result<Json<TriggerStateBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let body = parse_body(body)?;
    check_contract(&auth, &contract)?;
    let record = state
        .triggers
        .set_active(auth.project.id, &trigger_id, body.active)
        .await?;
    Ok(ok(record))
}

pub async fn delete_trigger(
    State(state): State<Arc<AppState>>,
    auth: ApiKeyAuth,
    Path((contract, trigger_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    check_contract(&auth, &contract)?;
    state.triggers.delete(auth.project.id, &trigger_id).await?;
    state.router.remove(auth.project.id, &trigger_id).await;

    info!(project = %auth.project.id, trigger = %trigger_id, "trigger deleted");
    Ok(ok_with_message(serde_json::Value::Null, "trigger deleted"))
}

fn check_contract(auth: &ApiKeyAuth, contract: &str) -> Result<(), ApiError> {
    if auth.project.contract_address == contract {
        Ok(())
    } else {
        Err(ApiError(TriggrError::Forbidden(
            "contract does not belong to this project".into(),
        )))
    }
}
