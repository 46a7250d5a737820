//! Request handlers
//!
//! Handlers resolve the target namespace from the caller before anything
//! else, so tenant checks always precede validation of the body and any
//! cluster call.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use meridian_common::model::Framework;
use meridian_common::Error;
use meridian_proxy::{PredictRequest, PredictionResult};
use meridian_publish::{PublishConfig, PublishedModel};
use meridian_registry::{CreateModelRequest, ModelDescriptor, ModelLogs, UpdateModelRequest};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::server::AppState;

/// `?namespace=` and `?all=` on tenant-scoped routes
#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    /// Target namespace; other tenants' namespaces need admin
    pub namespace: Option<String>,
    /// List across every namespace (admin only)
    #[serde(default)]
    pub all: bool,
}

/// Query of the logs route
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Target namespace
    pub namespace: Option<String>,
    /// Lines per pod
    pub lines: Option<u32>,
}

/// Confirmation of a deletion
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deleted {
    /// Model name
    pub model_name: String,
    /// Namespace the model lived in
    pub namespace: String,
    /// Human readable outcome
    pub message: String,
}

type Scope = Result<Query<ScopeQuery>, QueryRejection>;

fn scope(query: Scope) -> ApiResult<ScopeQuery> {
    Ok(query?.0)
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiResult<()> {
    Err(Error::not_found("no such route").into())
}

/// `GET /frameworks`
pub async fn list_frameworks(State(state): State<AppState>) -> Json<Vec<Framework>> {
    Json(state.registry.frameworks())
}

/// `GET /models`
pub async fn list_models(
    State(state): State<AppState>,
    Caller(caller): Caller,
    query: Scope,
) -> ApiResult<Json<Vec<ModelDescriptor>>> {
    let query = scope(query)?;
    let scope = caller.list_scope(query.namespace.as_deref(), query.all)?;
    Ok(Json(state.registry.list(&scope).await?))
}

/// `GET /models/{name}`
pub async fn get_model(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
) -> ApiResult<Json<ModelDescriptor>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    Ok(Json(state.registry.get(&namespace, &name).await?))
}

/// `POST /models`
pub async fn create_model(
    State(state): State<AppState>,
    Caller(caller): Caller,
    query: Scope,
    body: Result<Json<CreateModelRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ModelDescriptor>)> {
    let query = scope(query)?;
    let Json(request) = body?;
    let requested = request.namespace.as_deref().or(query.namespace.as_deref());
    let namespace = caller.resolve_namespace(requested)?;

    let created = state.registry.create(&namespace, &request).await?;
    info!(
        model = %created.name,
        namespace = %namespace,
        subject = %caller.subject,
        "model created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PUT /models/{name}`
pub async fn update_model(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
    body: Result<Json<UpdateModelRequest>, JsonRejection>,
) -> ApiResult<Json<ModelDescriptor>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    let Json(request) = body?;
    Ok(Json(state.registry.update(&namespace, &name, &request).await?))
}

/// `DELETE /models/{name}`
pub async fn delete_model(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
) -> ApiResult<Json<Deleted>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    state.registry.delete(&namespace, &name).await?;
    Ok(Json(Deleted {
        message: format!("model '{}' deleted", name),
        model_name: name,
        namespace,
    }))
}

/// `POST /models/{name}/predict`
pub async fn predict(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<Json<PredictionResult>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    let Json(request) = body?;
    Ok(Json(state.proxy.predict(&namespace, &name, &request).await?))
}

/// `GET /models/{name}/logs`
pub async fn model_logs(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult<Json<ModelLogs>> {
    let Query(query) = query?;
    let namespace = caller.resolve_namespace(query.namespace.as_deref())?;
    Ok(Json(
        state.registry.logs(&namespace, &name, query.lines).await?,
    ))
}

/// `POST /models/{name}/publish`
pub async fn publish(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
    body: Result<Json<PublishConfig>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PublishedModel>)> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    let Json(config) = body?;
    let published = state
        .publisher
        .publish(&caller, &namespace, &name, &config)
        .await?;
    Ok((StatusCode::CREATED, Json(published)))
}

/// `PUT /models/{name}/publish`
pub async fn update_publish(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
    body: Result<Json<PublishConfig>, JsonRejection>,
) -> ApiResult<Json<PublishedModel>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    let Json(config) = body?;
    Ok(Json(
        state
            .publisher
            .update(&caller, &namespace, &name, &config)
            .await?,
    ))
}

/// `DELETE /models/{name}/publish`
pub async fn unpublish(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
) -> ApiResult<Json<Deleted>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    state.publisher.unpublish(&namespace, &name).await?;
    Ok(Json(Deleted {
        message: format!("model '{}' unpublished", name),
        model_name: name,
        namespace,
    }))
}

/// `GET /models/{name}/publish`
pub async fn get_published(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
) -> ApiResult<Json<PublishedModel>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    Ok(Json(state.publisher.get(&namespace, &name).await?))
}

/// `POST /models/{name}/publish/rotate-key`
pub async fn rotate_key(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    query: Scope,
) -> ApiResult<Json<PublishedModel>> {
    let namespace = caller.resolve_namespace(scope(query)?.namespace.as_deref())?;
    let rotated = state.publisher.rotate_key(&namespace, &name).await?;
    info!(model = %name, namespace = %namespace, subject = %caller.subject, "api key rotated by caller");
    Ok(Json(rotated))
}

/// `GET /published-models`
pub async fn list_published(
    State(state): State<AppState>,
    Caller(caller): Caller,
    query: Scope,
) -> ApiResult<Json<Vec<PublishedModel>>> {
    let query = scope(query)?;
    let scope = caller.list_scope(query.namespace.as_deref(), query.all)?;
    Ok(Json(state.publisher.list(&scope).await?))
}
