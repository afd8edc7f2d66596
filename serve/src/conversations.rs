//! Conversations API: list, create, patch, soft delete, branch-aware
//! message listing, one-shot title generation, and the runtime status view.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use choraleia_store::ConversationStatus;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversations = state
        .store
        .list_conversations(query.workspace_id.as_deref(), query.asset_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "conversations": conversations })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub workspace_id: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    /// Legacy terminal-asset compatibility field, persisted untouched.
    #[serde(default)]
    pub asset_session_id: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.get_workspace(&request.workspace_id).await?;
    let conversation = state
        .store
        .create_conversation(
            request.title.as_deref(),
            Some(&request.workspace_id),
            request.asset_id.as_deref(),
            request.asset_session_id.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::to_value(conversation).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.title.is_none() && request.status.is_none() {
        return Err(ApiError::bad_request("nothing to update"));
    }
    let status = match request.status.as_deref() {
        None => None,
        Some(s) => Some(
            ConversationStatus::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status: {}", s)))?,
        ),
    };
    state
        .store
        .update_conversation(&id, request.title.as_deref(), status)
        .await?;
    let conversation = state.store.get_conversation(&id).await?;
    Ok(Json(serde_json::to_value(conversation).unwrap_or_default()))
}

/// Soft delete; any active stream on the conversation is cancelled first.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.orchestrator.cancels().cancel(&id);
    state.store.delete_conversation(&id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Message id selecting an alternate branch.
    #[serde(default)]
    pub branch: Option<String>,
}

pub async fn messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.get_conversation(&id).await?;
    let messages = state
        .store
        .list_messages(&id, query.branch.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

pub async fn generate_title(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.get_conversation(&id).await?;
    let model = state
        .models
        .iter()
        .find(|m| m.domain == "language")
        .or_else(|| state.models.first())
        .cloned()
        .ok_or_else(|| ApiError::internal("no model configured"))?;
    let title = state.orchestrator.generate_title(&id, &model).await?;
    Ok(Json(serde_json::json!({ "conversation_id": id, "title": title })))
}

/// Read-only runtime status view fed by the periodic monitor.
pub async fn workspace_runtime(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workspace = state.store.get_workspace(&id).await?;
    let status = state.orchestrator.runtime().status(&id);
    Ok(Json(serde_json::json!({
        "workspace_id": id,
        "runtime": workspace.runtime,
        "container_id": workspace.container_id,
        "status": status,
    })))
}
