//! Uniform filesystem API, parameterized by
//! `?endpoint=local|asset:<id>|container:<id>@<asset>`.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use remote_fs::{Endpoint, RemoteFs};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FsQuery {
    #[serde(default)]
    pub endpoint: Option<String>,
    pub path: String,
    #[serde(default)]
    pub include_hidden: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct EndpointOnlyQuery {
    #[serde(default)]
    pub endpoint: Option<String>,
}

async fn open_fs(
    state: &AppState,
    endpoint: Option<&str>,
) -> Result<std::sync::Arc<dyn RemoteFs>, ApiError> {
    let endpoint = Endpoint::parse(endpoint.unwrap_or("local"))?;
    Ok(state.fs_registry.open(&endpoint).await?)
}

pub async fn ls(
    State(state): State<AppState>,
    Query(query): Query<FsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, query.endpoint.as_deref()).await?;
    let entries = fs
        .list_dir(&query.path, query.include_hidden.unwrap_or(false))
        .await?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}

pub async fn stat(
    State(state): State<AppState>,
    Query(query): Query<FsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, query.endpoint.as_deref()).await?;
    let entry = fs.stat(&query.path).await?;
    Ok(Json(serde_json::to_value(entry).unwrap_or_default()))
}

pub async fn read(
    State(state): State<AppState>,
    Query(query): Query<FsQuery>,
) -> Result<Response, ApiError> {
    let fs = open_fs(&state, query.endpoint.as_deref()).await?;
    let mut reader = fs.open_read(&query.path).await?;
    let bytes = reader.read_to_end().await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

pub async fn pwd(
    State(state): State<AppState>,
    Query(query): Query<EndpointOnlyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, query.endpoint.as_deref()).await?;
    let path = fs.pwd().await?;
    Ok(Json(serde_json::json!({ "path": path })))
}

/// Raw request body becomes the file content; overwrites.
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<FsQuery>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, query.endpoint.as_deref()).await?;
    let mut writer = fs.open_write(&query.path, true).await?;
    writer.write_chunk(&body).await?;
    writer.close().await?;
    Ok(Json(serde_json::json!({
        "path": query.path,
        "bytes": body.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub endpoint: Option<String>,
    pub path: String,
    pub content: String,
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

pub async fn write(
    State(state): State<AppState>,
    Json(request): Json<WriteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, request.endpoint.as_deref()).await?;
    let mut writer = fs.open_write(&request.path, request.overwrite).await?;
    writer.write_chunk(request.content.as_bytes()).await?;
    writer.close().await?;
    Ok(Json(serde_json::json!({
        "path": request.path,
        "bytes": request.content.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    #[serde(default)]
    pub endpoint: Option<String>,
    pub path: String,
}

pub async fn mkdir(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, request.endpoint.as_deref()).await?;
    fs.mkdir_all(&request.path).await?;
    Ok(Json(serde_json::json!({ "path": request.path })))
}

/// Creates an empty file when missing; an existing file is left untouched.
pub async fn touch(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, request.endpoint.as_deref()).await?;
    match fs.open_write(&request.path, false).await {
        Ok(mut writer) => {
            writer.close().await?;
        }
        Err(remote_fs::FsError::AlreadyExists(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(Json(serde_json::json!({ "path": request.path })))
}

pub async fn rm(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, request.endpoint.as_deref()).await?;
    fs.remove(&request.path).await?;
    Ok(Json(serde_json::json!({ "path": request.path })))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub endpoint: Option<String>,
    pub from: String,
    pub to: String,
}

pub async fn rename(
    State(state): State<AppState>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, request.endpoint.as_deref()).await?;
    fs.rename(&request.from, &request.to).await?;
    Ok(Json(serde_json::json!({ "from": request.from, "to": request.to })))
}

pub async fn copy(
    State(state): State<AppState>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fs = open_fs(&state, request.endpoint.as_deref()).await?;
    let mut reader = fs.open_read(&request.from).await?;
    let mut writer = fs.open_write(&request.to, true).await?;
    let mut copied = 0usize;
    while let Some(chunk) = reader.read_chunk().await? {
        copied += chunk.len();
        writer.write_chunk(&chunk).await?;
    }
    writer.close().await?;
    Ok(Json(serde_json::json!({
        "from": request.from,
        "to": request.to,
        "bytes": copied,
    })))
}
