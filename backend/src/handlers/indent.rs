//! HTTP handlers for the indent resource (supplying side)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{CreateIndentInput, Indent, IndentStatusUpdate};

use crate::error::AppResult;
use crate::middleware::Performer;
use crate::services::IndentService;
use crate::AppState;

fn indent_service(state: AppState) -> IndentService {
    IndentService::new(state.store, state.config.indents.clone())
}

/// List indents, newest first
pub async fn list_indents(State(state): State<AppState>) -> AppResult<Json<Vec<Indent>>> {
    let indents = indent_service(state).list_indents().await?;
    Ok(Json(indents))
}

/// Raise an indent
pub async fn create_indent(
    State(state): State<AppState>,
    Json(input): Json<CreateIndentInput>,
) -> AppResult<(StatusCode, Json<Indent>)> {
    let indent = indent_service(state).create_indent(input).await?;
    Ok((StatusCode::CREATED, Json(indent)))
}

/// Get one indent with its dispatch plan
pub async fn get_indent(
    State(state): State<AppState>,
    Path(indent_id): Path<i64>,
) -> AppResult<Json<Indent>> {
    let indent = indent_service(state).get_indent(indent_id).await?;
    Ok(Json(indent))
}

/// Move an indent through its lifecycle
pub async fn update_indent_status(
    State(state): State<AppState>,
    performer: Performer,
    Path(indent_id): Path<i64>,
    Json(input): Json<IndentStatusUpdate>,
) -> AppResult<Json<Indent>> {
    let indent = indent_service(state)
        .process_indent(indent_id, &input.status, performer.as_str())
        .await?;
    Ok(Json(indent))
}
