//! HTTP handlers for the pharmacy's side of the indent handshake

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{CreateIndentInput, Indent};

use crate::error::AppResult;
use crate::middleware::Performer;
use crate::services::{ReceiptReport, ReconciliationService};
use crate::AppState;

fn reconciliation_service(state: AppState) -> ReconciliationService {
    ReconciliationService::new(
        state.store,
        state.hospital,
        state.config.pharmacy.pharmacy_id.clone(),
    )
}

/// Raise an indent on the hospital
pub async fn raise_indent(
    State(state): State<AppState>,
    Json(input): Json<CreateIndentInput>,
) -> AppResult<(StatusCode, Json<Indent>)> {
    let indent = reconciliation_service(state).raise_indent(input).await?;
    Ok((StatusCode::CREATED, Json(indent)))
}

/// Receive a dispatched indent into local stock
pub async fn receive_indent(
    State(state): State<AppState>,
    performer: Performer,
    Path(indent_id): Path<i64>,
) -> AppResult<Json<ReceiptReport>> {
    let report = reconciliation_service(state)
        .receive_indent(indent_id, performer.as_str())
        .await?;
    Ok(Json(report))
}
