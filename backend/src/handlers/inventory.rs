//! HTTP handlers for items, batches and the audit log

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::{
    Batch, CreateBatchInput, CreateItemInput, DashboardStats, InventoryTransaction,
    ItemReconciliation, ItemWithStock, TransactionQuery, UpdateBatchInput, UpdateItemInput,
};

use crate::error::AppResult;
use crate::middleware::Performer;
use crate::services::InventoryService;
use crate::AppState;

/// List items with computed totals
pub async fn list_items(State(state): State<AppState>) -> AppResult<Json<Vec<ItemWithStock>>> {
    let service = InventoryService::new(state.store);
    let items = service.list_items().await?;
    Ok(Json(items))
}

/// Create an item, optionally with an initial batch
pub async fn create_item(
    State(state): State<AppState>,
    performer: Performer,
    Json(input): Json<CreateItemInput>,
) -> AppResult<(StatusCode, Json<ItemWithStock>)> {
    let service = InventoryService::new(state.store);
    let item = service.create_item(input, performer.as_str()).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Get one item with its live batches
pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> AppResult<Json<ItemWithStock>> {
    let service = InventoryService::new(state.store);
    let item = service.get_item(item_id).await?;
    Ok(Json(item))
}

/// Update item metadata
pub async fn update_item(
    State(state): State<AppState>,
    performer: Performer,
    Path(item_id): Path<i64>,
    Json(input): Json<UpdateItemInput>,
) -> AppResult<Json<ItemWithStock>> {
    let service = InventoryService::new(state.store);
    let item = service
        .update_item(item_id, input, performer.as_str())
        .await?;
    Ok(Json(item))
}

/// Delete an item and its batches
pub async fn delete_item(
    State(state): State<AppState>,
    performer: Performer,
    Path(item_id): Path<i64>,
) -> Response {
    let service = InventoryService::new(state.store);

    match service.delete_item(item_id, performer.as_str()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Ledger history of one item
pub async fn get_item_transactions(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> AppResult<Json<Vec<InventoryTransaction>>> {
    let service = InventoryService::new(state.store);
    let transactions = service.item_transactions(item_id).await?;
    Ok(Json(transactions))
}

/// Batch total versus ledger total for one item
pub async fn get_item_reconciliation(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> AppResult<Json<ItemReconciliation>> {
    let service = InventoryService::new(state.store);
    let report = service.reconcile_item(item_id).await?;
    Ok(Json(report))
}

/// Add a batch to an item
pub async fn add_batch(
    State(state): State<AppState>,
    performer: Performer,
    Json(input): Json<CreateBatchInput>,
) -> AppResult<(StatusCode, Json<Batch>)> {
    let service = InventoryService::new(state.store);
    let batch = service.add_batch(input, performer.as_str()).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// Edit a batch
pub async fn update_batch(
    State(state): State<AppState>,
    performer: Performer,
    Path(batch_id): Path<i64>,
    Json(input): Json<UpdateBatchInput>,
) -> AppResult<Json<Batch>> {
    let service = InventoryService::new(state.store);
    let batch = service
        .update_batch(batch_id, input, performer.as_str())
        .await?;
    Ok(Json(batch))
}

/// Delete a batch
pub async fn delete_batch(
    State(state): State<AppState>,
    performer: Performer,
    Path(batch_id): Path<i64>,
) -> Response {
    let service = InventoryService::new(state.store);

    match service.delete_batch(batch_id, performer.as_str()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Audit log, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> AppResult<Json<Vec<InventoryTransaction>>> {
    let service = InventoryService::new(state.store);
    let transactions = service
        .list_transactions(query.effective_limit())
        .await?;
    Ok(Json(transactions))
}

/// Dashboard figures
pub async fn get_dashboard_stats(State(state): State<AppState>) -> AppResult<Json<DashboardStats>> {
    let service = InventoryService::new(state.store);
    let stats = service.dashboard_stats().await?;
    Ok(Json(stats))
}
