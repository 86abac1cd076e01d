//! Route definitions for the hospital and pharmacy services

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{config::ServiceKind, handlers, AppState};

/// Create API routes for a service
pub fn api_routes(service: ServiceKind) -> Router<AppState> {
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(inventory_routes());

    match service {
        ServiceKind::Hospital => router.nest("/indents", hospital_indent_routes()),
        ServiceKind::Pharmacy => router.nest("/indents", pharmacy_indent_routes()),
    }
}

/// Item, batch and audit routes (both services)
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/items",
            get(handlers::list_items).post(handlers::create_item),
        )
        .route(
            "/items/:id",
            get(handlers::get_item)
                .put(handlers::update_item)
                .delete(handlers::delete_item),
        )
        .route("/items/:id/transactions", get(handlers::get_item_transactions))
        .route(
            "/items/:id/reconciliation",
            get(handlers::get_item_reconciliation),
        )
        .route("/batches", post(handlers::add_batch))
        .route(
            "/batches/:id",
            put(handlers::update_batch).delete(handlers::delete_batch),
        )
        .route("/transactions", get(handlers::list_transactions))
        .route("/dashboard/stats", get(handlers::get_dashboard_stats))
}

/// Indent resource owned by the supplying side
fn hospital_indent_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_indents).post(handlers::create_indent),
        )
        .route("/:id", get(handlers::get_indent))
        .route("/:id/status", put(handlers::update_indent_status))
}

/// Requesting side: raise on the hospital, receive dispatched stock
fn pharmacy_indent_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::raise_indent))
        .route("/:id/receive", post(handlers::receive_indent))
}
