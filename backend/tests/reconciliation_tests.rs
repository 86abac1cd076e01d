//! Reconciliation tests
//!
//! A real hospital service on a loopback port and a pharmacy client that
//! receives its dispatched indents.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::Value;
use medstock::error::AppError;
use medstock::external::HospitalClient;
use medstock::services::ReconciliationService;
use medstock::store::{IndentTransition, LedgerStore, NewIndent};
use shared::{IndentStatus, ReasonCode, RECEIVED_INDENT_LOCATION};

use common::{
    assert_balanced, indent_input, indent_service, memory_store, pharmacy_config, seed_item,
    spawn_hospital, spawn_router,
};

fn pharmacy(store: &Arc<dyn LedgerStore>, base_url: &str) -> ReconciliationService {
    let config = pharmacy_config(base_url);
    let client = HospitalClient::new(&config.hospital).unwrap();
    ReconciliationService::new(store.clone(), client, config.pharmacy.pharmacy_id)
}

/// Wire form of a one-batch indent as the hospital serves it
fn remote_indent(status: &str, pharmacy_id: &str) -> Value {
    serde_json::json!({
        "id": 9,
        "item_name": "Amoxicillin",
        "quantity": 5,
        "status": status,
        "pharmacy_id": pharmacy_id,
        "dispatch_details": r#"[{"batch_number":"B1","quantity":5,"expiry_date":"2025-01-01T00:00:00Z","mrp":null,"location":"R1"}]"#,
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

/// Hospital that answers GET with `indent` and PUT with `confirmed`
fn stub_hospital(indent: Value, confirmed: Value) -> Router {
    Router::new()
        .route(
            "/api/v1/indents/:id",
            get(move || {
                let indent = indent.clone();
                async move { Json(indent) }
            }),
        )
        .route(
            "/api/v1/indents/:id/status",
            put(move || {
                let confirmed = confirmed.clone();
                async move { Json(confirmed) }
            }),
        )
}

/// Hospital with an Amoxicillin indent already DISPATCHED
async fn dispatched_hospital() -> (Arc<dyn LedgerStore>, String, i64) {
    let hospital_store = memory_store();
    seed_item(
        &hospital_store,
        "Amoxicillin",
        &[("B1", 20, "2025-01-01"), ("B2", 30, "2025-06-01")],
    )
    .await;
    let indents = indent_service(&hospital_store, false);
    let indent = indents.create_indent(indent_input("Amoxicillin", 25)).await.unwrap();
    indents.process_indent(indent.id, "PROCESSING", "clerk").await.unwrap();
    indents.process_indent(indent.id, "DISPATCHED", "clerk").await.unwrap();

    let base_url = spawn_hospital(hospital_store.clone()).await;
    (hospital_store, base_url, indent.id)
}

#[tokio::test]
async fn test_receive_creates_local_batches_and_fulfils() {
    let (hospital_store, base_url, indent_id) = dispatched_hospital().await;
    let local = memory_store();
    let service = pharmacy(&local, &base_url);

    let report = service.receive_indent(indent_id, "pharmacist").await.unwrap();

    assert_eq!(report.indent.status, IndentStatus::Fulfilled);
    assert_eq!(report.received.len(), 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.received.iter().map(|b| b.quantity).sum::<i64>(), 25);
    assert!(report
        .received
        .iter()
        .all(|b| b.location == RECEIVED_INDENT_LOCATION
            && b.source_reference.as_deref() == Some("IND-1")));

    // Item is created on first sight
    let items = local.find_items_by_name("Amoxicillin").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description, "Imported via Indent");
    assert_eq!(items[0].unit, "Units");

    let rows = local.item_transactions(report.item_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.reason == ReasonCode::Indent && r.quantity_change > 0));
    assert_balanced(&local, report.item_id).await;

    let remote = hospital_store.get_indent(indent_id).await.unwrap().unwrap();
    assert_eq!(remote.status, IndentStatus::Fulfilled);
}

#[tokio::test]
async fn test_retried_receipt_does_not_duplicate_batches() {
    let (_, base_url, indent_id) = dispatched_hospital().await;
    let local = memory_store();
    let service = pharmacy(&local, &base_url);

    let first = service.receive_indent(indent_id, "pharmacist").await.unwrap();
    let second = service.receive_indent(indent_id, "pharmacist").await.unwrap();

    assert!(second.received.is_empty());
    assert_eq!(second.skipped, 2);
    let batches = local.list_batches(first.item_id).await.unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches.iter().map(|b| b.quantity).sum::<i64>(), 25);
}

#[tokio::test]
async fn test_existing_item_receives_stock() {
    let (_, base_url, indent_id) = dispatched_hospital().await;
    let local = memory_store();
    let existing = seed_item(&local, "Amoxicillin", &[("L1", 4, "2026-01-01")]).await;
    let service = pharmacy(&local, &base_url);

    let report = service.receive_indent(indent_id, "pharmacist").await.unwrap();
    assert_eq!(report.item_id, existing.item.id);
    let batches = local.list_batches(existing.item.id).await.unwrap();
    assert_eq!(batches.iter().map(|b| b.quantity).sum::<i64>(), 29);
    assert_balanced(&local, existing.item.id).await;
}

#[tokio::test]
async fn test_pending_indent_cannot_be_received() {
    let hospital_store = memory_store();
    let indents = indent_service(&hospital_store, false);
    let indent = indents.create_indent(indent_input("Amoxicillin", 5)).await.unwrap();
    let base_url = spawn_hospital(hospital_store).await;

    let local = memory_store();
    let err = pharmacy(&local, &base_url)
        .receive_indent(indent.id, "pharmacist")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
    assert!(local.list_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_remote_indent_is_not_found() {
    let base_url = spawn_hospital(memory_store()).await;
    let err = pharmacy(&memory_store(), &base_url)
        .receive_indent(77, "pharmacist")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_malformed_plan_is_rejected() {
    let hospital_store = memory_store();
    let indent = hospital_store
        .insert_indent(NewIndent {
            item_name: "Amoxicillin".to_string(),
            quantity: 5,
            pharmacy_id: "PH-7".to_string(),
        })
        .await
        .unwrap();
    hospital_store
        .transition_indent(IndentTransition {
            indent_id: indent.id,
            from: IndentStatus::Pending,
            to: IndentStatus::Dispatched,
            dispatch_details: Some("{not a plan".to_string()),
        })
        .await
        .unwrap();
    let base_url = spawn_hospital(hospital_store).await;

    let local = memory_store();
    let err = pharmacy(&local, &base_url)
        .receive_indent(indent.id, "pharmacist")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MalformedPlan(_)));
    assert!(local.list_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_hospital_is_remote_unavailable() {
    // Reserve a port, then free it so nothing is listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = pharmacy(&memory_store(), &format!("http://{}/api/v1", addr))
        .receive_indent(1, "pharmacist")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RemoteUnavailable(_)));
}

#[tokio::test]
async fn test_failed_confirmation_reports_manual_reconciliation() {
    // Serves a dispatched indent but refuses every status update
    let indent = remote_indent("DISPATCHED", "PH-7");
    let app = Router::new()
        .route(
            "/api/v1/indents/:id",
            get(move || {
                let indent = indent.clone();
                async move { Json(indent) }
            }),
        )
        .route(
            "/api/v1/indents/:id/status",
            put(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
    let base_url = spawn_router(app).await;

    let local = memory_store();
    let service = pharmacy(&local, &base_url);
    let err = service.receive_indent(9, "pharmacist").await.unwrap_err();

    assert!(matches!(err, AppError::RemoteUnavailable(_)));
    assert!(err.to_string().contains("manual reconciliation may be required"));

    // Stock was received and a retry will not add it again
    let item = &local.find_items_by_name("Amoxicillin").await.unwrap()[0];
    assert_eq!(local.list_batches(item.id).await.unwrap().len(), 1);
    let retry = service.receive_indent(9, "pharmacist").await.unwrap_err();
    assert!(matches!(retry, AppError::RemoteUnavailable(_)));
    assert_eq!(local.list_batches(item.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_raise_indent_stamps_pharmacy_id() {
    let hospital_store = memory_store();
    let base_url = spawn_hospital(hospital_store.clone()).await;
    let service = pharmacy(&memory_store(), &base_url);

    let mut input = indent_input("Amoxicillin", 12);
    input.pharmacy_id = "SOMEONE-ELSE".to_string();
    let indent = service.raise_indent(input).await.unwrap();

    assert_eq!(indent.status, IndentStatus::Pending);
    assert_eq!(indent.pharmacy_id, "PH-7");
    let stored = hospital_store.get_indent(indent.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity, 12);
}

#[tokio::test]
async fn test_unconfirmed_fulfilment_reports_manual_reconciliation() {
    // The status update is accepted but the indent was rejected meanwhile
    let app = stub_hospital(
        remote_indent("DISPATCHED", "PH-7"),
        remote_indent("REJECTED", "PH-7"),
    );
    let base_url = spawn_router(app).await;

    let local = memory_store();
    let err = pharmacy(&local, &base_url)
        .receive_indent(9, "pharmacist")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidStateTransition(_)));
    let message = err.to_string();
    assert!(message.contains("manual reconciliation may be required"));
    assert!(message.contains("REJECTED"));

    // The stock stays recorded for the operator to resolve
    let item = &local.find_items_by_name("Amoxicillin").await.unwrap()[0];
    assert_eq!(local.list_batches(item.id).await.unwrap().len(), 1);
    assert_balanced(&local, item.id).await;
}

#[tokio::test]
async fn test_other_pharmacy_indent_is_refused() {
    let app = stub_hospital(
        remote_indent("DISPATCHED", "PH-9"),
        remote_indent("FULFILLED", "PH-9"),
    );
    let base_url = spawn_router(app).await;

    let local = memory_store();
    let err = pharmacy(&local, &base_url)
        .receive_indent(9, "pharmacist")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert!(local.list_items().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_receipts_receive_once() {
    let (_, base_url, indent_id) = dispatched_hospital().await;
    let local = memory_store();
    let service = pharmacy(&local, &base_url);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.receive_indent(indent_id, "pharmacist").await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        let report = task.await.unwrap().unwrap();
        created += report.received.len();
    }

    assert_eq!(created, 2);
    let item = &local.find_items_by_name("Amoxicillin").await.unwrap()[0];
    let batches = local.list_batches(item.id).await.unwrap();
    assert_eq!(batches.iter().map(|b| b.quantity).sum::<i64>(), 25);
    assert_balanced(&local, item.id).await;
}

/// Router whose GET fails with 503 for the first `failures` calls
fn flaky_hospital(failures: usize, hits: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/api/v1/indents/:id",
        get(move || {
            let hits = hits.clone();
            async move {
                let seen = hits.fetch_add(1, Ordering::SeqCst);
                if seen < failures {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(Value::Null))
                } else {
                    (StatusCode::OK, Json(remote_indent("DISPATCHED", "PH-7")))
                }
            }
        }),
    )
}

fn client(base_url: &str) -> HospitalClient {
    HospitalClient::new(&pharmacy_config(base_url).hospital).unwrap()
}

#[tokio::test]
async fn test_server_error_is_retried_once() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base_url = spawn_router(flaky_hospital(1, hits.clone())).await;

    let indent = client(&base_url).get_indent(9).await.unwrap();

    assert_eq!(indent.status, IndentStatus::Dispatched);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base_url = spawn_router(flaky_hospital(usize::MAX, hits.clone())).await;

    let err = client(&base_url).get_indent(9).await.unwrap_err();

    assert!(matches!(err, AppError::RemoteUnavailable(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/api/v1/indents/:id",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::BAD_REQUEST
            }
        }),
    );
    let base_url = spawn_router(app).await;

    let err = client(&base_url).get_indent(9).await.unwrap_err();

    assert!(matches!(err, AppError::RemoteRejected(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_raising_an_indent_is_never_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/api/v1/indents",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }),
    );
    let base_url = spawn_router(app).await;
    let service = pharmacy(&memory_store(), &base_url);

    let err = service
        .raise_indent(indent_input("Amoxicillin", 3))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RemoteUnavailable(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
