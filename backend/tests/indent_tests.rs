//! Indent state machine tests
//!
//! PENDING -> PROCESSING -> DISPATCHED -> FULFILLED, REJECTED from any
//! non-terminal state, and the stock effects of each step.

mod common;

use medstock::error::AppError;
use medstock::store::LedgerStore;
use shared::{IndentStatus, ReasonCode};

use common::{assert_balanced, indent_input, indent_service, memory_store, seed_item};

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_amoxicillin_dispatch_end_to_end() {
    let store = memory_store();
    let item = seed_item(
        &store,
        "Amoxicillin",
        &[("B1", 20, "2025-01-01"), ("B2", 30, "2025-06-01")],
    )
    .await;
    let service = indent_service(&store, false);

    let indent = service.create_indent(indent_input("Amoxicillin", 25)).await.unwrap();
    assert_eq!(indent.status, IndentStatus::Pending);
    assert_eq!(indent.pharmacy_id, "PH-7");

    let processing = service.process_indent(indent.id, "PROCESSING", "clerk").await.unwrap();
    assert_eq!(processing.status, IndentStatus::Processing);
    let proposed: Vec<(String, i64)> = processing
        .dispatch_plan()
        .unwrap()
        .into_iter()
        .map(|e| (e.batch_number, e.quantity))
        .collect();
    assert_eq!(proposed, vec![("B1".to_string(), 20), ("B2".to_string(), 5)]);

    // Proposal does not touch stock
    let batches = store.list_batches(item.item.id).await.unwrap();
    assert_eq!(batches.iter().map(|b| b.quantity).sum::<i64>(), 50);

    let dispatched = service.process_indent(indent.id, "DISPATCHED", "clerk").await.unwrap();
    assert_eq!(dispatched.status, IndentStatus::Dispatched);
    assert_eq!(dispatched.dispatch_plan().unwrap().len(), 2);

    let batches = store.list_batches(item.item.id).await.unwrap();
    assert_eq!(batches[0].batch_number, "B1");
    assert_eq!(batches[0].quantity, 0);
    assert_eq!(batches[1].quantity, 25);

    let rows = store.reference_transactions("IND-1").await.unwrap();
    let deltas: Vec<i64> = rows.iter().map(|r| r.quantity_change).collect();
    assert_eq!(deltas, vec![-20, -5]);
    assert!(rows.iter().all(|r| r.reason == ReasonCode::Indent && r.performed_by == "clerk"));
    assert_balanced(&store, item.item.id).await;

    let fulfilled = service.process_indent(indent.id, "FULFILLED", "pharmacy").await.unwrap();
    assert_eq!(fulfilled.status, IndentStatus::Fulfilled);
}

#[tokio::test]
async fn test_processing_twice_is_noop() {
    let store = memory_store();
    seed_item(&store, "Paracetamol", &[("P1", 10, "2026-01-01")]).await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Paracetamol", 4)).await.unwrap();

    let first = service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();
    let second = service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_redelivered_dispatch_does_not_decrement_twice() {
    let store = memory_store();
    let item = seed_item(&store, "Paracetamol", &[("P1", 10, "2026-01-01")]).await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Paracetamol", 4)).await.unwrap();
    service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();

    service.process_indent(indent.id, "DISPATCHED", "a").await.unwrap();
    let again = service.process_indent(indent.id, "DISPATCHED", "a").await.unwrap();
    assert_eq!(again.status, IndentStatus::Dispatched);

    let batches = store.list_batches(item.item.id).await.unwrap();
    assert_eq!(batches[0].quantity, 6);
    assert_eq!(store.reference_transactions(&indent.reference()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_out_of_order_requests_are_ignored() {
    let store = memory_store();
    let item = seed_item(&store, "Paracetamol", &[("P1", 10, "2026-01-01")]).await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Paracetamol", 4)).await.unwrap();

    // Skipping PROCESSING leaves the indent alone and stock untouched
    let skipped = service.process_indent(indent.id, "DISPATCHED", "a").await.unwrap();
    assert_eq!(skipped.status, IndentStatus::Pending);
    let early = service.process_indent(indent.id, "FULFILLED", "a").await.unwrap();
    assert_eq!(early.status, IndentStatus::Pending);
    let back = service.process_indent(indent.id, "PENDING", "a").await.unwrap();
    assert_eq!(back.status, IndentStatus::Pending);

    assert_eq!(store.list_batches(item.item.id).await.unwrap()[0].quantity, 10);
}

#[tokio::test]
async fn test_unknown_status_is_validation_error() {
    let store = memory_store();
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Paracetamol", 4)).await.unwrap();

    let err = service.process_indent(indent.id, "SHIPPED", "a").await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "status"));
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let store = memory_store();
    let service = indent_service(&store, false);

    let zero = service.create_indent(indent_input("Paracetamol", 0)).await.unwrap_err();
    assert!(matches!(zero, AppError::Validation { ref field, .. } if field == "quantity"));

    let blank = service.create_indent(indent_input("   ", 3)).await.unwrap_err();
    assert!(matches!(blank, AppError::Validation { ref field, .. } if field == "item_name"));
}

#[tokio::test]
async fn test_missing_item_fails_processing() {
    let store = memory_store();
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Unobtainium", 1)).await.unwrap();

    let err = service.process_indent(indent.id, "PROCESSING", "a").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let unchanged = service.get_indent(indent.id).await.unwrap();
    assert_eq!(unchanged.status, IndentStatus::Pending);
}

#[tokio::test]
async fn test_unknown_indent_is_not_found() {
    let store = memory_store();
    let service = indent_service(&store, false);
    let err = service.process_indent(404, "PROCESSING", "a").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_item_name_matching_is_exact() {
    let store = memory_store();
    seed_item(&store, "Paracetamol", &[("P1", 10, "2026-01-01")]).await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("paracetamol", 1)).await.unwrap();

    let err = service.process_indent(indent.id, "PROCESSING", "a").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_partial_stock_dispatches_what_exists() {
    let store = memory_store();
    let item = seed_item(&store, "Heparin", &[("H1", 3, "2026-01-01")]).await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Heparin", 8)).await.unwrap();

    service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();
    let dispatched = service.process_indent(indent.id, "DISPATCHED", "a").await.unwrap();

    assert_eq!(dispatched.status, IndentStatus::Dispatched);
    let plan = dispatched.dispatch_plan().unwrap();
    assert_eq!(plan.iter().map(|e| e.quantity).sum::<i64>(), 3);
    assert_eq!(store.list_batches(item.item.id).await.unwrap()[0].quantity, 0);
    assert_balanced(&store, item.item.id).await;
}

#[tokio::test]
async fn test_dispatch_replans_against_current_stock() {
    let store = memory_store();
    let item = seed_item(
        &store,
        "Heparin",
        &[("H1", 5, "2026-01-01"), ("H2", 5, "2026-02-01")],
    )
    .await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Heparin", 4)).await.unwrap();
    service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();

    // H1 is emptied between proposal and dispatch
    let h1 = store.list_batches(item.item.id).await.unwrap()[0].clone();
    assert!(store.update_quantity_if_unchanged(h1.id, 5, 0).await.unwrap());

    let dispatched = service.process_indent(indent.id, "DISPATCHED", "a").await.unwrap();
    let plan = dispatched.dispatch_plan().unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].batch_number, "H2");
    assert_eq!(plan[0].quantity, 4);
}

// ============================================================================
// Rejection
// ============================================================================

#[tokio::test]
async fn test_reject_from_pending_and_terminal_is_final() {
    let store = memory_store();
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Paracetamol", 2)).await.unwrap();

    let rejected = service.process_indent(indent.id, "REJECTED", "a").await.unwrap();
    assert_eq!(rejected.status, IndentStatus::Rejected);

    let still = service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();
    assert_eq!(still.status, IndentStatus::Rejected);
}

#[tokio::test]
async fn test_fulfilled_cannot_be_rejected() {
    let store = memory_store();
    seed_item(&store, "Paracetamol", &[("P1", 10, "2026-01-01")]).await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Paracetamol", 2)).await.unwrap();
    for status in ["PROCESSING", "DISPATCHED", "FULFILLED"] {
        service.process_indent(indent.id, status, "a").await.unwrap();
    }

    let after = service.process_indent(indent.id, "REJECTED", "a").await.unwrap();
    assert_eq!(after.status, IndentStatus::Fulfilled);
}

#[tokio::test]
async fn test_reject_after_dispatch_keeps_stock_by_default() {
    let store = memory_store();
    let item = seed_item(&store, "Paracetamol", &[("P1", 10, "2026-01-01")]).await;
    let service = indent_service(&store, false);
    let indent = service.create_indent(indent_input("Paracetamol", 6)).await.unwrap();
    service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();
    service.process_indent(indent.id, "DISPATCHED", "a").await.unwrap();

    let rejected = service.process_indent(indent.id, "REJECTED", "a").await.unwrap();
    assert_eq!(rejected.status, IndentStatus::Rejected);
    assert_eq!(store.list_batches(item.item.id).await.unwrap()[0].quantity, 4);
}

#[tokio::test]
async fn test_reject_after_dispatch_restocks_when_enabled() {
    let store = memory_store();
    let item = seed_item(
        &store,
        "Paracetamol",
        &[("P1", 3, "2026-01-01"), ("P2", 10, "2026-04-01")],
    )
    .await;
    let service = indent_service(&store, true);
    let indent = service.create_indent(indent_input("Paracetamol", 6)).await.unwrap();
    service.process_indent(indent.id, "PROCESSING", "a").await.unwrap();
    service.process_indent(indent.id, "DISPATCHED", "a").await.unwrap();

    let rejected = service.process_indent(indent.id, "REJECTED", "supervisor").await.unwrap();
    assert_eq!(rejected.status, IndentStatus::Rejected);

    let batches = store.list_batches(item.item.id).await.unwrap();
    assert_eq!(batches[0].quantity, 3);
    assert_eq!(batches[1].quantity, 10);

    let corrections: Vec<i64> = store
        .reference_transactions(&indent.reference())
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.reason == ReasonCode::Correction)
        .map(|r| r.quantity_change)
        .collect();
    assert_eq!(corrections, vec![3, 3]);
    assert_balanced(&store, item.item.id).await;

    // A second rejection finds a terminal indent and restocks nothing
    service.process_indent(indent.id, "REJECTED", "supervisor").await.unwrap();
    assert_eq!(store.list_batches(item.item.id).await.unwrap()[1].quantity, 10);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatches_never_oversell() {
    let store = memory_store();
    let item = seed_item(&store, "Morphine", &[("M1", 5, "2026-01-01")]).await;
    let service = indent_service(&store, false);

    let first = service.create_indent(indent_input("Morphine", 3)).await.unwrap();
    let second = service.create_indent(indent_input("Morphine", 3)).await.unwrap();
    for id in [first.id, second.id] {
        service.process_indent(id, "PROCESSING", "a").await.unwrap();
    }

    let (a, b) = tokio::join!(
        {
            let service = service.clone();
            tokio::spawn(async move { service.process_indent(first.id, "DISPATCHED", "a").await })
        },
        {
            let service = service.clone();
            tokio::spawn(async move { service.process_indent(second.id, "DISPATCHED", "b").await })
        }
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    let shipped: i64 = [a, b]
        .iter()
        .flat_map(|i| i.dispatch_plan().unwrap())
        .map(|e| e.quantity)
        .sum();
    assert_eq!(shipped, 5);

    let batch = &store.list_batches(item.item.id).await.unwrap()[0];
    assert_eq!(batch.quantity, 0);
    assert_balanced(&store, item.item.id).await;
}
