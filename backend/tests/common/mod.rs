//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use medstock::config::{Config, ServiceKind};
use medstock::services::{IndentService, InventoryService};
use medstock::store::{LedgerStore, MemoryLedgerStore};
use medstock::{create_app, AppState};
use shared::{BatchDetailsInput, CreateIndentInput, CreateItemInput, ItemWithStock};

pub fn memory_store() -> Arc<dyn LedgerStore> {
    Arc::new(MemoryLedgerStore::new())
}

pub fn item_input(name: &str, batches: Option<(&str, i64, &str)>) -> CreateItemInput {
    CreateItemInput {
        name: name.to_string(),
        description: String::new(),
        threshold: 10,
        unit: "Tablets".to_string(),
        initial_batch: batches.map(|(number, quantity, expiry)| batch_details(number, quantity, expiry)),
    }
}

pub fn batch_details(number: &str, quantity: i64, expiry: &str) -> BatchDetailsInput {
    BatchDetailsInput {
        batch_number: number.to_string(),
        quantity,
        expiry_date: expiry.to_string(),
        mrp: None,
        location: "Rack-A".to_string(),
    }
}

pub fn indent_input(name: &str, quantity: i64) -> CreateIndentInput {
    CreateIndentInput {
        item_name: name.to_string(),
        quantity,
        pharmacy_id: "PH-7".to_string(),
    }
}

/// Item with the given batches, each recorded as stock received
pub async fn seed_item(
    store: &Arc<dyn LedgerStore>,
    name: &str,
    batches: &[(&str, i64, &str)],
) -> ItemWithStock {
    let inventory = InventoryService::new(store.clone());
    let item = inventory
        .create_item(item_input(name, None), "seed")
        .await
        .unwrap();
    for (number, quantity, expiry) in batches {
        inventory
            .add_batch(
                shared::CreateBatchInput {
                    item_id: item.item.id,
                    details: batch_details(number, *quantity, expiry),
                },
                "seed",
            )
            .await
            .unwrap();
    }
    inventory.get_item(item.item.id).await.unwrap()
}

pub fn indent_service(store: &Arc<dyn LedgerStore>, restock_on_reject: bool) -> IndentService {
    let mut policy = Config::in_memory(ServiceKind::Hospital).indents;
    policy.restock_on_reject = restock_on_reject;
    IndentService::new(store.clone(), policy)
}

/// Assert the ledger reconciles with the live batches of an item
pub async fn assert_balanced(store: &Arc<dyn LedgerStore>, item_id: i64) {
    let report = InventoryService::new(store.clone())
        .reconcile_item(item_id)
        .await
        .unwrap();
    assert!(
        report.balanced,
        "item {} batches={} ledger={}",
        item_id, report.batch_total, report.ledger_total
    );
}

pub fn state(service: ServiceKind, store: Arc<dyn LedgerStore>, config: Config) -> AppState {
    AppState::new(service, store, config).unwrap()
}

/// Serve a hospital on a loopback port; returns its API base URL
pub async fn spawn_hospital(store: Arc<dyn LedgerStore>) -> String {
    let app = create_app(state(
        ServiceKind::Hospital,
        store,
        Config::in_memory(ServiceKind::Hospital),
    ));
    spawn_router(app).await
}

pub async fn spawn_router(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/v1", addr)
}

/// Pharmacy configuration pointing at `base_url`
pub fn pharmacy_config(base_url: &str) -> Config {
    let mut config = Config::in_memory(ServiceKind::Pharmacy);
    config.hospital.base_url = base_url.to_string();
    config.hospital.request_timeout_secs = 2;
    config.hospital.retry_backoff_ms = 10;
    config.pharmacy.pharmacy_id = "PH-7".to_string();
    config
}
