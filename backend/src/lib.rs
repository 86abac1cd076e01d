//! Medicine stock services
//!
//! A hospital (supplying) and a pharmacy (requesting) service sharing one
//! codebase. Each keeps its own batch-level stock with an append-only
//! ledger; indents move stock from the hospital to the pharmacy.

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod store;

pub use config::{Config, ServiceKind};
pub use error::{AppError, AppResult};

use external::HospitalClient;
use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: ServiceKind,
    pub store: Arc<dyn LedgerStore>,
    pub config: Arc<Config>,
    pub hospital: HospitalClient,
}

impl AppState {
    pub fn new(
        service: ServiceKind,
        store: Arc<dyn LedgerStore>,
        config: Config,
    ) -> AppResult<Self> {
        let hospital = HospitalClient::new(&config.hospital)?;
        Ok(Self {
            service,
            store,
            config: Arc::new(config),
            hospital,
        })
    }
}

/// Run a service until the listener fails
pub async fn run(service: ServiceKind) -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load(service)?;

    init_tracing(&config);

    tracing::info!("Starting {} service", service.name());
    tracing::info!("Environment: {}", config.environment);

    let store = connect_store(&config).await?;

    // Create application state
    let state = AppState::new(service, store, config.clone())?;

    // Build application
    let app = create_app(state);

    // Start server
    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "medstock=debug,tower_http=debug,sqlx=warn".into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Open the configured ledger store
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    if config.database.is_in_memory() {
        tracing::warn!("Using in-memory ledger store; stock will not survive a restart");
        return Ok(Arc::new(MemoryLedgerStore::new()));
    }

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    let store = PgLedgerStore::new(db_pool);
    if config.database.run_migrations {
        tracing::info!("Running database migrations...");
        store.migrate().await?;
        tracing::info!("Migrations completed");
    }

    Ok(Arc::new(store))
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let service = state.service;
    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes(service))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Medicine Stock API v1"
}
