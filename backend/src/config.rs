//! Configuration management for the medicine stock services
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code (per service)
//! 2. Configuration files (config/<service>.toml, config/<environment>.toml)
//! 3. Environment variable overrides with MEDSTOCK__ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Which side of the indent handshake this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Supplying service: owns the indent state machine
    Hospital,
    /// Requesting service: ingests dispatched indents
    Pharmacy,
}

impl ServiceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Hospital => "hospital",
            ServiceKind::Pharmacy => "pharmacy",
        }
    }

    fn default_port(&self) -> i64 {
        match self {
            ServiceKind::Hospital => 8080,
            ServiceKind::Pharmacy => 8081,
        }
    }
}

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Ledger store configuration
    pub database: DatabaseConfig,

    /// Hospital endpoint used by the pharmacy reconciliation client
    pub hospital: HospitalConfig,

    /// Pharmacy identity
    pub pharmacy: PharmacyConfig,

    /// Indent state machine policy
    pub indents: IndentConfig,

    /// Log output
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL, or `memory://` for an in-process store
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Run embedded migrations on startup
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("memory:")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HospitalConfig {
    /// Base URL of the hospital API, e.g. http://localhost:8080/api/v1
    pub base_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transport errors and 5xx
    pub max_retries: u32,

    /// Delay between attempts in milliseconds
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PharmacyConfig {
    /// Identifier stamped on indents raised by this pharmacy
    pub pharmacy_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndentConfig {
    /// Recompute-and-commit attempts when a batch changes during dispatch
    pub dispatch_attempts: u32,

    /// Put dispatched stock back when a DISPATCHED indent is rejected
    pub restock_on_reject: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    pub format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load(service: ServiceKind) -> Result<Self, ConfigError> {
        let environment =
            std::env::var("MEDSTOCK_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", service.default_port())?
            .set_default("server.host", "0.0.0.0")?
            .set_default(
                "database.url",
                format!("postgres://localhost/medstock_{}", service.name()),
            )?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", environment == "development")?
            .set_default("hospital.base_url", "http://localhost:8080/api/v1")?
            .set_default("hospital.request_timeout_secs", 10)?
            .set_default("hospital.max_retries", 1)?
            .set_default("hospital.retry_backoff_ms", 500)?
            .set_default("pharmacy.pharmacy_id", "PHARMACY-1")?
            .set_default("indents.dispatch_attempts", 3)?
            .set_default("indents.restock_on_reject", false)?
            .set_default("logging.format", "pretty")?
            // Service and environment specific config files
            .add_source(File::with_name(&format!("config/{}", service.name())).required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (MEDSTOCK__ prefix)
            .add_source(
                Environment::with_prefix("MEDSTOCK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Configuration for tests and the in-memory demo mode
    pub fn in_memory(service: ServiceKind) -> Self {
        Self {
            environment: "test".to_string(),
            server: ServerConfig {
                port: service.default_port() as u16,
                ..ServerConfig::default()
            },
            database: DatabaseConfig {
                url: "memory://".to_string(),
                max_connections: 1,
                min_connections: 1,
                run_migrations: false,
            },
            hospital: HospitalConfig::default(),
            pharmacy: PharmacyConfig {
                pharmacy_id: "PHARMACY-1".to_string(),
            },
            indents: IndentConfig::default(),
            logging: LoggingConfig {
                format: "pretty".to_string(),
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for HospitalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            request_timeout_secs: 10,
            max_retries: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for IndentConfig {
    fn default() -> Self {
        Self {
            dispatch_attempts: 3,
            restock_on_reject: false,
        }
    }
}
