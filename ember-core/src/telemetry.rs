//! Inference telemetry.
//!
//! Provides the [`TelemetrySink`] trait as a port for record stores, the
//! [`InferenceRecord`] written once per successful completion, and the
//! in-memory and SQLite adapters.

pub mod sqlite;

pub use sqlite::SqliteTelemetry;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::TelemetryConfig;
use crate::endpoint::EndpointKind;

/// Errors that can occur while recording telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A migration operation failed.
    #[error("migration error: {0}")]
    Migration(String),
}

/// One completed inference request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRecord {
    /// Unique record id.
    pub id: Uuid,
    /// Model that served the request.
    pub name: String,
    /// When the attempt started.
    pub start_time: DateTime<Utc>,
    /// Local or remote endpoint.
    pub endpoint: EndpointKind,
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Generated tokens.
    pub output_tokens: u32,
    /// Generation speed, when measurable.
    pub tokens_per_second: Option<f64>,
}

impl InferenceRecord {
    /// Create a record with a fresh id.
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>, endpoint: EndpointKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            start_time,
            endpoint,
            input_tokens: 0,
            output_tokens: 0,
            tokens_per_second: None,
        }
    }
}

/// Port for telemetry stores.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Persist one record.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Database`] if the write fails.
    async fn record(&self, record: &InferenceRecord) -> Result<(), TelemetryError>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    records: Mutex<Vec<InferenceRecord>>,
}

impl MemoryTelemetry {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written so far.
    pub fn records(&self) -> Vec<InferenceRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetry {
    async fn record(&self, record: &InferenceRecord) -> Result<(), TelemetryError> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push(record.clone());
        Ok(())
    }
}

/// Default database location: `~/.local/share/ember/telemetry.db`.
fn default_database_url() -> Option<String> {
    dirs::data_dir().map(|dir| format!("sqlite:{}", dir.join("ember/telemetry.db").display()))
}

/// Open the configured telemetry store.
///
/// Returns `Ok(None)` when telemetry is not configured.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the database cannot be opened or migrated.
pub async fn create_telemetry(
    config: Option<&TelemetryConfig>,
) -> Result<Option<Arc<dyn TelemetrySink>>, TelemetryError> {
    let Some(config) = config else {
        return Ok(None);
    };
    let Some(url) = config.database_url.clone().or_else(default_database_url) else {
        tracing::warn!("telemetry: no data directory available, telemetry disabled");
        return Ok(None);
    };
    let store = SqliteTelemetry::new(&url).await?;
    Ok(Some(Arc::new(store)))
}
