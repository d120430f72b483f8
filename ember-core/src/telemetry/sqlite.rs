//! SQLite telemetry store.
//!
//! Provides [`SqliteTelemetry`] as the persistent backend for inference records.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use super::{InferenceRecord, TelemetryError, TelemetrySink};
use crate::endpoint::EndpointKind;

/// SQLite-based telemetry storage.
///
/// Uses connection pooling and WAL mode for performance.
/// Runs migrations automatically on startup.
pub struct SqliteTelemetry {
    pool: SqlitePool,
}

impl SqliteTelemetry {
    /// Open a store from a database URL.
    ///
    /// The URL should be in the format `sqlite:path/to/database.db`.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Database`] if connection fails.
    /// Returns [`TelemetryError::Migration`] if migrations fail.
    pub async fn new(database_url: &str) -> Result<Self, TelemetryError> {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let path = PathBuf::from(url);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                TelemetryError::Database(format!("failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(url)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| TelemetryError::Database(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| TelemetryError::Migration(e.to_string()))?;

        tracing::debug!(url, "telemetry: sqlite store opened");
        Ok(Self { pool })
    }

    /// Most recent records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Database`] if the query fails or a row is
    /// unreadable.
    pub async fn recent(&self, limit: u32) -> Result<Vec<InferenceRecord>, TelemetryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, start_time, endpoint, input_tokens, output_tokens, tokens_per_second
            FROM inference_records
            ORDER BY start_time DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TelemetryError::Database(e.to_string()))?;

        rows.iter().map(Self::from_row).collect()
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<InferenceRecord, TelemetryError> {
        let id_str: String = row.get("id");
        let id = Uuid::parse_str(&id_str)
            .map_err(|e| TelemetryError::Database(format!("invalid UUID: {}", e)))?;

        let start_str: String = row.get("start_time");
        let start_time = DateTime::parse_from_rfc3339(&start_str)
            .map_err(|e| TelemetryError::Database(format!("invalid datetime: {}", e)))?
            .with_timezone(&Utc);

        let endpoint: String = row.get("endpoint");
        let endpoint = Self::parse_endpoint(&endpoint)?;

        let input_tokens: i64 = row.get("input_tokens");
        let output_tokens: i64 = row.get("output_tokens");

        Ok(InferenceRecord {
            id,
            name: row.get("name"),
            start_time,
            endpoint,
            input_tokens: u32::try_from(input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(output_tokens).unwrap_or(u32::MAX),
            tokens_per_second: row.get("tokens_per_second"),
        })
    }

    fn parse_endpoint(s: &str) -> Result<EndpointKind, TelemetryError> {
        match s {
            "local" => Ok(EndpointKind::Local),
            "remote" => Ok(EndpointKind::Remote),
            _ => Err(TelemetryError::Database(format!("unknown endpoint kind: {}", s))),
        }
    }
}

#[async_trait]
impl TelemetrySink for SqliteTelemetry {
    async fn record(&self, record: &InferenceRecord) -> Result<(), TelemetryError> {
        sqlx::query(
            r#"
            INSERT INTO inference_records
                (id, name, start_time, endpoint, input_tokens, output_tokens, tokens_per_second)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(record.start_time.to_rfc3339())
        .bind(record.endpoint.as_str())
        .bind(i64::from(record.input_tokens))
        .bind(i64::from(record.output_tokens))
        .bind(record.tokens_per_second)
        .execute(&self.pool)
        .await
        .map_err(|e| TelemetryError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;
