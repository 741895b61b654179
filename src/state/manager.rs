//! PostgreSQL state manager

use crate::chain::ChainKind;
use crate::config::DatabaseConfig;
use crate::coordination::{RequestSnapshot, RequestStatus};
use crate::error::{FinalizerError, FinalizerResult};

use chrono::{DateTime, Utc};
use ethers::types::H256;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use serde::Serialize;
use sqlx::Row;
use tracing::{debug, info};

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> FinalizerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> FinalizerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interop_requests (
                source_tx_hash VARCHAR(66) PRIMARY KEY,
                from_chain VARCHAR(64) NOT NULL,
                to_chain VARCHAR(64) NOT NULL,
                source_block_number BIGINT,
                gateway_batch TEXT,
                status VARCHAR(40) NOT NULL,
                error TEXT,
                enqueued_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("ALTER TABLE interop_requests ADD COLUMN IF NOT EXISTS started_at TIMESTAMPTZ")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_interop_requests_status
            ON interop_requests (status, enqueued_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> FinalizerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Insert or update a request keyed by its source transaction
    pub async fn upsert_request(&self, snapshot: &RequestSnapshot) -> FinalizerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO interop_requests
                (source_tx_hash, from_chain, to_chain, source_block_number,
                 gateway_batch, status, error, enqueued_at, started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (source_tx_hash)
            DO UPDATE SET
                source_block_number = $4,
                gateway_batch = $5,
                status = $6,
                error = $7,
                started_at = $9,
                updated_at = $10
            "#,
        )
        .bind(format!("{:?}", snapshot.source_tx_hash))
        .bind(snapshot.from.as_str())
        .bind(snapshot.to.as_str())
        .bind(snapshot.source_block_number.map(|b| b as i64))
        .bind(snapshot.gateway_batch.map(|b| b.to_string()))
        .bind(snapshot.status.as_str())
        .bind(snapshot.error.as_deref())
        .bind(snapshot.enqueued_at)
        .bind(snapshot.started_at)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(
            "Persisted {:?} at {}",
            snapshot.source_tx_hash, snapshot.status
        );
        Ok(())
    }

    /// Requests that had not reached a terminal state, oldest first
    pub async fn load_pending(&self) -> FinalizerResult<Vec<RequestSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT source_tx_hash, from_chain, to_chain, source_block_number,
                   gateway_batch, status, error, enqueued_at, started_at, updated_at
            FROM interop_requests
            WHERE status NOT IN ('finalized', 'failed')
            ORDER BY enqueued_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    /// Request counts per status
    pub async fn get_stats(&self) -> FinalizerResult<RequestStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status NOT IN ('finalized', 'failed')) as pending,
                COUNT(*) FILTER (WHERE status = 'finalized') as finalized,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
            FROM interop_requests
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RequestStats {
            pending: row.get::<i64, _>("pending") as u64,
            finalized: row.get::<i64, _>("finalized") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }
}

fn snapshot_from_row(row: &PgRow) -> FinalizerResult<RequestSnapshot> {
    let corrupt = |column: &str, e: &dyn std::fmt::Display| {
        FinalizerError::Internal(format!("corrupt {} in interop_requests: {}", column, e))
    };

    let hash: String = row.try_get("source_tx_hash")?;
    let source_tx_hash = hash
        .parse::<H256>()
        .map_err(|e| corrupt("source_tx_hash", &e))?;

    let from: String = row.try_get("from_chain")?;
    let to: String = row.try_get("to_chain")?;
    let status: String = row.try_get("status")?;

    let gateway_batch: Option<String> = row.try_get("gateway_batch")?;
    let gateway_batch = gateway_batch
        .map(|b| b.parse::<u128>())
        .transpose()
        .map_err(|e| corrupt("gateway_batch", &e))?;

    let source_block_number: Option<i64> = row.try_get("source_block_number")?;
    let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
    let started_at: Option<DateTime<Utc>> = row.try_get("started_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(RequestSnapshot {
        from: from.parse::<ChainKind>()?,
        to: to.parse::<ChainKind>()?,
        source_tx_hash,
        source_block_number: source_block_number.map(|b| b as u64),
        gateway_batch,
        status: status.parse::<RequestStatus>()?,
        error: row.try_get("error")?,
        enqueued_at,
        started_at,
        updated_at,
    })
}

/// Request statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub pending: u64,
    pub finalized: u64,
    pub failed: u64,
}
