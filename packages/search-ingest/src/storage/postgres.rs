use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{ClaimOutcome, RunStore};
use crate::types::{RunStatus, SearchBlock, SearchRun, SearchRunId};

/// Postgres-backed run/block metadata store.
///
/// The `search_runs` table carries a unique index on
/// `(source, endpoint, filter_hash)`; claims lean on it for atomicity.
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(status: &str) -> RunStatus {
    match status {
        "running" => RunStatus::Running,
        "completed" => RunStatus::Completed,
        _ => RunStatus::Failed,
    }
}

fn run_from_row(row: &PgRow) -> SearchRun {
    let status: String = row.get("status");
    let block_keys: Value = row.get("block_keys");

    SearchRun {
        id: SearchRunId(row.get("id")),
        source: row.get("source"),
        endpoint: row.get("endpoint"),
        filters: row.get("filters"),
        filter_hash: row.get("filter_hash"),
        status: parse_status(&status),
        total: row.get("total"),
        fetched_count: row.get("fetched_count"),
        block_keys: serde_json::from_value(block_keys).unwrap_or_default(),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn block_from_row(row: &PgRow) -> SearchBlock {
    SearchBlock {
        search_id: SearchRunId(row.get("search_id")),
        block_index: row.get("block_index"),
        key: row.get("key"),
        record_count: row.get("record_count"),
        checksum: row.get("checksum"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    }
}

const RUN_COLUMNS: &str = "id, source, endpoint, filters, filter_hash, status, total, \
                           fetched_count, block_keys, metadata, created_at, updated_at";

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn claim_run(&self, run: &SearchRun) -> Result<ClaimOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO search_runs (
                id, source, endpoint, filters, filter_hash, status,
                total, fetched_count, block_keys, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT (source, endpoint, filter_hash) DO NOTHING
            "#,
        )
        .bind(run.id.0)
        .bind(&run.source)
        .bind(&run.endpoint)
        .bind(&run.filters)
        .bind(&run.filter_hash)
        .bind(run.status.as_str())
        .bind(run.total)
        .bind(run.fetched_count)
        .bind(serde_json::to_value(&run.block_keys)?)
        .bind(&run.metadata)
        .execute(&self.pool)
        .await
        .context("Failed to claim search run")?;

        if inserted.rows_affected() == 1 {
            return Ok(ClaimOutcome::Created);
        }

        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM search_runs \
             WHERE source = $1 AND endpoint = $2 AND filter_hash = $3"
        ))
        .bind(&run.source)
        .bind(&run.endpoint)
        .bind(&run.filter_hash)
        .fetch_one(&self.pool)
        .await
        .context("Claim conflicted but the existing search run was not found")?;

        Ok(ClaimOutcome::Existing(run_from_row(&row)))
    }

    async fn get_run(&self, id: SearchRunId) -> Result<Option<SearchRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM search_runs WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get search run")?;

        Ok(row.map(|r| run_from_row(&r)))
    }

    async fn complete_run(
        &self,
        id: SearchRunId,
        total: i64,
        fetched_count: i64,
        block_keys: &[String],
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_runs
            SET status = 'completed',
                total = $2,
                fetched_count = $3,
                block_keys = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(total)
        .bind(fetched_count)
        .bind(serde_json::to_value(block_keys)?)
        .execute(&self.pool)
        .await
        .context("Failed to mark search run completed")?;

        Ok(())
    }

    async fn fail_run(&self, id: SearchRunId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_runs
            SET status = 'failed',
                metadata = COALESCE(metadata, '{}'::jsonb)
                    || jsonb_build_object('error', $2::text),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark search run failed")?;

        Ok(())
    }

    async fn record_block(&self, block: &SearchBlock) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO search_blocks (
                search_id, block_index, key, record_count, checksum, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(block.search_id.0)
        .bind(block.block_index)
        .bind(&block.key)
        .bind(block.record_count)
        .bind(&block.checksum)
        .bind(&block.metadata)
        .execute(&self.pool)
        .await
        .context("Failed to record search block")?;

        Ok(())
    }

    async fn list_blocks(&self, id: SearchRunId) -> Result<Vec<SearchBlock>> {
        let rows = sqlx::query(
            r#"
            SELECT search_id, block_index, key, record_count, checksum, metadata, created_at
            FROM search_blocks
            WHERE search_id = $1
            ORDER BY block_index
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list search blocks")?;

        Ok(rows.iter().map(block_from_row).collect())
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;

        let result = sqlx::query(
            r#"
            UPDATE search_runs
            SET status = 'failed',
                metadata = COALESCE(metadata, '{}'::jsonb)
                    || jsonb_build_object('error', 'reclaimed stale run'),
                updated_at = NOW()
            WHERE status = 'running' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to reclaim stale search runs")?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::info!(reclaimed, "Reclaimed stale running search runs");
        }

        Ok(reclaimed)
    }
}
