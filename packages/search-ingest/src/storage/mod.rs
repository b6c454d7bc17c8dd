//! Durable stores behind the pipeline.
//!
//! Run/block metadata and block content are separate concerns: metadata
//! lives in Postgres, content in any write-once keyed store. Both sit
//! behind traits so the state machine can be tested without I/O.

mod fs;
mod memory;
mod postgres;

pub use fs::FsBlockStore;
pub use memory::{MemoryBlockStore, MemoryRunStore};
pub use postgres::PostgresRunStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

use crate::types::{SearchBlock, SearchRun, SearchRunId};

/// Outcome of an atomic claim on a run's (source, endpoint, filter_hash) key.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller's run row was inserted; it now owns the run.
    Created,
    /// Another run already owns this fingerprint; serve from it instead.
    Existing(SearchRun),
}

/// Run and block metadata store.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert `run` unless a run with the same (source, endpoint,
    /// filter_hash) already exists. Atomic: two concurrent claims for the
    /// same fingerprint can never both create a run.
    async fn claim_run(&self, run: &SearchRun) -> Result<ClaimOutcome>;

    async fn get_run(&self, id: SearchRunId) -> Result<Option<SearchRun>>;

    /// Terminal success transition.
    async fn complete_run(
        &self,
        id: SearchRunId,
        total: i64,
        fetched_count: i64,
        block_keys: &[String],
    ) -> Result<()>;

    /// Terminal failure transition; records the error in run metadata.
    async fn fail_run(&self, id: SearchRunId, error: &str) -> Result<()>;

    async fn record_block(&self, block: &SearchBlock) -> Result<()>;

    /// Blocks of a run, ordered by block index.
    async fn list_blocks(&self, id: SearchRunId) -> Result<Vec<SearchBlock>>;

    /// Flip `running` runs not updated within `older_than` to `failed` so
    /// they stop shadowing their fingerprint. Returns the number reclaimed.
    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64>;
}

/// Block content store, addressed by `{search_id}/block-{index}.json` keys.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Write-once: a key that already holds content must not be overwritten.
    async fn put_block(&self, key: &str, payload: &str) -> Result<()>;

    async fn get_block(&self, key: &str) -> Result<Option<String>>;
}
