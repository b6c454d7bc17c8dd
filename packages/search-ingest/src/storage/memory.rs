//! In-memory stores, used by unit tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use super::{BlockStore, ClaimOutcome, RunStore};
use crate::types::{RunStatus, SearchBlock, SearchRun, SearchRunId};

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<SearchRunId, SearchRun>>,
    blocks: Mutex<Vec<SearchBlock>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all runs, for inspection in tests.
    pub fn runs(&self) -> Vec<SearchRun> {
        self.runs.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn claim_run(&self, run: &SearchRun) -> Result<ClaimOutcome> {
        let mut runs = self.runs.lock().unwrap();

        let existing = runs.values().find(|r| {
            r.source == run.source
                && r.endpoint == run.endpoint
                && r.filter_hash == run.filter_hash
        });
        if let Some(existing) = existing {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }

        runs.insert(run.id, run.clone());
        Ok(ClaimOutcome::Created)
    }

    async fn get_run(&self, id: SearchRunId) -> Result<Option<SearchRun>> {
        Ok(self.runs.lock().unwrap().get(&id).cloned())
    }

    async fn complete_run(
        &self,
        id: SearchRunId,
        total: i64,
        fetched_count: i64,
        block_keys: &[String],
    ) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.get_mut(&id) else {
            bail!("search run {id} not found");
        };
        run.status = RunStatus::Completed;
        run.total = total;
        run.fetched_count = fetched_count;
        run.block_keys = block_keys.to_vec();
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_run(&self, id: SearchRunId, error: &str) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.get_mut(&id) else {
            bail!("search run {id} not found");
        };
        run.status = RunStatus::Failed;
        if let Some(metadata) = run.metadata.as_object_mut() {
            metadata.insert("error".to_string(), json!(error));
        } else {
            run.metadata = json!({"error": error});
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn record_block(&self, block: &SearchBlock) -> Result<()> {
        self.blocks.lock().unwrap().push(block.clone());
        Ok(())
    }

    async fn list_blocks(&self, id: SearchRunId) -> Result<Vec<SearchBlock>> {
        let mut blocks: Vec<SearchBlock> = self
            .blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.search_id == id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.block_index);
        Ok(blocks)
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let mut reclaimed = 0;

        let mut runs = self.runs.lock().unwrap();
        for run in runs.values_mut() {
            if run.status == RunStatus::Running && run.updated_at < cutoff {
                run.status = RunStatus::Failed;
                if let Some(metadata) = run.metadata.as_object_mut() {
                    metadata.insert("error".to_string(), json!("reclaimed stale run"));
                }
                run.updated_at = Utc::now();
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }
}

#[derive(Default)]
pub struct MemoryBlockStore {
    objects: Mutex<HashMap<String, String>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a stored payload, bypassing the write-once rule. Test hook
    /// for simulating corruption.
    pub fn tamper(&self, key: &str, payload: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), payload.to_string());
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put_block(&self, key: &str, payload: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(key) {
            bail!("block {key} already exists; blocks are write-once");
        }
        objects.insert(key.to_string(), payload.to_string());
        Ok(())
    }

    async fn get_block(&self, key: &str) -> Result<Option<String>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}
