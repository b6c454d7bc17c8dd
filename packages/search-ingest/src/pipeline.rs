//! The run/resume state machine tying fetching, normalization, and block
//! persistence together.
//!
//! A run is claimed atomically by its (source, endpoint, filter fingerprint)
//! key. A claim that loses to an existing run serves that run's summary with
//! no upstream calls; a fresh claim drives the page loop to completion or
//! failure. Runs only ever move `running -> completed` or `running -> failed`.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use crate::blocks::BlockWriter;
use crate::config::RunDefaults;
use crate::fetcher::{FetchedPage, HttpMethod, PageFetcher, PageQuery};
use crate::fingerprint::fingerprint_filters;
use crate::normalizer::normalize_record;
use crate::storage::{BlockStore, ClaimOutcome, RunStore};
use crate::types::{
    BlockSummary, RunStatus, RunSummary, SearchBlock, SearchRequest, SearchRun,
};

/// A request with every optional field resolved against the defaults.
struct ResolvedRequest {
    endpoint: String,
    method: HttpMethod,
    filters: Value,
    page_param: String,
    limit_param: String,
    max_records: i64,
    page_size: i64,
    block_size: usize,
}

pub struct SearchPipeline<F> {
    source: String,
    fetcher: F,
    runs: Arc<dyn RunStore>,
    blocks: Arc<dyn BlockStore>,
    defaults: RunDefaults,
}

impl<F: PageFetcher> SearchPipeline<F> {
    pub fn new(
        source: impl Into<String>,
        fetcher: F,
        runs: Arc<dyn RunStore>,
        blocks: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            source: source.into(),
            fetcher,
            runs,
            blocks,
            defaults: RunDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: RunDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Run one paginated search to completion, or serve it from the
    /// authoritative run already holding its fingerprint.
    pub async fn run_paginated_search(&self, request: SearchRequest) -> Result<RunSummary> {
        let resolved = self.resolve(request);
        let filter_hash = fingerprint_filters(Some(&resolved.filters));

        let run = SearchRun::new(
            self.source.clone(),
            resolved.endpoint.clone(),
            resolved.filters.clone(),
            filter_hash.clone(),
            json!({
                "pageSize": resolved.page_size,
                "blockSize": resolved.block_size,
                "maxRecords": resolved.max_records,
            }),
        );

        match self.runs.claim_run(&run).await? {
            ClaimOutcome::Existing(existing) => {
                tracing::info!(
                    search_id = %existing.id,
                    endpoint = %existing.endpoint,
                    status = existing.status.as_str(),
                    "Serving search from existing run"
                );
                return self.summary_for(&existing).await;
            }
            ClaimOutcome::Created => {}
        }

        tracing::info!(
            search_id = %run.id,
            endpoint = %resolved.endpoint,
            filter_hash = %filter_hash,
            "Starting paginated search run"
        );

        match self.execute_run(&run, &resolved).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                // The run stays terminal-failed; identical requests will see
                // it as a cache hit rather than silently retrying.
                if let Err(update_err) = self.runs.fail_run(run.id, &err.to_string()).await {
                    tracing::warn!(
                        search_id = %run.id,
                        error = %update_err,
                        "Failed to mark search run failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute_run(&self, run: &SearchRun, req: &ResolvedRequest) -> Result<RunSummary> {
        // Probe page 1 with a single record to learn the upstream total.
        let probe = self.fetch(req, 1, 1).await?;
        let capped_total = probe.total.min(req.max_records);

        let mut writer = BlockWriter::new(
            run.id,
            req.block_size,
            json!({"endpoint": req.endpoint, "filters": req.filters}),
        );
        let mut fetched: i64 = 0;
        let mut page: i64 = 1;

        while fetched < capped_total {
            let limit = req.page_size.min(capped_total - fetched);
            let fetched_page = self.fetch(req, page, limit).await?;
            page += 1;

            if fetched_page.records.is_empty() {
                // Upstream ran out before the reported total. Normal
                // exhaustion, not an error.
                tracing::debug!(
                    search_id = %run.id,
                    page = page - 1,
                    fetched,
                    capped_total,
                    "Upstream exhausted before reaching the expected total"
                );
                break;
            }

            fetched += fetched_page.records.len() as i64;
            for record in fetched_page.records {
                writer.push(normalize_record(record));
                if writer.is_full() {
                    if let Some(block) = writer.flush(self.blocks.as_ref()).await? {
                        self.runs.record_block(&block).await?;
                    }
                }
            }
        }

        // Final partial flush: a run that hits its cap or exhausts upstream
        // with a short buffer still persists that last block.
        if let Some(block) = writer.flush(self.blocks.as_ref()).await? {
            self.runs.record_block(&block).await?;
        }

        let block_keys = writer.block_keys();
        self.runs
            .complete_run(run.id, capped_total, fetched, &block_keys)
            .await?;

        tracing::info!(
            search_id = %run.id,
            total = capped_total,
            fetched,
            blocks = writer.summaries().len(),
            "Search run completed"
        );

        Ok(RunSummary {
            search_id: run.id,
            total: capped_total,
            fetched,
            block_keys,
            blocks: writer.summaries().to_vec(),
            status: RunStatus::Completed,
        })
    }

    /// Summary for an existing run, with blocks re-read from their rows.
    async fn summary_for(&self, run: &SearchRun) -> Result<RunSummary> {
        let blocks = self.runs.list_blocks(run.id).await?;

        Ok(RunSummary {
            search_id: run.id,
            total: run.total,
            fetched: run.fetched_count,
            block_keys: run.block_keys.clone(),
            blocks: blocks.into_iter().map(block_summary).collect(),
            status: run.status,
        })
    }

    async fn fetch(&self, req: &ResolvedRequest, page: i64, limit: i64) -> Result<FetchedPage> {
        self.fetcher
            .fetch_page(PageQuery {
                endpoint: &req.endpoint,
                method: req.method,
                filters: &req.filters,
                page,
                limit,
                page_param: &req.page_param,
                limit_param: &req.limit_param,
            })
            .await
    }

    fn resolve(&self, request: SearchRequest) -> ResolvedRequest {
        let defaults = &self.defaults;
        ResolvedRequest {
            endpoint: request.endpoint,
            method: request.method.unwrap_or(defaults.method),
            filters: request.filters.unwrap_or_else(|| json!({})),
            page_param: request
                .page_param
                .unwrap_or_else(|| defaults.page_param.clone()),
            limit_param: request
                .limit_param
                .unwrap_or_else(|| defaults.limit_param.clone()),
            max_records: request.max_records.unwrap_or(defaults.max_records),
            page_size: request.page_size.unwrap_or(defaults.page_size),
            block_size: request.block_size.unwrap_or(defaults.block_size),
        }
    }
}

fn block_summary(block: SearchBlock) -> BlockSummary {
    BlockSummary {
        key: block.key,
        checksum: block.checksum,
        record_count: block.record_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBlockStore, MemoryRunStore};
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fetcher that replays a fixed page script. The limit-1 probe returns
    /// only the total; real pages are indexed by page number.
    struct ScriptedFetcher {
        total: i64,
        pages: Vec<usize>,
        calls: AtomicU32,
        fail_on_page: Option<i64>,
    }

    impl ScriptedFetcher {
        fn new(total: i64, pages: Vec<usize>) -> Self {
            Self {
                total,
                pages,
                calls: AtomicU32::new(0),
                fail_on_page: None,
            }
        }

        fn failing_on(mut self, page: i64) -> Self {
            self.fail_on_page = Some(page);
            self
        }

        fn records(count: usize, page: i64) -> Vec<Value> {
            (0..count)
                .map(|i| json!({"id": format!("p{page}-{i}"), "address": "100 Main St"}))
                .collect()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(&self, query: PageQuery<'_>) -> Result<FetchedPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if query.limit == 1 {
                return Ok(FetchedPage {
                    records: Self::records(self.total.min(1) as usize, 0),
                    total: self.total,
                });
            }

            if self.fail_on_page == Some(query.page) {
                bail!("upstream exploded on page {}", query.page);
            }

            let count = self
                .pages
                .get((query.page - 1) as usize)
                .copied()
                .unwrap_or(0);
            Ok(FetchedPage {
                records: Self::records(count, query.page),
                total: self.total,
            })
        }
    }

    struct Harness {
        pipeline: SearchPipeline<Arc<ScriptedFetcher>>,
        fetcher: Arc<ScriptedFetcher>,
        runs: Arc<MemoryRunStore>,
        blocks: Arc<MemoryBlockStore>,
    }

    fn harness(fetcher: ScriptedFetcher, defaults: RunDefaults) -> Harness {
        let fetcher = Arc::new(fetcher);
        let runs = Arc::new(MemoryRunStore::new());
        let blocks = Arc::new(MemoryBlockStore::new());
        let pipeline = SearchPipeline::new(
            "test-api",
            Arc::clone(&fetcher),
            runs.clone() as Arc<dyn RunStore>,
            blocks.clone() as Arc<dyn BlockStore>,
        )
        .with_defaults(defaults);

        Harness {
            pipeline,
            fetcher,
            runs,
            blocks,
        }
    }

    fn request() -> SearchRequest {
        SearchRequest::new("PropertySearch").with_filters(json!({"state": "MN"}))
    }

    #[tokio::test]
    async fn test_multi_page_run_chunks_into_fixed_blocks() {
        // total=10, pages of 4/4/2, blocks of 6: expect blocks [6, 4].
        let h = harness(
            ScriptedFetcher::new(10, vec![4, 4, 2]),
            RunDefaults::default()
                .with_max_records(10)
                .with_page_size(4)
                .with_block_size(6),
        );

        let summary = h.pipeline.run_paginated_search(request()).await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total, 10);
        assert_eq!(summary.fetched, 10);
        assert_eq!(summary.blocks.len(), 2);
        assert_eq!(summary.blocks[0].record_count, 6);
        assert_eq!(summary.blocks[1].record_count, 4);

        let blocks = h.runs.list_blocks(summary.search_id).await.unwrap();
        let indices: Vec<i32> = blocks.iter().map(|b| b.block_index).collect();
        assert_eq!(indices, vec![1, 2]);
        let counted: i64 = blocks.iter().map(|b| b.record_count).sum();
        assert_eq!(counted, summary.fetched);

        // Probe + three pages.
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_identical_request_reuses_completed_run() {
        let h = harness(
            ScriptedFetcher::new(4, vec![4]),
            RunDefaults::default().with_page_size(4).with_block_size(4),
        );

        let first = h.pipeline.run_paginated_search(request()).await.unwrap();
        let calls_after_first = h.fetcher.calls.load(Ordering::SeqCst);

        // Identical search intent: served from the first run, no fetches.
        let second = h
            .pipeline
            .run_paginated_search(request())
            .await
            .unwrap();

        assert_eq!(second.search_id, first.search_id);
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.block_keys, first.block_keys);
        assert_eq!(second.blocks, first.blocks);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_cap_limits_fetched_below_upstream_total() {
        let h = harness(
            ScriptedFetcher::new(100, vec![4, 4, 4]),
            RunDefaults::default()
                .with_max_records(10)
                .with_page_size(4)
                .with_block_size(50),
        );

        let summary = h.pipeline.run_paginated_search(request()).await.unwrap();

        assert_eq!(summary.total, 10);
        assert!(summary.fetched <= 10);
        assert_eq!(summary.fetched, 10);
    }

    #[tokio::test]
    async fn test_empty_first_page_completes_with_zero_records() {
        let h = harness(
            ScriptedFetcher::new(0, vec![]),
            RunDefaults::default(),
        );

        let summary = h.pipeline.run_paginated_search(request()).await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.fetched, 0);
        assert!(summary.blocks.is_empty());
        assert!(summary.block_keys.is_empty());
    }

    #[tokio::test]
    async fn test_early_exhaustion_flushes_partial_buffer() {
        // Upstream reports 12 but dries up after 8 records.
        let h = harness(
            ScriptedFetcher::new(12, vec![4, 4]),
            RunDefaults::default()
                .with_max_records(12)
                .with_page_size(4)
                .with_block_size(6),
        );

        let summary = h.pipeline.run_paginated_search(request()).await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.fetched, 8);
        assert_eq!(summary.blocks.len(), 2);
        assert_eq!(summary.blocks[0].record_count, 6);
        assert_eq!(summary.blocks[1].record_count, 2);
    }

    #[tokio::test]
    async fn test_failure_mid_run_marks_run_failed_and_propagates() {
        let h = harness(
            ScriptedFetcher::new(10, vec![4, 4, 2]).failing_on(2),
            RunDefaults::default()
                .with_max_records(10)
                .with_page_size(4)
                .with_block_size(6),
        );

        let err = h.pipeline.run_paginated_search(request()).await.unwrap_err();
        assert!(err.to_string().contains("page 2"));

        let runs = h.runs.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].metadata["error"]
            .as_str()
            .unwrap()
            .contains("page 2"));

        // The failed run is terminal: an identical request serves it as a
        // cache hit instead of retrying upstream.
        let calls = h.fetcher.calls.load(Ordering::SeqCst);
        let summary = h.pipeline.run_paginated_search(request()).await.unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_block_payloads_survive_integrity_check() {
        let h = harness(
            ScriptedFetcher::new(5, vec![5]),
            RunDefaults::default().with_page_size(5).with_block_size(2),
        );

        let summary = h.pipeline.run_paginated_search(request()).await.unwrap();
        let blocks = h.runs.list_blocks(summary.search_id).await.unwrap();
        assert_eq!(blocks.len(), 3);

        for block in &blocks {
            crate::blocks::verify_block(h.blocks.as_ref(), block)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_different_filters_run_separately() {
        let h = harness(
            ScriptedFetcher::new(2, vec![2]),
            RunDefaults::default().with_page_size(2),
        );

        let first = h.pipeline.run_paginated_search(request()).await.unwrap();
        let second = h
            .pipeline
            .run_paginated_search(
                SearchRequest::new("PropertySearch").with_filters(json!({"state": "WI"})),
            )
            .await
            .unwrap();

        assert_ne!(first.search_id, second.search_id);
    }
}
