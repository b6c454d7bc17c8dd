//! Paginated, resumable ingestion of third-party search results.
//!
//! One operation drives the whole crate: [`SearchPipeline::run_paginated_search`]
//! fingerprints a search's filter set, reuses the run already holding that
//! fingerprint when one exists, and otherwise pages through the upstream API,
//! normalizing records and persisting them as immutable, checksummed blocks.

pub mod blocks;
pub mod config;
pub mod extract;
pub mod fetcher;
pub mod fingerprint;
pub mod normalizer;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-exports for clean API
pub use blocks::{block_key, verify_block, BlockIntegrityError, BlockWriter};
pub use config::{Config, RunDefaults};
pub use fetcher::{
    FetchedPage, HttpMethod, HttpPageFetcher, PageFetcher, PageQuery, RetryingFetcher,
    UpstreamError,
};
pub use fingerprint::{canonical_json, checksum, fingerprint_filters};
pub use normalizer::normalize_record;
pub use pipeline::SearchPipeline;
pub use storage::{
    BlockStore, ClaimOutcome, FsBlockStore, MemoryBlockStore, MemoryRunStore, PostgresRunStore,
    RunStore,
};
pub use types::{
    BlockSummary, ContactFields, NormalizedRecord, PropertyFields, RunStatus, RunSummary,
    SearchBlock, SearchRequest, SearchRun, SearchRunId,
};
