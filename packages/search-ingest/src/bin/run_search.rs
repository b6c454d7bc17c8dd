// CLI entry point for the search ingestion pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use search_ingest::{
    Config, FsBlockStore, HttpMethod, HttpPageFetcher, PostgresRunStore, RunDefaults, RunStore,
    SearchPipeline, SearchRequest,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "run_search")]
#[command(about = "Paginated search ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or reuse) a paginated search against the upstream API
    Run {
        /// Upstream resource, e.g. PropertySearch
        #[arg(long)]
        endpoint: String,

        /// Filter set as a JSON object
        #[arg(long)]
        filters: Option<String>,

        /// Upstream request method
        #[arg(long, value_parser = parse_method)]
        method: Option<HttpMethod>,

        #[arg(long)]
        max_records: Option<i64>,

        #[arg(long)]
        page_size: Option<i64>,

        #[arg(long)]
        block_size: Option<usize>,
    },

    /// Reclaim runs stuck in `running` older than a staleness threshold
    Sweep {
        #[arg(long, default_value_t = 60)]
        older_than_mins: i64,
    },
}

fn parse_method(value: &str) -> Result<HttpMethod, String> {
    match value.to_ascii_lowercase().as_str() {
        "get" => Ok(HttpMethod::Get),
        "post" => Ok(HttpMethod::Post),
        other => Err(format!("unknown method '{other}', expected get or post")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,search_ingest=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let runs = Arc::new(PostgresRunStore::new(pool));

    match cli.command {
        Commands::Run {
            endpoint,
            filters,
            method,
            max_records,
            page_size,
            block_size,
        } => {
            let filters = filters
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--filters must be valid JSON")?;

            let fetcher = HttpPageFetcher::new(
                config.search_api_base_url.clone(),
                config.search_api_key.clone(),
            )?;
            let blocks = Arc::new(FsBlockStore::new(config.block_store_dir.clone()));
            let pipeline = SearchPipeline::new(
                config.search_api_source.clone(),
                fetcher,
                runs,
                blocks,
            )
            .with_defaults(RunDefaults::default());

            let summary = pipeline
                .run_paginated_search(SearchRequest {
                    endpoint,
                    method,
                    filters,
                    page_param: None,
                    limit_param: None,
                    max_records,
                    block_size,
                    page_size,
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Sweep { older_than_mins } => {
            let reclaimed = runs
                .reclaim_stale(chrono::Duration::minutes(older_than_mins))
                .await?;
            println!("reclaimed {reclaimed} stale runs");
        }
    }

    Ok(())
}
