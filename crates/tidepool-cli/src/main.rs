//! Tidepool CLI - one-shot ingestion jobs

mod config;
mod jobs;

use std::num::{NonZeroU64, NonZeroUsize};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tidepool_connectors::creatures::DEFAULT_RESOURCES;
use tidepool_core::{ExtractionOptions, TableRef};
use tracing_subscriber::EnvFilter;

use crate::config::TidepoolConfig;
use crate::jobs::{ChunkedArgs, WarehouseSource};

#[derive(Parser)]
#[command(name = "tidepool")]
#[command(about = "Land warehouse tables and API data as Parquet", version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Landing destination: path, file://, s3:// or gs://
    #[arg(long, global = true, env = "LANDING_BUCKET_URL")]
    landing_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a warehouse table
    Warehouse {
        #[command(subcommand)]
        strategy: WarehouseCommand,
    },
    /// Land the full trading-card catalogue
    Cards,
    /// Land creature-collection resources, one table each
    Creatures {
        /// Resource to fetch (repeatable). Defaults to the standard set.
        #[arg(long = "resource")]
        resources: Vec<String>,
    },
    /// Land hot posts from the most popular subreddits
    Reddit {
        #[arg(long, default_value_t = 20)]
        top_n: usize,
        #[arg(long, default_value_t = 50)]
        post_limit: usize,
    },
    /// Preview a landed Parquet file or directory
    Inspect {
        /// Path, file://, s3:// or gs:// URI
        uri: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Query over the table `artifact` instead of a preview
        #[arg(long)]
        sql: Option<String>,
    },
}

#[derive(Subcommand)]
enum WarehouseCommand {
    /// Page through the table in numbered-row chunks
    Chunked {
        /// BigQuery table as project.dataset.table
        #[arg(long, conflicts_with = "source", required_unless_present = "source")]
        table: Option<TableRef>,
        /// Postgres source as postgres://...?table=name
        #[arg(long)]
        source: Option<String>,
        /// Column giving a stable row order (repeatable)
        #[arg(long = "order-by")]
        order_by: Vec<String>,
        /// Rows per chunk, overriding CHUNK_SIZE
        #[arg(long)]
        chunk_size: Option<NonZeroU64>,
        /// Chunk fetches in flight, overriding FETCH_CONCURRENCY
        #[arg(long)]
        concurrency: Option<NonZeroUsize>,
        /// Fail instead of landing a short table when a chunk comes back empty
        #[arg(long)]
        strict: bool,
        /// Landing dataset, defaults to the source dataset
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Export the table to GCS as Parquet and reload it
    Export {
        #[arg(long)]
        table: TableRef,
        /// GCS bucket and optional path, e.g. my-bucket/exports
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        dataset: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let fallback = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    let mut config = TidepoolConfig::from_env()?;
    if let Some(url) = cli.landing_url {
        config.landing_url = url;
    }

    match cli.command {
        Commands::Warehouse { strategy } => match strategy {
            WarehouseCommand::Chunked {
                table,
                source,
                order_by,
                chunk_size,
                concurrency,
                strict,
                dataset,
            } => {
                let source = match (table, source) {
                    (Some(table), _) => WarehouseSource::BigQuery(table),
                    (None, Some(uri)) => WarehouseSource::Postgres(uri),
                    (None, None) => anyhow::bail!("one of --table or --source is required"),
                };
                let options = ExtractionOptions {
                    chunk_size: chunk_size.unwrap_or(config.chunk_size),
                    concurrency: concurrency.unwrap_or(config.fetch_concurrency),
                    early_stop: jobs::early_stop(strict),
                };
                let args = ChunkedArgs {
                    source,
                    order_by,
                    options,
                    dataset,
                };
                jobs::warehouse_chunked(&config, args).await?;
            }
            WarehouseCommand::Export {
                table,
                bucket,
                dataset,
            } => {
                jobs::warehouse_export(&config, table, &bucket, dataset).await?;
            }
        },
        Commands::Cards => {
            jobs::cards(&config).await?;
        }
        Commands::Creatures { resources } => {
            let resources = if resources.is_empty() {
                DEFAULT_RESOURCES.iter().map(|r| r.to_string()).collect()
            } else {
                resources
            };
            jobs::creatures(&config, &resources).await?;
        }
        Commands::Reddit { top_n, post_limit } => {
            jobs::reddit(&config, top_n, post_limit).await?;
        }
        Commands::Inspect { uri, limit, sql } => {
            jobs::inspect(&uri, limit, sql.as_deref()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chunked_bigquery() {
        let cli = Cli::try_parse_from([
            "tidepool",
            "-v",
            "warehouse",
            "chunked",
            "--table",
            "proj.lake.orders",
            "--order-by",
            "id",
            "--order-by",
            "created_at",
            "--chunk-size",
            "5000",
            "--strict",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Warehouse {
            strategy:
                WarehouseCommand::Chunked {
                    table,
                    order_by,
                    chunk_size,
                    strict,
                    ..
                },
        } = cli.command
        else {
            panic!("expected warehouse chunked");
        };
        assert_eq!(table, Some(TableRef::new("proj", "lake", "orders")));
        assert_eq!(order_by, vec!["id", "created_at"]);
        assert_eq!(chunk_size.map(|c| c.get()), Some(5000));
        assert!(strict);
    }

    #[test]
    fn test_chunked_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["tidepool", "warehouse", "chunked"]).is_err());
        assert!(Cli::try_parse_from([
            "tidepool",
            "warehouse",
            "chunked",
            "--table",
            "p.d.t",
            "--source",
            "postgres://localhost/db?table=t",
        ])
        .is_err());
    }

    #[test]
    fn test_rejects_bad_table_ref_and_zero_chunk() {
        assert!(
            Cli::try_parse_from(["tidepool", "warehouse", "chunked", "--table", "d.t"]).is_err()
        );
        assert!(Cli::try_parse_from([
            "tidepool",
            "warehouse",
            "chunked",
            "--table",
            "p.d.t",
            "--chunk-size",
            "0",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_reddit_defaults() {
        let cli = Cli::try_parse_from(["tidepool", "reddit"]).unwrap();
        let Commands::Reddit { top_n, post_limit } = cli.command else {
            panic!("expected reddit");
        };
        assert_eq!((top_n, post_limit), (20, 50));
    }
}
