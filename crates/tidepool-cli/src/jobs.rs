//! One function per ingestion job. Each builds its own clients, extracts,
//! and hands the assembled table to the loader once.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use chrono::Utc;
use tidepool_connectors::cards::{CARDS_DATASET, CARDS_TABLE};
use tidepool_connectors::creatures::CREATURES_DATASET;
use tidepool_connectors::reddit::{posts_to_record_batch, REDDIT_DATASET, REDDIT_TABLE};
use tidepool_connectors::{
    BigQueryChunkSource, BigQueryClient, BigQueryExporter, CardApi, CreatureApi, GcsConfig,
    LocationUri, PostgresChunkSource, RedditClient,
};
use tidepool_core::{
    ChunkSource, EarlyStopPolicy, ExtractionDriver, ExtractionOptions, LandingEngine, RecordBatch,
    TableRef, UnifiedTable,
};
use tidepool_loader::{LoadInfo, LoadRequest, Loader, WriteDisposition};
use tracing::{info, warn};

use crate::config::TidepoolConfig;

/// Pool size for Postgres sources; one connection per in-flight chunk.
const PG_MAX_CONNECTIONS: u32 = 8;

/// Where a chunked extraction reads from.
#[derive(Debug, Clone)]
pub enum WarehouseSource {
    BigQuery(TableRef),
    /// `postgres://…?table=name`
    Postgres(String),
}

#[derive(Debug, Clone)]
pub struct ChunkedArgs {
    pub source: WarehouseSource,
    pub order_by: Vec<String>,
    pub options: ExtractionOptions,
    /// Landing dataset; defaults to the source's own dataset.
    pub dataset: Option<String>,
}

/// Connections opened for one warehouse run. Dropped or closed before the
/// job returns, whatever the outcome.
enum WarehouseContext {
    BigQuery(BigQueryChunkSource),
    Postgres(PostgresChunkSource),
}

impl WarehouseContext {
    async fn open(config: &TidepoolConfig, args: &ChunkedArgs) -> Result<Self> {
        match &args.source {
            WarehouseSource::BigQuery(table) => {
                let client = BigQueryClient::connect(config.bigquery(&table.project)?)
                    .await
                    .context("Failed to connect to BigQuery")?;
                let source = BigQueryChunkSource::new(Arc::new(client), table.clone())
                    .with_order_by(args.order_by.clone());
                Ok(WarehouseContext::BigQuery(source))
            }
            WarehouseSource::Postgres(uri) => {
                let max_connections =
                    (args.options.concurrency.get() as u32).min(PG_MAX_CONNECTIONS);
                let source =
                    PostgresChunkSource::from_uri(uri, args.order_by.clone(), max_connections)
                        .await
                        .context("Failed to connect to Postgres source")?;
                Ok(WarehouseContext::Postgres(source))
            }
        }
    }

    fn source(&self) -> &dyn ChunkSource {
        match self {
            WarehouseContext::BigQuery(s) => s,
            WarehouseContext::Postgres(s) => s,
        }
    }

    async fn close(self) {
        if let WarehouseContext::Postgres(source) = self {
            source.close().await;
        }
    }
}

/// Landing dataset and table for a chunked source.
fn landing_names(source: &WarehouseSource, dataset: Option<&str>) -> Result<(String, String)> {
    let (default_dataset, table) = match source {
        WarehouseSource::BigQuery(t) => (t.dataset.clone(), t.table.clone()),
        WarehouseSource::Postgres(uri) => {
            let (_, table) = tidepool_connectors::postgres::parse_source_uri(uri)
                .context("Invalid Postgres source URI")?;
            ("postgres".to_string(), table)
        }
    };
    Ok((dataset.map(str::to_string).unwrap_or(default_dataset), table))
}

fn open_loader(config: &TidepoolConfig) -> Result<Loader> {
    let loader = Loader::open(&config.landing_url)
        .with_context(|| format!("Failed to open landing destination {}", config.landing_url))?;
    Ok(loader.with_file_max_rows(config.file_max_rows))
}

fn report_load(info: &LoadInfo) {
    info!(
        "Load {} complete: {}.{} rows={} files={} -> {}",
        info.load_id,
        info.dataset,
        info.table,
        info.rows,
        info.files.len(),
        info.destination
    );
}

/// Chunked extraction from BigQuery or Postgres, then load.
pub async fn warehouse_chunked(config: &TidepoolConfig, args: ChunkedArgs) -> Result<LoadInfo> {
    let (dataset, table) = landing_names(&args.source, args.dataset.as_deref())?;
    let loader = open_loader(config)?;

    let context = WarehouseContext::open(config, &args).await?;
    let driver = ExtractionDriver::new(args.options);
    let extraction = driver.run(context.source()).await;
    context.close().await;

    let extraction = extraction.context("Chunked extraction failed")?;
    if extraction.report.stopped_early {
        warn!(
            "Source shrank during extraction: expected {} rows, landing {}",
            extraction.report.total_rows, extraction.report.gathered_rows
        );
    }

    let request = LoadRequest::new("warehouse_chunked", dataset, table);
    let info = loader
        .load(&extraction.table, &request)
        .await
        .context("Failed to land extracted table")?;
    report_load(&info);
    Ok(info)
}

/// Bulk export to GCS, read the shards back, then load.
pub async fn warehouse_export(
    config: &TidepoolConfig,
    table: TableRef,
    bucket: &str,
    dataset: Option<String>,
) -> Result<LoadInfo> {
    let loader = open_loader(config)?;
    let client = BigQueryClient::connect(config.bigquery(&table.project)?)
        .await
        .context("Failed to connect to BigQuery")?;
    let exporter = BigQueryExporter::new(Arc::new(client), GcsConfig::from_env());

    let exported = exporter
        .export(&table, bucket)
        .await
        .context("BigQuery export job failed")?;
    info!("Exported {} to {}", table, exported.prefix_url);

    let engine = LandingEngine::new();
    let unified = exporter
        .read_exported(&engine, &exported)
        .await
        .context("Failed to read exported shards")?;

    let dataset = dataset.unwrap_or_else(|| table.dataset.clone());
    let request = LoadRequest::new("warehouse_export", dataset, table.table.clone());
    let info = loader
        .load(&unified, &request)
        .await
        .context("Failed to land exported table")?;
    report_load(&info);
    Ok(info)
}

fn single_batch(batch: RecordBatch) -> Result<UnifiedTable> {
    Ok(UnifiedTable::from_batches(batch.schema(), vec![batch])?)
}

pub async fn cards(config: &TidepoolConfig) -> Result<LoadInfo> {
    let loader = open_loader(config)?;
    let api = CardApi::new(reqwest::Client::new());
    let batch = api
        .fetch_all_cards(Utc::now())
        .await
        .context("Failed to fetch card catalogue")?;

    let request = LoadRequest::new("yugioh_pipeline", CARDS_DATASET, CARDS_TABLE);
    let info = loader
        .load(&single_batch(batch)?, &request)
        .await
        .context("Failed to land cards")?;
    report_load(&info);
    Ok(info)
}

/// One `Replace` load per resource. A failed probe is logged only.
pub async fn creatures(config: &TidepoolConfig, resources: &[String]) -> Result<Vec<LoadInfo>> {
    let loader = open_loader(config)?;
    let api = CreatureApi::new(reqwest::Client::new());
    if let Some(err) = api.check_connection().await {
        warn!("Creature API probe failed, continuing: {}", err);
    }

    let mut loads = Vec::with_capacity(resources.len());
    for resource in resources {
        let batch = api
            .fetch_resource(resource)
            .await
            .with_context(|| format!("Failed to fetch resource '{}'", resource))?;
        let request = LoadRequest::new("pokemon_pipeline", CREATURES_DATASET, resource.as_str())
            .with_disposition(WriteDisposition::Replace);
        let info = loader
            .load(&single_batch(batch)?, &request)
            .await
            .with_context(|| format!("Failed to land resource '{}'", resource))?;
        report_load(&info);
        loads.push(info);
    }
    Ok(loads)
}

pub async fn reddit(config: &TidepoolConfig, top_n: usize, post_limit: usize) -> Result<LoadInfo> {
    let loader = open_loader(config)?;
    let client = RedditClient::connect(&config.reddit()?)
        .await
        .context("Failed to authenticate with Reddit")?;
    let posts = client
        .top_subreddit_posts(top_n, post_limit)
        .await
        .context("Failed to fetch Reddit posts")?;
    info!("Fetched {} posts from {} subreddits", posts.len(), top_n);

    let batch = posts_to_record_batch(&posts)?;
    let request = LoadRequest::new("reddit_pipeline", REDDIT_DATASET, REDDIT_TABLE);
    let info = loader
        .load(&single_batch(batch)?, &request)
        .await
        .context("Failed to land Reddit posts")?;
    report_load(&info);
    Ok(info)
}

/// Table name artifacts are registered under for `inspect`.
pub const ARTIFACT_TABLE: &str = "artifact";

/// Register a landed Parquet file or directory as `artifact` and run `sql`
/// (or a `LIMIT` preview) over it.
pub async fn inspect_batches(
    uri: &str,
    limit: usize,
    sql: Option<&str>,
) -> Result<Vec<RecordBatch>> {
    let engine = LandingEngine::new();
    let location = tidepool_connectors::parse_location(uri)?;
    let path = match &location {
        LocationUri::Local(path) => path.display().to_string(),
        LocationUri::Memory => anyhow::bail!("cannot inspect an in-memory destination"),
        LocationUri::Bucket { scheme, bucket, .. } => {
            let store = tidepool_connectors::store::open_bucket(*scheme, bucket)?;
            if let Some(base) = location.bucket_url() {
                engine.register_object_store(&base, store)?;
            }
            uri.to_string()
        }
    };

    engine
        .register_parquet(ARTIFACT_TABLE, &path)
        .await
        .with_context(|| format!("Failed to register {}", uri))?;

    let query = match sql {
        Some(q) => q.to_string(),
        None => format!("SELECT * FROM {} LIMIT {}", ARTIFACT_TABLE, limit),
    };
    let df = engine
        .sql(&query)
        .await
        .with_context(|| format!("Invalid query: {}", query))?;
    Ok(df.collect().await?)
}

pub async fn inspect(uri: &str, limit: usize, sql: Option<&str>) -> Result<()> {
    let batches = inspect_batches(uri, limit, sql).await?;
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    let columns = batches.first().map(|b| b.num_columns()).unwrap_or(0);

    println!("{}", pretty_format_batches(&batches)?);
    println!("Shape: ({}, {})", rows, columns);
    Ok(())
}

/// Turn `--strict` into the driver's early-stop policy.
pub fn early_stop(strict: bool) -> EarlyStopPolicy {
    if strict {
        EarlyStopPolicy::Strict
    } else {
        EarlyStopPolicy::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn config_for(landing: &str) -> TidepoolConfig {
        let _lock = crate::config::ENV_LOCK.lock().unwrap();
        let mut config = TidepoolConfig::from_env().unwrap();
        config.landing_url = landing.to_string();
        config
    }

    #[test]
    fn test_landing_names_default_to_source() {
        let source = WarehouseSource::BigQuery(TableRef::new("p", "lake", "orders"));
        assert_eq!(
            landing_names(&source, None).unwrap(),
            ("lake".to_string(), "orders".to_string())
        );
        assert_eq!(
            landing_names(&source, Some("raw")).unwrap(),
            ("raw".to_string(), "orders".to_string())
        );

        let pg = WarehouseSource::Postgres("postgres://u:p@localhost/db?table=events".into());
        assert_eq!(
            landing_names(&pg, None).unwrap(),
            ("postgres".to_string(), "events".to_string())
        );
    }

    #[test]
    fn test_early_stop_from_flag() {
        assert_eq!(early_stop(true), EarlyStopPolicy::Strict);
        assert_eq!(early_stop(false), EarlyStopPolicy::Accept);
    }

    #[tokio::test]
    async fn test_inspect_landed_table() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path().to_str().unwrap());
        let loader = open_loader(&config).unwrap();

        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("type", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![
                    "Effect Monster",
                    "Spell Card",
                    "Trap Card",
                ])),
            ],
        )
        .unwrap();
        let request = LoadRequest::new("test", "yugioh_api", "yugioh_cards");
        loader.load(&single_batch(batch).unwrap(), &request).await.unwrap();

        let dir = tmp.path().join("yugioh_api").join("yugioh_cards");
        let uri = format!("{}/", dir.display());

        let preview = inspect_batches(&uri, 2, None).await.unwrap();
        let rows: usize = preview.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);

        let categories = inspect_batches(
            &uri,
            20,
            Some("SELECT card_category(type) AS c FROM artifact ORDER BY id"),
        )
        .await
        .unwrap();
        let col = categories[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(col.value(0), "Monster");
        assert_eq!(col.value(2), "Trap");
    }

    #[tokio::test]
    async fn test_inspect_rejects_memory_uri() {
        assert!(inspect_batches("memory://", 5, None).await.is_err());
    }
}
