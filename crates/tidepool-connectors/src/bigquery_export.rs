//! Bulk export of a BigQuery table to Parquet shards on GCS, and read-back.

use std::sync::Arc;

use tidepool_core::{ExtractError, LandingEngine, TableRef, UnifiedTable};
use tracing::info;

use crate::bigquery::BigQueryClient;
use crate::error::ConnectorError;
use crate::store::{build_gcs_store, GcsConfig};

/// Where an export job put its shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedTable {
    pub table: TableRef,
    pub bucket: String,
    /// Run-unique directory holding the shards, e.g. `gs://b/path/orders/<run>/`.
    pub prefix_url: String,
    /// The wildcard URI handed to the export job.
    pub destination_uri: String,
    pub job_id: String,
}

/// Split `bucket[/path]` (optionally `gs://`-prefixed) into bucket and path.
fn split_bucket_path(bucket_path: &str) -> Result<(String, String), ConnectorError> {
    let trimmed = bucket_path
        .trim()
        .trim_start_matches("gs://")
        .trim_matches('/');
    let (bucket, path) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    if bucket.is_empty() {
        return Err(ConnectorError::ConfigError(format!(
            "export bucket '{}' has no bucket name",
            bucket_path
        )));
    }
    Ok((bucket.to_string(), path.trim_matches('/').to_string()))
}

/// Shard prefix for one export run. A fresh `run_token` per run keeps shards
/// of earlier exports out of the read-back.
pub fn export_prefix(
    bucket_path: &str,
    table: &TableRef,
    run_token: &str,
) -> Result<(String, String), ConnectorError> {
    let (bucket, path) = split_bucket_path(bucket_path)?;
    let mut prefix = format!("gs://{}/", bucket);
    if !path.is_empty() {
        prefix.push_str(&path);
        prefix.push('/');
    }
    prefix.push_str(&format!("{}/{}/", table.table, run_token));
    Ok((bucket, prefix))
}

pub struct BigQueryExporter {
    client: Arc<BigQueryClient>,
    gcs: GcsConfig,
}

impl BigQueryExporter {
    pub fn new(client: Arc<BigQueryClient>, gcs: GcsConfig) -> Self {
        Self { client, gcs }
    }

    /// Run an extract job for `table` into `bucket_path` and wait for it.
    pub async fn export(
        &self,
        table: &TableRef,
        bucket_path: &str,
    ) -> Result<ExportedTable, ExtractError> {
        let run_token = uuid::Uuid::new_v4().simple().to_string();
        let (bucket, prefix_url) = export_prefix(bucket_path, table, &run_token)?;
        let destination_uri = format!("{}part-*.parquet", prefix_url);

        let job = self
            .client
            .insert_extract_job(table, &destination_uri)
            .await?;
        let done = self.client.wait_for_job(&job.job_reference).await?;
        info!(
            "BigQueryExporter: table='{}' exported to {}",
            table, prefix_url
        );

        Ok(ExportedTable {
            table: table.clone(),
            bucket,
            prefix_url,
            destination_uri,
            job_id: done.job_reference.job_id,
        })
    }

    /// Scan the exported shards through `engine` into one table.
    pub async fn read_exported(
        &self,
        engine: &LandingEngine,
        exported: &ExportedTable,
    ) -> Result<UnifiedTable, ExtractError> {
        let store = build_gcs_store(&self.gcs, &exported.bucket)?;
        engine.register_object_store(&format!("gs://{}", exported.bucket), store)?;
        engine.read_parquet_table(&exported.prefix_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef::new("proj", "analytics", "point_of_interest")
    }

    #[test]
    fn test_export_prefix_with_path() {
        let (bucket, prefix) =
            export_prefix("landnerds/3_data_analytics/poi", &table(), "abc123").unwrap();
        assert_eq!(bucket, "landnerds");
        assert_eq!(
            prefix,
            "gs://landnerds/3_data_analytics/poi/point_of_interest/abc123/"
        );
    }

    #[test]
    fn test_export_prefix_bucket_only() {
        let (bucket, prefix) = export_prefix("gs://exports/", &table(), "r1").unwrap();
        assert_eq!(bucket, "exports");
        assert_eq!(prefix, "gs://exports/point_of_interest/r1/");
    }

    #[test]
    fn test_export_prefix_rejects_empty_bucket() {
        assert!(export_prefix("gs:///", &table(), "r").is_err());
    }
}
