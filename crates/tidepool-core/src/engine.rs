//! Query engine for reading landed and exported Parquet back.

use std::sync::Arc;

use datafusion::error::Result as DFResult;
use datafusion::prelude::*;
use object_store::ObjectStore;
use tracing::info;
use url::Url;

use crate::error::{ExtractError, Result};
use crate::table::UnifiedTable;
use crate::udf;

/// Reads landed and exported Parquet back into Arrow, with `card_category`
/// available to ad-hoc queries.
pub struct LandingEngine {
    ctx: SessionContext,
}

impl LandingEngine {
    pub fn new() -> Self {
        let ctx = SessionContext::new();
        udf::register_landing_udfs(&ctx);
        info!("LandingEngine: session ready, udfs=[card_category]");
        Self { ctx }
    }

    /// Make `store` reachable for URLs under `base` (e.g. `gs://bucket`).
    pub fn register_object_store(&self, base: &str, store: Arc<dyn ObjectStore>) -> Result<()> {
        let url = Url::parse(base).map_err(|e| {
            ExtractError::Config(format!("invalid object store URL '{}': {}", base, e))
        })?;
        self.ctx.register_object_store(&url, store);
        Ok(())
    }

    /// Expose a landed file or table directory under `table_name` for SQL.
    pub async fn register_parquet(&self, table_name: &str, path: &str) -> DFResult<()> {
        self.ctx
            .register_parquet(table_name, path, ParquetReadOptions::default())
            .await
    }

    /// Plan `query` over the registered artifacts.
    pub async fn sql(&self, query: &str) -> DFResult<DataFrame> {
        self.ctx.sql(query).await
    }

    /// Scan every Parquet file under `path` and collect it into one table.
    pub async fn read_parquet_table(&self, path: &str) -> Result<UnifiedTable> {
        let df = self
            .ctx
            .read_parquet(path, ParquetReadOptions::default())
            .await?;
        let schema = Arc::new(df.schema().as_arrow().clone());
        let batches = df.collect().await?;
        let table = UnifiedTable::from_batches(schema, batches)?;
        info!(
            "LandingEngine: read {} rows x {} columns from {}",
            table.num_rows(),
            table.num_columns(),
            path
        );
        Ok(table)
    }
}

impl Default for LandingEngine {
    fn default() -> Self {
        Self::new()
    }
}
