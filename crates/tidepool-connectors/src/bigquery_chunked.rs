//! Row-range chunked reads of a BigQuery table.
//!
//! BigQuery has no stable physical row order, so each chunk numbers the rows
//! with `ROW_NUMBER()` over a deterministic ordering and keeps one ordinal
//! window.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use tidepool_core::{ChunkRange, ChunkSource, ExtractError, TableRef};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::bigquery::BigQueryClient;
use crate::bigquery_types::{arrow_schema, rows_to_record_batch};
use crate::error::ConnectorError;

const ORDINAL_COLUMN: &str = "__tidepool_ordinal";

/// Quote a column name as a BigQuery identifier.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "\\`"))
}

/// `SELECT COUNT(*)` for the table.
pub fn count_sql(table: &TableRef) -> String {
    format!("SELECT COUNT(*) AS row_count FROM {}", table.quoted())
}

/// Query returning the rows whose ordinal falls in `range`.
///
/// Without `order_by` columns the whole row's JSON text is the sort key,
/// which is deterministic but slow on wide tables.
pub fn chunk_sql(table: &TableRef, order_by: &[String], range: &ChunkRange) -> String {
    let ordering = if order_by.is_empty() {
        "TO_JSON_STRING(t)".to_string()
    } else {
        order_by
            .iter()
            .map(|c| format!("t.{}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "SELECT * EXCEPT({ord}) FROM (\
         SELECT t.*, ROW_NUMBER() OVER (ORDER BY {ordering}) - 1 AS {ord} \
         FROM {table} AS t) \
         WHERE {ord} >= {lower} AND {ord} < {upper} \
         ORDER BY {ord}",
        ord = ORDINAL_COLUMN,
        ordering = ordering,
        table = table.quoted(),
        lower = range.lower,
        upper = range.upper,
    )
}

/// A BigQuery table read in ordinal chunks.
#[derive(Debug)]
pub struct BigQueryChunkSource {
    client: Arc<BigQueryClient>,
    table: TableRef,
    order_by: Vec<String>,
    schema: OnceCell<SchemaRef>,
}

impl BigQueryChunkSource {
    pub fn new(client: Arc<BigQueryClient>, table: TableRef) -> Self {
        Self {
            client,
            table,
            order_by: Vec::new(),
            schema: OnceCell::new(),
        }
    }

    /// Columns that define the chunk ordering. Should be unique per row.
    pub fn with_order_by(mut self, columns: Vec<String>) -> Self {
        self.order_by = columns;
        self
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    async fn load_schema(&self) -> Result<SchemaRef, ConnectorError> {
        let meta = self.client.table(&self.table).await?;
        let schema = meta.schema.ok_or_else(|| {
            ConnectorError::UnexpectedResponse(format!("table {} has no schema", self.table))
        })?;
        Ok(arrow_schema(&schema))
    }
}

#[async_trait]
impl ChunkSource for BigQueryChunkSource {
    fn name(&self) -> String {
        format!("bigquery:{}", self.table)
    }

    async fn describe(&self) -> Result<SchemaRef, ExtractError> {
        let schema = self
            .schema
            .get_or_try_init(|| self.load_schema())
            .await?;
        Ok(Arc::clone(schema))
    }

    async fn count_rows(&self) -> Result<u64, ExtractError> {
        let result = self.client.query(&count_sql(&self.table)).await?;
        let value = result
            .rows
            .first()
            .and_then(|row| row.f.first())
            .map(|cell| cell.v.clone())
            .ok_or_else(|| ConnectorError::UnexpectedResponse("COUNT(*) returned no rows".into()))?;
        let count = value
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| value.as_u64())
            .ok_or_else(|| {
                ConnectorError::UnexpectedResponse(format!("COUNT(*) returned {}", value))
            })?;
        Ok(count)
    }

    async fn fetch_chunk(&self, range: ChunkRange) -> Result<RecordBatch, ExtractError> {
        let sql = chunk_sql(&self.table, &self.order_by, &range);
        let result = self.client.query(&sql).await?;
        debug!(
            "BigQuery chunk {} of {}: {} rows",
            range.index,
            self.table,
            result.rows.len()
        );

        if result.rows.is_empty() && result.schema.fields.is_empty() {
            return Ok(RecordBatch::new_empty(self.describe().await?));
        }
        Ok(rows_to_record_batch(&result.schema, &result.rows)?)
    }
}
