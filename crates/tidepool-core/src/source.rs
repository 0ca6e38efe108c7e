//! The seam between the extraction driver and a concrete warehouse.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use crate::chunk::ChunkRange;
use crate::error::Result;

/// A table that can be paged through by stable row ordinal.
///
/// Each method performs one round-trip to the source. Implementations do
/// not retry; transport failures surface as
/// [`ExtractError::SourceUnavailable`](crate::ExtractError::SourceUnavailable).
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> String;

    /// Arrow schema of the rows `fetch_chunk` returns.
    async fn describe(&self) -> Result<SchemaRef>;

    /// Current row count of the table.
    async fn count_rows(&self) -> Result<u64>;

    /// Rows whose ordinal falls in `[range.lower, range.upper)`, in ordinal
    /// order. May be empty.
    async fn fetch_chunk(&self, range: ChunkRange) -> Result<RecordBatch>;
}
