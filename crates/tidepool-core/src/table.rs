//! The concatenated result of one extraction run.

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::error::Result;

/// All rows gathered by one run, under a single schema.
#[derive(Debug, Clone)]
pub struct UnifiedTable {
    schema: SchemaRef,
    batch: RecordBatch,
}

impl UnifiedTable {
    /// Concatenate `batches` in order. Batch order and intra-batch row order
    /// are preserved.
    pub fn concat(schema: SchemaRef, batches: &[RecordBatch]) -> Result<Self> {
        let batch = concat_batches(&schema, batches)?;
        Ok(Self { schema, batch })
    }

    /// A zero-row table with the given schema.
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            batch: RecordBatch::new_empty(schema.clone()),
            schema,
        }
    }

    /// Wrap batches that are already known to share a schema. Schema is taken
    /// from the first batch; an empty slice gives a table with `fallback`.
    pub fn from_batches(fallback: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .unwrap_or(fallback);
        Self::concat(schema, &batches)
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Split into consecutive slices of at most `max_rows` rows.
    ///
    /// An empty table yields one empty slice so its schema can still be
    /// written.
    pub fn partitions(&self, max_rows: usize) -> Vec<RecordBatch> {
        let max_rows = max_rows.max(1);
        if self.batch.num_rows() == 0 {
            return vec![self.batch.clone()];
        }
        let mut slices = Vec::with_capacity(self.batch.num_rows().div_ceil(max_rows));
        let mut offset = 0;
        while offset < self.batch.num_rows() {
            let len = max_rows.min(self.batch.num_rows() - offset);
            slices.push(self.batch.slice(offset, len));
            offset += len;
        }
        slices
    }
}
