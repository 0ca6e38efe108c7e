//! Chunked extraction driver.
//!
//! Counts the source table, plans row-range chunks, fetches them with
//! bounded concurrency, and concatenates the non-empty batches in chunk order.
//! The first empty batch ends the run.

use std::fmt;
use std::num::{NonZeroU64, NonZeroUsize};

use arrow::record_batch::RecordBatch;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::chunk::plan_chunks;
use crate::error::{ExtractError, Result};
use crate::source::ChunkSource;
use crate::table::UnifiedTable;

/// Default rows per chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 100_000;

/// What to do when a chunk comes back empty, i.e. the source holds fewer
/// rows than its count reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EarlyStopPolicy {
    /// Finish with the rows gathered so far and log the shortfall.
    #[default]
    Accept,
    /// Fail the run with [`ExtractError::PartialResult`].
    Strict,
}

/// Tuning for one extraction run.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionOptions {
    pub chunk_size: NonZeroU64,
    /// Maximum chunk fetches in flight. `1` fetches strictly in sequence.
    pub concurrency: NonZeroUsize,
    pub early_stop: EarlyStopPolicy,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroU64::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroU64::MIN),
            concurrency: NonZeroUsize::MIN,
            early_stop: EarlyStopPolicy::Accept,
        }
    }
}

/// Driver states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPhase {
    Planning,
    Fetching { chunk: usize },
    Accumulating { chunk: usize },
    Concatenating,
    Complete,
    Failed,
}

impl fmt::Display for ExtractionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionPhase::Planning => write!(f, "planning"),
            ExtractionPhase::Fetching { chunk } => write!(f, "fetching[{}]", chunk),
            ExtractionPhase::Accumulating { chunk } => write!(f, "accumulating[{}]", chunk),
            ExtractionPhase::Concatenating => write!(f, "concatenating"),
            ExtractionPhase::Complete => write!(f, "complete"),
            ExtractionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Counters describing how a run went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub source: String,
    /// Row count reported by the source during planning.
    pub total_rows: u64,
    pub planned_chunks: usize,
    /// Non-empty chunks accumulated.
    pub fetched_chunks: usize,
    pub gathered_rows: u64,
    /// An empty chunk ended the run.
    pub stopped_early: bool,
}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub table: UnifiedTable,
    pub report: ExtractionReport,
}

/// Runs the plan → fetch → accumulate → concatenate loop against a
/// [`ChunkSource`]. Holds no state between runs.
#[derive(Debug, Clone, Default)]
pub struct ExtractionDriver {
    options: ExtractionOptions,
}

impl ExtractionDriver {
    pub fn new(options: ExtractionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Extract the whole table behind `source`.
    pub async fn run<S>(&self, source: &S) -> Result<Extraction>
    where
        S: ChunkSource + ?Sized,
    {
        let mut phase = ExtractionPhase::Planning;
        let mut report = ExtractionReport {
            source: source.name(),
            ..Default::default()
        };

        match self.run_phases(source, &mut phase, &mut report).await {
            Ok(table) => {
                transition(&mut phase, ExtractionPhase::Complete);
                info!(
                    "ExtractionDriver: source='{}' complete, rows={}, chunks={}/{}",
                    report.source, report.gathered_rows, report.fetched_chunks, report.planned_chunks
                );
                Ok(Extraction { table, report })
            }
            Err(e) => {
                warn!(
                    "ExtractionDriver: source='{}' failed during {}: {}",
                    report.source, phase, e
                );
                transition(&mut phase, ExtractionPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run_phases<S>(
        &self,
        source: &S,
        phase: &mut ExtractionPhase,
        report: &mut ExtractionReport,
    ) -> Result<UnifiedTable>
    where
        S: ChunkSource + ?Sized,
    {
        let total_rows = source.count_rows().await?;
        let plan = plan_chunks(total_rows, self.options.chunk_size);
        report.total_rows = total_rows;
        report.planned_chunks = plan.chunk_count();

        info!(
            "ExtractionDriver: source='{}', rows={}, chunk_size={}, chunks={}, concurrency={}",
            report.source,
            total_rows,
            self.options.chunk_size,
            report.planned_chunks,
            self.options.concurrency
        );

        if total_rows == 0 {
            transition(phase, ExtractionPhase::Concatenating);
            let schema = source.describe().await?;
            return Ok(UnifiedTable::empty(schema));
        }

        // `buffered` yields in chunk-index order whatever the completion order.
        let mut fetches = stream::iter(plan)
            .map(move |range| async move { (range, source.fetch_chunk(range).await) })
            .buffered(self.options.concurrency.get());

        let mut buffer: Vec<RecordBatch> = Vec::with_capacity(report.planned_chunks);
        let mut empty_at: Option<usize> = None;

        while let Some((range, fetched)) = fetches.next().await {
            transition(phase, ExtractionPhase::Fetching { chunk: range.index });
            let batch = fetched?;
            debug!(
                "ExtractionDriver: chunk {} [{}, {}) returned {} rows",
                range.index,
                range.lower,
                range.upper,
                batch.num_rows()
            );

            if batch.num_rows() == 0 {
                empty_at = Some(range.index);
                break;
            }

            transition(phase, ExtractionPhase::Accumulating { chunk: range.index });
            report.gathered_rows += batch.num_rows() as u64;
            report.fetched_chunks += 1;
            buffer.push(batch);
        }
        // Cancels any fetches still in flight past an empty chunk.
        drop(fetches);

        transition(phase, ExtractionPhase::Concatenating);

        let Some(first) = buffer.first() else {
            return Err(ExtractError::EmptyResult {
                expected: total_rows,
            });
        };

        // Every planned chunk starts below `total_rows`, so an empty one means
        // the source holds fewer rows than it reported.
        report.stopped_early = empty_at.is_some();
        if report.stopped_early {
            match self.options.early_stop {
                EarlyStopPolicy::Strict => {
                    return Err(ExtractError::PartialResult {
                        expected: total_rows,
                        gathered: report.gathered_rows,
                    });
                }
                EarlyStopPolicy::Accept => {
                    warn!(
                        "ExtractionDriver: source='{}' exhausted early at chunk {:?}, expected={} gathered={}",
                        report.source, empty_at, total_rows, report.gathered_rows
                    );
                }
            }
        }

        let schema = first.schema();
        UnifiedTable::concat(schema, &buffer)
    }
}

fn transition(phase: &mut ExtractionPhase, next: ExtractionPhase) {
    debug!("ExtractionDriver: {} -> {}", phase, next);
    *phase = next;
}
