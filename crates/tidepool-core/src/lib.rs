//! Tidepool Core - chunked extraction and the read-back engine
//!
//! This crate provides the pieces every ingestion job shares:
//! - the row-range chunk planner and the extraction driver
//! - the `ChunkSource` seam warehouses implement
//! - the DataFusion engine used to read Parquet artifacts back

pub mod chunk;
pub mod driver;
pub mod engine;
pub mod error;
pub mod source;
pub mod table;
pub mod table_ref;
pub mod udf;

pub use chunk::{plan_chunks, ChunkPlan, ChunkRange};
pub use driver::{
    EarlyStopPolicy, Extraction, ExtractionDriver, ExtractionOptions, ExtractionPhase,
    ExtractionReport, DEFAULT_CHUNK_SIZE,
};
pub use engine::LandingEngine;
pub use error::ExtractError;
pub use source::ChunkSource;
pub use table::UnifiedTable;
pub use table_ref::TableRef;

// Re-export for downstream consumers
pub use arrow::record_batch::RecordBatch;
