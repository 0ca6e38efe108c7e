//! Tidepool Connectors - sources and stores
//!
//! - BigQuery over REST v2: chunked reads and bulk export
//! - PostgreSQL chunked reads (sqlx)
//! - JSON REST APIs: card catalogue, creature collection, Reddit
//! - object stores for landing destinations (local, S3, GCS)

pub mod bigquery;
pub mod bigquery_chunked;
pub mod bigquery_export;
pub mod bigquery_types;
pub mod cards;
pub mod creatures;
pub mod error;
pub mod postgres;
pub mod reddit;
pub mod rest_json;
pub mod store;

pub use bigquery::{BigQueryClient, BigQueryConfig, Credentials};
pub use bigquery_chunked::BigQueryChunkSource;
pub use bigquery_export::{BigQueryExporter, ExportedTable};
pub use cards::CardApi;
pub use creatures::CreatureApi;
pub use error::ConnectorError;
pub use postgres::PostgresChunkSource;
pub use reddit::{RedditClient, RedditConfig, RedditPost};
pub use store::{open_destination, parse_location, Destination, GcsConfig, LocationUri, S3Config};
