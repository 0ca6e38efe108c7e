//! Tidepool Loader - lands unified tables as Parquet
//!
//! Files go to `{dataset}/{table}/{load_id}.{file_token}.{ordinal}.parquet`
//! under the destination, with a JSON load record in `{dataset}/_loads/`.

pub mod schema;
pub mod store;

pub use schema::{LoadInfo, LoadRequest, LoadStatus, WriteDisposition};
pub use store::{encode_parquet, Loader, DEFAULT_FILE_MAX_ROWS};
