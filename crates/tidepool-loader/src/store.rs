//! Partitioned Parquet loader

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tidepool_connectors::Destination;
use tidepool_core::{ExtractError, UnifiedTable};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::schema::{LoadInfo, LoadRequest, WriteDisposition};

/// Rows per data file unless configured otherwise.
pub const DEFAULT_FILE_MAX_ROWS: usize = 1_000_000;

/// Directory under each dataset holding load records.
pub const LOADS_DIR: &str = "_loads";

/// Writes unified tables into a destination as Parquet files.
pub struct Loader {
    store: Arc<dyn ObjectStore>,
    prefix: ObjectPath,
    url: String,
    file_max_rows: NonZeroUsize,
}

impl Loader {
    pub fn new(destination: Destination) -> Self {
        Self {
            store: destination.store,
            prefix: destination.prefix,
            url: destination.url,
            file_max_rows: NonZeroUsize::new(DEFAULT_FILE_MAX_ROWS).unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn with_file_max_rows(mut self, rows: NonZeroUsize) -> Self {
        self.file_max_rows = rows;
        self
    }

    /// Open the destination behind `url` (local path, `file://`, `s3://`,
    /// `gs://` or `memory://`).
    pub fn open(url: &str) -> Result<Self, ExtractError> {
        Ok(Self::new(tidepool_connectors::open_destination(url)?))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn table_prefix(&self, request: &LoadRequest) -> ObjectPath {
        self.prefix
            .child(request.dataset.as_str())
            .child(request.table.as_str())
    }

    fn record_path(&self, request: &LoadRequest, load_id: &str) -> ObjectPath {
        self.prefix
            .child(request.dataset.as_str())
            .child(LOADS_DIR)
            .child(format!("{}.json", load_id))
    }

    /// Land `table` in full. Either every data file and the load record are
    /// stored, or this load's files are removed again and the destination is
    /// left as it was. With `Replace`, older files are removed only once the
    /// record is stored.
    pub async fn load(
        &self,
        table: &UnifiedTable,
        request: &LoadRequest,
    ) -> Result<LoadInfo, ExtractError> {
        let mut load = LoadInfo::new(request, &self.url, Utc::now());
        let file_token = file_token();
        let table_prefix = self.table_prefix(request);

        let partitions = table.partitions(self.file_max_rows.get());
        info!(
            "Loader: dataset='{}', table='{}', rows={}, files={}, destination='{}'",
            request.dataset,
            request.table,
            table.num_rows(),
            partitions.len(),
            self.url
        );

        let mut written: Vec<ObjectPath> = Vec::with_capacity(partitions.len());
        for (ordinal, partition) in partitions.iter().enumerate() {
            let path = table_prefix.child(format!("{}.{}.{}.parquet", load.load_id, file_token, ordinal));
            if let Err(e) = self.put_partition(&path, partition).await {
                let msg = format!("writing {}: {}", path, e);
                return Err(self.abort(request, &mut load, &written, msg).await);
            }
            debug!("Loader: wrote {} ({} rows)", path, partition.num_rows());
            load.rows += partition.num_rows() as u64;
            load.files.push(path.to_string());
            written.push(path);
        }

        let stale = match request.disposition {
            WriteDisposition::Append => Vec::new(),
            WriteDisposition::Replace => match self.list_stale(&table_prefix, &written).await {
                Ok(stale) => stale,
                Err(msg) => return Err(self.abort(request, &mut load, &written, msg).await),
            },
        };

        load.complete();
        if let Err(e) = self.write_record(request, &load).await {
            self.roll_back(&written).await;
            return Err(e);
        }

        self.remove_stale(&table_prefix, &stale).await;
        info!(
            "Loader: load_id={} landed {} rows in {} files",
            load.load_id,
            load.rows,
            load.files.len()
        );
        Ok(load)
    }

    /// Remove this load's files and record the load as failed.
    async fn abort(
        &self,
        request: &LoadRequest,
        load: &mut LoadInfo,
        written: &[ObjectPath],
        msg: String,
    ) -> ExtractError {
        self.roll_back(written).await;
        load.files.clear();
        load.rows = 0;
        load.fail(msg.clone());
        if let Err(record_err) = self.write_record(request, load).await {
            warn!("Loader: could not record failed load {}: {}", load.load_id, record_err);
        }
        ExtractError::SinkWriteFailure(msg)
    }

    async fn put_partition(&self, path: &ObjectPath, batch: &RecordBatch) -> Result<(), String> {
        let bytes = encode_parquet(batch).map_err(|e| e.to_string())?;
        self.store
            .put(path, bytes.into())
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn roll_back(&self, written: &[ObjectPath]) {
        for path in written {
            if let Err(e) = self.store.delete(path).await {
                warn!("Loader: could not remove partial file {}: {}", path, e);
            }
        }
    }

    /// Objects under `table_prefix` that this load did not write.
    async fn list_stale(
        &self,
        table_prefix: &ObjectPath,
        keep: &[ObjectPath],
    ) -> Result<Vec<ObjectPath>, String> {
        let keep: HashSet<&ObjectPath> = keep.iter().collect();
        let existing: Vec<ObjectPath> = self
            .store
            .list(Some(table_prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|e| format!("listing {}: {}", table_prefix, e))?;
        Ok(existing.into_iter().filter(|p| !keep.contains(p)).collect())
    }

    /// Delete files superseded by a stored `Replace` load. The load record
    /// already names the current files, so a file left behind is logged, not
    /// fatal.
    async fn remove_stale(&self, table_prefix: &ObjectPath, stale: &[ObjectPath]) {
        let mut removed = 0usize;
        for path in stale {
            match self.store.delete(path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Loader: could not remove replaced file {}: {}", path, e),
            }
        }
        if removed > 0 {
            info!("Loader: replaced {} old files under {}", removed, table_prefix);
        }
    }

    async fn write_record(&self, request: &LoadRequest, load: &LoadInfo) -> Result<(), ExtractError> {
        let path = self.record_path(request, &load.load_id);
        let json = serde_json::to_vec_pretty(load)
            .map_err(|e| ExtractError::SinkWriteFailure(format!("encoding load record: {}", e)))?;
        self.store
            .put(&path, json.into())
            .await
            .map_err(|e| ExtractError::SinkWriteFailure(format!("writing {}: {}", path, e)))?;
        Ok(())
    }
}

/// Ten hex characters distinguishing files of concurrent loads.
fn file_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(10);
    token
}

/// Encode one batch as a SNAPPY-compressed Parquet file.
pub fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>, parquet::errors::ParquetError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_token_shape() {
        let token = file_token();
        assert_eq!(token.len(), 10);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(file_token(), token);
    }

    #[test]
    fn test_encode_parquet_writes_magic() {
        use arrow::array::Int32Array;
        use arrow::datatypes::{DataType, Field, Schema};

        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))]).unwrap();
        let bytes = encode_parquet(&batch).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }
}
