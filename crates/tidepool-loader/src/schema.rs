//! Load request and load record definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a load treats files already under the table prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    /// Keep existing files next to the new ones.
    #[default]
    Append,
    /// Delete every other file under the table prefix once the load is written.
    Replace,
}

/// What to land and where, relative to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Name of the job, recorded in the load record.
    pub pipeline: String,
    pub dataset: String,
    pub table: String,
    pub disposition: WriteDisposition,
}

impl LoadRequest {
    pub fn new(
        pipeline: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            dataset: dataset.into(),
            table: table.into(),
            disposition: WriteDisposition::Append,
        }
    }

    pub fn with_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.disposition = disposition;
        self
    }
}

/// Status of a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Running,
    Completed,
    Failed,
}

/// Record of one load, written as JSON next to the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadInfo {
    /// `{unix_seconds}.{micros}`, shared by every file of the load
    pub load_id: String,

    pub pipeline: String,
    pub dataset: String,
    pub table: String,

    /// Destination URI the load was written to
    pub destination: String,

    pub disposition: WriteDisposition,

    /// Object paths of the data files, in partition order
    pub files: Vec<String>,

    /// Total rows across all files
    pub rows: u64,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub status: LoadStatus,

    /// Failure message, if the load failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadInfo {
    pub fn new(request: &LoadRequest, destination: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            load_id: load_id(started_at),
            pipeline: request.pipeline.clone(),
            dataset: request.dataset.clone(),
            table: request.table.clone(),
            destination: destination.to_string(),
            disposition: request.disposition,
            files: Vec::new(),
            rows: 0,
            started_at,
            completed_at: None,
            status: LoadStatus::Running,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        self.status = LoadStatus::Completed;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.completed_at = Some(Utc::now());
        self.status = LoadStatus::Failed;
        self.error = Some(error.into());
    }
}

/// Load id for a load started at `at`. Sorts in start order.
pub fn load_id(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn started() -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_566_600, 42_000).unwrap()
    }

    #[test]
    fn test_load_id_format() {
        assert_eq!(load_id(started()), "1714566600.000042");
    }

    #[test]
    fn test_load_info_new() {
        let request = LoadRequest::new("cards", "yugioh_api", "yugioh_cards");
        let info = LoadInfo::new(&request, "./landing", started());
        assert_eq!(info.load_id, "1714566600.000042");
        assert_eq!(info.dataset, "yugioh_api");
        assert_eq!(info.disposition, WriteDisposition::Append);
        assert_eq!(info.status, LoadStatus::Running);
        assert!(info.files.is_empty());
        assert!(info.completed_at.is_none());
    }

    #[test]
    fn test_load_info_complete_and_fail() {
        let request = LoadRequest::new("p", "d", "t");
        let mut info = LoadInfo::new(&request, "memory://", started());
        info.complete();
        assert_eq!(info.status, LoadStatus::Completed);
        assert!(info.completed_at.is_some());

        let mut info = LoadInfo::new(&request, "memory://", started());
        info.fail("bucket gone");
        assert_eq!(info.status, LoadStatus::Failed);
        assert_eq!(info.error.as_deref(), Some("bucket gone"));
    }

    #[test]
    fn test_serialization() {
        let request =
            LoadRequest::new("creatures", "pokemon_api", "berry").with_disposition(WriteDisposition::Replace);
        let info = LoadInfo::new(&request, "s3://bucket/raw", started());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["disposition"], "replace");
        assert_eq!(json["status"], "running");
        assert!(json.get("error").is_none());

        let parsed: LoadInfo = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.load_id, info.load_id);
        assert_eq!(parsed.disposition, WriteDisposition::Replace);
    }
}
