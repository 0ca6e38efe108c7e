//! Object-store plumbing for landing buckets and warehouse export buckets.
//!
//! A location is a local directory (bare path or `file://`), an
//! `s3://bucket/prefix` or `gs://bucket/prefix` URI, or `memory://` for a
//! throwaway in-process store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use url::Url;

use crate::error::ConnectorError;

/// Configuration for connecting to S3-compatible storage.
///
/// Secrets are redacted in `Debug` output.
#[derive(Clone)]
pub struct S3Config {
    /// AWS region (e.g. "us-east-1")
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Optional custom endpoint URL (for MinIO / LocalStack)
    pub endpoint_url: Option<String>,
    /// Allow HTTP (non-TLS) connections, for local MinIO
    pub allow_http: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("access_key_id", &"***")
            .field("secret_access_key", &"***")
            .field("endpoint_url", &self.endpoint_url)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

impl S3Config {
    /// Build an S3Config from environment variables:
    ///   AWS_REGION, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_ENDPOINT_URL
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID not set")?,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY not set")?,
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            allow_http: std::env::var("AWS_ALLOW_HTTP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}

/// Credentials for Google Cloud Storage.
#[derive(Debug, Clone, Default)]
pub struct GcsConfig {
    /// Service-account key file. When unset the builder falls back to the
    /// `GOOGLE_*` variables it understands itself.
    pub service_account_path: Option<String>,
}

impl GcsConfig {
    /// Reads BIGQUERY_SERVICE_ACCOUNT_FILE, then GOOGLE_APPLICATION_CREDENTIALS.
    pub fn from_env() -> Self {
        Self {
            service_account_path: std::env::var("BIGQUERY_SERVICE_ACCOUNT_FILE")
                .or_else(|_| std::env::var("GOOGLE_APPLICATION_CREDENTIALS"))
                .ok(),
        }
    }
}

/// Where a location lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScheme {
    Local,
    S3,
    Gcs,
}

impl StoreScheme {
    fn prefix(&self) -> &'static str {
        match self {
            StoreScheme::Local => "file",
            StoreScheme::S3 => "s3",
            StoreScheme::Gcs => "gs",
        }
    }
}

/// A parsed location URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationUri {
    Local(PathBuf),
    Memory,
    Bucket {
        scheme: StoreScheme,
        bucket: String,
        /// Key prefix inside the bucket, without leading or trailing slashes.
        prefix: String,
    },
}

impl LocationUri {
    /// `scheme://bucket`, the base URL a query engine registers the store under.
    pub fn bucket_url(&self) -> Option<String> {
        match self {
            LocationUri::Local(_) | LocationUri::Memory => None,
            LocationUri::Bucket { scheme, bucket, .. } => {
                Some(format!("{}://{}", scheme.prefix(), bucket))
            }
        }
    }
}

/// Parse a location into its scheme, bucket and key prefix.
pub fn parse_location(uri: &str) -> Result<LocationUri, ConnectorError> {
    let Some((scheme, _)) = uri.split_once("://") else {
        return Ok(LocationUri::Local(PathBuf::from(uri)));
    };
    let url =
        Url::parse(uri).map_err(|e| ConnectorError::UnsupportedUri(format!("{}: {}", uri, e)))?;

    let scheme = match scheme {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| ConnectorError::UnsupportedUri(format!("{}: not a local path", uri)))?;
            return Ok(LocationUri::Local(path));
        }
        "memory" => return Ok(LocationUri::Memory),
        "s3" | "s3a" => StoreScheme::S3,
        "gs" => StoreScheme::Gcs,
        other => {
            return Err(ConnectorError::UnsupportedUri(format!(
                "{}: scheme '{}' is not one of file, s3, gs, memory",
                uri, other
            )))
        }
    };

    let bucket = url
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ConnectorError::UnsupportedUri(format!("{}: missing bucket", uri)))?
        .to_string();
    let prefix = url.path().trim_matches('/').to_string();
    Ok(LocationUri::Bucket {
        scheme,
        bucket,
        prefix,
    })
}

/// Build the store for an S3 bucket.
pub fn build_s3_store(config: &S3Config, bucket: &str) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
    let mut builder = AmazonS3Builder::new()
        .with_region(&config.region)
        .with_bucket_name(bucket)
        .with_access_key_id(&config.access_key_id)
        .with_secret_access_key(&config.secret_access_key);

    if let Some(ref endpoint) = config.endpoint_url {
        builder = builder.with_endpoint(endpoint);
    }
    if config.allow_http {
        builder = builder.with_allow_http(true);
    }

    let store = builder.build().map_err(|e| {
        ConnectorError::ConfigError(format!("failed to build S3 object store: {}", e))
    })?;
    Ok(Arc::new(store))
}

/// Build the store for a GCS bucket.
pub fn build_gcs_store(config: &GcsConfig, bucket: &str) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
    let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
    if let Some(ref path) = config.service_account_path {
        builder = builder.with_service_account_path(path);
    }
    let store = builder.build().map_err(|e| {
        ConnectorError::ConfigError(format!("failed to build GCS object store: {}", e))
    })?;
    Ok(Arc::new(store))
}

/// Open the bucket behind a remote location, reading credentials from the
/// environment.
pub fn open_bucket(scheme: StoreScheme, bucket: &str) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
    match scheme {
        StoreScheme::S3 => {
            let config =
                S3Config::from_env().map_err(|e| ConnectorError::ConfigError(e.to_string()))?;
            build_s3_store(&config, bucket)
        }
        StoreScheme::Gcs => build_gcs_store(&GcsConfig::from_env(), bucket),
        StoreScheme::Local => Err(ConnectorError::UnsupportedUri(format!(
            "{}: local paths have no bucket",
            bucket
        ))),
    }
}

/// A writable store and the key prefix inside it.
#[derive(Debug, Clone)]
pub struct Destination {
    pub store: Arc<dyn ObjectStore>,
    pub prefix: ObjectPath,
    /// The URI the destination was opened from, for logs and load records.
    pub url: String,
}

/// Open a landing destination. Local directories are created if missing.
pub fn open_destination(uri: &str) -> Result<Destination, ConnectorError> {
    match parse_location(uri)? {
        LocationUri::Local(dir) => {
            std::fs::create_dir_all(&dir).map_err(|e| {
                ConnectorError::ConfigError(format!("cannot create {}: {}", dir.display(), e))
            })?;
            let store = LocalFileSystem::new_with_prefix(&dir)?;
            Ok(Destination {
                store: Arc::new(store),
                prefix: ObjectPath::default(),
                url: uri.to_string(),
            })
        }
        LocationUri::Memory => Ok(Destination {
            store: Arc::new(InMemory::new()),
            prefix: ObjectPath::default(),
            url: uri.to_string(),
        }),
        LocationUri::Bucket {
            scheme,
            bucket,
            prefix,
        } => Ok(Destination {
            store: open_bucket(scheme, &bucket)?,
            prefix: ObjectPath::from(prefix.as_str()),
            url: uri.to_string(),
        }),
    }
}
