//! Runtime configuration from environment variables.

use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tidepool_connectors::bigquery::{DEFAULT_API_BASE, DEFAULT_LOCATION};
use tidepool_connectors::reddit::DEFAULT_USER_AGENT;
use tidepool_connectors::{BigQueryConfig, Credentials, RedditConfig};
use tidepool_core::DEFAULT_CHUNK_SIZE;
use tidepool_loader::DEFAULT_FILE_MAX_ROWS;

#[derive(Debug, Clone)]
pub struct TidepoolConfig {
    /// Landing destination: local path, `file://`, `s3://` or `gs://`.
    pub landing_url: String,
    pub chunk_size: NonZeroU64,
    pub fetch_concurrency: NonZeroUsize,
    pub file_max_rows: NonZeroUsize,
    /// Billing project for BigQuery jobs.
    pub bigquery_project: Option<String>,
    pub bigquery_location: String,
    pub bigquery_api_base: String,
    pub service_account_file: Option<PathBuf>,
    pub access_token: Option<String>,
    pub reddit_client_id: Option<String>,
    pub reddit_secret: Option<String>,
    pub reddit_user_agent: String,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", key))
}

impl TidepoolConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            landing_url: std::env::var("LANDING_BUCKET_URL")
                .unwrap_or_else(|_| "./landing".to_string()),
            chunk_size: parse_env("CHUNK_SIZE", &DEFAULT_CHUNK_SIZE.to_string())?,
            fetch_concurrency: parse_env("FETCH_CONCURRENCY", "1")?,
            file_max_rows: parse_env("FILE_MAX_ROWS", &DEFAULT_FILE_MAX_ROWS.to_string())?,
            bigquery_project: std::env::var("BIGQUERY_PROJECT")
                .or_else(|_| std::env::var("PROJECT_ID"))
                .ok(),
            bigquery_location: std::env::var("BIGQUERY_LOCATION")
                .unwrap_or_else(|_| DEFAULT_LOCATION.to_string()),
            bigquery_api_base: std::env::var("BIGQUERY_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            service_account_file: std::env::var("BIGQUERY_SERVICE_ACCOUNT_FILE")
                .ok()
                .map(PathBuf::from),
            access_token: std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok(),
            reddit_client_id: std::env::var("REDDIT_CLIENT_ID").ok(),
            reddit_secret: std::env::var("REDDIT_SECRET").ok(),
            reddit_user_agent: std::env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        })
    }

    /// BigQuery settings, billed to `project` unless BIGQUERY_PROJECT is set.
    ///
    /// A static access token wins over a service-account file.
    pub fn bigquery(&self, table_project: &str) -> Result<BigQueryConfig> {
        let credentials = match (&self.access_token, &self.service_account_file) {
            (Some(token), _) => Credentials::AccessToken(token.clone()),
            (None, Some(path)) => Credentials::ServiceAccountFile(path.clone()),
            (None, None) => anyhow::bail!(
                "No BigQuery credentials. Set GOOGLE_OAUTH_ACCESS_TOKEN or BIGQUERY_SERVICE_ACCOUNT_FILE"
            ),
        };
        let project = self
            .bigquery_project
            .clone()
            .unwrap_or_else(|| table_project.to_string());

        let mut config = BigQueryConfig::new(project, credentials);
        config.location = self.bigquery_location.clone();
        config.api_base = self.bigquery_api_base.clone();
        Ok(config)
    }

    pub fn reddit(&self) -> Result<RedditConfig> {
        let client_id = self
            .reddit_client_id
            .clone()
            .context("REDDIT_CLIENT_ID not set")?;
        let secret = self.reddit_secret.clone().context("REDDIT_SECRET not set")?;
        let mut config = RedditConfig::new(client_id, secret);
        config.user_agent = self.reddit_user_agent.clone();
        Ok(config)
    }
}

// Serializes env-mutating tests across modules.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
