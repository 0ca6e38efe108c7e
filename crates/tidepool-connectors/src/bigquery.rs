//! BigQuery REST v2 client.
//!
//! Covers the calls the extraction paths need: synchronous queries with
//! result paging, table metadata, and extract jobs with polling.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tidepool_core::TableRef;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bigquery_types::{ErrorProto, Job, JobReference, QueryResponse, TableMetadata, TableRow, TableSchema};
use crate::error::ConnectorError;

pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
pub const DEFAULT_LOCATION: &str = "US";

/// How the client authenticates.
#[derive(Clone)]
pub enum Credentials {
    /// A ready OAuth access token, used as-is.
    AccessToken(String),
    /// A service-account key file exchanged for tokens on demand.
    ServiceAccountFile(PathBuf),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::AccessToken(_) => f.write_str("AccessToken(***)"),
            Credentials::ServiceAccountFile(path) => {
                f.debug_tuple("ServiceAccountFile").field(path).finish()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// Project that runs (and is billed for) query and extract jobs.
    pub billing_project: String,
    pub location: String,
    pub api_base: String,
    pub credentials: Credentials,
    /// Delay between job status polls.
    pub poll_interval: Duration,
    /// Give up on a query or job that has not finished after this long.
    pub job_timeout: Duration,
    /// Rows per result page. `None` lets the service decide.
    pub page_size: Option<u32>,
}

impl BigQueryConfig {
    pub fn new(billing_project: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            billing_project: billing_project.into(),
            location: DEFAULT_LOCATION.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            credentials,
            poll_interval: Duration::from_secs(2),
            job_timeout: Duration::from_secs(6 * 60 * 60),
            page_size: None,
        }
    }
}

type TokenFuture = BoxFuture<'static, Result<String, ConnectorError>>;

/// Produces a bearer token per request. Service-account tokens are cached and
/// refreshed by the authenticator.
#[derive(Clone)]
struct TokenSource(Arc<dyn Fn() -> TokenFuture + Send + Sync>);

impl TokenSource {
    fn fixed(token: String) -> Self {
        Self(Arc::new(move || {
            let token = token.clone();
            async move { Ok(token) }.boxed()
        }))
    }

    async fn service_account(path: &Path) -> Result<Self, ConnectorError> {
        let key = yup_oauth2::read_service_account_key(path).await.map_err(|e| {
            ConnectorError::AuthFailed(format!("cannot read key {}: {}", path.display(), e))
        })?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| ConnectorError::AuthFailed(e.to_string()))?;
        let auth = Arc::new(auth);

        Ok(Self(Arc::new(move || {
            let auth = Arc::clone(&auth);
            async move {
                let token = auth
                    .token(&[BIGQUERY_SCOPE])
                    .await
                    .map_err(|e| ConnectorError::AuthFailed(e.to_string()))?;
                token
                    .token()
                    .map(str::to_string)
                    .ok_or_else(|| ConnectorError::AuthFailed("empty access token".to_string()))
            }
            .boxed()
        })))
    }

    async fn token(&self) -> Result<String, ConnectorError> {
        (self.0)().await
    }
}

/// Rows and schema of a finished query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub schema: TableSchema,
    pub rows: Vec<TableRow>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    location: &'a str,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
}

/// Per-call wait the service may block for before answering "not complete".
const SERVER_WAIT_MS: u64 = 10_000;

#[derive(Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    config: BigQueryConfig,
    token: TokenSource,
}

impl std::fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("config", &self.config)
            .finish()
    }
}

impl BigQueryClient {
    /// Build a client, loading the service-account key if one is configured.
    pub async fn connect(config: BigQueryConfig) -> Result<Self, ConnectorError> {
        let token = match &config.credentials {
            Credentials::AccessToken(t) => TokenSource::fixed(t.clone()),
            Credentials::ServiceAccountFile(path) => TokenSource::service_account(path).await?,
        };
        info!(
            "BigQuery client ready: project={}, location={}",
            config.billing_project, config.location
        );
        Ok(Self {
            http: reqwest::Client::new(),
            config,
            token,
        })
    }

    pub fn config(&self) -> &BigQueryConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.billing_project,
            path
        )
    }

    /// Run a standard-SQL query and collect every result page.
    pub async fn query(&self, sql: &str) -> Result<QueryResult, ConnectorError> {
        debug!("BigQuery query: {}", sql);
        let started = Instant::now();

        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            location: &self.config.location,
            timeout_ms: SERVER_WAIT_MS,
            max_results: self.config.page_size,
        };
        let first: QueryResponse = self
            .send(self.http.post(self.url("queries")).json(&request))
            .await?;
        check_errors(first.errors.as_deref())?;

        let job = first.job_reference.clone().ok_or_else(|| {
            ConnectorError::UnexpectedResponse("query response has no jobReference".to_string())
        })?;
        let mut complete = first.job_complete.unwrap_or(false);
        let mut schema = first.schema;
        let mut rows = first.rows.unwrap_or_default();
        let mut page_token = if complete { first.page_token } else { None };

        while !complete || page_token.is_some() {
            if started.elapsed() > self.config.job_timeout {
                return Err(ConnectorError::JobFailed(format!(
                    "query job {} did not finish within {:?}",
                    job.job_id, self.config.job_timeout
                )));
            }

            let page = self.query_results(&job, page_token.as_deref()).await?;
            check_errors(page.errors.as_deref())?;
            complete = page.job_complete.unwrap_or(false);
            if !complete {
                debug!("BigQuery job {} still running", job.job_id);
                continue;
            }
            if schema.is_none() {
                schema = page.schema;
            }
            rows.extend(page.rows.unwrap_or_default());
            page_token = page.page_token;
        }

        Ok(QueryResult {
            schema: schema.unwrap_or_default(),
            rows,
        })
    }

    async fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, ConnectorError> {
        let location = job.location.as_deref().unwrap_or(&self.config.location);
        let mut request = self
            .http
            .get(self.url(&format!("queries/{}", job.job_id)))
            .query(&[("location", location)])
            .query(&[("timeoutMs", SERVER_WAIT_MS)]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        if let Some(size) = self.config.page_size {
            request = request.query(&[("maxResults", size)]);
        }
        self.send(request).await
    }

    /// Fetch table metadata (schema and row count).
    pub async fn table(&self, table: &TableRef) -> Result<TableMetadata, ConnectorError> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.config.api_base.trim_end_matches('/'),
            table.project,
            table.dataset,
            table.table
        );
        self.send(self.http.get(url)).await
    }

    /// Start a job exporting `table` as Parquet to `destination_uri`, which
    /// may contain one `*` wildcard for sharding.
    pub async fn insert_extract_job(
        &self,
        table: &TableRef,
        destination_uri: &str,
    ) -> Result<Job, ConnectorError> {
        let job_id = format!("tidepool_extract_{}", uuid::Uuid::new_v4().simple());
        let body = json!({
            "jobReference": {
                "projectId": self.config.billing_project,
                "jobId": job_id,
                "location": self.config.location,
            },
            "configuration": {
                "extract": {
                    "sourceTable": {
                        "projectId": table.project,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                    "destinationUris": [destination_uri],
                    "destinationFormat": "PARQUET",
                }
            }
        });
        info!(
            "BigQuery extract job {}: {} -> {}",
            job_id, table, destination_uri
        );
        self.send(self.http.post(self.url("jobs")).json(&body)).await
    }

    /// Poll a job until it is DONE. A DONE job carrying an error fails.
    pub async fn wait_for_job(&self, job: &JobReference) -> Result<Job, ConnectorError> {
        let started = Instant::now();
        let location = job.location.as_deref().unwrap_or(&self.config.location);
        loop {
            let current: Job = self
                .send(
                    self.http
                        .get(self.url(&format!("jobs/{}", job.job_id)))
                        .query(&[("location", location)]),
                )
                .await?;

            if current.is_done() {
                if let Some(err) = current.status.as_ref().and_then(|s| s.error_result.as_ref()) {
                    return Err(ConnectorError::JobFailed(format!("{}: {}", job.job_id, err)));
                }
                return Ok(current);
            }
            if started.elapsed() > self.config.job_timeout {
                return Err(ConnectorError::JobFailed(format!(
                    "job {} did not finish within {:?}",
                    job.job_id, self.config.job_timeout
                )));
            }
            debug!("BigQuery job {} not done, polling again", job.job_id);
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ConnectorError> {
        let token = self.token.token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("HTTP {}: {}", status, body);
            return Err(match status.as_u16() {
                401 | 403 => ConnectorError::AuthFailed(msg),
                _ => ConnectorError::QueryFailed(msg),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

fn check_errors(errors: Option<&[ErrorProto]>) -> Result<(), ConnectorError> {
    match errors {
        Some([first, ..]) => Err(ConnectorError::QueryFailed(first.to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Fake {
        polls: Mutex<usize>,
        seen_auth: Mutex<Vec<String>>,
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: String) -> BigQueryClient {
        let mut config = BigQueryConfig::new("billing", Credentials::AccessToken("tok".into()));
        config.api_base = base;
        config.poll_interval = Duration::from_millis(5);
        BigQueryClient {
            http: reqwest::Client::new(),
            config,
            token: TokenSource::fixed("tok".to_string()),
        }
    }

    fn schema() -> Value {
        json!({"fields": [{"name": "n", "type": "INTEGER"}]})
    }

    #[tokio::test]
    async fn test_query_follows_incomplete_job_and_pages() {
        let fake = Arc::new(Fake::default());
        let app = Router::new()
            .route(
                "/projects/billing/queries",
                post(|State(f): State<Arc<Fake>>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(body["useLegacySql"], json!(false));
                    let auth = headers["authorization"].to_str().unwrap().to_string();
                    f.seen_auth.lock().unwrap().push(auth);
                    Json(json!({
                        "jobReference": {"projectId": "billing", "jobId": "j1", "location": "US"},
                        "jobComplete": false
                    }))
                }),
            )
            .route(
                "/projects/billing/queries/:job",
                get(|State(f): State<Arc<Fake>>, Path(job): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(job, "j1");
                    let mut polls = f.polls.lock().unwrap();
                    *polls += 1;
                    match (*polls, q.get("pageToken").map(String::as_str)) {
                        (1, None) => Json(json!({"jobComplete": false})),
                        (2, None) => Json(json!({
                            "jobComplete": true, "schema": schema(),
                            "rows": [{"f": [{"v": "1"}]}, {"f": [{"v": "2"}]}],
                            "pageToken": "p2"
                        })),
                        (3, Some("p2")) => Json(json!({
                            "jobComplete": true, "schema": schema(),
                            "rows": [{"f": [{"v": "3"}]}]
                        })),
                        other => panic!("unexpected poll {:?}", other),
                    }
                }),
            )
            .with_state(Arc::clone(&fake));

        let result = client(spawn(app).await).query("SELECT n FROM t").await.unwrap();
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.schema.fields[0].name, "n");
        assert_eq!(*fake.polls.lock().unwrap(), 3);
        assert_eq!(fake.seen_auth.lock().unwrap()[0], "Bearer tok");
    }

    #[tokio::test]
    async fn test_query_error_status_maps_to_auth_failure() {
        let app = Router::new().route(
            "/projects/billing/queries",
            post(|| async { (StatusCode::FORBIDDEN, "access denied") }),
        );
        let err = client(spawn(app).await).query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, ConnectorError::AuthFailed(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_query_errors_in_body_fail() {
        let app = Router::new().route(
            "/projects/billing/queries",
            post(|| async {
                Json(json!({
                    "jobReference": {"projectId": "billing", "jobId": "j"},
                    "jobComplete": true,
                    "errors": [{"reason": "invalidQuery", "message": "Syntax error"}]
                }))
            }),
        );
        let err = client(spawn(app).await).query("SELEC 1").await.unwrap_err();
        assert_eq!(err.to_string(), "query failed: invalidQuery: Syntax error");
    }

    #[tokio::test]
    async fn test_wait_for_job_polls_until_done() {
        let fake = Arc::new(Fake::default());
        let app = Router::new()
            .route(
                "/projects/billing/jobs/:job",
                get(|State(f): State<Arc<Fake>>| async move {
                    let mut polls = f.polls.lock().unwrap();
                    *polls += 1;
                    let state = if *polls < 3 { "RUNNING" } else { "DONE" };
                    Json(json!({
                        "jobReference": {"projectId": "billing", "jobId": "x", "location": "US"},
                        "status": {"state": state}
                    }))
                }),
            )
            .with_state(Arc::clone(&fake));

        let job = JobReference {
            project_id: "billing".into(),
            job_id: "x".into(),
            location: Some("US".into()),
        };
        let done = client(spawn(app).await).wait_for_job(&job).await.unwrap();
        assert!(done.is_done());
        assert_eq!(*fake.polls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_job_surfaces_error_result() {
        let app = Router::new().route(
            "/projects/billing/jobs/:job",
            get(|| async {
                Json(json!({
                    "jobReference": {"projectId": "billing", "jobId": "x"},
                    "status": {"state": "DONE", "errorResult": {"reason": "notFound", "message": "no bucket"}}
                }))
            }),
        );
        let job = JobReference {
            project_id: "billing".into(),
            job_id: "x".into(),
            location: None,
        };
        let err = client(spawn(app).await).wait_for_job(&job).await.unwrap_err();
        assert!(matches!(err, ConnectorError::JobFailed(ref m) if m.contains("no bucket")));
    }

    #[test]
    fn test_credentials_debug_hides_token() {
        let rendered = format!("{:?}", Credentials::AccessToken("ya29.secret".into()));
        assert!(!rendered.contains("secret"));
    }
}
