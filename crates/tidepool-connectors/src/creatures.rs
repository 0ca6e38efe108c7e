//! Creature-collection API with `next`-link pagination.

use arrow::record_batch::RecordBatch;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ConnectorError;
use crate::rest_json::json_records_to_batch;

pub const CREATURE_API_BASE: &str = "https://pokeapi.co/api/v2/";
pub const CREATURES_DATASET: &str = "pokemon_api";
pub const DEFAULT_PAGE_LIMIT: u32 = 1000;

/// Resources landed by default, one table each.
pub const DEFAULT_RESOURCES: [&str; 6] = ["pokemon", "berry", "location", "item", "move", "version"];

/// Upper bound on pages per resource, in case a server loops its links.
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct CreatureApi {
    http: reqwest::Client,
    base_url: String,
    page_limit: u32,
}

impl CreatureApi {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, CREATURE_API_BASE)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            http,
            base_url,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    /// Probe the API before loading. Returns the failure message, if any.
    pub async fn check_connection(&self) -> Option<String> {
        let result = self
            .http
            .get(&self.base_url)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => None,
            Err(e) => {
                warn!("CreatureApi: connection check against {} failed: {}", self.base_url, e);
                Some(e.to_string())
            }
        }
    }

    /// All records of one resource, following `next` links until exhausted.
    pub async fn fetch_resource(&self, resource: &str) -> Result<RecordBatch, ConnectorError> {
        let mut url = format!("{}{}?limit={}", self.base_url, resource, self.page_limit);
        let mut records: Vec<Value> = Vec::new();

        for page_no in 0..MAX_PAGES {
            let page: Page = self
                .http
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            debug!(
                "CreatureApi: resource='{}' page {} returned {} records",
                resource,
                page_no,
                page.results.len()
            );
            records.extend(page.results);

            match page.next {
                Some(next) if !next.is_empty() => url = next,
                _ => {
                    info!("CreatureApi: resource='{}', records={}", resource, records.len());
                    return json_records_to_batch(&records);
                }
            }
        }

        Err(ConnectorError::UnexpectedResponse(format!(
            "resource '{}' still paginating after {} pages",
            resource, MAX_PAGES
        )))
    }
}
