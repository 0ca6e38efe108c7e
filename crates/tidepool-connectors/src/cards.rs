//! Trading-card catalogue API.

use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::ConnectorError;
use crate::rest_json::{json_records_to_batch, with_constant_column};

pub const CARD_INFO_URL: &str = "https://db.ygoprodeck.com/api/v7/cardinfo.php";
pub const CARDS_DATASET: &str = "yugioh_api";
pub const CARDS_TABLE: &str = "yugioh_cards";
pub const FETCHED_AT_COLUMN: &str = "date_fetched";

#[derive(Deserialize)]
struct CardInfoResponse {
    data: Vec<Value>,
}

/// Client for the card catalogue endpoint.
#[derive(Debug, Clone)]
pub struct CardApi {
    http: reqwest::Client,
    url: String,
}

impl CardApi {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_url(http, CARD_INFO_URL)
    }

    pub fn with_url(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    /// Fetch every card in one request and stamp it with `fetched_at`.
    pub async fn fetch_all_cards(&self, fetched_at: DateTime<Utc>) -> Result<RecordBatch, ConnectorError> {
        let response = self.http.get(&self.url).send().await?.error_for_status()?;
        let body: CardInfoResponse = response.json().await?;
        info!("CardApi: fetched {} cards from {}", body.data.len(), self.url);

        let batch = json_records_to_batch(&body.data)?;
        let stamp = fetched_at.format("%Y-%m-%d %H:%M:%S").to_string();
        with_constant_column(&batch, FETCHED_AT_COLUMN, &stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/cardinfo.php", addr)
    }

    #[tokio::test]
    async fn test_fetch_all_cards_stamps_rows() {
        let app = Router::new().route(
            "/cardinfo.php",
            get(|| async {
                Json(json!({"data": [
                    {"id": 46986414, "name": "Dark Magician", "type": "Normal Monster", "atk": 2500},
                    {"id": 83764718, "name": "Monster Reborn", "type": "Spell Card"}
                ]}))
            }),
        );
        let api = CardApi::with_url(reqwest::Client::new(), serve(app).await);
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        let batch = api.fetch_all_cards(now).await.unwrap();
        assert_eq!(batch.num_rows(), 2);
        let stamp = batch
            .column_by_name(FETCHED_AT_COLUMN)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(stamp.value(0), "2024-05-01 12:30:00");
        assert_eq!(stamp.value(1), "2024-05-01 12:30:00");
        assert_eq!(batch.column_by_name("atk").unwrap().null_count(), 1);
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let app = Router::new().route(
            "/cardinfo.php",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let api = CardApi::with_url(reqwest::Client::new(), serve(app).await);
        assert!(api.fetch_all_cards(Utc::now()).await.is_err());
    }
}
