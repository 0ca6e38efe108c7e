//! Social-media posts via Reddit's application-only OAuth API.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConnectorError;

pub const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
pub const DEFAULT_USER_AGENT: &str = "tidepool-reddit-pipeline/0.1";
pub const REDDIT_DATASET: &str = "reddit";
pub const REDDIT_TABLE: &str = "posts";

/// Largest page the listing endpoints serve.
const MAX_PAGE: usize = 100;

#[derive(Clone)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub auth_url: String,
    pub api_base: String,
}

impl std::fmt::Debug for RedditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl RedditConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auth_url: REDDIT_AUTH_URL.to_string(),
            api_base: REDDIT_API_BASE.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Deserialize)]
struct ListingData<T> {
    #[serde(default)]
    after: Option<String>,
    children: Vec<Thing<T>>,
}

#[derive(Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subreddit {
    pub display_name: String,
}

/// One post, trimmed to the landed columns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    pub score: i64,
    /// `None` for deleted accounts.
    #[serde(default)]
    pub author: Option<String>,
    pub created_utc: f64,
    pub url: String,
    pub num_comments: i64,
    pub subreddit: String,
}

/// Authenticated API session.
pub struct RedditClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl RedditClient {
    /// Obtain an application-only token with the client-credentials grant.
    pub async fn connect(config: &RedditConfig) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        let response = http
            .post(&config.auth_url)
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectorError::AuthFailed(format!(
                "token request returned HTTP {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        info!("RedditClient: authenticated as app '{}'", config.client_id);

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.access_token,
        })
    }

    async fn listing<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<ListingData<T>, ConnectorError> {
        let mut request = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.token)
            .query(&[("limit", limit.to_string())]);
        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }
        let listing: Listing<T> = request.send().await?.error_for_status()?.json().await?;
        Ok(listing.data)
    }

    /// Up to `limit` items of a listing, paging with the `after` cursor at
    /// most 100 per request.
    async fn paged<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        limit: usize,
    ) -> Result<Vec<T>, ConnectorError> {
        let mut items = Vec::with_capacity(limit);
        let mut after: Option<String> = None;

        while items.len() < limit {
            let page = (limit - items.len()).min(MAX_PAGE);
            let data = self.listing::<T>(path, page, after.as_deref()).await?;
            let received = data.children.len();
            items.extend(data.children.into_iter().map(|t| t.data));
            debug!("RedditClient: {} page returned {} items", path, received);

            match data.after {
                Some(next) if received > 0 => after = Some(next),
                _ => break,
            }
        }
        items.truncate(limit);
        Ok(items)
    }

    /// Names of the `top_n` most popular subreddits.
    pub async fn popular_subreddits(&self, top_n: usize) -> Result<Vec<String>, ConnectorError> {
        let subreddits = self.paged::<Subreddit>("/subreddits/popular", top_n).await?;
        Ok(subreddits.into_iter().map(|s| s.display_name).collect())
    }

    /// Up to `limit` hot posts of one subreddit.
    pub async fn hot_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<RedditPost>, ConnectorError> {
        self.paged(&format!("/r/{}/hot", subreddit), limit).await
    }

    /// Hot posts of each of the `top_n` popular subreddits.
    pub async fn top_subreddit_posts(
        &self,
        top_n: usize,
        post_limit: usize,
    ) -> Result<Vec<RedditPost>, ConnectorError> {
        let mut all = Vec::new();
        for name in self.popular_subreddits(top_n).await? {
            info!("RedditClient: fetching r/{}", name);
            all.extend(self.hot_posts(&name, post_limit).await?);
        }
        Ok(all)
    }
}

pub fn posts_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("score", DataType::Int64, false),
        Field::new("author", DataType::Utf8, true),
        Field::new("created_utc", DataType::Float64, false),
        Field::new("url", DataType::Utf8, false),
        Field::new("num_comments", DataType::Int64, false),
        Field::new("subreddit", DataType::Utf8, false),
    ]))
}

pub fn posts_to_record_batch(posts: &[RedditPost]) -> Result<RecordBatch, ConnectorError> {
    let mut id = StringBuilder::new();
    let mut title = StringBuilder::new();
    let mut score = Int64Builder::with_capacity(posts.len());
    let mut author = StringBuilder::new();
    let mut created = Float64Builder::with_capacity(posts.len());
    let mut url = StringBuilder::new();
    let mut comments = Int64Builder::with_capacity(posts.len());
    let mut subreddit = StringBuilder::new();

    for post in posts {
        id.append_value(&post.id);
        title.append_value(&post.title);
        score.append_value(post.score);
        author.append_option(post.author.as_deref());
        created.append_value(post.created_utc);
        url.append_value(&post.url);
        comments.append_value(post.num_comments);
        subreddit.append_value(&post.subreddit);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(id.finish()),
        Arc::new(title.finish()),
        Arc::new(score.finish()),
        Arc::new(author.finish()),
        Arc::new(created.finish()),
        Arc::new(url.finish()),
        Arc::new(comments.finish()),
        Arc::new(subreddit.finish()),
    ];
    Ok(RecordBatch::try_new(posts_schema(), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn post_json(sub: &str, n: usize) -> Value {
        json!({"kind": "t3", "data": {
            "id": format!("{}{}", sub, n),
            "title": format!("post {}", n),
            "score": n * 10,
            "author": if n == 0 { Value::Null } else { json!("someone") },
            "created_utc": 1_700_000_000.0 + n as f64,
            "url": format!("https://example.com/{}", n),
            "num_comments": n,
            "subreddit": sub,
            "ups": 1
        }})
    }

    async fn serve() -> RedditConfig {
        let app = Router::new()
            .route(
                "/api/v1/access_token",
                post(|headers: HeaderMap| async move {
                    assert!(headers["authorization"].to_str().unwrap().starts_with("Basic "));
                    Json(json!({"access_token": "app-token", "token_type": "bearer"}))
                }),
            )
            .route(
                "/subreddits/popular",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    // 150 popular subreddits, at most 100 per page.
                    let start: usize = q.get("after").map(|a| a.parse().unwrap()).unwrap_or(0);
                    let limit: usize = q["limit"].parse().unwrap();
                    assert!(limit <= 100);
                    let end = (start + limit).min(150);
                    let children: Vec<Value> = (start..end)
                        .map(|n| json!({"data": {"display_name": format!("sub{}", n)}}))
                        .collect();
                    let after = (end < 150).then(|| end.to_string());
                    Json(json!({"data": {"after": after, "children": children}}))
                }),
            )
            .route(
                "/r/:sub/hot",
                get(
                    |Path(sub): Path<String>, headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        assert_eq!(headers["authorization"], "Bearer app-token");
                        let start: usize = q.get("after").map(|a| a.parse().unwrap()).unwrap_or(0);
                        let limit: usize = q["limit"].parse().unwrap();
                        // Three posts per subreddit, served two per page at most.
                        let end = (start + limit.min(2)).min(3);
                        let children: Vec<Value> = (start..end).map(|n| post_json(&sub, n)).collect();
                        let after = (end < 3).then(|| end.to_string());
                        Json(json!({"data": {"after": after, "children": children}}))
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = RedditConfig::new("id", "secret");
        config.auth_url = format!("{}/api/v1/access_token", base);
        config.api_base = base;
        config
    }

    #[tokio::test]
    async fn test_hot_posts_pages_with_after_cursor() {
        let client = RedditClient::connect(&serve().await).await.unwrap();
        let posts = client.hot_posts("rust", 10).await.unwrap();
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["rust0", "rust1", "rust2"]);
        assert_eq!(posts[0].author, None);
        assert_eq!(posts[1].author.as_deref(), Some("someone"));
    }

    #[tokio::test]
    async fn test_hot_posts_respects_limit() {
        let client = RedditClient::connect(&serve().await).await.unwrap();
        let posts = client.hot_posts("rust", 1).await.unwrap();
        assert_eq!(posts.len(), 1);
    }

    #[tokio::test]
    async fn test_top_subreddit_posts_builds_table() {
        let client = RedditClient::connect(&serve().await).await.unwrap();
        let posts = client.top_subreddit_posts(2, 3).await.unwrap();
        assert_eq!(posts.len(), 6);

        let batch = posts_to_record_batch(&posts).unwrap();
        assert_eq!(batch.num_rows(), 6);
        assert_eq!(batch.schema(), posts_schema());
        assert_eq!(batch.column_by_name("author").unwrap().null_count(), 2);
    }

    #[tokio::test]
    async fn test_popular_subreddits_pages_past_one_listing() {
        let client = RedditClient::connect(&serve().await).await.unwrap();

        let two = client.popular_subreddits(2).await.unwrap();
        assert_eq!(two, vec!["sub0", "sub1"]);

        let many = client.popular_subreddits(120).await.unwrap();
        assert_eq!(many.len(), 120);
        assert_eq!(many[100], "sub100");

        let all = client.popular_subreddits(500).await.unwrap();
        assert_eq!(all.len(), 150);
    }

    #[test]
    fn test_config_debug_hides_secret() {
        let rendered = format!("{:?}", RedditConfig::new("id", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
