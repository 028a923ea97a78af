//! GitHub repository search client.
//!
//! [`RepositorySearch`] is the seam between the producer and the search API.
//! [`GitHubClient`] implements it against `GET /search/repositories`, mapping
//! HTTP 403/429 to a [`RateLimitSignal`] built from the response headers so
//! the producer can hand it to the backoff controller.

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

use crate::backoff::RateLimitSignal;
use crate::models::RepositoryRecord;

const USER_AGENT_VALUE: &str = concat!("repo-sieve/", env!("CARGO_PKG_VERSION"));

/// Maximum length of an error body kept in a [`SearchResponse::Failed`].
const BODY_PREVIEW_LEN: usize = 300;

/// Parameters for one term's search; the page number is supplied per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub language: String,
    pub min_stars: u32,
    pub max_stars: u32,
    pub page_size: u32,
}

impl SearchQuery {
    /// The `q` parameter: `"<term> language:<lang> stars:<min>..<max>"`.
    pub fn q(&self) -> String {
        format!(
            "{} language:{} stars:{}..{}",
            self.term, self.language, self.min_stars, self.max_stars
        )
    }
}

/// Result of a single page request that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResponse {
    /// A successful page, in API order.
    Page(Vec<RepositoryRecord>),
    /// The server refused the request because of rate limiting.
    RateLimited(RateLimitSignal),
    /// Any other non-success status.
    Failed { status: u16, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not decode search response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RepositorySearch: Send + Sync {
    /// Fetch one page (1-based) of results for `query`.
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: u32,
    ) -> Result<SearchResponse, SearchError>;
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    name: String,
    stargazers_count: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    login: String,
}

/// Token-authenticated client for the GitHub REST API.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.api_url, path))
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(ACCEPT, "application/vnd.github+json")
    }

    /// Verify the token against `GET /user` and return the login name.
    pub async fn check_authentication(&self) -> anyhow::Result<String> {
        let response = self
            .get("/user")
            .send()
            .await
            .context("Authentication request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Authentication failed. Status code: {} {}",
                status.as_u16(),
                preview(&body)
            );
        }

        let user: UserBody = response
            .json()
            .await
            .context("Failed to decode authenticated user")?;
        Ok(user.login)
    }
}

#[async_trait]
impl RepositorySearch for GitHubClient {
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: u32,
    ) -> Result<SearchResponse, SearchError> {
        let response = self
            .get("/search/repositories")
            .query(&[
                ("q", query.q()),
                ("per_page", query.page_size.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let text = response.text().await?;
            return parse_search_body(&text).map(SearchResponse::Page);
        }

        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Ok(SearchResponse::RateLimited(rate_limit_signal(
                response.headers(),
            )));
        }

        let body = response.text().await.unwrap_or_default();
        Ok(SearchResponse::Failed {
            status: status.as_u16(),
            message: preview(&body),
        })
    }
}

/// Extract the repository records from a search response body.
pub fn parse_search_body(text: &str) -> Result<Vec<RepositoryRecord>, SearchError> {
    let body: SearchBody =
        serde_json::from_str(text).map_err(|e| SearchError::Decode(e.to_string()))?;
    Ok(body
        .items
        .into_iter()
        .map(|item| RepositoryRecord::new(item.name, item.stargazers_count, item.html_url))
        .collect())
}

/// Read `Retry-After`, `X-RateLimit-Reset` and `X-RateLimit-Remaining`.
/// Headers that are absent or not integers are left as `None`.
pub fn rate_limit_signal(headers: &HeaderMap) -> RateLimitSignal {
    fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    RateLimitSignal {
        retry_after_secs: header(headers, "retry-after"),
        reset_at: header(headers, "x-ratelimit-reset"),
        remaining: header(headers, "x-ratelimit-remaining"),
    }
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
