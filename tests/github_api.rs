//! `GitHubClient` against a local stand-in for the search API.

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;

use repo_sieve::backoff::RateLimitSignal;
use repo_sieve::github::{GitHubClient, RepositorySearch, SearchQuery, SearchResponse};
use repo_sieve::models::RepositoryRecord;

const RESET_AT: i64 = 1_700_000_060;

/// The first word of `q` picks the behaviour.
async fn handle_search(Query(params): Query<HashMap<String, String>>) -> Response {
    let q = params.get("q").cloned().unwrap_or_default();
    let term = q.split_whitespace().next().unwrap_or_default().to_string();
    let page = params.get("page").cloned().unwrap_or_default();
    let per_page = params.get("per_page").cloned().unwrap_or_default();

    match term.as_str() {
        "throttled" => (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "3")],
            "slow down",
        )
            .into_response(),
        "exhausted" => (
            StatusCode::FORBIDDEN,
            [
                ("x-ratelimit-reset", RESET_AT.to_string()),
                ("x-ratelimit-remaining", "0".to_string()),
            ],
            "API rate limit exceeded",
        )
            .into_response(),
        "invalid" => (
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"Validation Failed"}"#,
        )
            .into_response(),
        _ => Json(serde_json::json!({
            "total_count": 2,
            "incomplete_results": false,
            "items": [
                {
                    "name": format!("{term}-p{page}-n{per_page}"),
                    "stargazers_count": 12,
                    "html_url": format!("https://github.com/o/{term}"),
                },
                {
                    "name": "q",
                    "stargazers_count": 11,
                    "html_url": q,
                },
            ],
        }))
        .into_response(),
    }
}

async fn handle_user(headers: HeaderMap) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("token good");
    if authorized {
        Json(serde_json::json!({ "login": "octocat" })).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            r#"{"message":"Bad credentials"}"#,
        )
            .into_response()
    }
}

/// Serve the stand-in API on a free port and return its base URL.
async fn start_server() -> String {
    let app = Router::new()
        .route("/search/repositories", get(handle_search))
        .route("/user", get(handle_user));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn query(term: &str) -> SearchQuery {
    SearchQuery {
        term: term.to_string(),
        language: "python".into(),
        min_stars: 11,
        max_stars: 13,
        page_size: 50,
    }
}

#[tokio::test]
async fn test_success_page_is_parsed() {
    let base = start_server().await;
    let client = GitHubClient::new(&base, "good", 5).unwrap();

    let response = client.search_page(&query("webui"), 2).await.unwrap();

    assert_eq!(
        response,
        SearchResponse::Page(vec![
            RepositoryRecord::new("webui-p2-n50", 12, "https://github.com/o/webui"),
            RepositoryRecord::new("q", 11, "webui language:python stars:11..13"),
        ])
    );
}

#[tokio::test]
async fn test_429_maps_to_rate_limit_with_retry_after() {
    let base = start_server().await;
    let client = GitHubClient::new(&base, "good", 5).unwrap();

    let response = client.search_page(&query("throttled"), 1).await.unwrap();

    assert_eq!(
        response,
        SearchResponse::RateLimited(RateLimitSignal {
            retry_after_secs: Some(3),
            reset_at: None,
            remaining: None,
        })
    );
}

#[tokio::test]
async fn test_403_maps_to_rate_limit_with_reset() {
    let base = start_server().await;
    let client = GitHubClient::new(&base, "good", 5).unwrap();

    let response = client.search_page(&query("exhausted"), 1).await.unwrap();

    assert_eq!(
        response,
        SearchResponse::RateLimited(RateLimitSignal {
            retry_after_secs: None,
            reset_at: Some(RESET_AT),
            remaining: Some(0),
        })
    );
}

#[tokio::test]
async fn test_other_status_is_failure() {
    let base = start_server().await;
    let client = GitHubClient::new(&base, "good", 5).unwrap();

    let response = client.search_page(&query("invalid"), 1).await.unwrap();

    match response {
        SearchResponse::Failed { status, message } => {
            assert_eq!(status, 422);
            assert!(message.contains("Validation Failed"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_authentication() {
    let base = start_server().await;

    let good = GitHubClient::new(&base, "good", 5).unwrap();
    assert_eq!(good.check_authentication().await.unwrap(), "octocat");

    let bad = GitHubClient::new(&base, "bad", 5).unwrap();
    let err = bad.check_authentication().await.unwrap_err();
    assert!(err.to_string().contains("401"), "got: {}", err);
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = GitHubClient::new(&format!("http://127.0.0.1:{}", port), "good", 2).unwrap();
    assert!(client.search_page(&query("webui"), 1).await.is_err());
}
