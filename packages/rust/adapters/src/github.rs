//! Code-host adapter: repository statistics from the GitHub REST API.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use sourcerouter_shared::{CodeHostConfig, Result, Source, read_secret};

use crate::error::{AdapterError, AdapterResult};
use crate::http;
use crate::{FetchRequest, SourceAdapter};

pub const NO_REPO_MESSAGE: &str = "Could not find a valid GitHub repo link in your query.";

static REPO_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"github\.com/([\w.-]+)/([\w.-]+)").unwrap());

/// Issues fetched when counting open issues.
const ISSUES_PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct RepoInfo {
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    updated_at: Option<String>,
}

/// `owner/name` pair pulled from a repository link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// First `github.com/<owner>/<name>` link in `text`.
    pub fn find(text: &str) -> Option<Self> {
        let caps = REPO_LINK.captures(text)?;
        let owner = caps[1].to_string();
        let name = caps[2].trim_end_matches('.');
        let name = name.strip_suffix(".git").unwrap_or(name);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            owner,
            name: name.to_string(),
        })
    }
}

/// GitHub repository statistics adapter.
pub struct GitHubAdapter {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubAdapter {
    pub fn new(api_base: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Token is optional; anonymous calls just get a lower rate limit.
    pub fn from_config(config: &CodeHostConfig, timeout: Duration) -> Result<Self> {
        Self::new(&config.api_base, read_secret(&config.token_env), timeout)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn repo_info(&self, repo: &RepoRef) -> AdapterResult<RepoInfo> {
        let url = format!("{}/repos/{}/{}", self.api_base, repo.owner, repo.name);
        let response = self.get(&url).send().await?;
        http::read_json(response, "github repository").await
    }

    /// Open issue count from the first page, or `None` when unavailable.
    async fn open_issues(&self, repo: &RepoRef) -> Option<usize> {
        let url = format!("{}/repos/{}/{}/issues", self.api_base, repo.owner, repo.name);
        let per_page = ISSUES_PER_PAGE.to_string();
        let result: AdapterResult<Vec<serde_json::Value>> = async {
            let response = self
                .get(&url)
                .query(&[("state", "open"), ("per_page", per_page.as_str())])
                .send()
                .await?;
            http::read_json(response, "github issues").await
        }
        .await;

        match result {
            Ok(issues) => Some(issues.len()),
            Err(e) => {
                warn!(error = %e, "could not count open issues");
                None
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for GitHubAdapter {
    fn source(&self) -> Source {
        Source::CodeHost
    }

    fn name(&self) -> &str {
        "github"
    }

    #[instrument(skip_all, fields(adapter = "github"))]
    async fn fetch(&self, request: &FetchRequest) -> AdapterResult<String> {
        let repo = RepoRef::find(&request.query).ok_or_else(|| AdapterError::soft(NO_REPO_MESSAGE))?;
        debug!(owner = %repo.owner, name = %repo.name, "resolved repository");

        let info = self.repo_info(&repo).await?;
        let issues = self
            .open_issues(&repo)
            .await
            .map_or_else(|| "unknown".to_string(), |n| n.to_string());

        Ok(format!(
            "Repository: {}\nDescription: {}\nStars: {}\nForks: {}\nOpen Issues: {}\nLast Updated: {}",
            info.full_name,
            info.description.as_deref().unwrap_or("No description"),
            info.stargazers_count,
            info.forks_count,
            issues,
            info.updated_at.as_deref().unwrap_or("unknown"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sourcerouter_shared::Mode;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn repo_link_parsing() {
        assert_eq!(
            RepoRef::find("stars for https://github.com/rust-lang/rust.git please"),
            Some(RepoRef {
                owner: "rust-lang".into(),
                name: "rust".into()
            })
        );
        assert_eq!(
            RepoRef::find("see github.com/tokio-rs/tokio."),
            Some(RepoRef {
                owner: "tokio-rs".into(),
                name: "tokio".into()
            })
        );
        assert_eq!(RepoRef::find("how many stars on github?"), None);
    }

    #[tokio::test]
    async fn fetch_formats_repository_stats() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets"))
            .and(header("authorization", "Bearer gh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "full_name": "octo/widgets",
                "description": "Widget factory",
                "stargazers_count": 42,
                "forks_count": 7,
                "updated_at": "2025-01-02T03:04:05Z"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets/issues"))
            .and(query_param("state", "open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}, {"id": 3}])))
            .mount(&server)
            .await;

        let adapter =
            GitHubAdapter::new(&server.uri(), Some("gh-token".into()), Duration::from_secs(5))
                .expect("adapter");
        let text = adapter
            .fetch(&FetchRequest::new(
                "stats for https://github.com/octo/widgets",
                Mode::Stats,
            ))
            .await
            .expect("stats");

        assert_eq!(
            text,
            "Repository: octo/widgets\nDescription: Widget factory\nStars: 42\nForks: 7\nOpen Issues: 3\nLast Updated: 2025-01-02T03:04:05Z"
        );
    }

    #[tokio::test]
    async fn issue_failure_reports_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"full_name": "octo/widgets"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets/issues"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = GitHubAdapter::new(&server.uri(), None, Duration::from_secs(5)).expect("adapter");
        let text = adapter
            .fetch(&FetchRequest::new("github.com/octo/widgets", Mode::Stats))
            .await
            .expect("stats");
        assert!(text.contains("Description: No description"));
        assert!(text.contains("Open Issues: unknown"));
    }

    #[tokio::test]
    async fn missing_link_is_soft_error() {
        let server = MockServer::start().await;
        let adapter = GitHubAdapter::new(&server.uri(), None, Duration::from_secs(5)).expect("adapter");
        let err = adapter
            .fetch(&FetchRequest::new("how many forks does it have", Mode::Stats))
            .await
            .unwrap_err();
        assert!(err.is_soft());
        assert_eq!(err.message(), NO_REPO_MESSAGE);
    }

    #[tokio::test]
    async fn unknown_repository_is_hard_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let adapter = GitHubAdapter::new(&server.uri(), None, Duration::from_secs(5)).expect("adapter");
        let err = adapter
            .fetch(&FetchRequest::new("github.com/octo/missing", Mode::Stats))
            .await
            .unwrap_err();
        assert!(!err.is_soft());
        assert!(err.message().contains("404"));
    }

    #[tokio::test]
    async fn slow_upstream_times_out_as_hard_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"full_name": "octo/widgets"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let adapter = GitHubAdapter::new(&server.uri(), None, Duration::from_secs(1)).expect("adapter");
        let started = std::time::Instant::now();
        let err = adapter
            .fetch(&FetchRequest::new("github.com/octo/widgets", Mode::Stats))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Hard);
        assert!(err.message().contains("timed out"), "{}", err.message());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
