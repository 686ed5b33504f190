//! GitHub REST adapter.

use crate::{Platform, PullRequest, ReviewComment, StatusState};
use cicd_core::config::PlatformConfig;
use cicd_core::error::{Error, Result};
use reqwest::header;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.github.com";

pub struct GithubPlatform {
    client: reqwest::Client,
    base_url: String,
    /// `owner/repo` slug.
    repository: String,
    token: String,
}

impl GithubPlatform {
    pub fn new(repository: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_API_URL.to_string(),
            repository: repository.into(),
            token: token.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Build from validated config plus the process environment.
    ///
    /// Returns `None` when the environment does not look like a GitHub run
    /// (no repository slug) or the token variable is unset. The token value
    /// is only ever read from the environment, never from config.
    pub fn detect(config: &PlatformConfig) -> Option<Self> {
        let repository = config
            .repository
            .clone()
            .or_else(|| std::env::var("GITHUB_REPOSITORY").ok())?;
        let token_var = config.token_env.as_deref().unwrap_or("GITHUB_TOKEN");
        let token = std::env::var(token_var).ok()?;
        let mut platform = Self::new(repository, token);
        if let Some(ref url) = config.base_url {
            platform.base_url = url.clone();
        }
        Some(platform)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{path}", self.base_url, self.repository)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::USER_AGENT, "cicd-toolkit")
            .header(header::ACCEPT, "application/vnd.github+json")
    }

    /// Map an HTTP failure to a typed error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("github {status}: {body}");
        Err(match status.as_u16() {
            401 | 403 => Error::Unauthorized(message),
            429 => Error::RateLimited(message),
            500..=599 => Error::ServerError(message),
            _ => Error::Unknown(message),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GhPull {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    base: GhRef,
    head: GhRef,
    user: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[async_trait::async_trait]
impl Platform for GithubPlatform {
    fn name(&self) -> &str {
        "github"
    }

    async fn get_pull_request(&self, id: u64) -> Result<PullRequest> {
        let url = self.url(&format!("/pulls/{id}"));
        debug!(%url, "fetching pull request");
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::classify(e.to_string()))?;
        let pull: GhPull = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Unknown(format!("github payload: {e}")))?;
        Ok(PullRequest {
            id: pull.number,
            title: pull.title,
            body: pull.body.unwrap_or_default(),
            base_sha: pull.base.sha,
            head_sha: pull.head.sha,
            author: pull.user.map(|u| u.login),
        })
    }

    async fn get_diff(&self, id: u64) -> Result<String> {
        let url = self.url(&format!("/pulls/{id}"));
        let response = self
            .request(reqwest::Method::GET, &url)
            .header(header::ACCEPT, "application/vnd.github.v3.diff")
            .send()
            .await
            .map_err(|e| Error::classify(e.to_string()))?;
        Self::check(response)
            .await?
            .text()
            .await
            .map_err(|e| Error::Unknown(format!("github diff: {e}")))
    }

    async fn get_file(&self, path: &str, reference: &str) -> Result<String> {
        let url = self.url(&format!("/contents/{path}?ref={reference}"));
        let response = self
            .request(reqwest::Method::GET, &url)
            .header(header::ACCEPT, "application/vnd.github.raw")
            .send()
            .await
            .map_err(|e| Error::classify(e.to_string()))?;
        Self::check(response)
            .await?
            .text()
            .await
            .map_err(|e| Error::Unknown(format!("github file: {e}")))
    }

    async fn post_comment(&self, id: u64, body: &str) -> Result<()> {
        let url = self.url(&format!("/issues/{id}/comments"));
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| Error::classify(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn post_review(&self, id: u64, comments: &[ReviewComment]) -> Result<()> {
        let url = self.url(&format!("/pulls/{id}/reviews"));
        let payload = serde_json::json!({
            "event": "COMMENT",
            "comments": comments.iter().map(|c| serde_json::json!({
                "path": c.path,
                "line": c.line,
                "body": c.body,
            })).collect::<Vec<_>>(),
        });
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::classify(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn create_status(&self, sha: &str, state: StatusState, context: &str) -> Result<()> {
        let url = self.url(&format!("/statuses/{sha}"));
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({
                "state": state.as_str(),
                "context": context,
            }))
            .send()
            .await
            .map_err(|e| Error::classify(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_repo_and_path() {
        let gh = GithubPlatform::new("acme/widget", "t");
        assert_eq!(
            gh.url("/pulls/7"),
            "https://api.github.com/repos/acme/widget/pulls/7"
        );
    }

    #[test]
    fn detect_requires_token() {
        let config = PlatformConfig {
            provider: Some("github".into()),
            base_url: None,
            repository: Some("acme/widget".into()),
            token_env: Some("CICD_TEST_TOKEN_THAT_IS_UNSET".into()),
        };
        assert!(GithubPlatform::detect(&config).is_none());
    }
}
