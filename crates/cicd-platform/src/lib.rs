//! cicd-platform - Code-forge capability consumed by the runner core
//!
//! The core talks to its hosting forge exclusively through [`Platform`].
//! Adapters decide for themselves whether the process environment matches
//! their host; the core never inspects environment variables.

pub mod github;
pub mod memory;

pub use github::GithubPlatform;
pub use memory::InMemoryPlatform;

use cicd_core::error::Result;
use serde::{Deserialize, Serialize};

/// A pull/merge request as the core sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub base_sha: String,
    pub head_sha: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// One inline comment of a review batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

/// Commit status states understood by the forges we target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

/// Code-forge capability. Required operations cover fetching the request and
/// reporting findings; review batches and commit statuses are optional and
/// default to "unsupported".
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    /// Adapter name, e.g. `github`.
    fn name(&self) -> &str;

    async fn get_pull_request(&self, id: u64) -> Result<PullRequest>;

    /// Unified diff of the pull request.
    async fn get_diff(&self, id: u64) -> Result<String>;

    /// File contents at a ref.
    async fn get_file(&self, path: &str, reference: &str) -> Result<String>;

    async fn post_comment(&self, id: u64, body: &str) -> Result<()>;

    /// Post a review with inline comments. Optional capability.
    async fn post_review(&self, _id: u64, _comments: &[ReviewComment]) -> Result<()> {
        Err(cicd_core::Error::invalid_input(format!(
            "{} does not support reviews",
            self.name()
        )))
    }

    /// Set a commit status. Optional capability.
    async fn create_status(&self, _sha: &str, _state: StatusState, _context: &str) -> Result<()> {
        Err(cicd_core::Error::invalid_input(format!(
            "{} does not support statuses",
            self.name()
        )))
    }
}
