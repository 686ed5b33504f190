//! In-memory platform used by tests and dry runs.

use crate::{Platform, PullRequest, ReviewComment, StatusState};
use cicd_core::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    pulls: Mutex<HashMap<u64, (PullRequest, String)>>,
    files: Mutex<HashMap<(String, String), String>>,
    comments: Mutex<Vec<(u64, String)>>,
    reviews: Mutex<Vec<(u64, Vec<ReviewComment>)>>,
    statuses: Mutex<Vec<(String, StatusState, String)>>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pull(&self, pull: PullRequest, diff: impl Into<String>) {
        self.pulls
            .lock()
            .unwrap()
            .insert(pull.id, (pull, diff.into()));
    }

    pub fn add_file(&self, path: &str, reference: &str, contents: impl Into<String>) {
        self.files
            .lock()
            .unwrap()
            .insert((path.to_string(), reference.to_string()), contents.into());
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().unwrap().clone()
    }

    pub fn reviews(&self) -> Vec<(u64, Vec<ReviewComment>)> {
        self.reviews.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, StatusState, String)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Platform for InMemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_pull_request(&self, id: u64) -> Result<PullRequest> {
        self.pulls
            .lock()
            .unwrap()
            .get(&id)
            .map(|(pull, _)| pull.clone())
            .ok_or_else(|| Error::Unknown(format!("pull {id} not found")))
    }

    async fn get_diff(&self, id: u64) -> Result<String> {
        self.pulls
            .lock()
            .unwrap()
            .get(&id)
            .map(|(_, diff)| diff.clone())
            .ok_or_else(|| Error::Unknown(format!("pull {id} not found")))
    }

    async fn get_file(&self, path: &str, reference: &str) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(&(path.to_string(), reference.to_string()))
            .cloned()
            .ok_or_else(|| Error::Unknown(format!("{path}@{reference} not found")))
    }

    async fn post_comment(&self, id: u64, body: &str) -> Result<()> {
        self.comments.lock().unwrap().push((id, body.to_string()));
        Ok(())
    }

    async fn post_review(&self, id: u64, comments: &[ReviewComment]) -> Result<()> {
        self.reviews.lock().unwrap().push((id, comments.to_vec()));
        Ok(())
    }

    async fn create_status(&self, sha: &str, state: StatusState, context: &str) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((sha.to_string(), state, context.to_string()));
        Ok(())
    }
}
