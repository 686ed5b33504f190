//! Core types shared across the runner crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Session identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Process-wide runner lifecycle.
///
/// Transitions are one-way except `Running ↔ Ready`. All mutations go
/// through the runner's state guard so concurrent `run` calls observe a
/// consistent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Where the diff under review comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiffSource {
    /// Working-copy changes against HEAD.
    WorkingTree {
        #[serde(default)]
        staged: bool,
    },
    /// A base/head commit pair (`base..head`).
    Commits { base: String, head: String },
}

/// One skill dispatch request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub skill: String,
    /// Provided input values, overlaid on skill defaults.
    pub inputs: BTreeMap<String, serde_json::Value>,
    pub diff: DiffSource,
    /// Per-invocation timeout override. Falls back to `claude.timeout`,
    /// then the built-in 5 minute default.
    pub timeout: Option<Duration>,
    /// Reuse an existing session; a fresh one is created when absent.
    pub session: Option<SessionId>,
    /// Pull request to report findings to, when the platform supports it.
    pub pull_request: Option<u64>,
}

impl RunRequest {
    pub fn new(skill: impl Into<String>, diff: DiffSource) -> Self {
        Self {
            skill: skill.into(),
            inputs: BTreeMap::new(),
            diff,
            timeout: None,
            session: None,
            pull_request: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }
}
