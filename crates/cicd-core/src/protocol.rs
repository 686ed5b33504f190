//! Agent wire protocol — stream-json envelope and structured findings
//!
//! The agent emits one JSON object per stdout line:
//!
//!   { "type": "content_delta", "timestamp": "...", "data": { "content": "..." } }
//!   { "type": "result", "data": { "issues": [ ... ], "usage": { ... } } }
//!   { "type": "error", "error": "rate limit reached" }
//!
//! Unknown `type` values decode as `message`; `data` and `metadata` are kept
//! opaque and forwarded untouched.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Discriminator of a stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    ContentDelta,
    ToolUse,
    Thinking,
    Result,
    Error,
}

impl EventKind {
    /// Decode a wire `type` string. Unknown types are treated as `message`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "content_delta" => Self::ContentDelta,
            "tool_use" => Self::ToolUse,
            "thinking" => Self::Thinking,
            "result" => Self::Result,
            "error" => Self::Error,
            _ => Self::Message,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ContentDelta => "content_delta",
            Self::ToolUse => "tool_use",
            Self::Thinking => "thinking",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

/// Raw envelope as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// One parsed item from the agent's output stream.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl StreamEvent {
    /// Decode a single output line. Returns `None` when the line is not a
    /// JSON object (the parser then applies its text classification).
    pub fn from_line(line: &str) -> Option<Self> {
        let wire: WireEvent = serde_json::from_str(line).ok()?;
        Some(Self {
            kind: EventKind::from_wire(&wire.kind),
            timestamp: wire.timestamp,
            data: wire.data,
            error: wire.error,
            metadata: wire.metadata,
        })
    }

    /// Synthetic error event for a non-JSON line that matched the error
    /// indicators.
    pub fn synthetic_error(line: &str) -> Self {
        Self {
            kind: EventKind::Error,
            timestamp: None,
            data: None,
            error: Some(line.to_string()),
            metadata: None,
        }
    }

    /// Textual content carried by this event, if any.
    pub fn content(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
    }
}

/// Finding severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Best-effort mapping from free-form severity words.
    pub fn from_keyword(s: &str) -> Self {
        let lower = s.to_lowercase();
        if lower.contains("critical") || lower.contains("blocker") {
            Self::Critical
        } else if lower.contains("high") || lower.contains("major") || lower.contains("error") {
            Self::High
        } else if lower.contains("low") || lower.contains("minor") || lower.contains("info") {
            Self::Low
        } else {
            Self::Medium
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Performance,
    Logic,
    Architecture,
    Style,
    #[default]
    Other,
}

/// A structured issue surfaced by a skill. Ordering within one invocation
/// follows the agent's emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    #[serde(default)]
    pub category: Category,
    pub file: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Token usage and spend reported by the agent's final result event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Aggregated output of one skill dispatch.
#[derive(Debug, Clone, Default)]
pub struct InvocationResult {
    /// Raw transcript of textual content, in emission order.
    pub transcript: String,
    pub findings: Vec<Finding>,
    pub summary: String,
    pub usage: Option<TokenUsage>,
    /// Number of retries performed (0 = first attempt succeeded).
    pub retries: u32,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    /// Set when a `content_too_large` fallback returned accumulated findings.
    pub partial: bool,
    pub duration: Duration,
    pub error: Option<Error>,
}

impl InvocationResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Highest severity among the findings, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).min()
    }

    /// Merge another chunk's result into this one, preserving chunk order.
    pub fn absorb(&mut self, other: InvocationResult) {
        if !self.transcript.is_empty() && !other.transcript.is_empty() {
            self.transcript.push('\n');
        }
        self.transcript.push_str(&other.transcript);
        self.findings.extend(other.findings);
        if self.summary.is_empty() {
            self.summary = other.summary;
        }
        self.usage = match (self.usage, other.usage) {
            (Some(a), Some(b)) => Some(TokenUsage {
                input_tokens: a.input_tokens + b.input_tokens,
                output_tokens: a.output_tokens + b.output_tokens,
                cost_usd: match (a.cost_usd, b.cost_usd) {
                    (Some(x), Some(y)) => Some(x + y),
                    (x, y) => x.or(y),
                },
            }),
            (a, b) => a.or(b),
        };
        self.retries += other.retries;
        self.partial |= other.partial;
        self.skipped |= other.skipped;
        if self.skip_reason.is_none() {
            self.skip_reason = other.skip_reason;
        }
        self.duration += other.duration;
        if self.error.is_none() {
            self.error = other.error;
        }
    }
}
