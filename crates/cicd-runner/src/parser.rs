//! Stream parser — turns the agent's mixed-format output lines into typed
//! events and extracts findings.
//!
//! One line at a time: JSON lines decode into the envelope; non-JSON lines
//! are synthetic `error` events when they look like failures, otherwise
//! dropped. The parser is pure per invocation: feeding the same lines twice
//! yields the same events twice.

use cicd_core::error::Error;
use cicd_core::protocol::{EventKind, Finding, Severity, StreamEvent, TokenUsage};
use std::sync::OnceLock;
use tracing::{trace, warn};

/// Words that turn an opaque text line into a synthetic error event.
const ERROR_INDICATORS: &[&str] = &[
    "error", "failed", "exception", "cannot", "unable", "fatal", "panic",
];

/// Receives events in emission order. The default implementation buffers;
/// streaming callers forward instead.
pub trait EventHandler: Send {
    fn on_event(&mut self, event: StreamEvent);
}

/// Default buffering handler: keeps every event plus a running transcript of
/// textual content.
#[derive(Debug, Default)]
pub struct EventBuffer {
    pub events: Vec<StreamEvent>,
    pub transcript: String,
}

impl EventHandler for EventBuffer {
    fn on_event(&mut self, event: StreamEvent) {
        if matches!(event.kind, EventKind::Message | EventKind::ContentDelta) {
            if let Some(content) = event.content() {
                self.transcript.push_str(content);
                if event.kind == EventKind::Message && !content.ends_with('\n') {
                    self.transcript.push('\n');
                }
            }
        }
        self.events.push(event);
    }
}

/// Single-owner line parser in front of an [`EventHandler`].
pub struct StreamParser<H: EventHandler> {
    handler: H,
}

impl StreamParser<EventBuffer> {
    pub fn buffered() -> Self {
        Self::new(EventBuffer::default())
    }
}

impl<H: EventHandler> StreamParser<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Consume one output line.
    pub fn feed_line(&mut self, line: &str) {
        let trimmed = line.trim_end_matches('\r');
        if trimmed.trim().is_empty() {
            return;
        }
        if let Some(event) = StreamEvent::from_line(trimmed) {
            self.handler.on_event(event);
            return;
        }
        if is_error_line(trimmed) {
            self.handler.on_event(StreamEvent::synthetic_error(trimmed));
        } else {
            trace!(line = trimmed, "discarding opaque output line");
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_INDICATORS.iter().any(|needle| lower.contains(needle))
}

/// Structured findings from buffered `result` events, in emission order.
pub fn extract_findings(events: &[StreamEvent]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for event in events {
        if event.kind != EventKind::Result {
            continue;
        }
        let Some(issues) = event
            .data
            .as_ref()
            .and_then(|d| d.get("issues"))
            .and_then(|i| i.as_array())
        else {
            continue;
        };
        for issue in issues {
            match serde_json::from_value::<Finding>(issue.clone()) {
                Ok(finding) => findings.push(finding),
                Err(e) => warn!(error = %e, "skipping malformed issue in result event"),
            }
        }
    }
    findings
}

fn fallback_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"(?m)^([^\s:]+):(\d+):\s*([A-Za-z]+):\s*(.+)$").expect("fallback regex")
    })
}

/// Textual fallback: scan the transcript for `<path>:<line>: <SEVERITY>:
/// <message>` lines and synthesize findings.
pub fn fallback_findings(transcript: &str) -> Vec<Finding> {
    fallback_pattern()
        .captures_iter(transcript)
        .map(|caps| Finding {
            severity: Severity::from_keyword(&caps[3]),
            category: Default::default(),
            file: caps[1].to_string(),
            line: caps[2].parse().unwrap_or(0),
            rule: None,
            message: caps[4].trim().to_string(),
            suggestion: None,
            snippet: None,
        })
        .collect()
}

/// Findings from structured results, or the textual fallback when no
/// `result` event carried any.
pub fn findings_with_fallback(events: &[StreamEvent], transcript: &str) -> Vec<Finding> {
    let has_result = events.iter().any(|e| {
        e.kind == EventKind::Result && e.data.as_ref().is_some_and(|d| d.get("issues").is_some())
    });
    if has_result {
        extract_findings(events)
    } else {
        fallback_findings(transcript)
    }
}

/// Token usage from the last `result` event that carries one.
pub fn extract_usage(events: &[StreamEvent]) -> Option<TokenUsage> {
    events
        .iter()
        .rev()
        .filter(|e| e.kind == EventKind::Result)
        .find_map(|e| {
            e.data
                .as_ref()
                .and_then(|d| d.get("usage"))
                .and_then(|u| serde_json::from_value(u.clone()).ok())
        })
}

/// First error event, classified into a typed error.
pub fn first_error(events: &[StreamEvent]) -> Option<Error> {
    events
        .iter()
        .find(|e| e.kind == EventKind::Error)
        .map(|e| {
            let message = e
                .error
                .clone()
                .or_else(|| e.content().map(String::from))
                .unwrap_or_else(|| "agent reported an error".into());
            Error::classify(message)
        })
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Summary: content under the first `## Summary` heading up to the next
/// `##`; falls back to the first non-heading paragraph.
pub fn extract_summary(transcript: &str) -> String {
    let lines: Vec<&str> = transcript.lines().collect();
    let summary_at = lines.iter().position(|line| {
        let trimmed = line.trim_start();
        trimmed
            .strip_prefix("##")
            .map(|rest| rest.trim().to_lowercase().starts_with("summary"))
            .unwrap_or(false)
    });

    if let Some(start) = summary_at {
        let mut collected = Vec::new();
        for line in &lines[start + 1..] {
            if line.trim_start().starts_with("##") {
                break;
            }
            if line.trim().is_empty() {
                if collected.is_empty() {
                    continue;
                }
                break;
            }
            if !is_heading(line) {
                collected.push(line.trim().to_string());
            }
        }
        if !collected.is_empty() {
            return collected.join("\n");
        }
    }

    // First non-heading paragraph.
    let mut paragraph = Vec::new();
    for line in &lines {
        if line.trim().is_empty() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        if is_heading(line) {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(line.trim().to_string());
    }
    paragraph.join("\n")
}
