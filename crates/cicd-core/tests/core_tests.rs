//! Tests for cicd-core: ids, state machine, protocol envelope, errors, config

use cicd_core::config::{parse_duration, Config};
use cicd_core::error::{classify_message, Error, ErrorCode, Fallback};
use cicd_core::observe::{Metrics, RecordingMetrics};
use cicd_core::paths::atomic_write;
use cicd_core::*;
use std::time::Duration;

// ===========================================================================
// SessionId
// ===========================================================================

#[test]
fn session_id_new_and_display() {
    let id = SessionId::new("abc-123");
    assert_eq!(id.as_str(), "abc-123");
    assert_eq!(format!("{}", id), "abc-123");
}

#[test]
fn session_id_generate_looks_like_uuid() {
    let id = SessionId::generate();
    assert_eq!(id.as_str().len(), 36);
    assert_eq!(id.as_str().matches('-').count(), 4);
}

#[test]
fn session_id_equality_and_hash() {
    use std::collections::HashSet;
    let a = SessionId::new("same");
    let b = SessionId::new("same");
    let c = SessionId::new("different");
    assert_eq!(a, b);
    assert_ne!(a, c);
    let mut set = HashSet::new();
    set.insert(a.clone());
    assert!(set.contains(&b));
    assert!(!set.contains(&c));
}

// ===========================================================================
// Stream envelope
// ===========================================================================

#[test]
fn envelope_decodes_every_known_type() {
    for (wire, kind) in [
        ("message", EventKind::Message),
        ("content_delta", EventKind::ContentDelta),
        ("tool_use", EventKind::ToolUse),
        ("thinking", EventKind::Thinking),
        ("result", EventKind::Result),
        ("error", EventKind::Error),
    ] {
        let line = format!(r#"{{"type":"{wire}"}}"#);
        let ev = StreamEvent::from_line(&line).unwrap();
        assert_eq!(ev.kind, kind, "type {wire}");
    }
}

#[test]
fn envelope_never_crashes_on_unknown_type() {
    let ev = StreamEvent::from_line(r#"{"type":"v2_experimental","data":{"nested":[1,{"a":2}]}}"#)
        .unwrap();
    assert_eq!(ev.kind, EventKind::Message);
}

#[test]
fn envelope_with_timestamp() {
    let ev =
        StreamEvent::from_line(r#"{"type":"message","timestamp":"2025-03-01T12:00:00Z"}"#).unwrap();
    assert!(ev.timestamp.is_some());
}

#[test]
fn content_accessor_reads_data_content() {
    let ev = StreamEvent::from_line(r#"{"type":"content_delta","data":{"content":"hi"}}"#).unwrap();
    assert_eq!(ev.content(), Some("hi"));
}

#[test]
fn finding_decodes_from_result_issue_shape() {
    let json = r#"{
        "severity": "high",
        "category": "logic",
        "file": "a.go",
        "line": 12,
        "message": "off-by-one"
    }"#;
    let finding: Finding = serde_json::from_str(json).unwrap();
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.category, Category::Logic);
    assert_eq!(finding.line, 12);
    assert!(finding.rule.is_none());
}

#[test]
fn finding_defaults_missing_category() {
    let json = r#"{"severity":"low","file":"b.rs","message":"m"}"#;
    let finding: Finding = serde_json::from_str(json).unwrap();
    assert_eq!(finding.category, Category::Other);
    assert_eq!(finding.line, 0);
}

// ===========================================================================
// Error taxonomy
// ===========================================================================

#[test]
fn error_codes_render_snake_case() {
    assert_eq!(ErrorCode::RateLimited.as_str(), "rate_limited");
    assert_eq!(ErrorCode::ContentTooLarge.as_str(), "content_too_large");
    assert_eq!(ErrorCode::AgentNotFound.as_str(), "agent_not_found");
    assert_eq!(ErrorCode::NotInitialized.as_str(), "not_initialized");
}

#[test]
fn classify_then_code_is_stable() {
    let err = Error::classify("upstream said: 502 Bad Gateway");
    assert_eq!(err.code(), ErrorCode::ServerError);
    assert_eq!(err.code().fallback(), Fallback::Retry);
}

#[test]
fn classify_prefers_agent_not_found_over_generic() {
    assert_eq!(
        classify_message("spawn failed: executable file not found in PATH"),
        ErrorCode::AgentNotFound
    );
}

#[test]
fn io_not_found_becomes_agent_not_found() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "claude");
    let err: Error = io.into();
    assert_eq!(err.code(), ErrorCode::AgentNotFound);
}

// ===========================================================================
// Config
// ===========================================================================

#[test]
fn config_full_yaml_surface() {
    let yaml = r#"
claude:
  model: opus
  max_budget_usd: 2.5
  max_turns: 40
  timeout: 5m
  output_format: stream-json
  dangerous_skip_permissions: false
  allowed_tools: ["Read", "Grep"]
  session_ttl: 24h
  max_retries: 3
skills:
  - name: code-review
    path: ./skills/code-review
    enabled: true
  - name: test-gen
    path: ./skills/test-gen
    enabled: false
platform:
  provider: github
  repository: acme/widget
  token_env: GITHUB_TOKEN
global:
  log_level: warn
  parallel_skills: 3
  diff_context: 5
  exclude: ["*.pb.go"]
  fail_on_severity: high
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.claude.max_turns, Some(40));
    assert_eq!(config.claude.allowed_tools, vec!["Read", "Grep"]);
    assert_eq!(config.skills[1].enabled, false);
    assert_eq!(config.platform.token_env.as_deref(), Some("GITHUB_TOKEN"));
    assert_eq!(config.global.fail_on_severity, Some(Severity::High));
}

#[test]
fn config_rejects_diff_context_over_20() {
    let yaml = "global:\n  diff_context: 21\n";
    assert!(Config::from_yaml(yaml).is_err());
}

#[test]
fn duration_parse_rejects_garbage_units() {
    assert!(parse_duration("5 fortnights").is_err());
}

#[test]
fn timeout_falls_back_to_five_minutes() {
    let config = Config::default();
    assert_eq!(
        config.claude.invocation_timeout(),
        Duration::from_secs(300)
    );
}

// ===========================================================================
// Atomic writes (L3)
// ===========================================================================

#[test]
fn atomic_write_target_is_never_partial() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("findings.json");
    atomic_write(&target, b"{\"v\":1}").unwrap();

    // Overwrite many times; target must always hold a complete value.
    for i in 0..50u32 {
        let body = format!("{{\"v\":{i}}}");
        atomic_write(&target, body.as_bytes()).unwrap();
        let read = std::fs::read_to_string(&target).unwrap();
        assert!(read.starts_with('{') && read.ends_with('}'), "partial: {read}");
    }
}

// ===========================================================================
// Metrics
// ===========================================================================

#[test]
fn metrics_trait_object_is_usable() {
    let recording = RecordingMetrics::new();
    let sink: &dyn Metrics = &recording;
    sink.incr("runner.fallback.timeout");
    sink.observe_duration("bootstrap.total", Duration::from_millis(3));
    assert_eq!(recording.counter("runner.fallback.timeout"), 1);
}
