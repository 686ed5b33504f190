//! Agent CLI argument composition.
//!
//! The agent is always driven headless (`--print`). Streaming requires
//! `--output-format stream-json` together with `--verbose`. The first
//! invocation on a session passes `--session-id <uuid>`; later invocations
//! pass `--resume <uuid>`.

use cicd_core::config::{ClaudeConfig, OutputFormat};
use cicd_core::types::SessionId;
use cicd_skills::Skill;

/// Compose the argument vector for one agent invocation.
pub fn build_args(
    config: &ClaudeConfig,
    skill: Option<&Skill>,
    session: &SessionId,
    resume: bool,
) -> Vec<String> {
    let mut args = vec!["--print".to_string()];

    args.push("--output-format".into());
    args.push(config.output_format.as_str().into());
    if config.output_format == OutputFormat::StreamJson {
        // The agent refuses stream output without verbose mode.
        args.push("--verbose".into());
    }

    if resume {
        args.push("--resume".into());
    } else {
        args.push("--session-id".into());
    }
    args.push(session.to_string());

    if let Some(ref model) = config.model {
        args.push("--model".into());
        args.push(model.clone());
    }

    let tools = allowed_tools(config, skill);
    if !tools.is_empty() {
        args.push("--allowed-tools".into());
        args.push(tools.join(","));
    }

    if let Some(turns) = config.max_turns {
        args.push("--max-turns".into());
        args.push(turns.to_string());
    }

    if let Some(budget) = config.max_budget_usd {
        args.push("--max-budget-usd".into());
        args.push(format!("{budget}"));
    }

    if let Some(ref timeout) = config.timeout {
        args.push("--timeout".into());
        args.push(timeout.clone());
    }

    if config.dangerous_skip_permissions {
        args.push("--dangerously-skip-permissions".into());
    }

    args
}

/// Effective tool allow list: the skill's allow list when present, otherwise
/// the config-wide one, minus anything the skill denies.
fn allowed_tools(config: &ClaudeConfig, skill: Option<&Skill>) -> Vec<String> {
    let base: Vec<String> = match skill {
        Some(s) if !s.tools().allow.is_empty() => s.tools().allow.clone(),
        _ => config.allowed_tools.clone(),
    };
    let denied: Vec<&String> = skill.map(|s| s.tools().deny.iter().collect()).unwrap_or_default();
    base.into_iter()
        .filter(|tool| !denied.iter().any(|d| *d == tool))
        .collect()
}
