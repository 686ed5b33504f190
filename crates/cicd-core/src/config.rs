//! Validated configuration model.
//!
//! The core consumes an already-decoded [`Config`] value; file discovery and
//! merging live in the binary. `validate()` must pass before a config reaches
//! the runner.

use crate::error::{Error, Result};
use crate::protocol::Severity;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 32_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub claude: ClaudeConfig,
    pub skills: Vec<SkillRef>,
    pub platform: PlatformConfig,
    pub global: GlobalConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    /// Agent binary name or path. Resolved on PATH when relative.
    pub binary: String,
    /// Model tier, e.g. `sonnet`, `opus`, `haiku`.
    pub model: Option<String>,
    /// Per-invocation spend cap in USD.
    pub max_budget_usd: Option<f64>,
    /// Reasoning iteration cap (1..1000).
    pub max_turns: Option<u32>,
    /// Per-invocation timeout, duration string ("90s", "5m").
    pub timeout: Option<String>,
    pub output_format: OutputFormat,
    /// Adds the permission-bypass flag. Trusted environments only.
    pub dangerous_skip_permissions: bool,
    pub allowed_tools: Vec<String>,
    /// Session idle TTL, duration string. Default 24h.
    pub session_ttl: Option<String>,
    pub max_retries: u32,
    /// Token budget per context chunk.
    pub max_chunk_tokens: usize,
    /// Spawn one pooled session during bootstrap.
    pub prewarm: bool,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            model: None,
            max_budget_usd: None,
            max_turns: None,
            timeout: None,
            output_format: OutputFormat::default(),
            dangerous_skip_permissions: false,
            allowed_tools: Vec::new(),
            session_ttl: None,
            max_retries: DEFAULT_MAX_RETRIES,
            max_chunk_tokens: DEFAULT_MAX_CHUNK_TOKENS,
            prewarm: false,
        }
    }
}

impl ClaudeConfig {
    pub fn invocation_timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
            .unwrap_or(DEFAULT_INVOCATION_TIMEOUT)
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
            .unwrap_or(DEFAULT_SESSION_TTL)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    Json,
    #[default]
    StreamJson,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

/// One configured skill directory.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillRef {
    pub name: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Forge kind, e.g. `github`. Adapters may also self-detect from the
    /// process environment.
    pub provider: Option<String>,
    pub base_url: Option<String>,
    /// `owner/repo` slug.
    pub repository: Option<String>,
    /// Name of the environment variable holding the API token. Token values
    /// never appear in config files.
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Bounded skill-batch concurrency (1..10).
    pub parallel_skills: usize,
    /// Lines of diff context passed to git (-U<n>), 0..20.
    pub diff_context: u32,
    /// Extra ignore globs for the context assembler.
    pub exclude: Vec<String>,
    /// Findings at or above this severity fail the build (exit code 1).
    pub fail_on_severity: Option<Severity>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            parallel_skills: 1,
            diff_context: 3,
            exclude: Vec::new(),
            fail_on_severity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl Config {
    /// Decode from YAML and validate.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)
            .map_err(|e| Error::invalid_input(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(budget) = self.claude.max_budget_usd {
            if budget < 0.0 {
                return Err(Error::invalid_input(format!(
                    "claude.max_budget_usd must be >= 0, got {budget}"
                )));
            }
        }
        if let Some(turns) = self.claude.max_turns {
            if !(1..=1000).contains(&turns) {
                return Err(Error::invalid_input(format!(
                    "claude.max_turns must be in 1..1000, got {turns}"
                )));
            }
        }
        if let Some(ref t) = self.claude.timeout {
            parse_duration(t)?;
        }
        if let Some(ref t) = self.claude.session_ttl {
            parse_duration(t)?;
        }
        if self.claude.max_chunk_tokens == 0 {
            return Err(Error::invalid_input("claude.max_chunk_tokens must be > 0"));
        }
        if !(1..=10).contains(&self.global.parallel_skills) {
            return Err(Error::invalid_input(format!(
                "global.parallel_skills must be in 1..10, got {}",
                self.global.parallel_skills
            )));
        }
        if self.global.diff_context > 20 {
            return Err(Error::invalid_input(format!(
                "global.diff_context must be in 0..20, got {}",
                self.global.diff_context
            )));
        }
        for glob in &self.global.exclude {
            globset::Glob::new(glob)
                .map_err(|e| Error::invalid_input(format!("global.exclude `{glob}`: {e}")))?;
        }
        for skill in &self.skills {
            if skill.name.trim().is_empty() {
                return Err(Error::invalid_input("skills[].name must not be empty"));
            }
        }
        Ok(())
    }
}

/// Parse a duration string: bare seconds (`"300"`) or a number with an
/// `ms`/`s`/`m`/`h` suffix (`"100ms"`, `"90s"`, `"5m"`, `"24h"`).
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let bad = || Error::invalid_input(format!("invalid duration `{s}`"));

    let (number, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: f64 = number.trim().parse().map_err(|_| bad())?;
    if value < 0.0 || !value.is_finite() {
        return Err(bad());
    }
    let millis = match unit.trim() {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return Err(bad()),
    };
    Ok(Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn rejects_out_of_range_turns() {
        let mut config = Config::default();
        config.claude.max_turns = Some(0);
        assert!(config.validate().is_err());
        config.claude.max_turns = Some(1001);
        assert!(config.validate().is_err());
        config.claude.max_turns = Some(50);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_parallelism() {
        let mut config = Config::default();
        config.global.parallel_skills = 0;
        assert!(config.validate().is_err());
        config.global.parallel_skills = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_budget() {
        let mut config = Config::default();
        config.claude.max_budget_usd = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_exclude_glob() {
        let mut config = Config::default();
        config.global.exclude = vec!["[".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_decode() {
        let yaml = r#"
claude:
  model: sonnet
  timeout: 2m
  max_retries: 5
skills:
  - name: code-review
    path: ./skills/code-review
global:
  log_level: debug
  parallel_skills: 2
  exclude: ["*.generated.go"]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.claude.model.as_deref(), Some("sonnet"));
        assert_eq!(config.claude.invocation_timeout(), Duration::from_secs(120));
        assert_eq!(config.claude.max_retries, 5);
        assert_eq!(config.skills.len(), 1);
        assert!(config.skills[0].enabled);
        assert_eq!(config.global.log_level, LogLevel::Debug);
    }

    #[test]
    fn ttl_defaults_to_24h() {
        let config = Config::default();
        assert_eq!(config.claude.session_ttl(), Duration::from_secs(86_400));
    }
}
