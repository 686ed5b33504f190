//! cicd — drive an AI agent over a pull-request diff and report findings.

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use cicd_core::config::Config;
use cicd_core::types::{DiffSource, RunRequest};
use cicd_platform::{GithubPlatform, InMemoryPlatform, Platform};
use cicd_runner::runner::exit_code;
use cicd_runner::{Runner, RunnerOptions};

#[derive(Parser)]
#[command(name = "cicd", about = "AI code-review automation for pull requests")]
struct Cli {
    /// Skill to dispatch
    #[arg(long, default_value = "code-review")]
    skill: String,

    /// Path to the YAML config file
    #[arg(long, default_value = ".cicd.yaml")]
    config: String,

    /// Workspace root (a git checkout)
    #[arg(long, default_value = ".")]
    workspace: String,

    /// Skill input as NAME=VALUE; VALUE may be JSON. Repeatable.
    #[arg(long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<String>,

    /// Base commit. Together with --head reviews base..head instead of the
    /// working tree.
    #[arg(long)]
    base: Option<String>,

    /// Head commit
    #[arg(long)]
    head: Option<String>,

    /// Review staged changes only
    #[arg(long, default_value_t = false)]
    staged: bool,

    /// Pull request number to report findings to
    #[arg(long)]
    pull_request: Option<u64>,

    /// Additional skill directory. Repeatable.
    #[arg(long = "skill-dir")]
    skill_dirs: Vec<String>,

    /// Session id to resume
    #[arg(long)]
    session: Option<String>,

    /// Per-invocation timeout override (e.g. "90s", "5m")
    #[arg(long)]
    timeout: Option<String>,
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Config::from_yaml(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => anyhow::bail!("read {path}: {e}"),
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.global.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_inputs(pairs: &[String]) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
    let mut inputs = BTreeMap::new();
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--input expects NAME=VALUE, got `{pair}`"))?;
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        inputs.insert(name.to_string(), value);
    }
    Ok(inputs)
}

fn diff_source(cli: &Cli) -> anyhow::Result<DiffSource> {
    match (&cli.base, &cli.head) {
        (Some(base), Some(head)) => Ok(DiffSource::Commits {
            base: base.clone(),
            head: head.clone(),
        }),
        (None, None) => Ok(DiffSource::WorkingTree { staged: cli.staged }),
        _ => anyhow::bail!("--base and --head must be given together"),
    }
}

fn build_request(cli: &Cli) -> anyhow::Result<RunRequest> {
    let mut request = RunRequest::new(cli.skill.clone(), diff_source(cli)?);
    request.inputs = parse_inputs(&cli.inputs)?;
    request.pull_request = cli.pull_request;
    request.session = cli.session.as_deref().map(Into::into);
    request.timeout = cli
        .timeout
        .as_deref()
        .map(cicd_core::config::parse_duration)
        .transpose()?;
    Ok(request)
}

async fn run(cli: &Cli, runner: &Arc<Runner>, fail_on: Option<cicd_core::Severity>) -> i32 {
    if let Err(e) = runner.bootstrap().await {
        eprintln!("cicd: bootstrap failed: {e}");
        return 2;
    }

    let request = match build_request(cli) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("cicd: {e}");
            let _ = runner.shutdown().await;
            return 2;
        }
    };

    let outcome = runner.run(request).await;
    if let Err(e) = runner.shutdown().await {
        tracing::warn!(error = %e, "shutdown was not clean");
    }

    match &outcome {
        Ok(result) => {
            if result.skipped {
                println!(
                    "skipped: {}",
                    result.skip_reason.as_deref().unwrap_or("unknown reason")
                );
            } else {
                if !result.summary.is_empty() {
                    println!("{}\n", result.summary);
                }
                for finding in &result.findings {
                    println!(
                        "{}:{}: {}: {}",
                        finding.file, finding.line, finding.severity, finding.message
                    );
                }
                if result.partial {
                    println!("(partial results: diff exceeded the context budget)");
                }
                if let Some(ref error) = result.error {
                    eprintln!("cicd: run failed after {} retries: {error}", result.retries);
                }
            }
        }
        Err(e) => eprintln!("cicd: {e}"),
    }
    exit_code(&outcome, fail_on)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cicd: {e}");
            std::process::exit(2);
        }
    };
    init_tracing(&config);

    let platform: Arc<dyn Platform> = match GithubPlatform::detect(&config.platform) {
        Some(github) => Arc::new(github),
        None => {
            tracing::info!("no forge detected, findings stay local");
            Arc::new(InMemoryPlatform::new())
        }
    };

    let mut skill_roots: Vec<PathBuf> = cli.skill_dirs.iter().map(PathBuf::from).collect();
    let default_root = PathBuf::from(&cli.workspace).join("skills");
    if default_root.is_dir() {
        skill_roots.push(default_root);
    }

    let fail_on = config.global.fail_on_severity;
    let runner = Runner::new(
        config,
        RunnerOptions {
            workspace: PathBuf::from(&cli.workspace),
            skill_roots,
            ..Default::default()
        },
        platform,
    );

    let code = run(&cli, &runner, fail_on).await;
    std::process::exit(code);
}
