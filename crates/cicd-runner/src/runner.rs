//! Runner orchestrator — top-level state machine.
//!
//! `bootstrap` → `run` → `shutdown`. The orchestrator coordinates the other
//! components and owns none of their logic: retry policy lives in the
//! executor, timing in the watchdog, parsing in the stream parser.

use crate::context::{AssemblerOptions, ContextAssembler};
use crate::parser::{self, StreamParser};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::session::{SessionPool, SessionPoolOptions};
use crate::supervisor::{Supervisor, SupervisorOptions};
use crate::watchdog::{Watchdog, WatchdogOptions};
use crate::{agent, workers};
use cicd_core::config::{parse_duration, Config};
use cicd_core::error::{Error, Result};
use cicd_core::observe::{Metrics, NoopMetrics};
use cicd_core::protocol::{EventKind, InvocationResult, Severity};
use cicd_core::types::{RunRequest, RunnerState, SessionId};
use cicd_platform::Platform;
use cicd_skills::{Skill, SkillLoader, SkillRegistry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BOOTSTRAP_BUDGET: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub workspace: PathBuf,
    /// Directories scanned for skills, in addition to `skills[]` entries.
    pub skill_roots: Vec<PathBuf>,
    /// Grace window for shutdown and per-process termination.
    pub graceful_timeout: Duration,
    pub watchdog_check_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            skill_roots: Vec::new(),
            graceful_timeout: Duration::from_secs(5),
            watchdog_check_interval: Duration::from_millis(100),
        }
    }
}

pub struct Runner {
    config: Config,
    options: RunnerOptions,
    registry: Arc<SkillRegistry>,
    platform: Arc<dyn Platform>,
    metrics: Arc<dyn Metrics>,
    state: Mutex<RunnerState>,
    cancel: Mutex<CancellationToken>,
    pool: Mutex<Arc<SessionPool>>,
    signal_task: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    pub fn new(config: Config, options: RunnerOptions, platform: Arc<dyn Platform>) -> Arc<Self> {
        Self::with_metrics(config, options, platform, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        config: Config,
        options: RunnerOptions,
        platform: Arc<dyn Platform>,
        metrics: Arc<dyn Metrics>,
    ) -> Arc<Self> {
        let pool = SessionPool::new(SessionPoolOptions {
            ttl: config.claude.session_ttl(),
            ..Default::default()
        });
        Arc::new(Self {
            config,
            options,
            registry: Arc::new(SkillRegistry::new()),
            platform,
            metrics,
            state: Mutex::new(RunnerState::Uninitialized),
            cancel: Mutex::new(CancellationToken::new()),
            pool: Mutex::new(pool),
            signal_task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock().expect("state poisoned")
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    /// Ambient cancellation handle for this runner generation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().expect("cancel poisoned").clone()
    }

    fn pool(&self) -> Arc<SessionPool> {
        self.pool.lock().expect("pool poisoned").clone()
    }

    /// Initialize the runner: validate config and workspace, scan skills,
    /// install the signal handler, optionally pre-warm one session.
    /// Idempotent from `Uninitialized` or `Stopped`; a no-op when already
    /// `Ready`.
    pub async fn bootstrap(&self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state poisoned");
            match *state {
                RunnerState::Uninitialized => *state = RunnerState::Initializing,
                RunnerState::Stopped => {
                    // A stopped runner gets a fresh cancellation generation
                    // and session pool.
                    *self.cancel.lock().expect("cancel poisoned") = CancellationToken::new();
                    *self.pool.lock().expect("pool poisoned") =
                        SessionPool::new(SessionPoolOptions {
                            ttl: self.config.claude.session_ttl(),
                            ..Default::default()
                        });
                    *state = RunnerState::Initializing;
                }
                RunnerState::Ready => return Ok(()),
                other => {
                    return Err(Error::InvalidState(format!("bootstrap from {other}")));
                }
            }
        }

        let started = Instant::now();
        let (config_result, workspace_result, skills_result) = tokio::join!(
            self.timed_phase("config", async { self.config.validate() }),
            self.timed_phase("workspace", self.validate_workspace()),
            self.timed_phase("skills", self.scan_skills()),
        );

        if let Err(e) = config_result.and(workspace_result).and(skills_result) {
            *self.state.lock().expect("state poisoned") = RunnerState::Uninitialized;
            return Err(e);
        }

        self.install_signal_handler();

        if self.config.claude.prewarm {
            if let Err(e) = self.pool().get_or_create(None).await {
                warn!(error = %e, "session pre-warm failed");
            }
        }

        let total = started.elapsed();
        self.metrics.observe_duration("bootstrap.total", total);
        if total > BOOTSTRAP_BUDGET {
            warn!(elapsed_ms = total.as_millis() as u64, "bootstrap exceeded 3s budget");
        }

        {
            let mut state = self.state.lock().expect("state poisoned");
            if *state == RunnerState::Initializing {
                *state = RunnerState::Ready;
            }
        }
        info!(elapsed_ms = total.as_millis() as u64, skills = self.registry.len(), "runner ready");
        Ok(())
    }

    async fn timed_phase<F>(&self, name: &str, work: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let started = Instant::now();
        let result = work.await;
        let elapsed = started.elapsed();
        self.metrics
            .observe_duration(&format!("bootstrap.{name}"), elapsed);
        debug!(phase = name, elapsed_ms = elapsed.as_millis() as u64, "bootstrap phase done");
        result
    }

    /// The workspace must be a source-controlled directory.
    async fn validate_workspace(&self) -> Result<()> {
        let workspace = self.options.workspace.clone();
        if !workspace.is_dir() {
            return Err(Error::workspace_invalid(format!(
                "{} is not a directory",
                workspace.display()
            )));
        }
        if !workspace.join(".git").exists() {
            return Err(Error::workspace_invalid(format!(
                "{} is not under source control",
                workspace.display()
            )));
        }
        Ok(())
    }

    async fn scan_skills(&self) -> Result<()> {
        // Explicit config entries first; a disabled skill is not loaded.
        for skill_ref in &self.config.skills {
            if !skill_ref.enabled {
                debug!(skill = %skill_ref.name, "skill disabled, skipping");
                continue;
            }
            let dir = self.options.workspace.join(&skill_ref.path);
            match SkillLoader::load_dir(&dir) {
                Ok(skill) => self.registry.register(skill),
                Err(e) => warn!(skill = %skill_ref.name, error = %e, "configured skill failed to load"),
            }
        }
        if !self.options.skill_roots.is_empty() {
            let loader = SkillLoader::new(self.options.skill_roots.clone());
            self.registry.load_from(&loader);
        }
        Ok(())
    }

    /// Translate SIGINT/SIGTERM into a graceful shutdown. Installed during
    /// bootstrap, removed during shutdown; no process-global state.
    fn install_signal_handler(&self) {
        let cancel = self.cancel_token();
        let handle = tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut term = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(term) => term,
                    Err(e) => {
                        warn!(error = %e, "SIGTERM handler unavailable");
                        let _ = tokio::signal::ctrl_c().await;
                        cancel.cancel();
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            info!("termination signal received, cancelling in-flight work");
            cancel.cancel();
        });
        *self.signal_task.lock().expect("signal task poisoned") = Some(handle);
    }

    /// Dispatch one skill against the request's diff. Requires `Ready`;
    /// a second concurrent call is rejected by the state machine.
    pub async fn run(&self, request: RunRequest) -> Result<InvocationResult> {
        {
            let mut state = self.state.lock().expect("state poisoned");
            if *state != RunnerState::Ready {
                return Err(Error::NotInitialized);
            }
            *state = RunnerState::Running;
        }

        let result = self.run_inner(&request).await;

        {
            let mut state = self.state.lock().expect("state poisoned");
            if *state == RunnerState::Running {
                *state = RunnerState::Ready;
            }
        }
        result
    }

    async fn run_inner(&self, request: &RunRequest) -> Result<InvocationResult> {
        let cancel = self.cancel_token();
        let skill = self.registry.get(&request.skill)?;
        let inputs = skill.resolve_inputs(&request.inputs)?;

        let assembler = ContextAssembler::new(
            &self.options.workspace,
            AssemblerOptions {
                max_chunk_tokens: self.config.claude.max_chunk_tokens,
                diff_context: self.config.global.diff_context,
                exclude: self.config.global.exclude.clone(),
            },
        )?;
        let chunks = assembler.assemble(&skill, &inputs, &request.diff).await?;
        if chunks.is_empty() {
            info!(skill = %skill.name(), "no reviewable changes, nothing to dispatch");
            return Ok(InvocationResult {
                summary: "No reviewable changes in the diff.".into(),
                ..Default::default()
            });
        }

        let pool = self.pool();
        let session = pool.get_or_create(request.session.clone()).await?;
        let mut slot = tokio::select! {
            guard = session.acquire() => guard,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let timeout = request
            .timeout
            .or_else(|| {
                skill
                    .options()
                    .timeout
                    .as_deref()
                    .and_then(|t| parse_duration(t).ok())
            })
            .unwrap_or_else(|| self.config.claude.invocation_timeout());

        let executor = RetryExecutor::new(
            RetryPolicy::with_max_retries(self.config.claude.max_retries),
            self.metrics.clone(),
        );

        let mut aggregate = InvocationResult::default();
        for chunk in &chunks {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!(chunk = chunk.index + 1, total = chunk.total, tokens = chunk.estimated_tokens,
                   "dispatching chunk");

            let resume = slot.invocations > 0;
            let result = executor
                .execute(&cancel, |_attempt| {
                    self.invoke_once(&skill, session.id(), resume, &chunk.text, timeout, &cancel)
                })
                .await;

            let failed = result.error.is_some();
            let skipped = result.skipped;
            let partial = result.partial;
            aggregate.absorb(result);

            if !failed && !skipped {
                slot.invocations += 1;
            }
            if let Some(error) = aggregate.error.clone() {
                match error {
                    Error::Cancelled => return Err(Error::Cancelled),
                    // Fatal codes abort the orchestrator.
                    e if e.code().fallback() == cicd_core::Fallback::Fatal => return Err(e),
                    _ => {}
                }
            }
            if skipped || partial || aggregate.error.is_some() {
                break;
            }
        }
        drop(slot);

        aggregate.summary = parser::extract_summary(&aggregate.transcript);
        if aggregate.summary.is_empty() && aggregate.skipped {
            aggregate.summary = aggregate.skip_reason.clone().unwrap_or_default();
        }

        // Session scratch keeps the last transcript for inspection.
        if !aggregate.transcript.is_empty() {
            let path = cicd_core::paths::session_dir(session.id().as_str()).join("transcript.log");
            if let Err(e) = cicd_core::paths::atomic_write(&path, aggregate.transcript.as_bytes()) {
                debug!(error = %e, "could not persist session transcript");
            }
        }

        if let Some(pull) = request.pull_request {
            let report = render_report(skill.name(), &aggregate);
            if let Err(e) = self.platform.post_comment(pull, &report).await {
                warn!(platform = self.platform.name(), error = %e, "failed to post findings");
            }
        }

        info!(
            skill = %skill.name(),
            findings = aggregate.findings.len(),
            retries = aggregate.retries,
            skipped = aggregate.skipped,
            "run complete"
        );
        Ok(aggregate)
    }

    /// One agent invocation: spawn, write the chunk, parse the stream under
    /// the watchdog, reap the exit status, classify the outcome.
    async fn invoke_once(
        &self,
        skill: &Skill,
        session_id: &SessionId,
        resume: bool,
        prompt: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult> {
        let started = Instant::now();
        let mut supervisor = Supervisor::new(
            &self.config.claude.binary,
            SupervisorOptions {
                grace: self.options.graceful_timeout,
                ..Default::default()
            },
        );
        supervisor.validate_prompt(prompt)?;

        let args = agent::build_args(&self.config.claude, Some(skill), session_id, resume);
        let env: HashMap<String, String> = HashMap::from([(
            "CICD_SESSION_DIR".to_string(),
            cicd_core::paths::session_dir(session_id.as_str())
                .to_string_lossy()
                .to_string(),
        )]);

        supervisor.start(&args, &env)?;
        let write_result = tokio::select! {
            result = supervisor.write_prompt(prompt) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        if let Err(e) = write_result {
            supervisor.stop().await;
            return Err(e);
        }
        let lines = supervisor.take_output_lines()?;

        let watchdog = Watchdog::new(WatchdogOptions {
            timeout,
            check_interval: self.options.watchdog_check_interval,
        });
        let metrics = self.metrics.clone();
        let read_cancel = cancel.clone();
        let read = async move {
            let mut lines = lines;
            let mut stream_parser = StreamParser::buffered();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => stream_parser.feed_line(&line),
                        Ok(None) => break,
                        Err(e) => return Err(Error::Unknown(format!("read agent output: {e}"))),
                    },
                    _ = read_cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
            Ok(stream_parser.into_handler())
        };

        let buffer = match watchdog
            .guard(read, || metrics.incr("runner.watchdog.fired"))
            .await
        {
            Ok(buffer) => buffer,
            Err(e) => {
                supervisor.stop().await;
                return Err(e);
            }
        };

        let status = match supervisor.wait(cancel).await {
            Ok(status) => status,
            Err(e) => {
                supervisor.stop().await;
                return Err(e);
            }
        };

        let has_result = buffer.events.iter().any(|e| e.kind == EventKind::Result);
        if !has_result {
            if let Some(error) = parser::first_error(&buffer.events) {
                return Err(error);
            }
            if !status.success() {
                let stderr = supervisor.stderr_output();
                let detail = if stderr.trim().is_empty() {
                    format!("agent exited with status {:?}", status.code())
                } else {
                    stderr
                };
                return Err(Error::classify(detail));
            }
        }

        Ok(InvocationResult {
            findings: parser::findings_with_fallback(&buffer.events, &buffer.transcript),
            summary: parser::extract_summary(&buffer.transcript),
            usage: parser::extract_usage(&buffer.events),
            transcript: buffer.transcript,
            duration: started.elapsed(),
            ..Default::default()
        })
    }

    /// Run several skills against the same diff under the configured
    /// concurrency bound (`global.parallel_skills`).
    ///
    /// The batch holds the `Running` state once; entries without an explicit
    /// session each get their own pooled session, so they may proceed
    /// concurrently while the pool has capacity.
    pub async fn run_batch(
        self: &Arc<Self>,
        requests: Vec<RunRequest>,
    ) -> Vec<Result<InvocationResult>> {
        {
            let mut state = self.state.lock().expect("state poisoned");
            if *state != RunnerState::Ready {
                return requests.iter().map(|_| Err(Error::NotInitialized)).collect();
            }
            *state = RunnerState::Running;
        }

        let cancel = self.cancel_token();
        let limit = self.config.global.parallel_skills;
        let runner = self.clone();
        let results = workers::map(limit, &cancel, requests, move |request| {
            let runner = runner.clone();
            async move { runner.run_inner(&request).await }
        })
        .await;

        {
            let mut state = self.state.lock().expect("state poisoned");
            if *state == RunnerState::Running {
                *state = RunnerState::Ready;
            }
        }
        results
    }

    /// Graceful shutdown: stop the signal handler, cancel in-flight work,
    /// close every session within the grace window, force-kill past it.
    /// Idempotent; the second call is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state poisoned");
            if *state == RunnerState::Stopped {
                return Ok(());
            }
            *state = RunnerState::ShuttingDown;
        }

        if let Some(handle) = self.signal_task.lock().expect("signal task poisoned").take() {
            handle.abort();
        }
        self.cancel_token().cancel();

        let pool = self.pool();
        let timed_out =
            tokio::time::timeout(self.options.graceful_timeout + Duration::from_secs(1), async {
                pool.close().await;
            })
            .await
            .is_err();

        *self.state.lock().expect("state poisoned") = RunnerState::Stopped;
        if timed_out {
            warn!("shutdown exceeded grace period, agent force-killed");
            return Err(Error::ShutdownTimeout);
        }
        info!("runner stopped");
        Ok(())
    }
}

/// Markdown report posted back to the forge.
pub fn render_report(skill: &str, result: &InvocationResult) -> String {
    let mut out = format!("## `{skill}` results\n\n");
    if result.skipped {
        out.push_str(&format!(
            "Skipped: {}\n",
            result.skip_reason.as_deref().unwrap_or("unknown reason")
        ));
        return out;
    }
    if !result.summary.is_empty() {
        out.push_str(&result.summary);
        out.push_str("\n\n");
    }
    if result.findings.is_empty() {
        out.push_str("No findings.\n");
    } else {
        for finding in &result.findings {
            out.push_str(&format!(
                "- **{}** `{}:{}` {}\n",
                finding.severity, finding.file, finding.line, finding.message
            ));
            if let Some(ref suggestion) = finding.suggestion {
                out.push_str(&format!("  - suggestion: {suggestion}\n"));
            }
        }
    }
    if result.partial {
        out.push_str("\n_Partial results: the diff exceeded the context budget._\n");
    }
    out
}

/// Process exit code for a finished run.
///
/// 0 success or skipped, 1 findings over the severity threshold,
/// 2 infrastructure error, 3 timeout, 4 agent error after exhausted retries.
pub fn exit_code(outcome: &Result<InvocationResult>, threshold: Option<Severity>) -> i32 {
    match outcome {
        Err(e) => match e.code() {
            cicd_core::ErrorCode::Timeout => 3,
            _ => 2,
        },
        Ok(result) => {
            if result.skipped {
                return 0;
            }
            if let Some(ref error) = result.error {
                return match error.code() {
                    cicd_core::ErrorCode::Timeout => 3,
                    code if code.is_retryable() => 4,
                    _ => 2,
                };
            }
            match (result.max_severity(), threshold) {
                (Some(worst), Some(threshold)) if worst <= threshold => 1,
                _ => 0,
            }
        }
    }
}
