//! cicd-runner - The runner core
//!
//! Drives a persistent AI command-line agent against pull-request diffs:
//! session pool, process supervisor with watchdog, context assembly and
//! chunking, stream parsing, retry/fallback, and the top-level orchestrator.

pub mod agent;
pub mod chunk;
pub mod context;
pub mod diff;
pub mod parser;
pub mod retry;
pub mod runner;
pub mod session;
pub mod supervisor;
pub mod watchdog;
pub mod workers;

pub use context::ContextAssembler;
pub use retry::{RetryExecutor, RetryPolicy};
pub use runner::{Runner, RunnerOptions};
pub use session::{SessionPool, SessionPoolOptions};
pub use supervisor::{Supervisor, SupervisorOptions};
pub use watchdog::{Watchdog, WatchdogOptions};
