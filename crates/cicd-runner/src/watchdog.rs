//! Per-invocation watchdog.
//!
//! A plain object parameterised by policy: it races a future against a
//! deadline, polling at `check_interval` so tests can observe intermediate
//! state. The optional on-timeout callback fires exactly once.

use cicd_core::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct WatchdogOptions {
    pub timeout: Duration,
    pub check_interval: Duration,
}

impl Default for WatchdogOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            check_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    options: WatchdogOptions,
}

impl Watchdog {
    pub fn new(options: WatchdogOptions) -> Self {
        Self { options }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(WatchdogOptions {
            timeout,
            ..Default::default()
        })
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// Run `work` under the deadline. On expiry the callback fires once and
    /// the result is a `timeout` error; `work` is dropped (cancelled) at that
    /// point.
    pub async fn guard<T, F, C>(&self, work: F, on_timeout: C) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        C: FnOnce(),
    {
        let deadline = Instant::now() + self.options.timeout;
        let mut ticker = tokio::time::interval(self.options.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::pin!(work);
        let mut on_timeout = Some(on_timeout);

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = ticker.tick() => {
                    if Instant::now() >= deadline {
                        if let Some(cb) = on_timeout.take() {
                            cb();
                        }
                        warn!(timeout_ms = self.options.timeout.as_millis() as u64,
                              "watchdog elapsed, failing invocation");
                        return Err(Error::Timeout(format!(
                            "invocation exceeded {}ms",
                            self.options.timeout.as_millis()
                        )));
                    }
                }
            }
        }
    }
}
