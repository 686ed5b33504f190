//! Session pool — owns agent sessions keyed by identifier.
//!
//! A session is a resumable agent conversation: stable UUID, scratch
//! directory on disk, and an exclusive-use guard so at most one caller can
//! drive the agent at a time. A periodic reaper removes sessions idle past
//! their TTL. Closing the pool closes every session and is idempotent.

use cicd_core::error::{Error, Result};
use cicd_core::paths;
use cicd_core::types::SessionId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct SessionPoolOptions {
    pub capacity: usize,
    pub ttl: Duration,
    pub reap_interval: Duration,
}

impl Default for SessionPoolOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }
}

/// State behind a session's exclusive guard. The guard holder owns the
/// session's subprocess for the duration of its invocation.
#[derive(Debug, Default)]
pub struct SessionSlot {
    /// Completed invocations. Zero means the next invocation introduces the
    /// session id; afterwards invocations resume it.
    pub invocations: u64,
}

pub struct Session {
    id: SessionId,
    created_at: Instant,
    last_used: Mutex<Instant>,
    active: AtomicBool,
    slot: Arc<tokio::sync::Mutex<SessionSlot>>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_used: Mutex::new(Instant::now()),
            active: AtomicBool::new(true),
            slot: Arc::new(tokio::sync::Mutex::new(SessionSlot::default())),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().expect("last_used poisoned").elapsed()
    }

    pub fn touch(&self) {
        *self.last_used.lock().expect("last_used poisoned") = Instant::now();
    }

    /// Take the exclusive guard. Blocks until any other caller releases it;
    /// the wait is cancellable by dropping the future.
    pub async fn acquire(&self) -> OwnedMutexGuard<SessionSlot> {
        let guard = self.slot.clone().lock_owned().await;
        self.touch();
        guard
    }

    /// Run `op` with exponential backoff: 1s, 2s, 4s, ... capped at 30s.
    /// Context cancellation is never retried and aborts the sleep
    /// immediately. Updates last-used on success.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        attempts: u32,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_err = Error::Unknown("no attempts executed".into());

        for attempt in 0..attempts.max(1) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match op().await {
                Ok(value) => {
                    self.touch();
                    return Ok(value);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(session = %self.id, attempt, error = %e, "session op failed");
                    last_err = e;
                }
            }
            if attempt + 1 < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
        }
        Err(last_err)
    }

    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        // Serialize with any in-flight invocation: the guard holder owns the
        // subprocess and observes its exit before releasing.
        let _slot = self.slot.clone().lock_owned().await;
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub sessions: usize,
    pub capacity: usize,
    pub ids: Vec<String>,
}

pub struct SessionPool {
    sessions: DashMap<SessionId, Arc<Session>>,
    options: SessionPoolOptions,
    reaper_cancel: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(options: SessionPoolOptions) -> Arc<Self> {
        let pool = Arc::new(Self {
            sessions: DashMap::new(),
            options,
            reaper_cancel: CancellationToken::new(),
            reaper: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        pool.spawn_reaper();
        pool
    }

    fn spawn_reaper(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let cancel = self.reaper_cancel.clone();
        let interval = self.options.reap_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match weak.upgrade() {
                            Some(pool) => pool.reap_expired().await,
                            None => break,
                        }
                    }
                }
            }
        });
        *self.reaper.lock().expect("reaper handle poisoned") = Some(handle);
    }

    /// Return the existing active session or create a fresh one. `None`
    /// generates a new UUID. Concurrent calls for the same id converge on
    /// the same session.
    pub async fn get_or_create(&self, id: Option<SessionId>) -> Result<Arc<Session>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("session pool is closed".into()));
        }

        let id = match id {
            Some(id) if !id.as_str().trim().is_empty() => id,
            _ => SessionId::generate(),
        };

        // Expired sessions are reaped before reuse.
        if let Some(existing) = self.sessions.get(&id).map(|e| e.value().clone()) {
            if existing.is_active() && existing.idle_for() <= self.options.ttl {
                existing.touch();
                return Ok(existing);
            }
            drop(existing);
            self.remove(&id).await?;
        }

        if self.sessions.len() >= self.options.capacity {
            return Err(Error::Unknown(format!(
                "session pool at capacity ({})",
                self.options.capacity
            )));
        }

        paths::ensure_session_dir(id.as_str())?;
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                info!(session = %id, "session created");
                Arc::new(Session::new(id.clone()))
            })
            .clone();
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.get(id).map(|s| s.is_active()).unwrap_or(false)
    }

    /// Mark inactive, close the subprocess, delete on-disk scratch.
    /// Removing a missing session succeeds.
    pub async fn remove(&self, id: &SessionId) -> Result<()> {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.close().await;
            debug!(session = %id, "session removed");
        }
        paths::remove_session_dir(id.as_str())
    }

    pub fn stats(&self) -> PoolStats {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .map(|e| e.key().as_str().to_string())
            .collect();
        ids.sort();
        PoolStats {
            sessions: ids.len(),
            capacity: self.options.capacity,
            ids,
        }
    }

    async fn reap_expired(&self) {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| e.value().idle_for() > self.options.ttl)
            .map(|e| e.key().clone())
            .collect();
        for id in expired {
            warn!(session = %id, "reaping idle session past TTL");
            let _ = self.remove(&id).await;
        }
    }

    /// Close every session. Idempotent via a once-guard.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reaper_cancel.cancel();
        if let Some(handle) = self.reaper.lock().expect("reaper handle poisoned").take() {
            handle.abort();
        }
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.remove(&id).await;
        }
        info!("session pool closed");
    }
}
