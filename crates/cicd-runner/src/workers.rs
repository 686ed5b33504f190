//! Bounded worker helpers for skill batches.
//!
//! Fixed-size concurrency, cancellation propagation, per-task error
//! collection. A failing task cancels its siblings; a panicking task becomes
//! an error instead of taking the process down. The core never spawns
//! unbounded tasks.

use cicd_core::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Run `op` over `items` with at most `limit` in flight. Results come back
/// in input order; the first failure cancels the remaining siblings, whose
/// slots report `cancelled`.
pub async fn map<T, R, F, Fut>(
    limit: usize,
    cancel: &CancellationToken,
    items: Vec<T>,
    op: F,
) -> Vec<Result<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let limit = limit.clamp(1, 10);
    let semaphore = Arc::new(Semaphore::new(limit));
    let batch_cancel = cancel.child_token();
    let op = Arc::new(op);

    let mut set: JoinSet<(usize, Result<R>)> = JoinSet::new();
    let total = items.len();
    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let cancel = batch_cancel.clone();
        let op = op.clone();
        set.spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return (index, Err(Error::Cancelled)),
            };
            if cancel.is_cancelled() {
                return (index, Err(Error::Cancelled));
            }
            let result = tokio::select! {
                result = (*op)(item) => result,
                _ = cancel.cancelled() => Err(Error::Cancelled),
            };
            if result.is_err() {
                cancel.cancel();
            }
            (index, result)
        });
    }

    let mut results: Vec<Result<R>> = (0..total).map(|_| Err(Error::Cancelled)).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = result,
            Err(e) if e.is_panic() => {
                batch_cancel.cancel();
                // Panic in a worker becomes an error; the slot is unknown,
                // so surface it in the first still-pending position.
                if let Some(slot) = results.iter_mut().find(|r| {
                    matches!(r, Err(Error::Cancelled))
                }) {
                    *slot = Err(Error::Unknown("worker task panicked".into()));
                }
            }
            Err(_) => {}
        }
    }
    results
}

/// Run independent closures concurrently under one bound.
pub async fn parallel<R, F, Fut>(
    limit: usize,
    cancel: &CancellationToken,
    tasks: Vec<F>,
) -> Vec<Result<R>>
where
    R: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    map(limit, cancel, tasks, |task| task()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn bounded_concurrency_is_respected() {
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let peak_in = peak.clone();
        let current_in = current.clone();
        let results = map(2, &cancel, (0..8).collect::<Vec<_>>(), move |i| {
            let peak = peak_in.clone();
            let current = current_in.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(i * 2)
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(results.len(), 8);
        assert_eq!(*results[3].as_ref().unwrap(), 6);
    }

    #[tokio::test]
    async fn failure_cancels_siblings() {
        let cancel = CancellationToken::new();
        let zero_done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let zero_in = zero_done.clone();
        let results = map(4, &cancel, vec![0u32, 1, 2, 3], move |i| {
            let zero_done = zero_in.clone();
            async move {
                match i {
                    0 => {
                        zero_done.store(true, Ordering::SeqCst);
                        Ok(i)
                    }
                    1 => {
                        // Fail only after task 0 finished, so the assertion
                        // on its result is deterministic.
                        while !zero_done.load(Ordering::SeqCst) {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                        Err(Error::ServerError("boom".into()))
                    }
                    _ => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(i)
                    }
                }
            }
        })
        .await;

        // Task 0 ran, task 1 failed, the long-running siblings were
        // cancelled instead of sleeping out their 30s.
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err().code(),
            cicd_core::ErrorCode::ServerError
        );
        assert_eq!(
            results[2].as_ref().unwrap_err().code(),
            cicd_core::ErrorCode::Cancelled
        );
        assert_eq!(
            results[3].as_ref().unwrap_err().code(),
            cicd_core::ErrorCode::Cancelled
        );
    }

    #[tokio::test]
    async fn panic_becomes_error() {
        let cancel = CancellationToken::new();
        let results = map(2, &cancel, vec![0u32, 1], |i| async move {
            if i == 0 {
                panic!("worker exploded");
            }
            Ok(i)
        })
        .await;
        assert!(results.iter().any(|r| r.is_err()));
    }

    #[tokio::test]
    async fn parallel_preserves_task_order() {
        let cancel = CancellationToken::new();
        let task = |label: &'static str| move || async move { Ok(label.to_string()) };
        let results = parallel(2, &cancel, vec![task("config"), task("workspace")]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_deref().unwrap(), "config");
        assert_eq!(results[1].as_deref().unwrap(), "workspace");
    }

    #[tokio::test]
    async fn ambient_cancellation_stops_batch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = map(4, &cancel, vec![1u32, 2, 3], |i| async move { Ok(i) }).await;
        for result in results {
            assert_eq!(result.unwrap_err().code(), cicd_core::ErrorCode::Cancelled);
        }
    }
}
