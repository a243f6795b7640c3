//! Bounded worker pools.
//!
//! A pool drains a closed queue of work items with a fixed number of workers. Results
//! are pushed into a shared accumulator as each item completes, so their order is the
//! order of completion; with a single worker that is the queue order.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Runs `work` on every item using at most `workers` concurrent workers, returning
/// the results in completion order.
pub async fn run_pool<T, R, F, Fut>(
    workers: usize,
    items: Vec<T>,
    work: F,
) -> Result<Vec<R>, tokio::task::JoinError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let worker_count = workers.max(1).min(items.len().max(1));

    let (tx, rx) = mpsc::unbounded_channel();
    for item in items {
        // The receiver is alive until the pool finishes.
        let _ = tx.send(item);
    }
    drop(tx);

    let queue = Arc::new(Mutex::new(rx));
    let results = Arc::new(parking_lot::Mutex::new(vec![]));
    let work = Arc::new(work);

    let mut join_set = tokio::task::JoinSet::new();
    for _ in 0..worker_count {
        let queue = Arc::clone(&queue);
        let results = Arc::clone(&results);
        let work = Arc::clone(&work);

        join_set.spawn(async move {
            loop {
                let next = queue.lock().await.recv().await;
                let Some(item) = next else {
                    break;
                };

                let result = work(item).await;
                results.lock().push(result);
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        joined?;
    }

    let collected = std::mem::take(&mut *results.lock());
    Ok(collected)
}

/// Runs blocking `work` on every item using at most `workers` blocking threads.
pub async fn run_blocking_pool<T, R, F>(
    workers: usize,
    items: Vec<T>,
    work: F,
) -> Result<Vec<R>, tokio::task::JoinError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let joined = run_pool(workers, items, move |item| {
        let work = Arc::clone(&work);
        tokio::task::spawn_blocking(move || work(item))
    })
    .await?;

    joined.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_item_processed_once() -> anyhow::Result<()> {
        let mut results = run_pool(3, (0..20).collect(), |n: u32| async move { n * 2 }).await?;
        results.sort_unstable();

        assert_eq!(results, (0..20).map(|n| n * 2).collect::<Vec<_>>());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_worker_keeps_queue_order() -> anyhow::Result<()> {
        let results = run_blocking_pool(1, vec!["a", "b", "c", "d"], |s| s.to_uppercase()).await?;
        assert_eq!(results, vec!["A", "B", "C", "D"]);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() -> anyhow::Result<()> {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (active_ref, peak_ref) = (Arc::clone(&active), Arc::clone(&peak));
        run_blocking_pool(2, (0..8).collect::<Vec<u32>>(), move |_| {
            let now = active_ref.fetch_add(1, Ordering::SeqCst) + 1;
            peak_ref.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            active_ref.fetch_sub(1, Ordering::SeqCst);
        })
        .await?;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(active.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_queue() -> anyhow::Result<()> {
        let results: Vec<u32> = run_pool(4, vec![], |n: u32| async move { n }).await?;
        assert!(results.is_empty());

        Ok(())
    }
}
