//! Generic background worker for periodic and on-demand work.
//!
//! Provides `BackgroundWorker<R>`: a tokio task that processes submitted
//! work items through a `BackgroundRunnable` implementation and invokes a
//! periodic tick callback. The heartbeat monitor runs on this.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for work handlers executed by [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of work item this runnable processes.
    type Task: Send + 'static;

    /// Process a single work item.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

/// Background worker that processes work items via an mpsc channel.
///
/// The worker task selects between submitted items, the tick interval,
/// and a shutdown signal; on shutdown it runs the runnable's cleanup
/// before exiting.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Starts the worker with the given runnable and tick interval.
    ///
    /// The channel capacity is fixed at 64; submissions are rare compared
    /// to ticks for the workloads this carries.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(64);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(tick_interval);
            // Skip the immediate first tick so on_tick doesn't fire at startup.
            tick.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submits a work item to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped or the channel is
    /// full.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stops the worker gracefully, waiting for its task to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingRunnable {
        run_count: Arc<AtomicU32>,
        tick_count: Arc<AtomicU32>,
        shutdown_count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = u32;

        async fn run(&mut self, _task: u32) {
            self.run_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.tick_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdown_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (CountingRunnable, Arc<AtomicU32>, Arc<AtomicU32>, Arc<AtomicU32>) {
        let run_count = Arc::new(AtomicU32::new(0));
        let tick_count = Arc::new(AtomicU32::new(0));
        let shutdown_count = Arc::new(AtomicU32::new(0));
        let runnable = CountingRunnable {
            run_count: run_count.clone(),
            tick_count: tick_count.clone(),
            shutdown_count: shutdown_count.clone(),
        };
        (runnable, run_count, tick_count, shutdown_count)
    }

    #[tokio::test]
    async fn processes_submitted_work_and_shuts_down() {
        let (runnable, run_count, _ticks, shutdown_count) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));

        worker.submit(1).await.unwrap();
        worker.submit(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(run_count.load(Ordering::SeqCst), 2);

        worker.stop().await;
        assert_eq!(shutdown_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_fires_periodically() {
        let (runnable, _runs, tick_count, _shutdowns) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await;

        assert!(tick_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let (runnable, _runs, _ticks, _shutdowns) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));
        worker.stop().await;

        assert!(worker.submit(1).await.is_err());
    }
}
