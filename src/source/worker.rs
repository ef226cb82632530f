use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::SourceError;

const PACING_SLICE: Duration = Duration::from_millis(5);

/// Dedicated producer thread with a cancellation token, the way capture
/// threads are run for every source kind.
pub(crate) struct CaptureWorker {
    cancel_token: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureWorker {
    pub(crate) fn spawn<F>(name: String, body: F) -> Result<Self, SourceError>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(token))
            .map_err(|e| SourceError::Fatal(format!("failed to spawn {}: {}", name, e)))?;
        Ok(Self {
            cancel_token,
            thread: Some(thread),
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| thread.is_finished())
            .unwrap_or(true)
    }

    /// Cancel the thread and wait for it off the async runtime.
    pub(crate) async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            match joined {
                Ok(Ok(())) => debug!("Capture thread joined"),
                Ok(Err(_)) => error!("Capture thread panicked"),
                Err(e) => error!("Failed to join capture thread: {}", e),
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Sleep for `interval` in short slices. Returns `false` once cancelled.
pub(crate) fn pace(cancel_token: &CancellationToken, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if cancel_token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(PACING_SLICE.min(deadline - now));
    }
}

/// Start/stop bookkeeping shared by the source implementations.
#[derive(Default)]
pub(crate) struct WorkerSlot {
    worker: tokio::sync::Mutex<Option<CaptureWorker>>,
    disposed: AtomicBool,
}

impl WorkerSlot {
    /// Spawn `body` unless a worker is already running. Returns whether a new
    /// thread was started.
    pub(crate) async fn start_with<F>(&self, name: String, body: F) -> Result<bool, SourceError>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let mut worker = self.worker.lock().await;
        if self.is_disposed() {
            return Err(SourceError::Fatal(format!("{} has been disposed", name)));
        }
        if worker.as_ref().is_some_and(|running| !running.is_finished()) {
            return Ok(false);
        }
        if let Some(finished) = worker.take() {
            finished.stop().await;
        }
        *worker = Some(CaptureWorker::spawn(name, body)?);
        Ok(true)
    }

    pub(crate) async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
    }

    /// Stop the worker and refuse further starts. A start racing with this
    /// either sees the flag or has its thread stopped here.
    pub(crate) async fn dispose(&self) {
        let worker = {
            let mut slot = self.worker.lock().await;
            self.disposed.store(true, Ordering::Release);
            slot.take()
        };
        if let Some(worker) = worker {
            worker.stop().await;
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
