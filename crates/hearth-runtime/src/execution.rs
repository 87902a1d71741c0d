//! Shared execution service
//!
//! One multi-threaded tokio runtime per process carries network I/O,
//! handler fan-out and component-internal scheduled work alike; components
//! raise tasks onto this shared pool instead of spawning private threads.
//! Blocking work must go through [`ExecutionService::spawn_blocking`].
//!
//! Recurring tasks (health checks, polling) return a cancellation handle at
//! schedule time; cancelling twice is a no-op.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};

use hearth_core::Component;

// ----------------------------------------------------------------------------
// Repeating Task Handle
// ----------------------------------------------------------------------------

/// Cancellation handle for a scheduled recurring task
#[derive(Debug, Clone)]
pub struct RepeatingTaskHandle {
    abort: AbortHandle,
}

impl RepeatingTaskHandle {
    /// Stop the recurring task; idempotent
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the task has finished or been cancelled
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

// ----------------------------------------------------------------------------
// Execution Service
// ----------------------------------------------------------------------------

/// Component wrapping the process-wide task pool
pub struct ExecutionService {
    handle: tokio::runtime::Handle,
    scheduled: Mutex<Vec<AbortHandle>>,
}

impl ExecutionService {
    /// Capture the current runtime as the shared pool
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
            scheduled: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a task onto the shared pool
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Offload blocking work; pipeline stages must never block inline
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }

    /// Run `task` every `period` until the handle is cancelled or the
    /// service is destroyed
    pub fn schedule_repeating<F, Fut>(&self, period: Duration, mut task: F) -> RepeatingTaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let join = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it so the task runs
            // one full period after scheduling.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task().await;
            }
        });

        let abort = join.abort_handle();
        self.scheduled
            .lock()
            .expect("execution service lock poisoned")
            .push(abort.clone());
        RepeatingTaskHandle { abort }
    }
}

impl Component for ExecutionService {
    fn destroy(&self) {
        let mut scheduled = self
            .scheduled
            .lock()
            .expect("execution service lock poisoned");
        for handle in scheduled.drain(..) {
            handle.abort();
        }
        tracing::debug!("execution service cancelled scheduled tasks");
    }
}

impl std::fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionService").finish_non_exhaustive()
    }
}

// Arc so handlers can clone the service into spawned closures
pub type SharedExecution = Arc<ExecutionService>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_repeating_task_runs_and_cancels() {
        let service = ExecutionService::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counted = count.clone();
        let handle = service.schedule_repeating(Duration::from_millis(10), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        // Cancelling twice is fine
        handle.cancel();

        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 2, "task never ran");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_destroy_cancels_outstanding_tasks() {
        let service = ExecutionService::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counted = count.clone();
        let _handle = service.schedule_repeating(Duration::from_millis(10), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });

        service.destroy();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spawn_blocking_offloads() {
        let service = ExecutionService::new();
        let result = service.spawn_blocking(|| 21 * 2).await.unwrap();
        assert_eq!(result, 42);
    }
}
