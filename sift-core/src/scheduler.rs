//! Task runners: where units of work execute.

use std::panic;
use std::sync::Mutex;

use jobpool::JobPool;

use crate::error::AnalysisError;
use crate::task::{run_caught, Task, TaskHandle};

/// Runs units of work and waits for them.
pub trait TaskRunner: Send + Sync {
    /// Schedules the task.  It may run before this returns.
    fn submit(&self, task: Task) -> TaskHandle;

    /// Waits for every handle.  Errors reported by the tasks are returned;
    /// a panic in any task is resumed after all of them have finished.
    fn wait_for_all(&self, handles: Vec<TaskHandle>) -> Vec<AnalysisError> {
        let mut errors = Vec::new();
        let mut panicked = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => (),
                Ok(Err(e)) => errors.push(e),
                Err(payload) => {
                    if panicked.is_none() {
                        panicked = Some(payload);
                    }
                }
            }
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        errors
    }

    /// Releases worker threads.  Tasks submitted afterwards fail.
    fn shutdown(&self) {}

    /// Number of tasks that may run at the same time
    fn concurrency(&self) -> usize;
}

/// Runs every task synchronously on the submitting thread, in submission
/// order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleThreadedTaskRunner;

impl SingleThreadedTaskRunner {
    /// A runner without threads
    pub fn new() -> Self {
        SingleThreadedTaskRunner
    }
}

impl TaskRunner for SingleThreadedTaskRunner {
    fn submit(&self, task: Task) -> TaskHandle {
        let (tx, handle) = TaskHandle::channel();
        let _ = tx.send(run_caught(task));
        handle
    }

    fn concurrency(&self) -> usize {
        1
    }
}

/// Runs tasks on a bounded pool of worker threads.  Submissions beyond the
/// pool size are queued.
pub struct PooledTaskRunner {
    threads: usize,
    pool: Mutex<Option<JobPool>>,
}

impl PooledTaskRunner {
    /// A pool of `threads` workers, at least one
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        debug!("Starting task pool with {} threads", threads);
        PooledTaskRunner { threads, pool: Mutex::new(Some(JobPool::new(threads))) }
    }
}

impl TaskRunner for PooledTaskRunner {
    fn submit(&self, task: Task) -> TaskHandle {
        let (tx, handle) = TaskHandle::channel();
        let mut guard = self.pool.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_mut() {
            Some(pool) => {
                let _ = pool.queue(move || {
                    let _ = tx.send(run_caught(task));
                });
            }
            None => {
                warn!("Task submitted to a task runner that was shut down");
                let _ = tx.send(Ok(Err(AnalysisError::Unknown("task runner is shut down".to_owned()))));
            }
        }
        handle
    }

    fn shutdown(&self) {
        let pool = self.pool.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(mut pool) = pool {
            debug!("Shutting down task pool");
            pool.shutdown();
        }
    }

    fn concurrency(&self) -> usize {
        self.threads
    }
}

impl Drop for PooledTaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod scheduler_test {
    use super::*;
    use crate::task::task;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn run_all(runner: &dyn TaskRunner) {
        let count = Arc::new(AtomicUsize::new(0));
        let handles = (0..20)
            .map(|i| {
                let count = count.clone();
                runner.submit(task(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    if i % 5 == 0 {
                        Err(AnalysisError::Unknown(format!("task {}", i)))
                    } else {
                        Ok(())
                    }
                }))
            })
            .collect();
        let errors = runner.wait_for_all(handles);
        assert_eq!(count.load(Ordering::SeqCst), 20);
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_single_threaded() {
        run_all(&SingleThreadedTaskRunner::new());
    }

    #[test]
    fn test_submission_order() {
        let runner = SingleThreadedTaskRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles = (0..5)
            .map(|i| {
                let seen = seen.clone();
                runner.submit(task(move || {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }))
            })
            .collect();
        assert!(runner.wait_for_all(handles).is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pooled() {
        let runner = PooledTaskRunner::new(3);
        run_all(&runner);
        runner.shutdown();
        let late = runner.submit(task(|| Ok(())));
        assert!(late.wait().is_err());
    }

    #[test]
    fn test_panic_after_siblings() {
        let runner = PooledTaskRunner::new(2);
        let count = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![runner.submit(task(|| panic!("boom")))];
        for _ in 0..4 {
            let count = count.clone();
            handles.push(runner.submit(task(move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })));
        }
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| runner.wait_for_all(handles)));
        assert!(outcome.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }
}
