use std::panic;
use std::sync::mpsc;
use std::thread;

use crate::error::AnalysisError;

/// What a unit of work reports
pub type TaskResult = Result<(), AnalysisError>;

/// A unit of work handed to a task runner
pub type Task = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// Wraps a closure into a `Task`
pub fn task<F: FnOnce() -> TaskResult + Send + 'static>(f: F) -> Task {
    Box::new(f)
}

/// Receives the outcome of one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    rx: mpsc::Receiver<thread::Result<TaskResult>>,
}

impl TaskHandle {
    pub(crate) fn channel() -> (mpsc::Sender<thread::Result<TaskResult>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, TaskHandle { rx })
    }

    /// Handle of a task that has already completed
    pub fn completed(result: TaskResult) -> Self {
        let (tx, handle) = TaskHandle::channel();
        let _ = tx.send(Ok(result));
        handle
    }

    /// Blocks until the task is done.  A panic inside the task is returned
    /// as its payload so the caller decides when to resume it.
    pub fn join(self) -> thread::Result<TaskResult> {
        match self.rx.recv() {
            Ok(outcome) => outcome,
            // The sender was dropped without reporting, e.g. the pool went away
            Err(_) => Ok(Err(AnalysisError::Unknown("task was dropped before it completed".to_owned()))),
        }
    }

    /// Blocks until the task is done, resuming its panic if it had one
    pub fn wait(self) -> TaskResult {
        match self.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Runs the task, capturing a panic instead of unwinding through the
/// caller.
pub(crate) fn run_caught(task: Task) -> thread::Result<TaskResult> {
    panic::catch_unwind(panic::AssertUnwindSafe(task))
}

#[cfg(test)]
mod task_test {
    use super::*;

    #[test]
    fn test_completed() {
        assert_eq!(TaskHandle::completed(Ok(())).wait(), Ok(()));
        let err = AnalysisError::Unknown("x".into());
        assert_eq!(TaskHandle::completed(Err(err.clone())).wait(), Err(err));
    }

    #[test]
    fn test_run_caught() {
        let outcome = run_caught(task(|| panic!("boom")));
        assert!(outcome.is_err());
        assert_eq!(run_caught(task(|| Ok(()))).ok(), Some(Ok(())));
    }

    #[test]
    fn test_dropped_sender() {
        let (tx, handle) = TaskHandle::channel();
        drop(tx);
        assert!(handle.wait().is_err());
    }
}
