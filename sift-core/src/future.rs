//! Execution handles.
//!
//! Running a job returns immediately with a handle implementing
//! `AnalysisResultFuture`.  The handle collects errors while rows flow,
//! switches to a terminal status exactly once and then exposes the results
//! of every analyzer.

use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::component::ResultRef;
use crate::error::{AnalysisError, JobError};
use crate::job::{ComponentId, ComponentKey};

/// Identifies one execution in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    /// A fresh random id
    pub fn new() -> Self {
        ExecutionId(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        ExecutionId::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Still running
    NotFinished,
    /// Done without errors
    Successful,
    /// Done with at least one error
    Errornous,
    /// Stopped by `cancel` without errors
    Cancelled,
}

impl JobStatus {
    /// Whether the status is terminal
    pub fn is_done(self) -> bool {
        self != JobStatus::NotFinished
    }
}

/// Result of one analyzer
#[derive(Debug, Clone)]
pub struct ResultEntry {
    /// The analyzer
    pub component: ComponentId,
    /// Its structural key
    pub key: ComponentKey,
    /// Its name
    pub name: String,
    /// What it produced
    pub result: ResultRef,
}

/// Results of all analyzers of a job, in component order
#[derive(Debug, Clone, Default)]
pub struct AnalysisResults {
    entries: Vec<ResultEntry>,
}

impl AnalysisResults {
    /// No results
    pub fn new() -> Self {
        AnalysisResults::default()
    }

    /// Adds a result, replacing one of the same component
    pub fn insert(&mut self, entry: ResultEntry) {
        match self.entries.binary_search_by_key(&entry.component, |e| e.component) {
            Ok(pos) => self.entries[pos] = entry,
            Err(pos) => self.entries.insert(pos, entry),
        }
    }

    /// Result of a component
    pub fn get(&self, component: ComponentId) -> Option<&ResultRef> {
        self.entries.iter().find(|e| e.component == component).map(|e| &e.result)
    }

    /// Result of the component with that structural key
    pub fn get_by_key(&self, key: &ComponentKey) -> Option<&ResultRef> {
        self.entries.iter().find(|e| &e.key == key).map(|e| &e.result)
    }

    /// Every entry, in component order
    pub fn iter(&self) -> impl Iterator<Item = &ResultEntry> {
        self.entries.iter()
    }

    /// Number of results
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no results
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to an in-flight or completed execution.
pub trait AnalysisResultFuture: Send + Sync {
    /// Id of the execution
    fn id(&self) -> ExecutionId;

    /// Current status; never reverts once done
    fn status(&self) -> JobStatus;

    /// Whether the status is terminal
    fn is_done(&self) -> bool {
        self.status().is_done()
    }

    /// Blocks until done.  A panic raised while executing is resumed here.
    fn wait(&self);

    /// Blocks at most `timeout`; returns whether the execution is done
    fn wait_timeout(&self, timeout: Duration) -> bool;

    /// Best-effort: stops further row dispatch
    fn cancel(&self) -> Result<(), JobError>;

    /// Waits, then returns every analyzer result or a summarized failure
    fn results(&self) -> Result<AnalysisResults, JobError>;

    /// Waits, then returns the result of one analyzer
    fn result(&self, component: ComponentId) -> Result<Option<ResultRef>, JobError> {
        self.results().map(|r| r.get(component).cloned())
    }

    /// Waits, then returns the raw error list.  Does not resume a panic.
    fn errors(&self) -> Vec<AnalysisError>;

    /// Waits, then checks for `Successful`
    fn is_successful(&self) -> bool {
        while !self.wait_timeout(POLL_INTERVAL) {}
        self.status() == JobStatus::Successful
    }

    /// Waits, then checks for `Errornous`
    fn is_errornous(&self) -> bool {
        while !self.wait_timeout(POLL_INTERVAL) {}
        self.status() == JobStatus::Errornous
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct State {
    status: JobStatus,
    results: AnalysisResults,
    errors: Vec<AnalysisError>,
    panic: Option<Box<dyn Any + Send>>,
}

/// Result future completed by code running in this process.
pub struct LocalResultFuture {
    id: ExecutionId,
    state: Mutex<State>,
    done: Condvar,
    cancelled: AtomicBool,
}

impl LocalResultFuture {
    /// A handle that is not finished
    pub fn new(id: ExecutionId) -> Self {
        LocalResultFuture {
            id,
            state: Mutex::new(State {
                status: JobStatus::NotFinished,
                results: AnalysisResults::new(),
                errors: Vec::new(),
                panic: None,
            }),
            done: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// A handle that is errornous from the start
    pub fn failed(id: ExecutionId, errors: Vec<AnalysisError>) -> Self {
        let future = LocalResultFuture::new(id);
        for e in errors {
            future.add_error(e);
        }
        future.complete(AnalysisResults::new());
        future
    }

    fn lock(&self) -> MutexGuard<State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Blocks until done, leaving any panic payload in place
    fn wait_done(&self) -> MutexGuard<State> {
        let mut state = self.lock();
        while !state.status.is_done() {
            state = self.done.wait(state).unwrap_or_else(|p| p.into_inner());
        }
        state
    }

    /// Appends an error; ignored once the handle is done
    pub fn add_error(&self, error: AnalysisError) {
        let mut state = self.lock();
        if !state.status.is_done() {
            state.errors.push(error);
        }
    }

    /// Number of errors recorded so far
    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    /// Errors recorded so far, without waiting
    pub fn error_snapshot(&self) -> Vec<AnalysisError> {
        self.lock().errors.clone()
    }

    /// Whether `cancel` was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Moves to the terminal status implied by the error list.  Has no
    /// effect on a handle that is already done.
    pub fn complete(&self, results: AnalysisResults) {
        let mut state = self.lock();
        if state.status.is_done() {
            return;
        }
        state.status = if !state.errors.is_empty() {
            JobStatus::Errornous
        } else if self.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Successful
        };
        state.results = results;
        debug!("[{}] Execution done: {:?}", self.id, state.status);
        self.done.notify_all();
    }

    /// Completes the handle with a panic payload, resumed by the first
    /// waiter
    pub fn abort(&self, payload: Box<dyn Any + Send>) {
        let mut state = self.lock();
        if state.status.is_done() {
            return;
        }
        state.status = JobStatus::Errornous;
        state.errors.push(AnalysisError::Unknown("execution panicked".to_owned()));
        state.panic = Some(payload);
        self.done.notify_all();
    }
}

impl AnalysisResultFuture for LocalResultFuture {
    fn id(&self) -> ExecutionId {
        self.id
    }

    fn status(&self) -> JobStatus {
        self.lock().status
    }

    fn wait(&self) {
        let mut state = self.wait_done();
        if let Some(payload) = state.panic.take() {
            drop(state);
            panic::resume_unwind(payload);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.status.is_done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.done.wait_timeout(state, deadline - now) {
                Ok((s, _)) => s,
                Err(p) => p.into_inner().0,
            };
        }
        true
    }

    fn cancel(&self) -> Result<(), JobError> {
        if !self.is_done() {
            info!("[{}] Cancelling execution", self.id);
            self.cancelled.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn results(&self) -> Result<AnalysisResults, JobError> {
        self.wait();
        let state = self.lock();
        match state.status {
            JobStatus::Successful => Ok(state.results.clone()),
            JobStatus::Cancelled => Err(JobError::Cancelled),
            _ => Err(JobError::from_errors(&state.errors)),
        }
    }

    fn errors(&self) -> Vec<AnalysisError> {
        self.wait_done().errors.clone()
    }

    fn is_successful(&self) -> bool {
        self.wait_done().status == JobStatus::Successful
    }

    fn is_errornous(&self) -> bool {
        self.wait_done().status == JobStatus::Errornous
    }
}

#[cfg(test)]
mod future_test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn entry(id: usize, value: u64) -> ResultEntry {
        ResultEntry {
            component: ComponentId(id),
            key: ComponentKey::default(),
            name: format!("c{}", id),
            result: Arc::new(value),
        }
    }

    #[test]
    fn test_success() {
        let future = Arc::new(LocalResultFuture::new(ExecutionId::new()));
        assert_eq!(future.status(), JobStatus::NotFinished);
        assert!(!future.wait_timeout(Duration::from_millis(10)));

        let f = future.clone();
        let t = thread::spawn(move || {
            let mut results = AnalysisResults::new();
            results.insert(entry(2, 7));
            results.insert(entry(0, 3));
            f.complete(results);
        });
        future.wait();
        t.join().unwrap();

        assert!(future.is_successful());
        assert!(future.errors().is_empty());
        let results = future.results().unwrap();
        let ids: Vec<_> = results.iter().map(|e| e.component).collect();
        assert_eq!(ids, vec![ComponentId(0), ComponentId(2)]);
        let r = future.result(ComponentId(2)).unwrap().unwrap();
        assert_eq!(r.downcast_ref::<u64>(), Some(&7));
    }

    #[test]
    fn test_errornous_is_sticky() {
        let future = LocalResultFuture::new(ExecutionId::new());
        future.add_error(AnalysisError::Unknown("first".into()));
        future.complete(AnalysisResults::new());
        assert!(future.is_errornous());

        // Late errors and completions are ignored
        future.add_error(AnalysisError::Unknown("late".into()));
        future.complete(AnalysisResults::new());
        assert_eq!(future.status(), JobStatus::Errornous);
        assert_eq!(future.errors().len(), 1);
        match future.results() {
            Err(JobError::Failed { count, first }) => {
                assert_eq!(count, 1);
                assert_eq!(first, "first");
            }
            other => panic!("unexpected {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_failed_and_cancelled() {
        let failed = LocalResultFuture::failed(
            ExecutionId::new(),
            vec![AnalysisError::Dispatch { slave: 0, message: "unreachable".into() }],
        );
        assert!(failed.is_done());
        assert!(failed.is_errornous());

        let cancelled = LocalResultFuture::new(ExecutionId::new());
        cancelled.cancel().unwrap();
        assert!(cancelled.is_cancelled());
        cancelled.complete(AnalysisResults::new());
        assert_eq!(cancelled.status(), JobStatus::Cancelled);
        assert_eq!(cancelled.results().err(), Some(JobError::Cancelled));
    }

    #[test]
    fn test_abort_resumes_panic() {
        let future = LocalResultFuture::new(ExecutionId::new());
        future.abort(Box::new("out of memory"));
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| future.wait()));
        assert!(outcome.is_err());
        assert_eq!(future.status(), JobStatus::Errornous);
    }

    #[test]
    fn test_errors_after_abort() {
        let future = Arc::new(LocalResultFuture::new(ExecutionId::new()));
        let f = future.clone();
        let t = thread::spawn(move || f.abort(Box::new("catastrophe")));

        let errors = panic::catch_unwind(panic::AssertUnwindSafe(|| future.errors()))
            .unwrap_or_else(|_| panic!("errors() resumed the panic"));
        t.join().unwrap();
        assert_eq!(errors, vec![AnalysisError::Unknown("execution panicked".into())]);
        assert!(future.is_errornous());
        assert!(!future.is_successful());

        // The payload is still there for the first waiter
        assert!(panic::catch_unwind(panic::AssertUnwindSafe(|| future.wait())).is_err());
    }
}
