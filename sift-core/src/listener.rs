//! Progress and error callbacks.

use std::sync::Arc;

use crate::error::{AnalysisError, ComponentError};
use crate::future::ExecutionId;
use crate::job::{ComponentJob, Job};
use crate::row::Row;

/// Sink for lifecycle, progress and error events of an execution.  Every
/// method has an empty default, so listeners implement only what they
/// care about.  Callbacks may arrive from worker threads.
#[allow(unused_variables)]
pub trait AnalysisListener: Send + Sync {
    /// Execution started
    fn job_begin(&self, id: &ExecutionId, job: &Job) {}

    /// Execution finished without errors
    fn job_success(&self, id: &ExecutionId, job: &Job) {}

    /// Execution finished with errors
    fn job_failed(&self, id: &ExecutionId, job: &Job, errors: &[AnalysisError]) {}

    /// Reading of a table starts.  `expected_rows` is `None` if the
    /// source could not count them.
    fn row_processing_begin(&self, id: &ExecutionId, table: &str, expected_rows: Option<u64>) {}

    /// Every `RunnerConfig::progress_interval` rows
    fn row_processing_progress(&self, id: &ExecutionId, table: &str, current_row: u64) {}

    /// Every row of the table was retired
    fn row_processing_success(&self, id: &ExecutionId, table: &str, rows: u64) {}

    /// A component finished without errors
    fn component_success(&self, id: &ExecutionId, component: &ComponentJob) {}

    /// A filter raised on a row
    fn error_in_filter(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {}

    /// A transformer raised on a row
    fn error_in_transformer(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {}

    /// An analyzer or explorer raised on a row
    fn error_in_analyzer(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {}

    /// Any other error
    fn error_unknown(&self, id: &ExecutionId, error: &AnalysisError) {}
}

/// Listener that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalysisListener;

impl AnalysisListener for NoopAnalysisListener {}

/// Routes every event to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAnalysisListener;

impl AnalysisListener for LoggingAnalysisListener {
    fn job_begin(&self, id: &ExecutionId, job: &Job) {
        info!("[{}] Job begin: {} components over {:?}", id, job.components().len(), job.tables());
    }

    fn job_success(&self, id: &ExecutionId, _job: &Job) {
        info!("[{}] Job succeeded", id);
    }

    fn job_failed(&self, id: &ExecutionId, _job: &Job, errors: &[AnalysisError]) {
        error!("[{}] Job failed with {} error(s)", id, errors.len());
    }

    fn row_processing_begin(&self, id: &ExecutionId, table: &str, expected_rows: Option<u64>) {
        match expected_rows {
            Some(n) => info!("[{}] Processing table {}, expecting {} rows", id, table, n),
            None => info!("[{}] Processing table {}", id, table),
        }
    }

    fn row_processing_progress(&self, id: &ExecutionId, table: &str, current_row: u64) {
        debug!("[{}] Table {}: {} rows processed", id, table, current_row);
    }

    fn row_processing_success(&self, id: &ExecutionId, table: &str, rows: u64) {
        info!("[{}] Table {} done, {} rows", id, table, rows);
    }

    fn component_success(&self, id: &ExecutionId, component: &ComponentJob) {
        debug!("[{}] {} {} finished", id, component.kind(), component.name());
    }

    fn error_in_filter(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {
        warn!("[{}] Filter {} failed on row {}: {}", id, component.name(), row.id(), error);
    }

    fn error_in_transformer(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {
        warn!("[{}] Transformer {} failed on row {}: {}", id, component.name(), row.id(), error);
    }

    fn error_in_analyzer(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {
        warn!("[{}] Analyzer {} failed on row {}: {}", id, component.name(), row.id(), error);
    }

    fn error_unknown(&self, id: &ExecutionId, error: &AnalysisError) {
        error!("[{}] {}", id, error);
    }
}

/// Fans every event out to several listeners, in order.
#[derive(Clone, Default)]
pub struct CompositeAnalysisListener {
    listeners: Vec<Arc<dyn AnalysisListener>>,
}

impl CompositeAnalysisListener {
    /// Fans out to `listeners`
    pub fn new(listeners: Vec<Arc<dyn AnalysisListener>>) -> Self {
        CompositeAnalysisListener { listeners }
    }

    /// Appends a listener
    pub fn add(&mut self, listener: Arc<dyn AnalysisListener>) {
        self.listeners.push(listener);
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether there are no listeners
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

macro_rules! fan_out {
    ($self:ident, $method:ident, $($arg:expr),*) => {
        for l in $self.listeners.iter() {
            l.$method($($arg),*);
        }
    };
}

impl AnalysisListener for CompositeAnalysisListener {
    fn job_begin(&self, id: &ExecutionId, job: &Job) {
        fan_out!(self, job_begin, id, job);
    }

    fn job_success(&self, id: &ExecutionId, job: &Job) {
        fan_out!(self, job_success, id, job);
    }

    fn job_failed(&self, id: &ExecutionId, job: &Job, errors: &[AnalysisError]) {
        fan_out!(self, job_failed, id, job, errors);
    }

    fn row_processing_begin(&self, id: &ExecutionId, table: &str, expected_rows: Option<u64>) {
        fan_out!(self, row_processing_begin, id, table, expected_rows);
    }

    fn row_processing_progress(&self, id: &ExecutionId, table: &str, current_row: u64) {
        fan_out!(self, row_processing_progress, id, table, current_row);
    }

    fn row_processing_success(&self, id: &ExecutionId, table: &str, rows: u64) {
        fan_out!(self, row_processing_success, id, table, rows);
    }

    fn component_success(&self, id: &ExecutionId, component: &ComponentJob) {
        fan_out!(self, component_success, id, component);
    }

    fn error_in_filter(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {
        fan_out!(self, error_in_filter, id, component, row, error);
    }

    fn error_in_transformer(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {
        fan_out!(self, error_in_transformer, id, component, row, error);
    }

    fn error_in_analyzer(&self, id: &ExecutionId, component: &ComponentJob, row: &Row, error: &ComponentError) {
        fan_out!(self, error_in_analyzer, id, component, row, error);
    }

    fn error_unknown(&self, id: &ExecutionId, error: &AnalysisError) {
        fan_out!(self, error_unknown, id, error);
    }
}
