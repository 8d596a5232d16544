//! Per-table row processing.
//!
//! A `RowProcessingPublisher` owns live instances of every component
//! reading from one table.  It reads the table once, in order, and sends
//! every row through the components in processing order, honoring each
//! component's effective requirement.  Rows are handed to the task runner
//! as independent units of work; components that are not marked
//! concurrent are serialized behind a lock.

use std::any::Any;
use std::collections::VecDeque;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::component::{Instance, ResultRef};
use crate::error::{AnalysisError, ComponentError, ConfigError};
use crate::future::{ExecutionId, LocalResultFuture, ResultEntry};
use crate::job::{ColumnId, ComponentId, ComponentJob, ComponentKind, Job};
use crate::listener::AnalysisListener;
use crate::optimizer::{OptimizedQuery, QueryOptimizer};
use crate::requirement::Outcomes;
use crate::row::{Query, Row, RowSource};
use crate::runner::RunnerConfig;
use crate::scheduler::TaskRunner;
use crate::task::{task, TaskHandle};

/// Rows dispatched but not yet retired, per unit of task runner concurrency
const IN_FLIGHT_PER_WORKER: usize = 4;

/// Why a component did not see a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The row lacks the outcomes the component requires
    NotSatisfied,
    /// An earlier component failed on the same row
    PreviousError,
}

/// Outcome of dispatching one row to one component
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The component ran
    Ok,
    /// The component did not see the row
    Skipped(SkipReason),
    /// The component raised
    Failed(ComponentError),
}

/// What happened to a row consumed through `consume_row`
#[derive(Debug, Clone)]
pub struct ConsumeRowResult {
    /// The row after every transformer ran
    pub row: Row,
    /// Filter outcomes established for the row
    pub outcomes: Outcomes,
    /// One entry per component, in processing order
    pub dispatches: Vec<(ComponentId, Dispatch)>,
}

impl ConsumeRowResult {
    /// What happened to `component`; `None` if it was pushed down
    pub fn dispatch(&self, component: ComponentId) -> Option<&Dispatch> {
        self.dispatches.iter().find(|(id, _)| *id == component).map(|(_, d)| d)
    }

    /// Whether any component raised
    pub fn is_failed(&self) -> bool {
        self.dispatches.iter().any(|(_, d)| match d {
            Dispatch::Failed(_) => true,
            _ => false,
        })
    }
}

struct Consumer {
    id: ComponentId,
    instance: Instance,
    serial: Option<Mutex<()>>,
    failed: AtomicBool,
    closed: AtomicBool,
}

impl Consumer {
    fn new(id: ComponentId, instance: Instance, concurrent: bool) -> Self {
        Consumer {
            id,
            instance,
            serial: if concurrent { None } else { Some(Mutex::new(())) },
            failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

/// Reads one table and runs its rows through the components reading it
pub struct RowProcessingPublisher {
    job: Arc<Job>,
    table: String,
    execution: ExecutionId,
    config: RunnerConfig,
    consumers: Vec<Consumer>,
    columns: Vec<ColumnId>,
    query: OptimizedQuery,
    listener: Arc<dyn AnalysisListener>,
    future: Arc<LocalResultFuture>,
    row_errors: AtomicUsize,
}

impl RowProcessingPublisher {
    /// Instantiates the components of `table` and plans its query
    pub fn new(
        job: Arc<Job>,
        table: &str,
        execution: ExecutionId,
        config: RunnerConfig,
        listener: Arc<dyn AnalysisListener>,
        future: Arc<LocalResultFuture>,
    ) -> Result<Self, ConfigError> {
        let mut consumers = Vec::new();
        for id in job.table_components(table) {
            let component = job.component(id);
            let instance = component.descriptor().instantiate(component.properties()).map_err(|e| {
                ConfigError::Instantiation { component: component.name().to_owned(), reason: e.to_string() }
            })?;
            consumers.push(Consumer::new(id, instance, component.descriptor().is_concurrent()));
        }

        let columns = job.source_columns(table);
        let names = columns
            .iter()
            .filter_map(|c| job.column(*c).map(|col| col.name().to_owned()))
            .collect();
        let base = Query::new(table, names);
        let query = if config.query_optimization {
            let pairs: Vec<(ComponentId, &Instance)> = consumers.iter().map(|c| (c.id, &c.instance)).collect();
            QueryOptimizer::new(&job, &pairs).optimize(base)
        } else {
            OptimizedQuery::unchanged(base)
        };

        if log_enabled!(log::Level::Debug) {
            let order: Vec<&str> = consumers
                .iter()
                .filter(|c| !query.removed.contains(&c.id))
                .map(|c| job.component(c.id).name())
                .collect();
            debug!("[{}] Processing order for {}: {:?}", execution, table, order);
        }

        Ok(RowProcessingPublisher {
            job,
            table: table.to_owned(),
            execution,
            config,
            consumers,
            columns,
            query,
            listener,
            future,
            row_errors: AtomicUsize::new(0),
        })
    }

    /// Table read
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The query that will be sent to the row source
    pub fn query(&self) -> &Query {
        &self.query.query
    }

    /// Components that were replaced by the query
    pub fn is_pushed_down(&self, component: ComponentId) -> bool {
        self.query.removed.contains(&component)
    }

    fn component(&self, consumer: &Consumer) -> &ComponentJob {
        self.job.component(consumer.id)
    }

    /// Runs the initialize hooks.  Returns false if any of them failed.
    pub fn initialize(&self) -> bool {
        let mut ok = true;
        for consumer in self.consumers.iter() {
            let mut result = consumer.instance.initialize();
            if result.is_ok() && self.config.include_non_distributed {
                result = consumer.instance.initialize_non_distributed();
            }
            if let Err(e) = result {
                let error = AnalysisError::Initialization {
                    component: self.component(consumer).name().to_owned(),
                    source: e,
                };
                self.listener.error_unknown(&self.execution, &error);
                self.future.add_error(error);
                consumer.failed.store(true, Ordering::SeqCst);
                ok = false;
            }
        }
        ok
    }

    fn run_component(&self, consumer: &Consumer, row: &mut Row, outcomes: &mut Outcomes) -> Result<(), ComponentError> {
        let component = self.component(consumer);
        let _guard = consumer.serial.as_ref().map(|m| m.lock().unwrap_or_else(|p| p.into_inner()));
        match &consumer.instance {
            Instance::Filter(f) => {
                let category = f.categorize(&row.view(component.inputs()))?;
                trace!("Row {}: {} -> {}", row.id(), component.name(), category);
                outcomes.insert(consumer.id, category);
            }
            Instance::Transformer(t) => {
                let values = t.transform(&row.view(component.inputs()))?;
                if values.len() != component.outputs().len() {
                    return Err(ComponentError::new(format!(
                        "{} produced {} value(s) for {} output column(s)",
                        component.name(),
                        values.len(),
                        component.outputs().len()
                    )));
                }
                for (column, value) in component.outputs().iter().zip(values) {
                    row.set(*column, value);
                }
            }
            Instance::Analyzer(a) | Instance::Explorer(a) => a.run(&row.view(component.inputs()))?,
        }
        Ok(())
    }

    /// Sends one row through the pipeline on the calling thread and reports
    /// what each component did with it.  Errors are not recorded.
    ///
    /// After a failure, components whose requirement is already refused by
    /// the established outcomes are still reported as not satisfied; the
    /// others are skipped as previous errors.
    pub fn consume_row(&self, mut row: Row) -> ConsumeRowResult {
        let mut outcomes = self.query.preset.clone();
        let mut dispatches = Vec::with_capacity(self.consumers.len());
        let mut failed = false;
        for consumer in self.consumers.iter() {
            if self.query.removed.contains(&consumer.id) {
                continue;
            }
            let requirement = self.job.effective_requirement(consumer.id);
            let dispatch = if !requirement.is_satisfied(&outcomes) && (!failed || requirement.is_decided(&outcomes)) {
                Dispatch::Skipped(SkipReason::NotSatisfied)
            } else if failed {
                Dispatch::Skipped(SkipReason::PreviousError)
            } else {
                match self.run_component(consumer, &mut row, &mut outcomes) {
                    Ok(()) => Dispatch::Ok,
                    Err(e) => {
                        failed = true;
                        Dispatch::Failed(e)
                    }
                }
            };
            dispatches.push((consumer.id, dispatch));
        }
        ConsumeRowResult { row, outcomes, dispatches }
    }

    // Runs the row and records its errors against the execution
    fn process_row(&self, row: Row) {
        let result = self.consume_row(row);
        if !result.is_failed() {
            return;
        }
        for (id, dispatch) in result.dispatches.iter() {
            let component = self.job.component(*id);
            match dispatch {
                Dispatch::Failed(e) => {
                    match component.kind() {
                        ComponentKind::Filter => self.listener.error_in_filter(&self.execution, component, &result.row, e),
                        ComponentKind::Transformer => {
                            self.listener.error_in_transformer(&self.execution, component, &result.row, e)
                        }
                        _ => self.listener.error_in_analyzer(&self.execution, component, &result.row, e),
                    }
                    if let Some(consumer) = self.consumers.iter().find(|c| c.id == *id) {
                        consumer.failed.store(true, Ordering::SeqCst);
                    }
                    self.row_errors.fetch_add(1, Ordering::SeqCst);
                    self.future.add_error(AnalysisError::Component {
                        component: component.name().to_owned(),
                        kind: component.kind(),
                        row: Some(result.row.id()),
                        source: e.clone(),
                    });
                }
                Dispatch::Skipped(SkipReason::PreviousError) => {
                    self.future.add_error(AnalysisError::PreviousErrorsExist {
                        component: component.name().to_owned(),
                        row: Some(result.row.id()),
                    });
                }
                _ => (),
            }
        }
    }

    fn too_many_errors(&self) -> bool {
        match self.config.max_row_errors {
            Some(max) => self.row_errors.load(Ordering::SeqCst) > max,
            None => false,
        }
    }

    /// Joins one task, recording its error.  A panic payload is kept for
    /// the caller.
    fn retire(&self, handle: TaskHandle, panicked: &mut Option<Box<dyn Any + Send>>) {
        match handle.join() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => self.future.add_error(e),
            Err(payload) => {
                if panicked.is_none() {
                    panicked.replace(payload);
                }
            }
        }
    }

    /// Reads the whole table and dispatches every row.  Returns the number
    /// of rows read.
    ///
    /// At most `IN_FLIGHT_PER_WORKER` rows per unit of the runner's
    /// concurrency are outstanding; reading waits for the oldest row
    /// beyond that.
    pub fn run(self: &Arc<Self>, source: &dyn RowSource, runner: &dyn TaskRunner) -> u64 {
        let query = &self.query.query;
        let expected = match source.expected_rows(query) {
            Ok(n) => Some(n),
            Err(e) => {
                debug!("[{}] Could not count rows of {}: {}", self.execution, self.table, e);
                None
            }
        };
        self.listener.row_processing_begin(&self.execution, &self.table, expected);

        let records = match source.execute(query) {
            Ok(records) => records,
            Err(e) => {
                let error = AnalysisError::Source { table: self.table.clone(), source: e };
                self.listener.error_unknown(&self.execution, &error);
                self.future.add_error(error);
                return 0;
            }
        };

        let first_row = query.first_row.unwrap_or(1);
        let width = self.job.columns().len();
        let limit = runner.concurrency().max(1) * IN_FLIGHT_PER_WORKER;
        let mut in_flight: VecDeque<TaskHandle> = VecDeque::with_capacity(limit + 1);
        let mut panicked = None;
        let mut rows = 0u64;
        for record in records {
            if panicked.is_some() {
                break;
            }
            if self.future.is_cancelled() {
                info!("[{}] Stopping {} after {} rows, execution cancelled", self.execution, self.table, rows);
                break;
            }
            if self.too_many_errors() {
                let error = AnalysisError::Unknown(format!(
                    "more than {} row errors in table {}, aborting",
                    self.config.max_row_errors.unwrap_or(0),
                    self.table
                ));
                self.listener.error_unknown(&self.execution, &error);
                self.future.add_error(error);
                break;
            }
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    let error = AnalysisError::Source { table: self.table.clone(), source: e };
                    self.listener.error_unknown(&self.execution, &error);
                    self.future.add_error(error);
                    break;
                }
            };

            let mut row = Row::new(first_row + rows, record.distinct_count, width);
            for (column, value) in self.columns.iter().zip(record.values.into_iter()) {
                row.set(*column, value);
            }
            rows += 1;

            let publisher = self.clone();
            in_flight.push_back(runner.submit(task(move || {
                publisher.process_row(row);
                Ok(())
            })));
            while in_flight.len() > limit {
                if let Some(handle) = in_flight.pop_front() {
                    self.retire(handle, &mut panicked);
                }
            }

            if self.config.progress_interval > 0 && rows % self.config.progress_interval == 0 {
                self.listener.row_processing_progress(&self.execution, &self.table, rows);
            }
        }

        // Every row is retired before results are requested
        for error in runner.wait_for_all(in_flight.into_iter().collect()) {
            self.future.add_error(error);
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        self.listener.row_processing_success(&self.execution, &self.table, rows);
        rows
    }

    /// Asks every analyzer and explorer for its result.  Components that
    /// failed on some row are not asked; a marker is recorded instead.
    pub fn collect_results(&self) -> Vec<ResultEntry> {
        let mut entries = Vec::new();
        for consumer in self.consumers.iter() {
            let component = self.component(consumer);
            let analyzer = match consumer.instance.as_analyzer() {
                Some(a) => a,
                None => {
                    if !consumer.failed.load(Ordering::SeqCst) {
                        self.listener.component_success(&self.execution, component);
                    }
                    continue;
                }
            };
            if consumer.failed.load(Ordering::SeqCst) {
                self.future.add_error(AnalysisError::PreviousErrorsExist {
                    component: component.name().to_owned(),
                    row: None,
                });
                continue;
            }
            let result: Result<ResultRef, ComponentError> = analyzer.result();
            match result {
                Ok(result) => {
                    entries.push(ResultEntry {
                        component: consumer.id,
                        key: component.key().clone(),
                        name: component.name().to_owned(),
                        result,
                    });
                    self.listener.component_success(&self.execution, component);
                }
                Err(e) => {
                    let error = AnalysisError::Component {
                        component: component.name().to_owned(),
                        kind: component.kind(),
                        row: None,
                        source: e,
                    };
                    self.listener.error_unknown(&self.execution, &error);
                    self.future.add_error(error);
                }
            }
        }
        entries
    }

    /// Runs the close hooks of every component.  Safe to call more than
    /// once; each component is closed only the first time.
    pub fn close(&self, success: bool) {
        for consumer in self.consumers.iter() {
            if consumer.closed.swap(true, Ordering::SeqCst) {
                continue;
            }
            trace!("[{}] Closing {}", self.execution, self.component(consumer).name());
            consumer.instance.close(success);
            if self.config.include_non_distributed {
                consumer.instance.close_non_distributed(success);
            }
        }
    }
}
