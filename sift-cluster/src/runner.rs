//! The distributed analysis runner.

use std::panic;
use std::sync::Arc;
use std::thread;

use sift::component::Instance;
use sift::{
    AnalysisError, AnalysisListener, AnalysisResultFuture, AnalysisResults, ComponentId, ConfigError, ExecutionId,
    Job, LocalResultFuture, LoggingAnalysisListener, Query, RowSource,
};

use crate::cluster::{ClusterManager, DistributedJobContext};
use crate::division::JobDivisionManager;
use crate::error::ClusterError;
use crate::partition::row_ranges;
use crate::reducer::{DistributedResultFuture, DistributedResultReducer};
use crate::serial::JobSpec;

/// Runs a job as a set of row-range slave jobs and reduces their results.
#[derive(Clone)]
pub struct DistributedAnalysisRunner {
    cluster: Arc<dyn ClusterManager>,
    division: Arc<dyn JobDivisionManager>,
    listener: Arc<dyn AnalysisListener>,
}

impl DistributedAnalysisRunner {
    /// Dispatches to `cluster`, asking `division` for the slave count
    pub fn new(cluster: Arc<dyn ClusterManager>, division: Arc<dyn JobDivisionManager>) -> Self {
        DistributedAnalysisRunner { cluster, division, listener: Arc::new(LoggingAnalysisListener) }
    }

    /// Replaces the listener of the master execution
    pub fn with_listener(mut self, listener: Arc<dyn AnalysisListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Whether `job` can be split into slave jobs
    pub fn is_distributable(job: &Job) -> bool {
        DistributedAnalysisRunner::check_distributable(job).is_ok()
    }

    /// Every component must be distributable, analyzers need a reducer and
    /// the job must read a single table
    pub fn check_distributable(job: &Job) -> Result<(), ConfigError> {
        if job.tables().len() != 1 {
            return Err(ConfigError::NotDistributable(format!(
                "job reads {} tables, distributed jobs read exactly one",
                job.tables().len()
            )));
        }
        for c in job.components() {
            if !c.descriptor().is_distributable() {
                return Err(ConfigError::NotDistributable(format!("{} {} cannot be distributed", c.kind(), c.name())));
            }
        }
        Ok(())
    }

    /// Splits the job over the cluster.  `source` is only used to count the
    /// rows of the job's table.
    pub fn run(&self, job: Arc<Job>, source: &dyn RowSource) -> Result<Arc<DistributedResultFuture>, ClusterError> {
        DistributedAnalysisRunner::check_distributable(&job)?;
        let table = job.tables()[0].clone();
        let columns = job
            .source_columns(&table)
            .into_iter()
            .filter_map(|c| job.column(c))
            .map(|c| c.name().to_owned())
            .collect();
        let expected_rows = source.expected_rows(&Query::new(table.clone(), columns))?;

        let requested = self.division.division_count(&job, expected_rows);
        let ranges = row_ranges(expected_rows, requested);
        if ranges.len() != requested {
            debug!("Using {} slave(s) instead of {} for {} row(s)", ranges.len(), requested, expected_rows);
        }

        let instances = instantiate(&job)?;

        let id = ExecutionId::new();
        let future = Arc::new(LocalResultFuture::new(id));
        info!("[{}] Distributing {} row(s) of '{}' over {} slave(s)", id, expected_rows, table, ranges.len());
        self.listener.job_begin(&id, &job);

        let mut slaves: Vec<Arc<dyn AnalysisResultFuture>> = Vec::with_capacity(ranges.len());
        if initialize(&job, &instances, &future) {
            for (index, range) in ranges.iter().enumerate() {
                debug!("[{}] Slave {} reads rows {} (max {:?})", id, index, range.first_row, range.max_rows);
                let context = DistributedJobContext { master: id, slave_index: index, slave_count: ranges.len() };
                let payload = job
                    .with_row_range(range.first_row, range.max_rows)
                    .map_err(ClusterError::from)
                    .and_then(|slave| JobSpec::from_job(&slave).encode());
                match payload.and_then(|p| self.cluster.dispatch_job(p, context)) {
                    Ok(slave) => slaves.push(slave),
                    Err(e) => {
                        error!("[{}] Dispatching slave {} failed: {}", id, index, e);
                        let error = AnalysisError::Dispatch { slave: index, message: e.to_string() };
                        slaves.insert(0, Arc::new(LocalResultFuture::failed(ExecutionId::new(), vec![error])));
                        break;
                    }
                }
            }
        }

        let reducer = DistributedResultReducer::new(job.clone(), instances, self.listener.clone());
        if slaves.is_empty() {
            // Initialization failed, nothing was dispatched
            reducer.close(false);
            self.listener.job_failed(&id, &job, &future.error_snapshot());
            future.complete(AnalysisResults::new());
            return Ok(Arc::new(DistributedResultFuture::new(future, slaves)));
        }

        let handle = future.clone();
        let waiting = slaves.clone();
        thread::spawn(move || {
            let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| reducer.reduce(&waiting, &handle)));
            if let Err(payload) = outcome {
                error!("[{}] Reduction panicked", handle.id());
                reducer.close(false);
                handle.abort(payload);
            }
        });
        Ok(Arc::new(DistributedResultFuture::new(future, slaves)))
    }
}

fn instantiate(job: &Job) -> Result<Vec<(ComponentId, Instance)>, ConfigError> {
    job.components()
        .iter()
        .map(|c| {
            c.descriptor()
                .instantiate(c.properties())
                .map(|instance| (c.id(), instance))
                .map_err(|e| ConfigError::Instantiation { component: c.name().to_owned(), reason: e.to_string() })
        })
        .collect()
}

/// Runs the hooks meant to run once per logical job
fn initialize(job: &Job, instances: &[(ComponentId, Instance)], future: &LocalResultFuture) -> bool {
    let mut ok = true;
    for (id, instance) in instances.iter() {
        if let Err(source) = instance.initialize_non_distributed() {
            future.add_error(AnalysisError::Initialization { component: job.component(*id).name().to_owned(), source });
            ok = false;
        }
    }
    ok
}
