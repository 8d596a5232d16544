use std::sync::Arc;
use std::time::Duration;

use sift::{
    AnalysisError, AnalysisListener, AnalysisResultFuture, AnalysisResults, AnalysisRunner, ComponentRegistry,
    ExecutionId, JobError, JobStatus, LocalResultFuture, RowSource, RunnerConfig,
};

use crate::error::ClusterError;
use crate::serial::JobSpec;

/// Where a slave job sits within its distributed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedJobContext {
    /// Execution id of the master
    pub master: ExecutionId,
    /// Index of this slave, from 0
    pub slave_index: usize,
    /// Number of slaves of the execution
    pub slave_count: usize,
}

/// Hands encoded slave jobs to whatever executes them.
///
/// `payload` is an encoded `JobSpec`; it is all a slave needs to rebuild
/// the job.  An `Err` means the slave job was never started.
pub trait ClusterManager: Send + Sync {
    /// Starts a slave job and returns its handle
    fn dispatch_job(
        &self,
        payload: Vec<u8>,
        context: DistributedJobContext,
    ) -> Result<Arc<dyn AnalysisResultFuture>, ClusterError>;
}

/// Runs slave jobs in this process against a shared row source.
pub struct VirtualClusterManager {
    registry: Arc<ComponentRegistry>,
    source: Arc<dyn RowSource>,
    config: RunnerConfig,
    listener: Option<Arc<dyn AnalysisListener>>,
}

impl VirtualClusterManager {
    /// Slaves rebuild jobs from `registry` and read `source`
    pub fn new(registry: Arc<ComponentRegistry>, source: Arc<dyn RowSource>) -> Self {
        VirtualClusterManager { registry, source, config: RunnerConfig::slave(), listener: None }
    }

    /// Slave runner settings; non-distributed hooks are always left to
    /// the master
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config.with_include_non_distributed(false);
        self
    }

    /// Listener of the slave executions
    pub fn with_listener(mut self, listener: Arc<dyn AnalysisListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl ClusterManager for VirtualClusterManager {
    fn dispatch_job(
        &self,
        payload: Vec<u8>,
        context: DistributedJobContext,
    ) -> Result<Arc<dyn AnalysisResultFuture>, ClusterError> {
        let job = JobSpec::decode(&payload)?.to_job(&self.registry)?;
        let mut runner = AnalysisRunner::new(self.config.clone());
        if let Some(listener) = &self.listener {
            runner = runner.with_listener(listener.clone());
        }
        let future = runner.run(Arc::new(job), self.source.clone())?;
        debug!(
            "[{}] Slave {}/{} running as {}",
            context.master,
            context.slave_index + 1,
            context.slave_count,
            future.id()
        );
        Ok(Arc::new(SlaveResultFuture { inner: future }))
    }
}

/// A dispatched slave execution.  It cannot be cancelled from the master.
struct SlaveResultFuture {
    inner: Arc<LocalResultFuture>,
}

impl AnalysisResultFuture for SlaveResultFuture {
    fn id(&self) -> ExecutionId {
        self.inner.id()
    }

    fn status(&self) -> JobStatus {
        self.inner.status()
    }

    fn wait(&self) {
        self.inner.wait()
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.wait_timeout(timeout)
    }

    fn cancel(&self) -> Result<(), JobError> {
        Err(JobError::Unsupported("cancelling a dispatched slave job".to_owned()))
    }

    fn results(&self) -> Result<AnalysisResults, JobError> {
        self.inner.results()
    }

    fn errors(&self) -> Vec<AnalysisError> {
        self.inner.errors()
    }

    fn is_successful(&self) -> bool {
        self.inner.is_successful()
    }

    fn is_errornous(&self) -> bool {
        self.inner.is_errornous()
    }
}
