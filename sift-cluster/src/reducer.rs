//! Merging the slave executions of a distributed job into one result.

use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;

use sift::component::Instance;
use sift::future::ResultEntry;
use sift::{
    AnalysisError, AnalysisListener, AnalysisResultFuture, AnalysisResults, ComponentId, ExecutionId, Job,
    JobError, JobStatus, LocalResultFuture, ResultRef,
};

/// Handle of a distributed execution.  Completes once every slave is done
/// and their results are reduced.
pub struct DistributedResultFuture {
    local: Arc<LocalResultFuture>,
    slaves: Vec<Arc<dyn AnalysisResultFuture>>,
}

impl DistributedResultFuture {
    pub(crate) fn new(local: Arc<LocalResultFuture>, slaves: Vec<Arc<dyn AnalysisResultFuture>>) -> Self {
        DistributedResultFuture { local, slaves }
    }

    /// Number of slave jobs dispatched, including one that failed to
    /// dispatch
    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }
}

impl AnalysisResultFuture for DistributedResultFuture {
    fn id(&self) -> ExecutionId {
        self.local.id()
    }

    fn status(&self) -> JobStatus {
        self.local.status()
    }

    fn wait(&self) {
        self.local.wait()
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        self.local.wait_timeout(timeout)
    }

    /// Slave jobs cannot be recalled once dispatched, so this only
    /// succeeds on a finished execution
    fn cancel(&self) -> Result<(), JobError> {
        if self.local.is_done() {
            return Ok(());
        }
        for slave in self.slaves.iter().filter(|s| !s.is_done()) {
            slave.cancel()?;
        }
        self.local.cancel()
    }

    fn results(&self) -> Result<AnalysisResults, JobError> {
        self.local.results()
    }

    fn errors(&self) -> Vec<AnalysisError> {
        self.local.errors()
    }

    fn is_successful(&self) -> bool {
        self.local.is_successful()
    }

    fn is_errornous(&self) -> bool {
        self.local.is_errornous()
    }
}

/// Waits for the slaves of one distributed execution and reduces their
/// results, completing the master's handle.
pub(crate) struct DistributedResultReducer {
    job: Arc<Job>,
    instances: Vec<(ComponentId, Instance)>,
    listener: Arc<dyn AnalysisListener>,
}

impl DistributedResultReducer {
    /// `instances` are the master's own component instances, already
    /// initialized; they are closed once reduction is over
    pub fn new(job: Arc<Job>, instances: Vec<(ComponentId, Instance)>, listener: Arc<dyn AnalysisListener>) -> Self {
        DistributedResultReducer { job, instances, listener }
    }

    /// Waits for every slave, then completes `future` with the merged
    /// results or the slaves' errors
    pub fn reduce(&self, slaves: &[Arc<dyn AnalysisResultFuture>], future: &LocalResultFuture) {
        let id = future.id();
        for slave in slaves.iter() {
            slave.wait();
        }

        let results = match slaves.iter().position(|s| s.status() != JobStatus::Successful) {
            Some(failed) => {
                self.surface_slave_errors(slaves, failed, future);
                AnalysisResults::new()
            }
            None => {
                let partials: Vec<AnalysisResults> = slaves.iter().filter_map(|s| s.results().ok()).collect();
                self.merge(&partials, future)
            }
        };

        let success = future.error_count() == 0;
        self.close(success);
        if success {
            self.listener.job_success(&id, &self.job);
        } else {
            self.listener.job_failed(&id, &self.job, &future.error_snapshot());
        }
        future.complete(results);
    }

    /// The first failed slave's errors verbatim, every other failed slave's
    /// errors as markers
    fn surface_slave_errors(&self, slaves: &[Arc<dyn AnalysisResultFuture>], first: usize, future: &LocalResultFuture) {
        warn!("[{}] Slave {} failed, skipping reduction", future.id(), first);
        for (idx, slave) in slaves.iter().enumerate() {
            let errors = slave.errors();
            if idx == first {
                if errors.is_empty() {
                    future.add_error(AnalysisError::Unknown(format!("slave {} was {:?}", idx, slave.status())));
                }
                for e in errors {
                    future.add_error(e);
                }
            } else if slave.status() != JobStatus::Successful {
                let count = errors.len().max(1);
                for _ in 0..count {
                    future.add_error(AnalysisError::PreviousErrorsExist {
                        component: format!("slave {}", idx),
                        row: None,
                    });
                }
            }
        }
    }

    fn merge(&self, partials: &[AnalysisResults], future: &LocalResultFuture) -> AnalysisResults {
        let producers: Vec<_> = self.job.result_producers().collect();
        let merged: Vec<Result<ResultEntry, AnalysisError>> = producers
            .par_iter()
            .map(|component| {
                let mut parts: Vec<ResultRef> = Vec::with_capacity(partials.len());
                for (idx, results) in partials.iter().enumerate() {
                    match results.get_by_key(component.key()) {
                        Some(r) => parts.push(r.clone()),
                        None => {
                            return Err(AnalysisError::Unknown(format!(
                                "slave {} has no result for {}",
                                idx,
                                component.key()
                            )))
                        }
                    }
                }

                let result = if parts.len() == 1 {
                    parts.remove(0)
                } else {
                    let reducer = component.descriptor().reducer().ok_or_else(|| AnalysisError::Reduction {
                        component: component.name().to_owned(),
                        source: "no reducer declared".into(),
                    })?;
                    trace!("Reducing {} partial results of {}", parts.len(), component.name());
                    reducer.reduce(&parts).map_err(|source| AnalysisError::Reduction {
                        component: component.name().to_owned(),
                        source,
                    })?
                };
                Ok(ResultEntry {
                    component: component.id(),
                    key: component.key().clone(),
                    name: component.name().to_owned(),
                    result,
                })
            })
            .collect();

        let mut results = AnalysisResults::new();
        for entry in merged {
            match entry {
                Ok(entry) => results.insert(entry),
                Err(e) => {
                    error!("[{}] {}", future.id(), e);
                    self.listener.error_unknown(&future.id(), &e);
                    future.add_error(e);
                }
            }
        }
        results
    }

    /// Closes the master's instances, exactly once per execution
    pub fn close(&self, success: bool) {
        for (id, instance) in self.instances.iter() {
            trace!("Closing master instance of {}", self.job.component(*id).name());
            instance.close_non_distributed(success);
        }
    }
}

#[cfg(test)]
mod reducer_test {
    use super::*;
    use sift::testkit::{self, Counted};
    use sift::{ComponentKey, JobBuilder, LoggingAnalysisListener};

    fn slave(job: &Job, counts: &[(ComponentId, u64)]) -> Arc<dyn AnalysisResultFuture> {
        let future = LocalResultFuture::new(ExecutionId::new());
        let mut results = AnalysisResults::new();
        for (id, rows) in counts.iter() {
            let c = job.component(*id);
            results.insert(ResultEntry {
                component: *id,
                key: c.key().clone(),
                name: c.name().to_owned(),
                result: Arc::new(Counted { rows: *rows }),
            });
        }
        future.complete(results);
        Arc::new(future)
    }

    fn reducer(job: &Arc<Job>) -> DistributedResultReducer {
        DistributedResultReducer::new(job.clone(), Vec::new(), Arc::new(LoggingAnalysisListener))
    }

    #[test]
    fn test_merge_by_key() {
        let mut b = JobBuilder::new();
        let n = b.source_column("t", "n");
        let good = b.add_component(&testkit::count_analyzer()).input(n).add();
        let bad = b.add_component(&testkit::bad_reducer_analyzer()).input(n).add();
        let job = Arc::new(b.build().unwrap());

        let slaves = vec![slave(&job, &[(good, 2), (bad, 2)]), slave(&job, &[(good, 3), (bad, 3)])];
        let future = LocalResultFuture::new(ExecutionId::new());
        reducer(&job).reduce(&slaves, &future);

        let errors = future.errors();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            AnalysisError::Reduction { component, .. } => assert_eq!(component, job.component(bad).name()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(future.is_errornous());
    }

    #[test]
    fn test_missing_partial() {
        let mut b = JobBuilder::new();
        let n = b.source_column("t", "n");
        let a = b.add_component(&testkit::count_analyzer()).input(n).add();
        let job = Arc::new(b.build().unwrap());

        let slaves = vec![slave(&job, &[(a, 1)]), slave(&job, &[])];
        let future = LocalResultFuture::new(ExecutionId::new());
        reducer(&job).reduce(&slaves, &future);
        assert_eq!(future.errors().len(), 1);
        assert!(future.results().is_err());
        assert_ne!(job.component(a).key(), &ComponentKey::default());
    }

    #[test]
    fn test_failed_slaves() {
        let mut b = JobBuilder::new();
        let n = b.source_column("t", "n");
        let a = b.add_component(&testkit::count_analyzer()).input(n).add();
        let job = Arc::new(b.build().unwrap());

        let root = AnalysisError::Unknown("disk on fire".into());
        let failed = |errors: Vec<AnalysisError>| -> Arc<dyn AnalysisResultFuture> {
            Arc::new(LocalResultFuture::failed(ExecutionId::new(), errors))
        };
        let slaves = vec![
            slave(&job, &[(a, 1)]),
            failed(vec![root.clone()]),
            failed(vec![AnalysisError::Unknown("a".into()), AnalysisError::Unknown("b".into())]),
        ];
        let future = LocalResultFuture::new(ExecutionId::new());
        reducer(&job).reduce(&slaves, &future);

        let errors = future.errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], root);
        assert!(errors[1..].iter().all(|e| e.is_previous_error_marker()));
    }
}
