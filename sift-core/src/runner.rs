//! The analysis runner: turns a job and a row source into an execution.

use std::panic;
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;

use crate::error::ConfigError;
use crate::future::{AnalysisResultFuture, AnalysisResults, ExecutionId, LocalResultFuture};
use crate::job::Job;
use crate::listener::{AnalysisListener, LoggingAnalysisListener};
use crate::publisher::RowProcessingPublisher;
use crate::row::RowSource;
use crate::scheduler::{PooledTaskRunner, SingleThreadedTaskRunner, TaskRunner};

/// Execution settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Worker threads for row dispatch; 0 or 1 runs rows on the driver
    /// thread
    pub threads: usize,

    /// Scan several tables at the same time
    pub concurrent_tables: bool,

    /// Honor the lifecycle hooks meant to run once per logical job
    pub include_non_distributed: bool,

    /// Push row windows into source queries where possible
    pub query_optimization: bool,

    /// Rows between progress events; 0 disables them
    pub progress_interval: u64,

    /// Abort a table scan once more rows than this have failed
    pub max_row_errors: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            threads: num_cpus::get(),
            concurrent_tables: true,
            include_non_distributed: true,
            query_optimization: true,
            progress_interval: 1000,
            max_row_errors: None,
        }
    }
}

impl RunnerConfig {
    /// Everything on one thread, tables one after another
    pub fn single_threaded() -> Self {
        RunnerConfig { threads: 1, concurrent_tables: false, ..RunnerConfig::default() }
    }

    /// Settings for a slave of a distributed job
    pub fn slave() -> Self {
        RunnerConfig { include_non_distributed: false, ..RunnerConfig::default() }
    }

    /// Sets `threads`
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets `concurrent_tables`
    pub fn with_concurrent_tables(mut self, concurrent: bool) -> Self {
        self.concurrent_tables = concurrent;
        self
    }

    /// Sets `include_non_distributed`
    pub fn with_include_non_distributed(mut self, include: bool) -> Self {
        self.include_non_distributed = include;
        self
    }

    /// Sets `query_optimization`
    pub fn with_query_optimization(mut self, optimize: bool) -> Self {
        self.query_optimization = optimize;
        self
    }

    /// Sets `progress_interval`
    pub fn with_progress_interval(mut self, rows: u64) -> Self {
        self.progress_interval = rows;
        self
    }

    /// Sets `max_row_errors`
    pub fn with_max_row_errors(mut self, max: Option<usize>) -> Self {
        self.max_row_errors = max;
        self
    }

    fn task_runner(&self) -> Box<dyn TaskRunner> {
        if self.threads <= 1 {
            Box::new(SingleThreadedTaskRunner::new())
        } else {
            Box::new(PooledTaskRunner::new(self.threads))
        }
    }
}

/// Runs jobs against a row source.
#[derive(Clone)]
pub struct AnalysisRunner {
    config: RunnerConfig,
    listener: Arc<dyn AnalysisListener>,
}

impl Default for AnalysisRunner {
    fn default() -> Self {
        AnalysisRunner::new(RunnerConfig::default())
    }
}

impl AnalysisRunner {
    /// A runner reporting to a `LoggingAnalysisListener`
    pub fn new(config: RunnerConfig) -> Self {
        AnalysisRunner { config, listener: Arc::new(LoggingAnalysisListener) }
    }

    /// Replaces the listener
    pub fn with_listener(mut self, listener: Arc<dyn AnalysisListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Settings used for every run
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Starts the job and returns its handle.  Components are instantiated
    /// before this returns, so configuration problems surface here and no
    /// row is read.
    pub fn run(&self, job: Arc<Job>, source: Arc<dyn RowSource>) -> Result<Arc<LocalResultFuture>, ConfigError> {
        let id = ExecutionId::new();
        let future = Arc::new(LocalResultFuture::new(id));

        let mut publishers = Vec::with_capacity(job.tables().len());
        for table in job.tables() {
            let publisher = RowProcessingPublisher::new(
                job.clone(),
                table,
                id,
                self.config.clone(),
                self.listener.clone(),
                future.clone(),
            )?;
            publishers.push(Arc::new(publisher));
        }

        info!("[{}] Starting job over {} table(s)", id, publishers.len());
        self.listener.job_begin(&id, &job);

        let config = self.config.clone();
        let listener = self.listener.clone();
        let handle = future.clone();
        thread::spawn(move || {
            let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                execute(&config, &job, &publishers, &*source, &*listener, &handle)
            }));
            if let Err(payload) = outcome {
                error!("[{}] Execution panicked", id);
                for p in publishers.iter() {
                    p.close(false);
                }
                handle.abort(payload);
            }
        });
        Ok(future)
    }
}

fn execute(
    config: &RunnerConfig,
    job: &Job,
    publishers: &[Arc<RowProcessingPublisher>],
    source: &dyn RowSource,
    listener: &dyn AnalysisListener,
    future: &LocalResultFuture,
) {
    let id = future.id();
    let runner = config.task_runner();

    let initialized = publishers.iter().fold(true, |ok, p| p.initialize() && ok);
    let mut results = AnalysisResults::new();
    if initialized {
        if config.concurrent_tables && publishers.len() > 1 {
            let runner = &*runner;
            publishers.par_iter().for_each(|p| {
                p.run(source, runner);
            });
        } else {
            for p in publishers.iter() {
                p.run(source, &*runner);
            }
        }
        for p in publishers.iter() {
            for entry in p.collect_results() {
                results.insert(entry);
            }
        }
    }
    runner.shutdown();

    let success = future.error_count() == 0 && !future.is_cancelled();
    for p in publishers.iter() {
        p.close(success);
    }
    if future.error_count() == 0 {
        listener.job_success(&id, job);
    } else {
        listener.job_failed(&id, job, &future.error_snapshot());
    }
    future.complete(results);
}

#[cfg(test)]
mod runner_test {
    use super::*;
    use crate::error::{AnalysisError, JobError, SourceError};
    use crate::future::JobStatus;
    use crate::job::{ComponentId, JobBuilder, Requirement};
    use crate::row::{MemoryRowSource, Query, RecordIter, Value};
    use crate::testkit::{self, Counted, Hooks, Listed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn names() -> Arc<dyn RowSource> {
        let rows = ["foo", "bar", "baz", "hello", "world"].iter().map(|n| vec![Value::from(*n)]).collect();
        Arc::new(MemoryRowSource::new().with_table("t", &["name"], rows))
    }

    fn run(job: Job, config: RunnerConfig) -> Arc<LocalResultFuture> {
        let future = AnalysisRunner::new(config).run(Arc::new(job), names()).unwrap();
        assert!(future.wait_timeout(Duration::from_secs(30)));
        future
    }

    fn listed(future: &LocalResultFuture, id: ComponentId) -> Vec<Vec<Value>> {
        let result = future.result(id).unwrap().unwrap();
        let mut rows = result.downcast_ref::<Listed>().unwrap().rows.clone();
        rows.sort_by_key(|r| r.0);
        rows.into_iter().map(|r| r.1).collect()
    }

    #[test]
    fn test_even_odd_branches_merge() {
        init();
        for config in vec![RunnerConfig::single_threaded(), RunnerConfig::default().with_threads(4)] {
            let mut b = JobBuilder::new();
            let name = b.source_column("t", "name");
            let f = b.add_component(&testkit::even_odd_filter()).input(name).add();
            let even = b.add_component(&testkit::mock_transformer()).input(name).output("e").requires(f, "EVEN").add();
            let odd = b.add_component(&testkit::mock_transformer()).input(name).output("o").requires(f, "ODD").add();
            let (e, o) = (b.outputs(even)[0], b.outputs(odd)[0]);
            let a = b.add_component(&testkit::list_analyzer()).inputs(&[name, e, o]).add();
            let job = b.build().unwrap();
            assert!(job.effective_requirement(a).is_unconditional());

            let future = run(job, config);
            assert!(future.is_successful());
            let rows = listed(&future, a);
            assert_eq!(rows.len(), 5);
            for row in rows.iter() {
                let non_null = row[1..].iter().filter(|v| !v.is_null()).count();
                assert_eq!(non_null, 1, "row {:?}", row);
            }
            assert_eq!(rows[0][2], Value::from("mocked: foo"));
            assert_eq!(rows[1][1], Value::from("mocked: bar"));
        }
    }

    #[test]
    fn test_single_branch_inherits_requirement() {
        init();
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let f = b.add_component(&testkit::even_odd_filter()).input(name).add();
        let even = b.add_component(&testkit::mock_transformer()).input(name).output("e").requires(f, "EVEN").add();
        let e = b.outputs(even)[0];
        let a = b.add_component(&testkit::list_analyzer()).input(e).add();
        let future = run(b.build().unwrap(), RunnerConfig::single_threaded());

        let rows = listed(&future, a);
        assert_eq!(rows, vec![vec![Value::from("mocked: bar")], vec![Value::from("mocked: hello")]]);
    }

    #[test]
    fn test_any_and_compound_requirements() {
        init();
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let f = b.add_component(&testkit::even_odd_filter()).input(name).add();
        let even = b.add_component(&testkit::mock_transformer()).input(name).output("e").requires(f, "EVEN").add();
        let e = b.outputs(even)[0];
        let any = b.add_component(&testkit::list_analyzer()).input(e).requirement(Requirement::Any).add();
        let both = b
            .add_component(&testkit::count_analyzer())
            .input(name)
            .requirement(Requirement::Compound(vec![
                crate::job::FilterOutcome::new(f, "EVEN"),
                crate::job::FilterOutcome::new(f, "ODD"),
            ]))
            .add();
        let odd = b.add_component(&testkit::count_analyzer()).input(name).requires(f, "ODD").add();
        let future = run(b.build().unwrap(), RunnerConfig::single_threaded());

        let any_rows = listed(&future, any);
        assert_eq!(any_rows.len(), 5);
        assert_eq!(any_rows.iter().filter(|r| r[0].is_null()).count(), 3);
        let count = |id| future.result(id).unwrap().unwrap().downcast_ref::<Counted>().unwrap().rows;
        assert_eq!(count(both), 5);
        assert_eq!(count(odd), 3);
    }

    #[test]
    fn test_failing_analyzer() {
        init();
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let (analyzer, closes) = testkit::failing_analyzer(3);
        let other = b.add_component(&testkit::count_analyzer()).input(name).add();
        let a = b.add_component(&analyzer).input(name).add();
        let future = run(b.build().unwrap(), RunnerConfig::single_threaded());

        assert_eq!(future.status(), JobStatus::Errornous);
        let errors = future.errors();
        assert_eq!(errors.len(), 2);
        match &errors[0] {
            AnalysisError::Component { row, .. } => assert_eq!(*row, Some(3)),
            e => panic!("unexpected {:?}", e),
        }
        assert!(errors[1].is_previous_error_marker());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(future.results().is_err());
        assert!(future.result(a).is_err());
        assert!(future.result(other).is_err());
    }

    #[test]
    fn test_idempotent() {
        init();
        let build = || {
            let mut b = JobBuilder::new();
            let name = b.source_column("t", "name");
            let f = b.add_component(&testkit::even_odd_filter()).input(name).add();
            b.add_component(&testkit::count_analyzer()).input(name).requires(f, "EVEN").add();
            b.add_component(&testkit::list_analyzer()).input(name).add();
            b.build().unwrap()
        };
        let first = run(build(), RunnerConfig::default());
        let second = run(build(), RunnerConfig::default());
        let (r1, r2) = (first.results().unwrap(), second.results().unwrap());
        assert_eq!(r1.len(), 2);
        let count = |r: &AnalysisResults| r.get(ComponentId(1)).unwrap().downcast_ref::<Counted>().cloned();
        assert_eq!(count(&r1), count(&r2));
        assert_eq!(listed(&first, ComponentId(2)), listed(&second, ComponentId(2)));
    }

    #[test]
    fn test_query_optimization_is_transparent() {
        init();
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let a = b.add_component(&testkit::list_analyzer()).input(name).add();
        let job = b.build().unwrap().with_row_range(2, Some(3)).unwrap();

        let optimized = run(job.clone(), RunnerConfig::single_threaded());
        let plain = run(job, RunnerConfig::single_threaded().with_query_optimization(false));
        let rows = listed(&optimized, a);
        assert_eq!(rows, listed(&plain, a));
        assert_eq!(rows, vec![vec![Value::from("bar")], vec![Value::from("baz")], vec![Value::from("hello")]]);
    }

    #[test]
    fn test_max_row_errors() {
        init();
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        b.add_component(&testkit::failing_transformer()).input(name).output("x").add();
        let rows = (0..10).map(|_| vec![Value::from("fail")]).collect();
        let source: Arc<dyn RowSource> = Arc::new(MemoryRowSource::new().with_table("t", &["name"], rows));
        let config = RunnerConfig::single_threaded().with_max_row_errors(Some(2));
        let future = AnalysisRunner::new(config).run(Arc::new(b.build().unwrap()), source).unwrap();
        // 3 failing rows, then the abort notice
        assert_eq!(future.errors().len(), 4);
    }

    #[test]
    fn test_missing_table_is_recorded() {
        init();
        let mut b = JobBuilder::new();
        let name = b.source_column("nope", "name");
        b.add_component(&testkit::list_analyzer()).input(name).add();
        let future = run(b.build().unwrap(), RunnerConfig::single_threaded());
        assert!(future.is_errornous());
        assert!(matches!(future.errors()[0], AnalysisError::Source { .. }));
    }

    #[test]
    fn test_panic_propagates_from_wait() {
        init();
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        b.add_component(&testkit::panicking_analyzer()).input(name).add();
        let future = AnalysisRunner::new(RunnerConfig::single_threaded())
            .run(Arc::new(b.build().unwrap()), names())
            .unwrap();
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| future.wait()));
        assert!(outcome.is_err());
        assert!(future.is_done());
    }

    /// Sleeps before handing out each record
    struct SlowRowSource {
        inner: MemoryRowSource,
        delay: Duration,
        read: Arc<AtomicUsize>,
    }

    impl RowSource for SlowRowSource {
        fn expected_rows(&self, query: &Query) -> Result<u64, SourceError> {
            self.inner.expected_rows(query)
        }

        fn execute<'a>(&'a self, query: &Query) -> Result<RecordIter<'a>, SourceError> {
            let records = self.inner.execute(query)?;
            let (delay, read) = (self.delay, self.read.clone());
            Ok(Box::new(records.inspect(move |_| {
                read.fetch_add(1, Ordering::SeqCst);
                thread::sleep(delay);
            })))
        }
    }

    #[test]
    fn test_cancel_stops_dispatch() {
        init();
        const ROWS: usize = 10_000;
        let rows = (0..ROWS as i64).map(|i| vec![Value::Int(i)]).collect();
        let read = Arc::new(AtomicUsize::new(0));
        let source = SlowRowSource {
            inner: MemoryRowSource::new().with_table("t", &["n"], rows),
            delay: Duration::from_millis(1),
            read: read.clone(),
        };

        let mut b = JobBuilder::new();
        let n = b.source_column("t", "n");
        let (analyzer, hooks) = testkit::hooked_count_analyzer();
        b.add_component(&analyzer).input(n).add();
        let future = AnalysisRunner::new(RunnerConfig::single_threaded())
            .run(Arc::new(b.build().unwrap()), Arc::new(source))
            .unwrap();

        while read.load(Ordering::SeqCst) < 10 {
            thread::sleep(Duration::from_millis(1));
        }
        future.cancel().unwrap();
        assert!(future.wait_timeout(Duration::from_secs(30)));

        assert_eq!(future.status(), JobStatus::Cancelled);
        assert_eq!(future.results().err(), Some(JobError::Cancelled));
        assert!(read.load(Ordering::SeqCst) < ROWS);
        assert_eq!(Hooks::get(&hooks.initialize), 1);
        assert_eq!(Hooks::get(&hooks.close), 1);
        assert_eq!(Hooks::get(&hooks.close_non_distributed), 1);
    }
}
