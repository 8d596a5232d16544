//! Mock components for tests.
//!
//! Compiled for this crate's tests and, with the `testkit` feature, for
//! crates depending on it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::component::{Analyzer, ComponentDescriptor, Filter, Lifecycle, Properties, ResultRef, Transformer};
use crate::error::ComponentError;
use crate::row::{InputRow, Value};

/// Categorizes rows as EVEN or ODD by row id
pub struct EvenOddFilter;

impl Lifecycle for EvenOddFilter {}

impl Filter for EvenOddFilter {
    fn categorize(&self, row: &InputRow) -> Result<String, ComponentError> {
        let category = if row.id() % 2 == 0 { "EVEN" } else { "ODD" };
        Ok(category.to_owned())
    }
}

/// Descriptor of `EvenOddFilter`
pub fn even_odd_filter() -> Arc<ComponentDescriptor> {
    let d = ComponentDescriptor::filter("even-odd-filter", &["EVEN", "ODD"], |_: &Properties| Ok(EvenOddFilter));
    Arc::new(d.concurrent(true))
}

/// Prefixes its first input with "mocked: "
pub struct MockTransformer;

impl Lifecycle for MockTransformer {}

impl Transformer for MockTransformer {
    fn transform(&self, row: &InputRow) -> Result<Vec<Value>, ComponentError> {
        Ok(vec![Value::from(format!("mocked: {}", row.get(0)))])
    }
}

/// Descriptor of `MockTransformer`
pub fn mock_transformer() -> Arc<ComponentDescriptor> {
    let d = ComponentDescriptor::transformer("mock-transformer", |_: &Properties| Ok(MockTransformer));
    Arc::new(d.concurrent(true))
}

/// Echoes its first input, failing on the value "fail"
pub struct FailingTransformer;

impl Lifecycle for FailingTransformer {}

impl Transformer for FailingTransformer {
    fn transform(&self, row: &InputRow) -> Result<Vec<Value>, ComponentError> {
        match row.get(0).as_str() {
            Some("fail") => Err(ComponentError::new(format!("cannot transform row {}", row.id()))),
            _ => Ok(vec![row.get(0).clone()]),
        }
    }
}

/// Descriptor of `FailingTransformer`
pub fn failing_transformer() -> Arc<ComponentDescriptor> {
    Arc::new(ComponentDescriptor::transformer("failing-transformer", |_: &Properties| Ok(FailingTransformer)))
}

/// Every row an analyzer saw, as (row id, input values)
#[derive(Debug, Clone, PartialEq)]
pub struct Listed {
    /// Rows sorted by row id
    pub rows: Vec<(u64, Vec<Value>)>,
}

/// Records every row it sees
#[derive(Default)]
pub struct ListAnalyzer {
    rows: Mutex<Vec<(u64, Vec<Value>)>>,
}

impl Lifecycle for ListAnalyzer {}

impl Analyzer for ListAnalyzer {
    fn run(&self, row: &InputRow) -> Result<(), ComponentError> {
        let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        rows.push((row.id(), row.values()));
        Ok(())
    }

    fn result(&self) -> Result<ResultRef, ComponentError> {
        let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner()).clone();
        rows.sort_by_key(|r| r.0);
        Ok(Arc::new(Listed { rows }))
    }
}

fn concat_lists(partials: &[ResultRef]) -> Result<ResultRef, ComponentError> {
    let mut rows = Vec::new();
    for p in partials {
        match p.downcast_ref::<Listed>() {
            Some(l) => rows.extend(l.rows.iter().cloned()),
            None => return Err(ComponentError::new("not a list result")),
        }
    }
    rows.sort_by_key(|r| r.0);
    Ok(Arc::new(Listed { rows }))
}

/// Descriptor of `ListAnalyzer`, reduced by concatenation
pub fn list_analyzer() -> Arc<ComponentDescriptor> {
    let d = ComponentDescriptor::analyzer("list-analyzer", |_: &Properties| Ok(ListAnalyzer::default()));
    Arc::new(d.concurrent(true).with_reducer(concat_lists))
}

/// Same as the list analyzer, but as an explorer
pub fn list_explorer() -> Arc<ComponentDescriptor> {
    Arc::new(ComponentDescriptor::explorer("list-explorer", |_: &Properties| Ok(ListAnalyzer::default())))
}

/// Number of records an analyzer saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counted {
    /// Rows counted
    pub rows: u64,
}

/// Lifecycle hook invocation counts
#[derive(Debug, Default)]
pub struct Hooks {
    /// Calls of `initialize`
    pub initialize: AtomicUsize,
    /// Calls of `initialize_non_distributed`
    pub initialize_non_distributed: AtomicUsize,
    /// Calls of `close`
    pub close: AtomicUsize,
    /// Calls of `close_non_distributed`
    pub close_non_distributed: AtomicUsize,
}

impl Hooks {
    /// Reads one of the counters
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Counts the rows it sees, optionally recording lifecycle hooks
#[derive(Default)]
pub struct CountAnalyzer {
    rows: AtomicUsize,
    hooks: Option<Arc<Hooks>>,
}

impl Lifecycle for CountAnalyzer {
    fn initialize(&self) -> Result<(), ComponentError> {
        if let Some(h) = &self.hooks {
            h.initialize.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn initialize_non_distributed(&self) -> Result<(), ComponentError> {
        if let Some(h) = &self.hooks {
            h.initialize_non_distributed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&self, _success: bool) {
        if let Some(h) = &self.hooks {
            h.close.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn close_non_distributed(&self, _success: bool) {
        if let Some(h) = &self.hooks {
            h.close_non_distributed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Analyzer for CountAnalyzer {
    fn run(&self, row: &InputRow) -> Result<(), ComponentError> {
        self.rows.fetch_add(row.distinct_count() as usize, Ordering::SeqCst);
        Ok(())
    }

    fn result(&self) -> Result<ResultRef, ComponentError> {
        Ok(Arc::new(Counted { rows: self.rows.load(Ordering::SeqCst) as u64 }))
    }
}

fn sum_counts(partials: &[ResultRef]) -> Result<ResultRef, ComponentError> {
    let mut rows = 0;
    for p in partials {
        match p.downcast_ref::<Counted>() {
            Some(c) => rows += c.rows,
            None => return Err(ComponentError::new("not a count result")),
        }
    }
    Ok(Arc::new(Counted { rows }))
}

fn broken_reducer(_partials: &[ResultRef]) -> Result<ResultRef, ComponentError> {
    Err(ComponentError::new("reducer failure"))
}

/// Descriptor of `CountAnalyzer`, reduced by summing
pub fn count_analyzer() -> Arc<ComponentDescriptor> {
    let d = ComponentDescriptor::analyzer("count-analyzer", |_: &Properties| Ok(CountAnalyzer::default()));
    Arc::new(d.concurrent(true).with_reducer(sum_counts))
}

/// A count analyzer recording its lifecycle hooks across every instance
pub fn hooked_count_analyzer() -> (Arc<ComponentDescriptor>, Arc<Hooks>) {
    let hooks = Arc::new(Hooks::default());
    let shared = hooks.clone();
    let d = ComponentDescriptor::analyzer("hooked-count-analyzer", move |_: &Properties| {
        Ok(CountAnalyzer { rows: AtomicUsize::new(0), hooks: Some(shared.clone()) })
    });
    (Arc::new(d.concurrent(true).with_reducer(sum_counts)), hooks)
}

/// A count analyzer whose reducer always fails
pub fn bad_reducer_analyzer() -> Arc<ComponentDescriptor> {
    let d = ComponentDescriptor::analyzer("bad-reducer-analyzer", |_: &Properties| Ok(CountAnalyzer::default()));
    Arc::new(d.concurrent(true).with_reducer(broken_reducer))
}

/// A count analyzer without a reducer
pub fn unreducible_analyzer() -> Arc<ComponentDescriptor> {
    Arc::new(ComponentDescriptor::analyzer("unreducible-analyzer", |_: &Properties| Ok(CountAnalyzer::default())))
}

/// Counts its calls and raises on one of them
pub struct FailingAnalyzer {
    fail_on: usize,
    calls: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl Lifecycle for FailingAnalyzer {
    fn close(&self, _success: bool) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Analyzer for FailingAnalyzer {
    fn run(&self, _row: &InputRow) -> Result<(), ComponentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(ComponentError::new(format!("failing on call {}", call)));
        }
        Ok(())
    }

    fn result(&self) -> Result<ResultRef, ComponentError> {
        Ok(Arc::new(Counted { rows: self.calls.load(Ordering::SeqCst) as u64 }))
    }
}

/// An analyzer raising on its `fail_on`th call (1-based), and the number of
/// times its instances were closed
pub fn failing_analyzer(fail_on: usize) -> (Arc<ComponentDescriptor>, Arc<AtomicUsize>) {
    let closes = Arc::new(AtomicUsize::new(0));
    let shared = closes.clone();
    let d = ComponentDescriptor::analyzer("failing-analyzer", move |_: &Properties| {
        Ok(FailingAnalyzer { fail_on, calls: AtomicUsize::new(0), closes: shared.clone() })
    });
    (Arc::new(d.with_reducer(sum_counts)), closes)
}

/// Panics on every row
pub struct PanickingAnalyzer;

impl Lifecycle for PanickingAnalyzer {}

impl Analyzer for PanickingAnalyzer {
    fn run(&self, _row: &InputRow) -> Result<(), ComponentError> {
        panic!("analyzer panicked")
    }

    fn result(&self) -> Result<ResultRef, ComponentError> {
        Ok(Arc::new(Counted { rows: 0 }))
    }
}

/// Descriptor of `PanickingAnalyzer`
pub fn panicking_analyzer() -> Arc<ComponentDescriptor> {
    Arc::new(ComponentDescriptor::analyzer("panicking-analyzer", |_: &Properties| Ok(PanickingAnalyzer)))
}

/// Fails to initialize
pub struct BrokenAnalyzer;

impl Lifecycle for BrokenAnalyzer {
    fn initialize(&self) -> Result<(), ComponentError> {
        Err(ComponentError::new("cannot initialize"))
    }
}

impl Analyzer for BrokenAnalyzer {
    fn run(&self, _row: &InputRow) -> Result<(), ComponentError> {
        Ok(())
    }

    fn result(&self) -> Result<ResultRef, ComponentError> {
        Ok(Arc::new(Counted { rows: 0 }))
    }
}

/// Descriptor of `BrokenAnalyzer`
pub fn broken_analyzer() -> Arc<ComponentDescriptor> {
    Arc::new(ComponentDescriptor::analyzer("broken-analyzer", |_: &Properties| Ok(BrokenAnalyzer)))
}
