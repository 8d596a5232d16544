//! Component interfaces and descriptors.
//!
//! A component is the pluggable unit of work in a job.  Four kinds exist:
//! filters categorize rows, transformers derive new column values,
//! analyzers (and explorers) consume rows and produce a result.  Each kind
//! is described by a `ComponentDescriptor`, which knows how to create
//! fresh instances from a set of `Properties` and, for analyzers, how to
//! merge partial results produced by several slave jobs.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{ComponentError, ConfigError};
use crate::job::ComponentKind;
use crate::row::{InputRow, Query, Value};

/// Configured properties of a component
pub type Properties = BTreeMap<String, String>;

/// Opaque result value of an analyzer.
pub trait AnalyzerResult: Any + Send + Sync + fmt::Debug {
    /// The result as `Any`, for downcasting
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> AnalyzerResult for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnalyzerResult {
    /// Attempts to view the result as a concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Shared handle to an analyzer result
pub type ResultRef = Arc<dyn AnalyzerResult>;

/// Lifecycle hooks shared by all component kinds.  Hooks marked
/// "non distributed" run once per logical job, on the master, and are
/// skipped on slave nodes.
pub trait Lifecycle: Send + Sync {
    /// Called before the first row
    fn initialize(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called once per logical job
    fn initialize_non_distributed(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called after the last row, whether the execution succeeded or not
    fn close(&self, _success: bool) {}

    /// Counterpart of `initialize_non_distributed`
    fn close_non_distributed(&self, _success: bool) {}
}

/// Sorts rows into one of the categories declared by its descriptor
pub trait Filter: Lifecycle {
    /// Returns the category of the row
    fn categorize(&self, row: &InputRow) -> Result<String, ComponentError>;

    /// Rewrites the query so that only rows of `category` are returned, if
    /// the filter supports it
    fn optimize_query(&self, _query: &Query, _category: &str) -> Option<Query> {
        None
    }
}

/// Adds derived column values to each row
pub trait Transformer: Lifecycle {
    /// Computes one value per declared output column
    fn transform(&self, row: &InputRow) -> Result<Vec<Value>, ComponentError>;
}

/// Consumes rows and produces a result
pub trait Analyzer: Lifecycle {
    /// Consumes one row.  May be called concurrently if the descriptor is
    /// marked concurrent.
    fn run(&self, row: &InputRow) -> Result<(), ComponentError>;

    /// Called once, after the last row
    fn result(&self) -> Result<ResultRef, ComponentError>;
}

/// Merges partial results of one analyzer into a single result.
pub trait Reducer: Send + Sync {
    /// Merges the partials, one per slave, in slave order
    fn reduce(&self, partials: &[ResultRef]) -> Result<ResultRef, ComponentError>;
}

impl<F> Reducer for F
where
    F: Fn(&[ResultRef]) -> Result<ResultRef, ComponentError> + Send + Sync,
{
    fn reduce(&self, partials: &[ResultRef]) -> Result<ResultRef, ComponentError> {
        self(partials)
    }
}

/// A live component instance
pub enum Instance {
    /// A filter
    Filter(Box<dyn Filter>),
    /// A transformer
    Transformer(Box<dyn Transformer>),
    /// An analyzer
    Analyzer(Box<dyn Analyzer>),
    /// An explorer
    Explorer(Box<dyn Analyzer>),
}

impl Instance {
    /// Kind of the instance
    pub fn kind(&self) -> ComponentKind {
        match self {
            Instance::Filter(_) => ComponentKind::Filter,
            Instance::Transformer(_) => ComponentKind::Transformer,
            Instance::Analyzer(_) => ComponentKind::Analyzer,
            Instance::Explorer(_) => ComponentKind::Explorer,
        }
    }

    /// Runs `Lifecycle::initialize`
    pub fn initialize(&self) -> Result<(), ComponentError> {
        match self {
            Instance::Filter(c) => c.initialize(),
            Instance::Transformer(c) => c.initialize(),
            Instance::Analyzer(c) | Instance::Explorer(c) => c.initialize(),
        }
    }

    /// Runs `Lifecycle::initialize_non_distributed`
    pub fn initialize_non_distributed(&self) -> Result<(), ComponentError> {
        match self {
            Instance::Filter(c) => c.initialize_non_distributed(),
            Instance::Transformer(c) => c.initialize_non_distributed(),
            Instance::Analyzer(c) | Instance::Explorer(c) => c.initialize_non_distributed(),
        }
    }

    /// Runs `Lifecycle::close`
    pub fn close(&self, success: bool) {
        match self {
            Instance::Filter(c) => c.close(success),
            Instance::Transformer(c) => c.close(success),
            Instance::Analyzer(c) | Instance::Explorer(c) => c.close(success),
        }
    }

    /// Runs `Lifecycle::close_non_distributed`
    pub fn close_non_distributed(&self, success: bool) {
        match self {
            Instance::Filter(c) => c.close_non_distributed(success),
            Instance::Transformer(c) => c.close_non_distributed(success),
            Instance::Analyzer(c) | Instance::Explorer(c) => c.close_non_distributed(success),
        }
    }

    /// The row consuming side of analyzers and explorers
    pub fn as_analyzer(&self) -> Option<&dyn Analyzer> {
        match self {
            Instance::Analyzer(c) | Instance::Explorer(c) => Some(&**c),
            _ => None,
        }
    }
}

type Factory = Arc<dyn Fn(&Properties) -> Result<Instance, ComponentError> + Send + Sync>;

/// Describes a kind of component: how to build it, which outcomes it can
/// produce, and how it behaves under concurrency and distribution.
#[derive(Clone)]
pub struct ComponentDescriptor {
    name: String,
    kind: ComponentKind,
    categories: Vec<String>,
    concurrent: bool,
    distributable: bool,
    query_optimizable: bool,
    factory: Factory,
    reducer: Option<Arc<dyn Reducer>>,
}

impl ComponentDescriptor {
    fn new(name: &str, kind: ComponentKind, factory: Factory) -> Self {
        ComponentDescriptor {
            name: name.to_owned(),
            kind,
            categories: Vec::new(),
            concurrent: false,
            distributable: kind != ComponentKind::Explorer,
            query_optimizable: false,
            factory,
            reducer: None,
        }
    }

    /// A filter producing one of `categories`
    pub fn filter<T, F>(name: &str, categories: &[&str], factory: F) -> Self
    where
        T: Filter + 'static,
        F: Fn(&Properties) -> Result<T, ComponentError> + Send + Sync + 'static,
    {
        let f: Factory = Arc::new(move |p| factory(p).map(|t| Instance::Filter(Box::new(t))));
        let mut d = ComponentDescriptor::new(name, ComponentKind::Filter, f);
        d.categories = categories.iter().map(|c| (*c).to_owned()).collect();
        d
    }

    /// A transformer
    pub fn transformer<T, F>(name: &str, factory: F) -> Self
    where
        T: Transformer + 'static,
        F: Fn(&Properties) -> Result<T, ComponentError> + Send + Sync + 'static,
    {
        let f: Factory = Arc::new(move |p| factory(p).map(|t| Instance::Transformer(Box::new(t))));
        ComponentDescriptor::new(name, ComponentKind::Transformer, f)
    }

    /// An analyzer.  It is only distributable with a reducer.
    pub fn analyzer<T, F>(name: &str, factory: F) -> Self
    where
        T: Analyzer + 'static,
        F: Fn(&Properties) -> Result<T, ComponentError> + Send + Sync + 'static,
    {
        let f: Factory = Arc::new(move |p| factory(p).map(|t| Instance::Analyzer(Box::new(t))));
        ComponentDescriptor::new(name, ComponentKind::Analyzer, f)
    }

    /// Explorers consume rows like analyzers but are never distributed
    pub fn explorer<T, F>(name: &str, factory: F) -> Self
    where
        T: Analyzer + 'static,
        F: Fn(&Properties) -> Result<T, ComponentError> + Send + Sync + 'static,
    {
        let f: Factory = Arc::new(move |p| factory(p).map(|t| Instance::Explorer(Box::new(t))));
        ComponentDescriptor::new(name, ComponentKind::Explorer, f)
    }

    /// Marks instances as safe for concurrent `run` calls
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Whether slave jobs may run the component; explorers never can
    pub fn distributable(mut self, distributable: bool) -> Self {
        self.distributable = distributable && self.kind != ComponentKind::Explorer;
        self
    }

    /// Marks a filter whose outcomes may be pushed into the source query
    pub fn query_optimizable(mut self, optimizable: bool) -> Self {
        self.query_optimizable = optimizable && self.kind == ComponentKind::Filter;
        self
    }

    /// Sets the reducer merging partial results of slave jobs
    pub fn with_reducer<R: Reducer + 'static>(mut self, reducer: R) -> Self {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    /// Unique name, used to look the descriptor up in a registry
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the components it builds
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Categories of a filter; empty for other kinds
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Whether instances accept concurrent rows
    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Whether a job containing this component can be split into slave jobs
    pub fn is_distributable(&self) -> bool {
        match self.kind {
            ComponentKind::Analyzer => self.distributable && self.reducer.is_some(),
            ComponentKind::Explorer => false,
            _ => self.distributable,
        }
    }

    /// Whether a filter's outcome may be pushed into the query
    pub fn is_query_optimizable(&self) -> bool {
        self.query_optimizable
    }

    /// The reducer, if any
    pub fn reducer(&self) -> Option<&Arc<dyn Reducer>> {
        self.reducer.as_ref()
    }

    /// Creates a fresh instance
    pub fn instantiate(&self, properties: &Properties) -> Result<Instance, ComponentError> {
        let instance = (self.factory)(properties)?;
        if instance.kind() != self.kind {
            return Err(ComponentError::new(format!(
                "descriptor '{}' produced a {} instead of a {}",
                self.name,
                instance.kind(),
                self.kind
            )));
        }
        Ok(instance)
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("categories", &self.categories)
            .field("concurrent", &self.concurrent)
            .field("distributable", &self.is_distributable())
            .finish()
    }
}

/// Catalog of known descriptors, used to rebuild jobs from their
/// serialized form.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    descriptors: HashMap<String, Arc<ComponentDescriptor>>,
}

impl ComponentRegistry {
    /// An empty registry
    pub fn new() -> Self {
        ComponentRegistry { descriptors: HashMap::new() }
    }

    /// A registry containing the built-in components
    pub fn with_builtins() -> Self {
        let mut registry = ComponentRegistry::new();
        registry.descriptors.insert(
            crate::builtin::MAX_ROWS_FILTER.to_owned(),
            crate::builtin::max_rows_descriptor(),
        );
        registry
    }

    /// Adds a descriptor; names must be unique
    pub fn register<D>(&mut self, descriptor: D) -> Result<Arc<ComponentDescriptor>, ConfigError>
    where
        D: Into<Arc<ComponentDescriptor>>,
    {
        let descriptor = descriptor.into();
        if self.descriptors.contains_key(descriptor.name()) {
            return Err(ConfigError::DuplicateDescriptor(descriptor.name().to_owned()));
        }
        self.descriptors.insert(descriptor.name().to_owned(), descriptor.clone());
        Ok(descriptor)
    }

    /// Looks a descriptor up by name
    pub fn get(&self, name: &str) -> Result<Arc<ComponentDescriptor>, ConfigError> {
        self.descriptors
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDescriptor(name.to_owned()))
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no descriptor is registered
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod component_test {
    use super::*;
    use crate::testkit;

    #[test]
    fn test_registry() {
        let mut registry = ComponentRegistry::with_builtins();
        assert_eq!(registry.len(), 1);
        registry.register(testkit::count_analyzer()).unwrap();
        assert_eq!(
            registry.register((*testkit::count_analyzer()).clone()).err(),
            Some(ConfigError::DuplicateDescriptor("count-analyzer".into()))
        );
        assert_eq!(registry.get("count-analyzer").unwrap().kind(), ComponentKind::Analyzer);
        assert!(registry.get("max-rows").is_ok());
        assert_eq!(registry.get("nope").err(), Some(ConfigError::UnknownDescriptor("nope".into())));
    }

    #[test]
    fn test_distributable() {
        assert!(testkit::count_analyzer().is_distributable());
        assert!(!testkit::unreducible_analyzer().is_distributable());
        assert!(!testkit::list_explorer().is_distributable());
        assert!(!(*testkit::list_explorer()).clone().distributable(true).is_distributable());
        assert!(testkit::even_odd_filter().is_distributable());
        assert!(!(*testkit::even_odd_filter()).clone().distributable(false).is_distributable());
    }

    #[test]
    fn test_instantiate() {
        let instance = testkit::count_analyzer().instantiate(&Properties::new()).unwrap();
        assert_eq!(instance.kind(), ComponentKind::Analyzer);
        assert!(instance.as_analyzer().is_some());
        assert!(instance.initialize().is_ok());

        let filter = crate::builtin::max_rows_descriptor();
        let mut props = Properties::new();
        props.insert("first_row".into(), "zero".into());
        assert!(filter.instantiate(&props).is_err());
    }

    #[test]
    fn test_downcast() {
        let result: ResultRef = Arc::new(42u32);
        assert_eq!(result.downcast_ref::<u32>(), Some(&42));
        assert_eq!(result.downcast_ref::<u64>(), None);
    }
}
