//! The job graph model.
//!
//! Columns and components live in flat vectors owned by the `Job` and
//! reference each other through integer ids.  A `Job` is immutable once
//! built; `JobBuilder` is the only way to construct one, and `build`
//! validates the wiring, resolves every component's effective requirement
//! and fixes the processing order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::slice;
use std::sync::Arc;

use crate::builtin;
use crate::component::{ComponentDescriptor, Properties};
use crate::error::ConfigError;
use crate::requirement::{self, EffectiveRequirement};

/// Index of a column inside its job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub usize);

/// Index of a component inside its job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a component does with the rows it sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Categorizes each row into one of its declared categories
    Filter,
    /// Derives new column values from each row
    Transformer,
    /// Accumulates rows into a result
    Analyzer,
    /// An analyzer that is never distributed
    Explorer,
}

impl ComponentKind {
    /// Whether components of this kind produce an analyzer result
    pub fn has_result(self) -> bool {
        self == ComponentKind::Analyzer || self == ComponentKind::Explorer
    }
}

/// Where the values of a column come from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnSource {
    /// A physical column of a source table
    Table(String),

    /// The `index`th output of a transformer
    /// The `index`th output of a transformer
    Component { producer: ComponentId, index: usize },
}

/// A column of a job, read from a table or produced by a transformer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    id: ColumnId,
    name: String,
    source: ColumnSource,
}

impl Column {
    /// Index of the column in its job
    pub fn id(&self) -> ColumnId {
        self.id
    }

    /// Column name; for transformer outputs the name given to `output`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the values come from
    pub fn source(&self) -> &ColumnSource {
        &self.source
    }

    /// The component producing this column, or `None` for source columns
    pub fn producer(&self) -> Option<ComponentId> {
        match self.source {
            ColumnSource::Table(_) => None,
            ColumnSource::Component { producer, .. } => Some(producer),
        }
    }
}

/// A (filter, category) pair, established per row once the filter has run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterOutcome {
    /// The filter
    pub filter: ComponentId,
    /// One of the filter's declared categories
    pub category: String,
}

impl FilterOutcome {
    /// Outcome `category` of `filter`
    pub fn new<S: Into<String>>(filter: ComponentId, category: S) -> Self {
        FilterOutcome { filter, category: category.into() }
    }
}

impl fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.filter, self.category)
    }
}

/// A component's own requirement.  Components without one inherit it from
/// their inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Holds iff the outcome holds
    Simple(FilterOutcome),

    /// Holds iff any of the outcomes holds
    Compound(Vec<FilterOutcome>),

    /// Always holds, overriding anything inherited
    Any,
}

impl Requirement {
    /// Outcomes referred to; empty for `Any`
    pub fn outcomes(&self) -> &[FilterOutcome] {
        match self {
            Requirement::Simple(o) => slice::from_ref(o),
            Requirement::Compound(os) => os,
            Requirement::Any => &[],
        }
    }
}

/// Structural identity of a component: stable across processes and
/// across rebuilds of the same job, unlike object identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKey(String);

impl ComponentKey {
    /// The key as text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One configured component of a job
#[derive(Debug, Clone)]
pub struct ComponentJob {
    id: ComponentId,
    name: String,
    label: Option<String>,
    descriptor: Arc<ComponentDescriptor>,
    properties: Properties,
    inputs: Vec<ColumnId>,
    outputs: Vec<ColumnId>,
    requirement: Option<Requirement>,
    key: ComponentKey,
    table: String,
}

impl ComponentJob {
    /// Index of the component in its job
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Label if one was given, otherwise descriptor name and id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// User given label
    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().map(|l| l.as_str())
    }

    /// Kind, taken from the descriptor
    pub fn kind(&self) -> ComponentKind {
        self.descriptor.kind()
    }

    /// Descriptor the component was configured from
    pub fn descriptor(&self) -> &Arc<ComponentDescriptor> {
        &self.descriptor
    }

    /// Configured properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Input columns, in declaration order
    pub fn inputs(&self) -> &[ColumnId] {
        &self.inputs
    }

    /// Output columns; only transformers have them
    pub fn outputs(&self) -> &[ColumnId] {
        &self.outputs
    }

    /// The component's own requirement, if it declared one
    pub fn requirement(&self) -> Option<&Requirement> {
        self.requirement.as_ref()
    }

    /// Structural key, equal across rebuilds of the same job
    pub fn key(&self) -> &ComponentKey {
        &self.key
    }

    /// The source table this component reads from
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// An immutable, validated analysis job.
#[derive(Debug, Clone)]
pub struct Job {
    columns: Vec<Column>,
    components: Vec<ComponentJob>,
    default_requirement: Option<Requirement>,
    effective: Vec<EffectiveRequirement>,
    defaulted: Vec<bool>,
    order: Vec<ComponentId>,
    tables: Vec<String>,
}

impl Job {
    /// Every column, indexed by `ColumnId`
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The column with that id
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.get(id.0)
    }

    /// Every component, indexed by `ComponentId`
    pub fn components(&self) -> &[ComponentJob] {
        &self.components
    }

    /// Panics if `id` does not belong to this job
    pub fn component(&self, id: ComponentId) -> &ComponentJob {
        &self.components[id.0]
    }

    /// Requirement given to components that would otherwise see every row
    pub fn default_requirement(&self) -> Option<&Requirement> {
        self.default_requirement.as_ref()
    }

    /// The set of outcomes a row must carry to reach the component
    pub fn effective_requirement(&self, id: ComponentId) -> &EffectiveRequirement {
        &self.effective[id.0]
    }

    /// Whether the component's effective requirement is the job's default
    pub fn is_defaulted(&self, id: ComponentId) -> bool {
        self.defaulted[id.0]
    }

    /// All components, dependencies first
    pub fn processing_order(&self) -> &[ComponentId] {
        &self.order
    }

    /// Distinct source tables, sorted
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Components reading from `table`, in processing order
    pub fn table_components(&self, table: &str) -> Vec<ComponentId> {
        self.order
            .iter()
            .filter(|id| self.components[id.0].table == table)
            .cloned()
            .collect()
    }

    /// Physical columns of `table` used anywhere in the job
    pub fn source_columns(&self, table: &str) -> Vec<ColumnId> {
        self.columns
            .iter()
            .filter(|c| match &c.source {
                ColumnSource::Table(t) => t == table,
                _ => false,
            })
            .map(|c| c.id)
            .collect()
    }

    /// Analyzers and explorers, in component order
    pub fn result_producers(&self) -> impl Iterator<Item = &ComponentJob> {
        self.components.iter().filter(|c| c.kind().has_result())
    }

    /// Looks up a component by structural identity
    pub fn find(&self, key: &ComponentKey) -> Option<&ComponentJob> {
        self.components.iter().find(|c| &c.key == key)
    }

    /// Derives a job that only lets through rows `first_row ..
    /// first_row + max_rows` (1-based, `None` meaning unbounded).  A
    /// `MaxRowsFilter` is appended and its `VALID` outcome becomes the
    /// default requirement.  A previous default requirement is pinned onto
    /// the components that inherited it, and components declaring
    /// `Requirement::Any` are restricted to the window as well.
    pub fn with_row_range(&self, first_row: u64, max_rows: Option<u64>) -> Result<Job, ConfigError> {
        let table = match self.tables.as_slice() {
            [table] => table.clone(),
            [] => return Err(ConfigError::NoTable("job".to_owned())),
            tables => {
                return Err(ConfigError::MultipleTables {
                    component: "job".to_owned(),
                    tables: tables.to_vec(),
                })
            }
        };
        let column = match self.source_columns(&table).first() {
            Some(c) => *c,
            None => return Err(ConfigError::NoTable("job".to_owned())),
        };

        let mut builder = JobBuilder::from_job(self);
        if let Some(default) = self.default_requirement.as_ref() {
            for (idx, c) in builder.components.iter_mut().enumerate() {
                if self.defaulted[idx] {
                    c.requirement = Some(default.clone());
                }
            }
        }
        // Components declaring `Any` would read outside the window
        let unrestricted: Vec<usize> = builder
            .components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.requirement == Some(Requirement::Any))
            .map(|(idx, _)| idx)
            .collect();

        let mut filter = builder
            .add_component(&builtin::max_rows_descriptor())
            .label(format!("rows {}..", first_row))
            .input(column)
            .property(builtin::FIRST_ROW, first_row.to_string());
        if let Some(max_rows) = max_rows {
            filter = filter.property(builtin::MAX_ROWS, max_rows.to_string());
        }
        let filter = filter.add();
        let valid = Requirement::Simple(FilterOutcome::new(filter, builtin::VALID));
        for idx in unrestricted {
            builder.components[idx].requirement = Some(valid.clone());
        }
        builder.set_default_requirement(Some(valid));
        builder.build()
    }
}

/// Assembles a `Job`.
#[derive(Debug, Clone, Default)]
pub struct JobBuilder {
    columns: Vec<Column>,
    components: Vec<ComponentJob>,
    default_requirement: Option<Requirement>,
}

impl JobBuilder {
    /// An empty builder
    pub fn new() -> Self {
        JobBuilder::default()
    }

    /// Starts from an existing job, e.g. to derive a restricted variant
    pub fn from_job(job: &Job) -> Self {
        JobBuilder {
            columns: job.columns.clone(),
            components: job.components.clone(),
            default_requirement: job.default_requirement.clone(),
        }
    }

    /// Declares a physical column.  Declaring the same column twice returns
    /// the same id.
    pub fn source_column(&mut self, table: &str, name: &str) -> ColumnId {
        let existing = self.columns.iter().find(|c| {
            c.name == name
                && match &c.source {
                    ColumnSource::Table(t) => t == table,
                    _ => false,
                }
        });
        if let Some(c) = existing {
            return c.id;
        }
        let id = ColumnId(self.columns.len());
        self.columns.push(Column {
            id,
            name: name.to_owned(),
            source: ColumnSource::Table(table.to_owned()),
        });
        id
    }

    /// Starts configuring a component; `ComponentBuilder::add` adds it
    pub fn add_component(&mut self, descriptor: &Arc<ComponentDescriptor>) -> ComponentBuilder {
        ComponentBuilder {
            job: self,
            descriptor: descriptor.clone(),
            label: None,
            properties: Properties::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            requirement: None,
        }
    }

    /// Output columns of a previously added transformer
    pub fn outputs(&self, component: ComponentId) -> Vec<ColumnId> {
        self.components
            .get(component.0)
            .map(|c| c.outputs.clone())
            .unwrap_or_default()
    }

    /// Replaces the own requirement of a previously added component
    pub fn set_requirement(&mut self, component: ComponentId, requirement: Option<Requirement>) {
        if let Some(c) = self.components.get_mut(component.0) {
            c.requirement = requirement;
        }
    }

    /// Requirement for components that would otherwise see every row.
    /// Filters it refers to, and their inputs, are exempt.
    pub fn set_default_requirement(&mut self, requirement: Option<Requirement>) {
        self.default_requirement = requirement;
    }

    /// Validates the graph and freezes it
    pub fn build(self) -> Result<Job, ConfigError> {
        let JobBuilder { columns, mut components, default_requirement } = self;

        for c in components.iter() {
            if c.inputs.is_empty() {
                return Err(ConfigError::MissingInput { component: c.name.clone(), kind: c.kind() });
            }
            if !c.outputs.is_empty() && c.kind() != ComponentKind::Transformer {
                return Err(ConfigError::UnexpectedOutput(c.name.clone()));
            }
            for input in c.inputs.iter() {
                // Derived columns must come from a component added earlier
                match columns.get(input.0).map(|col| col.producer()) {
                    None => return Err(ConfigError::MissingColumn(input.0)),
                    Some(Some(p)) if p >= c.id => return Err(ConfigError::MissingColumn(input.0)),
                    _ => (),
                }
            }
        }

        let resolution = requirement::resolve(&components, &columns, default_requirement.as_ref())?;

        // Tables, producers and gating filters first
        for idx in resolution.order.iter().cloned() {
            let mut tables = BTreeSet::new();
            for input in components[idx].inputs.iter() {
                match &columns[input.0].source {
                    ColumnSource::Table(t) => {
                        tables.insert(t.clone());
                    }
                    ColumnSource::Component { producer, .. } => {
                        tables.insert(components[producer.0].table.clone());
                    }
                }
            }
            if let EffectiveRequirement::AnyOf(outcomes) = &resolution.effective[idx] {
                for o in outcomes.iter() {
                    tables.insert(components[o.filter.0].table.clone());
                }
            }
            let c = &mut components[idx];
            c.table = match tables.len() {
                1 => tables.into_iter().next().unwrap_or_default(),
                _ => {
                    return Err(ConfigError::MultipleTables {
                        component: c.name.clone(),
                        tables: tables.into_iter().collect(),
                    })
                }
            };
        }

        // Structural keys, in id order; producers have lower ids
        let mut ordinals: HashMap<String, usize> = HashMap::new();
        for idx in 0..components.len() {
            let identities: Vec<String> = components[idx]
                .inputs
                .iter()
                .map(|input| {
                    let column = &columns[input.0];
                    match &column.source {
                        ColumnSource::Table(t) => format!("{}.{}", t, column.name),
                        ColumnSource::Component { producer, index } => {
                            format!("{}/{}", components[producer.0].key, index)
                        }
                    }
                })
                .collect();
            let base = format!("{}[{}]", components[idx].descriptor.name(), identities.join(","));
            let ordinal = ordinals.entry(base.clone()).or_insert(0);
            components[idx].key = ComponentKey(format!("{}@{}", base, ordinal));
            *ordinal += 1;
        }

        let tables: BTreeSet<String> = components.iter().map(|c| c.table.clone()).collect();
        let order: Vec<ComponentId> = resolution.order.iter().map(|i| ComponentId(*i)).collect();

        if log_enabled!(log::Level::Debug) {
            for id in order.iter() {
                let c = &components[id.0];
                debug!("{} {} [{}] requires {:?}", id, c.name, c.key, resolution.effective[id.0]);
            }
        }

        Ok(Job {
            columns,
            components,
            default_requirement,
            effective: resolution.effective,
            defaulted: resolution.defaulted,
            order,
            tables: tables.into_iter().collect(),
        })
    }
}

/// Fluent configuration of a single component; `add` commits it.
pub struct ComponentBuilder<'a> {
    job: &'a mut JobBuilder,
    descriptor: Arc<ComponentDescriptor>,
    label: Option<String>,
    properties: Properties,
    inputs: Vec<ColumnId>,
    outputs: Vec<String>,
    requirement: Option<Requirement>,
}

impl<'a> ComponentBuilder<'a> {
    /// Name used in logs and errors
    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Appends an input column
    pub fn input(mut self, column: ColumnId) -> Self {
        self.inputs.push(column);
        self
    }

    /// Appends several input columns
    pub fn inputs(mut self, columns: &[ColumnId]) -> Self {
        self.inputs.extend_from_slice(columns);
        self
    }

    /// Declares an output column; transformers only
    pub fn output<S: Into<String>>(mut self, name: S) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Sets a property handed to the descriptor's factory
    pub fn property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the component's own requirement
    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    /// Shorthand for a simple requirement on one filter outcome
    pub fn requires<S: Into<String>>(self, filter: ComponentId, category: S) -> Self {
        self.requirement(Requirement::Simple(FilterOutcome::new(filter, category)))
    }

    /// Adds the component to the builder.  Wiring is checked by
    /// `JobBuilder::build`.
    pub fn add(self) -> ComponentId {
        let ComponentBuilder { job, descriptor, label, properties, inputs, outputs, requirement } = self;
        let id = ComponentId(job.components.len());
        let outputs = outputs
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let col = ColumnId(job.columns.len());
                job.columns.push(Column {
                    id: col,
                    name,
                    source: ColumnSource::Component { producer: id, index },
                });
                col
            })
            .collect();
        let name = label.clone().unwrap_or_else(|| format!("{}{}", descriptor.name(), id));
        job.components.push(ComponentJob {
            id,
            name,
            label,
            descriptor,
            properties,
            inputs,
            outputs,
            requirement,
            key: ComponentKey::default(),
            table: String::new(),
        });
        id
    }
}

#[cfg(test)]
mod job_test {
    use super::*;
    use crate::testkit;

    #[test]
    fn test_keys_are_structural() {
        let mut b = JobBuilder::new();
        let name = b.source_column("people", "name");
        let t = b.add_component(&testkit::mock_transformer()).input(name).output("out").add();
        let out = b.outputs(t)[0];
        let a1 = b.add_component(&testkit::list_analyzer()).input(out).add();
        let a2 = b.add_component(&testkit::list_analyzer()).input(out).add();
        let job = b.build().unwrap();

        assert_eq!(job.component(t).key().as_str(), "mock-transformer[people.name]@0");
        assert_eq!(
            job.component(a1).key().as_str(),
            "list-analyzer[mock-transformer[people.name]@0/0]@0"
        );
        assert_eq!(
            job.component(a2).key().as_str(),
            "list-analyzer[mock-transformer[people.name]@0/0]@1"
        );
        assert_eq!(job.tables(), &["people".to_owned()]);
        assert_eq!(job.component(a1).table(), "people");

        // Rebuilding keeps every key
        let again = JobBuilder::from_job(&job).build().unwrap();
        for c in job.components() {
            assert_eq!(again.find(c.key()).map(|x| x.id()), Some(c.id()));
        }
    }

    #[test]
    fn test_source_column_dedup() {
        let mut b = JobBuilder::new();
        let a = b.source_column("t", "x");
        let c = b.source_column("u", "x");
        assert_eq!(b.source_column("t", "x"), a);
        assert_ne!(a, c);
    }

    #[test]
    fn test_validation() {
        let mut b = JobBuilder::new();
        b.add_component(&testkit::list_analyzer()).add();
        match b.build() {
            Err(ConfigError::MissingInput { kind, .. }) => assert_eq!(kind, ComponentKind::Analyzer),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        let mut b = JobBuilder::new();
        b.add_component(&testkit::list_analyzer()).input(ColumnId(7)).add();
        assert_eq!(b.build().err(), Some(ConfigError::MissingColumn(7)));

        let mut b = JobBuilder::new();
        let x = b.source_column("t", "x");
        b.add_component(&testkit::list_analyzer()).input(x).output("nope").add();
        assert!(matches!(b.build(), Err(ConfigError::UnexpectedOutput(_))));

        let mut b = JobBuilder::new();
        let x = b.source_column("t", "x");
        let y = b.source_column("u", "y");
        b.add_component(&testkit::list_analyzer()).inputs(&[x, y]).add();
        assert!(matches!(b.build(), Err(ConfigError::MultipleTables { .. })));
    }

    #[test]
    fn test_row_range() {
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let a = b.add_component(&testkit::list_analyzer()).input(name).add();
        let job = b.build().unwrap();

        let slave = job.with_row_range(3, Some(2)).unwrap();
        assert_eq!(slave.components().len(), 2);
        let filter = &slave.components()[1];
        assert_eq!(filter.descriptor().name(), builtin::MAX_ROWS_FILTER);
        assert_eq!(filter.properties().get(builtin::FIRST_ROW).map(|s| s.as_str()), Some("3"));
        assert!(slave.is_defaulted(a));
        assert_eq!(slave.component(a).key(), job.component(a).key());
        assert_eq!(slave.processing_order(), &[ComponentId(1), ComponentId(0)]);
    }

    #[test]
    fn test_row_range_restricts_any() {
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let plain = b.add_component(&testkit::count_analyzer()).input(name).add();
        let any = b.add_component(&testkit::count_analyzer()).input(name).requirement(Requirement::Any).add();
        let f = b.add_component(&testkit::even_odd_filter()).input(name).requirement(Requirement::Any).add();
        let even = b.add_component(&testkit::count_analyzer()).input(name).requires(f, "EVEN").add();
        let job = b.build().unwrap();

        let slave = job.with_row_range(2, Some(2)).unwrap();
        let range = ComponentId(4);
        let valid = FilterOutcome::new(range, builtin::VALID);
        for id in vec![plain, any, f] {
            let expected: BTreeSet<_> = vec![valid.clone()].into_iter().collect();
            assert_eq!(slave.effective_requirement(id), &EffectiveRequirement::AnyOf(expected));
        }
        assert_eq!(slave.component(even).requirement(), job.component(even).requirement());

        // Keys do not depend on the processing order of the slave
        for c in job.components() {
            assert_eq!(slave.component(c.id()).key(), c.key());
        }
        assert_eq!(job.component(plain).key().as_str(), "count-analyzer[t.name]@0");
        assert_eq!(job.component(any).key().as_str(), "count-analyzer[t.name]@1");
    }
}
