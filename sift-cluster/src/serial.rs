//! Slave jobs travel as a `JobSpec`: descriptors by name, columns and
//! components by index.  The encoded form is bincode compressed with snappy.
//! A slave rebuilds the job through its own `ComponentRegistry`, which
//! yields the same component keys as the master's job.

use std::collections::{BTreeMap, HashMap};

use sift::job::ColumnSource;
use sift::{ColumnId, ComponentId, ComponentRegistry, ConfigError, FilterOutcome, Job, JobBuilder, Requirement};

use crate::error::ClusterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum ColumnSpec {
    Table { table: String, name: String },
    Derived { producer: usize, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OutcomeSpec {
    filter: usize,
    category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum RequirementSpec {
    Simple(OutcomeSpec),
    Compound(Vec<OutcomeSpec>),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ComponentSpec {
    descriptor: String,
    label: Option<String>,
    properties: BTreeMap<String, String>,
    inputs: Vec<usize>,
    outputs: Vec<String>,
    requirement: Option<RequirementSpec>,
}

/// Serializable description of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    columns: Vec<ColumnSpec>,
    components: Vec<ComponentSpec>,
    default_requirement: Option<RequirementSpec>,
}

impl From<&FilterOutcome> for OutcomeSpec {
    fn from(o: &FilterOutcome) -> Self {
        OutcomeSpec { filter: o.filter.0, category: o.category.clone() }
    }
}

impl From<&Requirement> for RequirementSpec {
    fn from(r: &Requirement) -> Self {
        match r {
            Requirement::Simple(o) => RequirementSpec::Simple(o.into()),
            Requirement::Compound(os) => RequirementSpec::Compound(os.iter().map(OutcomeSpec::from).collect()),
            Requirement::Any => RequirementSpec::Any,
        }
    }
}

impl RequirementSpec {
    fn to_requirement(&self) -> Requirement {
        let outcome = |o: &OutcomeSpec| FilterOutcome::new(ComponentId(o.filter), o.category.clone());
        match self {
            RequirementSpec::Simple(o) => Requirement::Simple(outcome(o)),
            RequirementSpec::Compound(os) => Requirement::Compound(os.iter().map(outcome).collect()),
            RequirementSpec::Any => Requirement::Any,
        }
    }
}

impl JobSpec {
    /// Captures the wiring of `job`
    pub fn from_job(job: &Job) -> Self {
        let columns = job
            .columns()
            .iter()
            .map(|c| match c.source() {
                ColumnSource::Table(table) => ColumnSpec::Table { table: table.clone(), name: c.name().to_owned() },
                ColumnSource::Component { producer, index } => {
                    ColumnSpec::Derived { producer: producer.0, index: *index }
                }
            })
            .collect();

        let components = job
            .components()
            .iter()
            .map(|c| ComponentSpec {
                descriptor: c.descriptor().name().to_owned(),
                label: c.label().map(|l| l.to_owned()),
                properties: c.properties().clone(),
                inputs: c.inputs().iter().map(|i| i.0).collect(),
                outputs: c
                    .outputs()
                    .iter()
                    .filter_map(|o| job.column(*o))
                    .map(|col| col.name().to_owned())
                    .collect(),
                requirement: c.requirement().map(RequirementSpec::from),
            })
            .collect();

        JobSpec {
            columns,
            components,
            default_requirement: job.default_requirement().map(RequirementSpec::from),
        }
    }

    /// Rebuilds the job, resolving descriptors by name
    pub fn to_job(&self, registry: &ComponentRegistry) -> Result<Job, ConfigError> {
        let mut builder = JobBuilder::new();
        let mut mapped: Vec<Option<ColumnId>> = vec![None; self.columns.len()];
        let mut derived = HashMap::new();
        for (idx, column) in self.columns.iter().enumerate() {
            match column {
                ColumnSpec::Table { table, name } => mapped[idx] = Some(builder.source_column(table, name)),
                ColumnSpec::Derived { producer, index } => {
                    derived.insert((*producer, *index), idx);
                }
            }
        }

        for (idx, spec) in self.components.iter().enumerate() {
            let descriptor = registry.get(&spec.descriptor)?;
            let mut component = builder.add_component(&descriptor);
            if let Some(label) = &spec.label {
                component = component.label(label.clone());
            }
            for (k, v) in spec.properties.iter() {
                component = component.property(k.clone(), v.clone());
            }
            for input in spec.inputs.iter() {
                match mapped.get(*input).cloned().flatten() {
                    Some(column) => component = component.input(column),
                    None => return Err(ConfigError::MissingColumn(*input)),
                }
            }
            for output in spec.outputs.iter() {
                component = component.output(output.clone());
            }
            if let Some(requirement) = &spec.requirement {
                component = component.requirement(requirement.to_requirement());
            }
            let id = component.add();
            debug_assert_eq!(id.0, idx);

            for (index, column) in builder.outputs(id).into_iter().enumerate() {
                if let Some(original) = derived.get(&(idx, index)) {
                    mapped[*original] = Some(column);
                }
            }
        }

        builder.set_default_requirement(self.default_requirement.as_ref().map(|r| r.to_requirement()));
        builder.build()
    }

    /// Wire form
    pub fn encode(&self) -> Result<Vec<u8>, ClusterError> {
        let raw = bincode::serialize(self)?;
        Ok(snap::Encoder::new().compress_vec(&raw)?)
    }

    /// Reads the wire form back
    pub fn decode(bytes: &[u8]) -> Result<Self, ClusterError> {
        let raw = snap::Decoder::new().decompress_vec(bytes)?;
        Ok(bincode::deserialize(&raw)?)
    }
}

#[cfg(test)]
mod serial_test {
    use super::*;
    use sift::testkit;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::with_builtins();
        registry.register(testkit::even_odd_filter()).unwrap();
        registry.register(testkit::mock_transformer()).unwrap();
        registry.register(testkit::list_analyzer()).unwrap();
        registry.register(testkit::count_analyzer()).unwrap();
        registry
    }

    fn job() -> Job {
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let f = b.add_component(&testkit::even_odd_filter()).input(name).add();
        let even = b
            .add_component(&testkit::mock_transformer())
            .label("evens")
            .input(name)
            .output("e")
            .requires(f, "EVEN")
            .add();
        // Declared after the transformer, so column ids interleave
        let id = b.source_column("t", "id");
        let e = b.outputs(even)[0];
        b.add_component(&testkit::list_analyzer()).inputs(&[name, e, id]).add();
        b.add_component(&testkit::count_analyzer())
            .input(id)
            .requirement(Requirement::Compound(vec![
                FilterOutcome::new(f, "EVEN"),
                FilterOutcome::new(f, "ODD"),
            ]))
            .add();
        b.build().unwrap()
    }

    #[test]
    fn test_rebuild_keeps_keys() {
        let job = job().with_row_range(3, Some(2)).unwrap();
        let spec = JobSpec::from_job(&job);
        let bytes = spec.encode().unwrap();
        let decoded = JobSpec::decode(&bytes).unwrap();
        assert_eq!(decoded, spec);

        let rebuilt = decoded.to_job(&registry()).unwrap();
        assert_eq!(rebuilt.components().len(), job.components().len());
        for c in job.components() {
            let other = rebuilt.find(c.key()).unwrap();
            assert_eq!(other.id(), c.id());
            assert_eq!(other.label(), c.label());
            assert_eq!(other.properties(), c.properties());
            assert_eq!(other.requirement(), c.requirement());
            assert_eq!(rebuilt.effective_requirement(c.id()), job.effective_requirement(c.id()));
        }
        assert_eq!(rebuilt.default_requirement(), job.default_requirement());
        assert_eq!(rebuilt.processing_order(), job.processing_order());
    }

    #[test]
    fn test_unknown_descriptor() {
        let spec = JobSpec::from_job(&job());
        let mut registry = ComponentRegistry::with_builtins();
        registry.register(testkit::even_odd_filter()).unwrap();
        assert_eq!(
            spec.to_job(&registry).err(),
            Some(ConfigError::UnknownDescriptor("mock-transformer".into()))
        );
    }

    #[test]
    fn test_corrupt_payload() {
        match JobSpec::decode(b"definitely not snappy") {
            Err(ClusterError::Serialization(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }
}
