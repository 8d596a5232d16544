//! Requirement resolution.
//!
//! Every component ends up with an `EffectiveRequirement`: either it sees
//! every row, or it sees the rows carrying at least one of a set of filter
//! outcomes.  Components without an own requirement inherit the union of
//! the requirements of the components producing their input columns.  A
//! union is used, not an intersection, so that two branches gated on
//! opposite outcomes of one filter together cover every row again.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConfigError;
use crate::graph::DepGraph;
use crate::job::{Column, ColumnSource, ComponentId, ComponentJob, ComponentKind, FilterOutcome, Requirement};

/// Outcomes established for one row so far, at most one per filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcomes(BTreeMap<ComponentId, String>);

impl Outcomes {
    /// No outcomes
    pub fn new() -> Self {
        Outcomes(BTreeMap::new())
    }

    /// Records the category a filter chose
    pub fn insert<S: Into<String>>(&mut self, filter: ComponentId, category: S) {
        self.0.insert(filter, category.into());
    }

    /// Category chosen by `filter`, if it ran
    pub fn get(&self, filter: ComponentId) -> Option<&str> {
        self.0.get(&filter).map(|c| c.as_str())
    }

    /// Whether `outcome` is established
    pub fn contains(&self, outcome: &FilterOutcome) -> bool {
        self.get(outcome.filter) == Some(outcome.category.as_str())
    }

    /// Number of filters that ran
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no filter ran
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every established outcome, by filter id
    pub fn iter(&self) -> impl Iterator<Item = FilterOutcome> + '_ {
        self.0.iter().map(|(f, c)| FilterOutcome::new(*f, c.clone()))
    }
}

/// The resolved requirement of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveRequirement {
    /// Every row
    Unconditional,
    /// Rows carrying at least one of the outcomes
    AnyOf(BTreeSet<FilterOutcome>),
}

impl EffectiveRequirement {
    /// Whether every row satisfies it
    pub fn is_unconditional(&self) -> bool {
        *self == EffectiveRequirement::Unconditional
    }

    /// Whether a row carrying `outcomes` may reach the component
    pub fn is_satisfied(&self, outcomes: &Outcomes) -> bool {
        match self {
            EffectiveRequirement::Unconditional => true,
            EffectiveRequirement::AnyOf(set) => set.iter().any(|o| outcomes.contains(o)),
        }
    }

    /// Whether every filter the requirement refers to has an outcome in
    /// `outcomes`, so that `is_satisfied` cannot change for this row
    pub fn is_decided(&self, outcomes: &Outcomes) -> bool {
        self.outcomes().all(|o| outcomes.get(o.filter).is_some())
    }

    /// Outcomes of any of which a row must carry; none if unconditional
    pub fn outcomes(&self) -> impl Iterator<Item = &FilterOutcome> {
        let set = match self {
            EffectiveRequirement::AnyOf(set) => Some(set),
            EffectiveRequirement::Unconditional => None,
        };
        set.into_iter().flat_map(|s| s.iter())
    }

    fn of(requirement: &Requirement) -> Self {
        match requirement {
            Requirement::Any => EffectiveRequirement::Unconditional,
            r => EffectiveRequirement::AnyOf(r.outcomes().iter().cloned().collect()),
        }
    }
}

pub(crate) struct Resolution {
    pub effective: Vec<EffectiveRequirement>,
    pub defaulted: Vec<bool>,
    pub order: Vec<usize>,
}

fn check(
    component: &ComponentJob,
    requirement: &Requirement,
    components: &[ComponentJob],
) -> Result<(), ConfigError> {
    if let Requirement::Compound(os) = requirement {
        if os.is_empty() {
            return Err(ConfigError::InvalidProperty {
                component: component.name().to_owned(),
                property: "requirement".to_owned(),
                reason: "empty compound requirement".to_owned(),
            });
        }
    }
    for o in requirement.outcomes() {
        let filter = match components.get(o.filter.0) {
            Some(f) if f.kind() == ComponentKind::Filter => f,
            _ => {
                return Err(ConfigError::MissingFilter {
                    component: component.name().to_owned(),
                    filter: o.filter,
                })
            }
        };
        let categories = filter.descriptor().categories();
        if !categories.is_empty() && !categories.iter().any(|c| *c == o.category) {
            return Err(ConfigError::UnknownCategory {
                component: component.name().to_owned(),
                filter: filter.name().to_owned(),
                category: o.category.clone(),
            });
        }
    }
    Ok(())
}

// A union naming every category of an unconditional filter holds for
// every row.
fn collapse(
    union: BTreeSet<FilterOutcome>,
    components: &[ComponentJob],
    effective: &[EffectiveRequirement],
) -> EffectiveRequirement {
    let mut by_filter: BTreeMap<ComponentId, BTreeSet<&str>> = BTreeMap::new();
    for o in union.iter() {
        by_filter.entry(o.filter).or_default().insert(o.category.as_str());
    }
    for (filter, seen) in by_filter.iter() {
        let categories = components[filter.0].descriptor().categories();
        let exhaustive = !categories.is_empty() && categories.iter().all(|c| seen.contains(c.as_str()));
        if exhaustive && effective[filter.0].is_unconditional() {
            return EffectiveRequirement::Unconditional;
        }
    }
    EffectiveRequirement::AnyOf(union)
}

/// Validates requirements, orders the components and computes their
/// effective requirements.
pub(crate) fn resolve(
    components: &[ComponentJob],
    columns: &[Column],
    default: Option<&Requirement>,
) -> Result<Resolution, ConfigError> {
    let n = components.len();
    let mut graph = DepGraph::new(n);
    for c in components.iter() {
        if let Some(r) = c.requirement() {
            check(c, r, components)?;
            for o in r.outcomes() {
                graph.add_edge(c.id().0, o.filter.0);
            }
        }
        for input in c.inputs() {
            if let ColumnSource::Component { producer, .. } = columns[input.0].source() {
                graph.add_edge(c.id().0, producer.0);
            }
        }
    }

    let cycle = |idx: usize| ConfigError::Cycle(components[idx].name().to_owned());
    graph.topological_order().map_err(cycle)?;

    // The default requirement skips the filters establishing it and
    // whatever they depend on
    let mut excluded = BTreeSet::new();
    if let Some(d) = default {
        for o in d.outcomes() {
            let filter = match components.get(o.filter.0) {
                Some(f) => f,
                None => {
                    return Err(ConfigError::MissingFilter { component: "default requirement".to_owned(), filter: o.filter })
                }
            };
            check(filter, d, components)?;
            excluded.insert(o.filter.0);
            excluded.extend(graph.upstream(o.filter.0));
        }
        for c in components.iter() {
            if c.requirement().is_none() && !excluded.contains(&c.id().0) {
                for o in d.outcomes() {
                    graph.add_edge(c.id().0, o.filter.0);
                }
            }
        }
    }
    let order = graph.topological_order().map_err(cycle)?;

    let mut effective = vec![EffectiveRequirement::Unconditional; n];
    let mut defaulted = vec![false; n];
    for idx in order.iter().cloned() {
        let c = &components[idx];
        let resolved = match c.requirement() {
            Some(r) => EffectiveRequirement::of(r),
            None => {
                let mut union = BTreeSet::new();
                let mut unconditional = false;
                for input in c.inputs() {
                    match columns[input.0].source() {
                        ColumnSource::Table(_) => unconditional = true,
                        ColumnSource::Component { producer, .. } => match &effective[producer.0] {
                            EffectiveRequirement::Unconditional => unconditional = true,
                            EffectiveRequirement::AnyOf(set) => union.extend(set.iter().cloned()),
                        },
                    }
                }
                if unconditional {
                    EffectiveRequirement::Unconditional
                } else {
                    collapse(union, components, &effective)
                }
            }
        };

        effective[idx] = match default {
            Some(d) if resolved.is_unconditional() && c.requirement().is_none() && !excluded.contains(&idx) => {
                let applied = EffectiveRequirement::of(d);
                defaulted[idx] = !applied.is_unconditional();
                applied
            }
            _ => resolved,
        };
        trace!("Resolved {} to {:?}", c.name(), effective[idx]);
    }

    Ok(Resolution { effective, defaulted, order })
}
