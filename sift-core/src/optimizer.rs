//! Pushes row-window filters into the source query.
//!
//! A query-optimizable filter can replace itself with an offset/limit on
//! the query, but only when nothing in the table can observe the rows the
//! query would drop: every other component must be gated, directly or
//! through other filters, on the outcome being pushed.  The filter is then
//! removed from the pipeline and its outcome is established up front on
//! every row.

use std::collections::{BTreeSet, HashMap};

use crate::component::Instance;
use crate::job::{ComponentId, ComponentKind, FilterOutcome, Job};
use crate::requirement::{EffectiveRequirement, Outcomes};
use crate::row::Query;

/// The pipeline after optimization
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedQuery {
    /// Query to send to the source
    pub query: Query,
    /// Filters replaced by the query
    pub removed: BTreeSet<ComponentId>,
    /// Outcomes every row starts with
    pub preset: Outcomes,
}

impl OptimizedQuery {
    /// The query as is, with nothing removed
    pub fn unchanged(query: Query) -> Self {
        OptimizedQuery { query, removed: BTreeSet::new(), preset: Outcomes::new() }
    }
}

/// Plans the query of one table
pub struct QueryOptimizer<'a> {
    job: &'a Job,
    components: &'a [(ComponentId, &'a Instance)],
}

impl<'a> QueryOptimizer<'a> {
    /// `components` are the live instances of one table, in processing order
    pub fn new(job: &'a Job, components: &'a [(ComponentId, &'a Instance)]) -> Self {
        QueryOptimizer { job, components }
    }

    // Whether every row reaching `component` carries `outcome`
    fn is_gated(
        &self,
        component: ComponentId,
        outcome: &FilterOutcome,
        memo: &mut HashMap<ComponentId, bool>,
    ) -> bool {
        if let Some(gated) = memo.get(&component) {
            return *gated;
        }
        let gated = match self.job.effective_requirement(component) {
            EffectiveRequirement::Unconditional => false,
            EffectiveRequirement::AnyOf(set) => set.iter().all(|o| {
                o == outcome || (o.filter != outcome.filter && self.is_gated(o.filter, outcome, memo))
            }),
        };
        memo.insert(component, gated);
        gated
    }

    /// Pushes down at most one filter outcome
    pub fn optimize(&self, query: Query) -> OptimizedQuery {
        for (id, instance) in self.components.iter() {
            let component = self.job.component(*id);
            if component.kind() != ComponentKind::Filter || !component.descriptor().is_query_optimizable() {
                continue;
            }
            if !self.job.effective_requirement(*id).is_unconditional() {
                continue;
            }
            let filter = match instance {
                Instance::Filter(f) => f,
                _ => continue,
            };
            for category in component.descriptor().categories() {
                let outcome = FilterOutcome::new(*id, category.clone());
                let mut memo = HashMap::new();
                let all_gated = self
                    .components
                    .iter()
                    .filter(|(other, _)| other != id)
                    .all(|(other, _)| self.is_gated(*other, &outcome, &mut memo));
                if !all_gated {
                    continue;
                }
                if let Some(optimized) = filter.optimize_query(&query, category) {
                    debug!(
                        "Pushing {} of {} into query on {}: {:?}",
                        category,
                        component.name(),
                        query.table,
                        optimized
                    );
                    let mut preset = Outcomes::new();
                    preset.insert(*id, category.clone());
                    let mut removed = BTreeSet::new();
                    removed.insert(*id);
                    return OptimizedQuery { query: optimized, removed, preset };
                }
            }
        }
        OptimizedQuery::unchanged(query)
    }
}

#[cfg(test)]
mod optimizer_test {
    use super::*;
    use crate::job::JobBuilder;
    use crate::testkit;

    fn optimize(job: &Job) -> OptimizedQuery {
        let ids = job.table_components("t");
        let instances: Vec<Instance> = ids
            .iter()
            .map(|id| {
                let c = job.component(*id);
                c.descriptor().instantiate(c.properties()).unwrap()
            })
            .collect();
        let pairs: Vec<(ComponentId, &Instance)> = ids.iter().cloned().zip(instances.iter()).collect();
        let query = Query::new("t", vec!["name".into()]);
        QueryOptimizer::new(job, &pairs).optimize(query)
    }

    #[test]
    fn test_pushdown_when_everything_is_gated() {
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let f = b.add_component(&testkit::even_odd_filter()).input(name).add();
        let t = b.add_component(&testkit::mock_transformer()).input(name).output("x").requires(f, "EVEN").add();
        let x = b.outputs(t)[0];
        b.add_component(&testkit::list_analyzer()).input(x).add();
        b.add_component(&testkit::list_analyzer()).input(name).add();
        let slave = b.build().unwrap().with_row_range(3, Some(4)).unwrap();

        let optimized = optimize(&slave);
        assert_eq!(optimized.query.first_row, Some(3));
        assert_eq!(optimized.query.max_rows, Some(4));
        let filter = ComponentId(slave.components().len() - 1);
        assert!(optimized.removed.contains(&filter));
        assert_eq!(optimized.preset.get(filter), Some("VALID"));
    }

    #[test]
    fn test_no_pushdown_with_ungated_component() {
        let mut b = JobBuilder::new();
        let name = b.source_column("t", "name");
        let max_rows = crate::builtin::max_rows_descriptor();
        let f = b.add_component(&max_rows).input(name).property("first_row", "2").add();
        b.add_component(&testkit::list_analyzer()).input(name).requires(f, "VALID").add();
        // Sees every row
        b.add_component(&testkit::list_analyzer()).input(name).add();
        let job = b.build().unwrap();

        let optimized = optimize(&job);
        assert!(optimized.removed.is_empty());
        assert_eq!(optimized.query.first_row, None);
    }
}
