use std::cmp::Reverse;
use std::collections::BTreeSet;

use priority_queue::PriorityQueue;

/// Dependency graph over densely numbered nodes.  `inbound[n]` holds the
/// nodes `n` depends on.
#[derive(Debug, Clone, Default)]
pub(crate) struct DepGraph {
    inbound: Vec<BTreeSet<usize>>,
}

impl DepGraph {
    pub(crate) fn new(n_nodes: usize) -> Self {
        DepGraph { inbound: vec![BTreeSet::new(); n_nodes] }
    }

    /// Records that `node` depends on `on`.  Self loops count as cycles.
    pub(crate) fn add_edge(&mut self, node: usize, on: usize) {
        self.inbound[node].insert(on);
    }

    pub(crate) fn dependencies(&self, node: usize) -> &BTreeSet<usize> {
        &self.inbound[node]
    }

    /// All nodes reachable through dependency edges from `node`, excluding
    /// `node` itself
    pub(crate) fn upstream(&self, node: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = self.inbound[node].iter().cloned().collect();
        while let Some(n) = stack.pop() {
            if n != node && seen.insert(n) {
                stack.extend(self.inbound[n].iter().cloned());
            }
        }
        seen
    }

    /// Orders nodes so that every node comes after its dependencies.  Ties
    /// are broken by node number, so the order is stable across runs.
    /// Returns the lowest numbered node left over if the graph has a cycle.
    pub(crate) fn topological_order(&self) -> Result<Vec<usize>, usize> {
        // Build out outbound edges
        let mut outbound = vec![Vec::new(); self.inbound.len()];
        let mut remaining: Vec<usize> = self.inbound.iter().map(|deps| deps.len()).collect();
        for (node, deps) in self.inbound.iter().enumerate() {
            for d in deps.iter() {
                outbound[*d].push(node);
            }
        }

        let mut queue = PriorityQueue::new();
        for (node, count) in remaining.iter().enumerate() {
            if *count == 0 {
                queue.push(node, Reverse(node));
            }
        }

        let mut order = Vec::with_capacity(self.inbound.len());
        while let Some((node, _)) = queue.pop() {
            trace!("Ordered node {}", node);
            order.push(node);
            for out in outbound[node].iter() {
                remaining[*out] -= 1;
                if remaining[*out] == 0 {
                    queue.push(*out, Reverse(*out));
                }
            }
        }

        if order.len() < self.inbound.len() {
            let stuck = remaining.iter().position(|c| *c > 0).unwrap_or(0);
            return Err(stuck);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod graph_test {
    use super::*;

    #[test]
    fn test_topological_order() {
        /*
             1 -> 3
            /     |
           0 ---> 2 -> 4
        */
        let mut g = DepGraph::new(5);
        g.add_edge(1, 0);
        g.add_edge(2, 0);
        g.add_edge(3, 1);
        g.add_edge(2, 3);
        g.add_edge(4, 2);

        assert_eq!(g.topological_order(), Ok(vec![0, 1, 3, 2, 4]));
        assert_eq!(g.upstream(2), vec![0, 1, 3].into_iter().collect());
        assert!(g.upstream(0).is_empty());
    }

    #[test]
    fn test_stable_ties() {
        let mut g = DepGraph::new(4);
        g.add_edge(0, 3);
        assert_eq!(g.topological_order(), Ok(vec![1, 2, 3, 0]));
    }

    #[test]
    fn test_cycle() {
        let mut g = DepGraph::new(3);
        g.add_edge(1, 2);
        g.add_edge(2, 1);
        assert_eq!(g.topological_order(), Err(1));

        let mut g = DepGraph::new(1);
        g.add_edge(0, 0);
        assert_eq!(g.topological_order(), Err(0));
    }
}
