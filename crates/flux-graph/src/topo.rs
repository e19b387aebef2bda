//! Kahn's-algorithm topological sort (spec §4.E "prepare time").

use std::collections::VecDeque;

use flux_core::{Error, Result};

/// Linearize `num_nodes` nodes given `edges` of `(from, to)` pairs. Ties are
/// broken by insertion order: the ready queue starts in id order and is a
/// FIFO, so among nodes that become ready at the same round the
/// lowest-id / earliest-discovered one is scheduled first.
pub fn topological_order(num_nodes: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>> {
    let mut indegree = vec![0usize; num_nodes];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];
    for &(from, to) in edges {
        adjacency[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: VecDeque<usize> = (0..num_nodes).filter(|&n| indegree[n] == 0).collect();
    let mut order = Vec::with_capacity(num_nodes);

    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &next in &adjacency[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != num_nodes {
        return Err(Error::InvalidGraph("cycle detected among graph nodes".into()));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_orders_in_sequence() {
        let order = topological_order(3, &[(0, 1), (1, 2)]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        // 0 and 1 both have no dependencies; 2 depends on both.
        let order = topological_order(3, &[(0, 2), (1, 2)]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn cycle_is_rejected() {
        let err = topological_order(2, &[(0, 1), (1, 0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(_)));
    }
}
