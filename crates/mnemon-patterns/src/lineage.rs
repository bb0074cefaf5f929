use std::collections::HashMap;

use mnemon_domain::PatternId;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::PatternError;

/// Validate that the supersedes edges — optionally extended by one proposed
/// edge — form an acyclic lineage. The store performs the cheap chain walk
/// on every write; this is the graph-wide invariant check used by the
/// lifecycle reducer and the lineage view.
pub fn assert_acyclic(
    edges: &[(PatternId, Option<PatternId>)],
    proposed: Option<(PatternId, PatternId)>,
) -> Result<(), PatternError> {
    let mut graph: DiGraph<PatternId, ()> = DiGraph::new();
    let mut nodes: HashMap<PatternId, NodeIndex> = HashMap::new();

    let mut node = |graph: &mut DiGraph<PatternId, ()>, id: PatternId| {
        *nodes.entry(id).or_insert_with(|| graph.add_node(id))
    };

    for (id, supersedes) in edges {
        let from = node(&mut graph, *id);
        if let Some(superseded) = supersedes {
            let to = node(&mut graph, *superseded);
            graph.add_edge(from, to, ());
        }
    }
    if let Some((new, old)) = proposed {
        let from = node(&mut graph, new);
        let to = node(&mut graph, old);
        graph.add_edge(from, to, ());
    }

    if is_cyclic_directed(&graph) {
        let through = proposed
            .map(|(new, _)| new.to_string())
            .unwrap_or_else(|| "existing edges".to_string());
        return Err(PatternError::LineageCycle(through));
    }
    Ok(())
}

/// The chain of versions superseded by `start`, oldest last.
pub fn lineage_chain(
    edges: &[(PatternId, Option<PatternId>)],
    start: PatternId,
) -> Vec<PatternId> {
    let by_id: HashMap<PatternId, Option<PatternId>> = edges.iter().cloned().collect();
    let mut chain = vec![start];
    let mut cursor = start;
    while let Some(Some(next)) = by_id.get(&cursor) {
        if chain.contains(next) {
            break; // defensive stop; assert_acyclic guards writes
        }
        chain.push(*next);
        cursor = *next;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_chain_is_acyclic() {
        let a = PatternId::new();
        let b = PatternId::new();
        let c = PatternId::new();
        let edges = vec![(c, Some(b)), (b, Some(a)), (a, None)];
        assert!(assert_acyclic(&edges, None).is_ok());
        assert_eq!(lineage_chain(&edges, c), vec![c, b, a]);
    }

    #[test]
    fn proposed_back_edge_is_a_cycle() {
        let a = PatternId::new();
        let b = PatternId::new();
        let edges = vec![(b, Some(a)), (a, None)];
        assert!(matches!(
            assert_acyclic(&edges, Some((a, b))),
            Err(PatternError::LineageCycle(_))
        ));
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let a = PatternId::new();
        assert!(assert_acyclic(&[(a, None)], Some((a, a))).is_err());
    }
}
