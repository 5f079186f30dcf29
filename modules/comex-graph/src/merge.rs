//! Threshold-triggered node merging. Nodes stay in the graph; each merged
//! node records its set as MERGE_ID.

use std::collections::{BTreeMap, HashMap};

use petgraph::unionfind::UnionFind;
use serde::Deserialize;
use tracing::info;

use crate::filter::passes;
use crate::model::{Edge, EdgeType, Graph, NodeWeightType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Merger {
    Single {
        edge_type: EdgeType,
        threshold: f64,
        smaller_as: bool,
    },
    Multi {
        thresholds: BTreeMap<EdgeType, f64>,
        weights: BTreeMap<EdgeType, f64>,
        conjunction: Conjunction,
        smaller_as: bool,
    },
}

impl Merger {
    fn triggers(&self, edge: &Edge) -> bool {
        match self {
            Merger::Single {
                edge_type,
                threshold,
                smaller_as,
            } => edge
                .wgts
                .get(*edge_type)
                .is_some_and(|v| passes(v, *threshold, *smaller_as)),
            Merger::Multi {
                thresholds,
                weights,
                conjunction,
                smaller_as,
            } => {
                let mut conditions = thresholds.iter().map(|(t, threshold)| {
                    let coefficient = weights.get(t).copied().unwrap_or(1.0);
                    edge.wgts
                        .get(*t)
                        .is_some_and(|v| passes(coefficient * v, *threshold, *smaller_as))
                });
                match conjunction {
                    Conjunction::And => conditions.all(|c| c),
                    Conjunction::Or => conditions.any(|c| c),
                }
            }
        }
    }

    pub fn apply(&self, graph: &mut Graph) {
        let arena = graph.arena();
        let mut sets = UnionFind::<usize>::new(arena.len());
        for edge in &graph.edges {
            if self.triggers(edge) {
                sets.union(arena.index(edge.src), arena.index(edge.tgt));
            }
        }

        let ids = ordinals(&sets.into_labeling());
        let merged = ids.iter().filter(|id| **id >= 0).count();
        let groups = ids.iter().copied().max().map_or(0, |m| m + 1);
        let values: Vec<Option<f64>> = ids.into_iter().map(|id| Some(id as f64)).collect();
        graph.assign_node_weights(NodeWeightType::MergeId, &values);

        info!(merger = ?self, merged, groups, "Merged nodes");
    }
}

/// Dense set ordinal per element from a union-find labeling, numbered by
/// each set's first element. Singletons get -1.
fn ordinals(labels: &[usize]) -> Vec<i64> {
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for label in labels {
        *sizes.entry(*label).or_default() += 1;
    }
    let mut next = 0;
    let mut seen: HashMap<usize, i64> = HashMap::new();
    labels
        .iter()
        .map(|label| {
            if sizes[label] == 1 {
                return -1;
            }
            *seen.entry(*label).or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}
