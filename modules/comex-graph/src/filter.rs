//! Edge filters. Every filter only ever removes edges; kept edges stay in
//! their original order.

use std::cmp::Ordering;

use rayon::prelude::*;
use tracing::info;

use crate::model::{Edge, EdgeType, Graph, NodeWeightType};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Keep edges whose `edge_type` value is present and passes the threshold.
    Edge {
        edge_type: EdgeType,
        threshold: f64,
        smaller_as: bool,
    },
    /// Keep edges passing any enabled per-type threshold.
    Or {
        thresholds: Vec<(EdgeType, f64)>,
        smaller_as: bool,
    },
    /// Per node, keep its first `top_edges` incident edges by `edge_type`.
    BottomEdge {
        edge_type: EdgeType,
        top_edges: usize,
        descending: bool,
    },
    NodeWeight {
        weight: NodeWeightType,
        threshold: f64,
        smaller_as: bool,
        strict: bool,
    },
    NodeWeightBottom {
        weight: NodeWeightType,
        top_k: usize,
        descending: bool,
        strict: bool,
    },
}

impl Filter {
    pub fn apply(&self, graph: &mut Graph) {
        let before = graph.edges.len();
        match self {
            Filter::Edge {
                edge_type,
                threshold,
                smaller_as,
            } => retain_edges(graph, |e| {
                e.wgts
                    .get(*edge_type)
                    .is_some_and(|v| passes(v, *threshold, *smaller_as))
            }),
            Filter::Or { thresholds, smaller_as } => retain_edges(graph, |e| {
                thresholds.iter().any(|(t, threshold)| {
                    e.wgts.get(*t).is_some_and(|v| passes(v, *threshold, *smaller_as))
                })
            }),
            Filter::BottomEdge {
                edge_type,
                top_edges,
                descending,
            } => keep_top_edges(graph, *edge_type, *top_edges, *descending),
            Filter::NodeWeight {
                weight,
                threshold,
                smaller_as,
                strict,
            } => {
                let qualifying: Vec<bool> = graph
                    .node_weights(*weight)
                    .into_iter()
                    .map(|v| v.is_some_and(|v| passes(v, *threshold, *smaller_as)))
                    .collect();
                retain_by_endpoints(graph, &qualifying, *strict);
            }
            Filter::NodeWeightBottom {
                weight,
                top_k,
                descending,
                strict,
            } => {
                let qualifying = top_nodes(&graph.node_weights(*weight), *top_k, *descending);
                retain_by_endpoints(graph, &qualifying, *strict);
            }
        }
        info!(
            filter = ?self,
            before,
            after = graph.edges.len(),
            "Filtered edges"
        );
    }
}

/// `value >= threshold`, or `value <= threshold` with `smaller_as`.
pub fn passes(value: f64, threshold: f64, smaller_as: bool) -> bool {
    if smaller_as {
        value <= threshold
    } else {
        value >= threshold
    }
}

fn retain_edges(graph: &mut Graph, keep: impl Fn(&Edge) -> bool + Sync) {
    graph.edges = std::mem::take(&mut graph.edges)
        .into_par_iter()
        .filter(|e| keep(e))
        .collect();
}

fn retain_by_endpoints(graph: &mut Graph, qualifying: &[bool], strict: bool) {
    let arena = graph.arena();
    retain_edges(graph, |e| {
        let a = qualifying[arena.index(e.src)];
        let b = qualifying[arena.index(e.tgt)];
        if strict {
            a && b
        } else {
            a || b
        }
    });
}

fn order(a: f64, b: f64, descending: bool) -> Ordering {
    if descending {
        b.total_cmp(&a)
    } else {
        a.total_cmp(&b)
    }
}

fn keep_top_edges(graph: &mut Graph, edge_type: EdgeType, top_edges: usize, descending: bool) {
    let arena = graph.arena();
    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); arena.len()];
    for (k, edge) in graph.edges.iter().enumerate() {
        incident[arena.index(edge.src)].push(k);
        incident[arena.index(edge.tgt)].push(k);
    }

    let value = |k: usize| graph.edges[k].wgts.get(edge_type).unwrap_or(0.0);
    let mut keep = vec![false; graph.edges.len()];
    for mut edges in incident {
        edges.sort_by(|a, b| order(value(*a), value(*b), descending));
        for k in edges.into_iter().take(top_edges) {
            keep[k] = true;
        }
    }

    let mut flags = keep.into_iter();
    graph.edges.retain(|_| flags.next().unwrap_or(false));
}

/// Mark the first `k` nodes with a value, ranked by that value. Ties keep node order.
fn top_nodes(values: &[Option<f64>], k: usize, descending: bool) -> Vec<bool> {
    let mut ranked: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    ranked.sort_by(|a, b| order(a.1, b.1, descending));

    let mut qualifying = vec![false; values.len()];
    for (i, _) in ranked.into_iter().take(k) {
        qualifying[i] = true;
    }
    qualifying
}
