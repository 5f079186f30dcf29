//! Community detection over the edges of selected types.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use petgraph::visit::EdgeRef;
use serde::Deserialize;
use tracing::{info, warn};

use crate::model::{EdgeType, Graph, NodeId, NodeWeightType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterAlgorithm {
    #[serde(alias = "girvannewman", alias = "gn")]
    GirvanNewman,
    #[default]
    #[serde(alias = "gmc")]
    GreedyModularity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clusterer {
    pub edge_types: Vec<EdgeType>,
    pub algorithm: ClusterAlgorithm,
}

/// Result summary of one clustering pass.
#[derive(Debug, Default)]
pub struct ClusterStats {
    pub nodes: usize,
    pub links: usize,
    pub communities: usize,
    pub largest: usize,
}

impl fmt::Display for ClusterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} links, {} communities (largest {})",
            self.nodes, self.links, self.communities, self.largest
        )
    }
}

type Topology = StableUnGraph<NodeId, f64>;

impl Clusterer {
    pub fn apply(&self, graph: &mut Graph) -> ClusterStats {
        let topology = self.topology(graph);
        let mut stats = ClusterStats {
            nodes: topology.node_count(),
            links: topology.edge_count(),
            ..Default::default()
        };
        if stats.links == 0 {
            warn!(edge_types = ?self.edge_types, "No qualifying edges, nothing to cluster");
            return stats;
        }

        let communities = match self.algorithm {
            ClusterAlgorithm::GirvanNewman => girvan_newman(topology),
            ClusterAlgorithm::GreedyModularity => greedy_modularity(&topology),
        };

        for (ordinal, members) in communities.iter().enumerate() {
            for node in members {
                graph.split_mut(*node).wgts.set(NodeWeightType::ClusterId, ordinal as f64);
            }
        }

        stats.communities = communities.len();
        stats.largest = communities.iter().map(Vec::len).max().unwrap_or(0);
        info!(algorithm = ?self.algorithm, %stats, "Clustered nodes");
        stats
    }

    /// Undirected graph over edges carrying any selected type, weighted by
    /// the sum of the selected values. Nodes are added in node order.
    fn topology(&self, graph: &Graph) -> Topology {
        let links: Vec<(NodeId, NodeId, f64)> = graph
            .edges
            .iter()
            .filter_map(|e| {
                let values: Vec<f64> = self.edge_types.iter().filter_map(|t| e.wgts.get(*t)).collect();
                (!values.is_empty()).then(|| (e.src, e.tgt, values.iter().sum()))
            })
            .collect();

        let endpoints: BTreeSet<NodeId> = links.iter().flat_map(|(a, b, _)| [*a, *b]).collect();
        let mut topology = Topology::default();
        let index: HashMap<NodeId, NodeIndex> =
            endpoints.into_iter().map(|n| (n, topology.add_node(n))).collect();
        for (a, b, w) in links {
            topology.add_edge(index[&a], index[&b], w);
        }
        topology
    }
}

fn components(topology: &Topology) -> Vec<Vec<NodeId>> {
    let mut seen: BTreeSet<NodeIndex> = BTreeSet::new();
    let mut out = Vec::new();
    for start in topology.node_indices() {
        if !seen.insert(start) {
            continue;
        }
        let mut members = vec![topology[start]];
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            for u in topology.neighbors(v) {
                if seen.insert(u) {
                    members.push(topology[u]);
                    queue.push_back(u);
                }
            }
        }
        members.sort();
        out.push(members);
    }
    out
}

/// Unweighted edge betweenness (Brandes).
fn edge_betweenness(topology: &Topology) -> HashMap<EdgeIndex, f64> {
    let mut scores: HashMap<EdgeIndex, f64> = topology.edge_indices().map(|e| (e, 0.0)).collect();

    for s in topology.node_indices() {
        let mut order = Vec::new();
        let mut preds: HashMap<NodeIndex, Vec<(NodeIndex, EdgeIndex)>> = HashMap::new();
        let mut sigma: HashMap<NodeIndex, f64> = HashMap::from([(s, 1.0)]);
        let mut dist: HashMap<NodeIndex, usize> = HashMap::from([(s, 0)]);
        let mut queue = VecDeque::from([s]);

        while let Some(v) = queue.pop_front() {
            order.push(v);
            let dv = dist[&v];
            for edge in topology.edges(v) {
                let w = if edge.source() == v { edge.target() } else { edge.source() };
                if !dist.contains_key(&w) {
                    dist.insert(w, dv + 1);
                    queue.push_back(w);
                }
                if dist[&w] == dv + 1 {
                    *sigma.entry(w).or_insert(0.0) += sigma[&v];
                    preds.entry(w).or_default().push((v, edge.id()));
                }
            }
        }

        let mut delta: HashMap<NodeIndex, f64> = HashMap::new();
        for w in order.into_iter().rev() {
            let dw = delta.get(&w).copied().unwrap_or(0.0);
            for (v, e) in preds.remove(&w).unwrap_or_default() {
                let c = sigma[&v] / sigma[&w] * (1.0 + dw);
                *scores.entry(e).or_insert(0.0) += c;
                *delta.entry(v).or_insert(0.0) += c;
            }
        }
    }
    scores
}

/// First level of the Girvan–Newman hierarchy: remove the most central edge
/// until the number of components grows. Communities ordered by smallest member.
fn girvan_newman(mut topology: Topology) -> Vec<Vec<NodeId>> {
    let initial = components(&topology).len();
    loop {
        let scores = edge_betweenness(&topology);
        let Some(target) = topology
            .edge_indices()
            .fold(None, |best: Option<(EdgeIndex, f64)>, e| match best {
                Some((_, s)) if s >= scores[&e] => best,
                _ => Some((e, scores[&e])),
            })
            .map(|(e, _)| e)
        else {
            break;
        };
        topology.remove_edge(target);

        let parts = components(&topology);
        if parts.len() > initial {
            return order_by_smallest(parts);
        }
    }
    order_by_smallest(components(&topology))
}

fn order_by_smallest(mut parts: Vec<Vec<NodeId>>) -> Vec<Vec<NodeId>> {
    parts.sort_by(|a, b| a.first().cmp(&b.first()));
    parts
}

/// Clauset–Newman–Moore agglomeration on weighted modularity. Merges the
/// adjacent pair with the largest positive gain until none is left.
/// Non-positive link weights carry no modularity mass.
fn greedy_modularity(topology: &Topology) -> Vec<Vec<NodeId>> {
    let nodes: Vec<NodeIndex> = topology.node_indices().collect();
    let position: HashMap<NodeIndex, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut members: Vec<Vec<NodeId>> = nodes.iter().map(|n| vec![topology[*n]]).collect();
    let mut between: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); nodes.len()];
    let mut strength = vec![0.0f64; nodes.len()];
    let mut total = 0.0;

    for edge in topology.edge_indices() {
        let Some((source, target)) = topology.edge_endpoints(edge) else {
            continue;
        };
        let w = topology[edge].max(0.0);
        let (a, b) = (position[&source], position[&target]);
        *between[a].entry(b).or_insert(0.0) += w;
        *between[b].entry(a).or_insert(0.0) += w;
        strength[a] += w;
        strength[b] += w;
        total += w;
    }

    if total > 0.0 {
        let two_m = 2.0 * total;
        // e_ij and a_i as fractions of total edge-end weight.
        for row in &mut between {
            for v in row.values_mut() {
                *v /= two_m;
            }
        }
        let mut share: Vec<f64> = strength.iter().map(|s| s / two_m).collect();
        let mut alive = vec![true; nodes.len()];

        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for (i, row) in between.iter().enumerate() {
                if !alive[i] {
                    continue;
                }
                for (&j, &e_ij) in row.range(i + 1..) {
                    let gain = 2.0 * (e_ij - share[i] * share[j]);
                    if best.map_or(true, |(_, _, g)| gain > g) {
                        best = Some((i, j, gain));
                    }
                }
            }
            let Some((i, j, _)) = best.filter(|(_, _, g)| *g > 0.0) else {
                break;
            };

            let absorbed = std::mem::take(&mut between[j]);
            for (k, e_jk) in absorbed {
                between[k].remove(&j);
                if k == i {
                    continue;
                }
                *between[i].entry(k).or_insert(0.0) += e_jk;
                *between[k].entry(i).or_insert(0.0) += e_jk;
            }
            share[i] += share[j];
            let moved = std::mem::take(&mut members[j]);
            members[i].extend(moved);
            alive[j] = false;
        }
    }

    let mut communities: Vec<Vec<NodeId>> = members
        .into_iter()
        .filter(|m| !m.is_empty())
        .map(|mut m| {
            m.sort();
            m
        })
        .collect();
    communities.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
    communities
}
