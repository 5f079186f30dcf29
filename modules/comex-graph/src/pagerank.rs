//! PageRank over one edge type, treated as an undirected weighted graph.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::model::{Edge, EdgeType, NodeArena};

#[derive(Debug, Clone, PartialEq)]
pub struct PageRankParams {
    pub d: f64,
    pub num_iterations: usize,
    /// Stop early once the L1 change drops below `tolerance`.
    pub power_mode: bool,
    pub tolerance: f64,
    pub normalize: bool,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            d: 0.85,
            num_iterations: 100,
            power_mode: false,
            tolerance: 1e-6,
            normalize: true,
        }
    }
}

/// Symmetric compressed sparse rows. Row `u` lists `(v, w_uv)`.
struct Csr {
    offsets: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
    /// Sum of row weights; zero marks a dangling node.
    strength: Vec<f64>,
}

impl Csr {
    fn build(edges: &[Edge], arena: &NodeArena, edge_type: EdgeType) -> Self {
        let n = arena.len();
        let links: Vec<(usize, usize, f64)> = edges
            .iter()
            .filter_map(|e| {
                let w = e.wgts.get(edge_type)?;
                (w > 0.0).then(|| (arena.index(e.src), arena.index(e.tgt), w))
            })
            .collect();

        let mut degree = vec![0usize; n];
        for &(a, b, _) in &links {
            degree[a] += 1;
            degree[b] += 1;
        }

        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0);
        for d in &degree {
            offsets.push(offsets.last().copied().unwrap_or(0) + d);
        }

        let nnz = offsets[n];
        let mut targets = vec![0usize; nnz];
        let mut weights = vec![0.0f64; nnz];
        let mut cursor = offsets[..n].to_vec();
        let mut strength = vec![0.0f64; n];
        for &(a, b, w) in &links {
            for (from, to) in [(a, b), (b, a)] {
                targets[cursor[from]] = to;
                weights[cursor[from]] = w;
                cursor[from] += 1;
                strength[from] += w;
            }
        }

        Self {
            offsets,
            targets,
            weights,
            strength,
        }
    }

    fn nnz(&self) -> usize {
        self.targets.len()
    }

    fn row(&self, u: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.offsets[u]..self.offsets[u + 1];
        self.targets[range.clone()]
            .iter()
            .copied()
            .zip(self.weights[range].iter().copied())
    }
}

/// Rank every node in dense order. Edges with no positive value for
/// `edge_type` are ignored; dangling mass is spread uniformly.
pub fn pagerank(edges: &[Edge], arena: &NodeArena, edge_type: EdgeType, params: &PageRankParams) -> Vec<f64> {
    let n = arena.len();
    if n == 0 {
        return Vec::new();
    }

    let csr = Csr::build(edges, arena, edge_type);
    if csr.nnz() == 0 {
        warn!(edge_type = %edge_type, nodes = n, "PageRank adjacency is empty, ranks are uniform");
    }

    let uniform = 1.0 / n as f64;
    let teleport = (1.0 - params.d) * uniform;
    let mut ranks = vec![uniform; n];
    let mut iterations = 0;

    for _ in 0..params.num_iterations {
        iterations += 1;
        let dangling: f64 = ranks
            .iter()
            .zip(&csr.strength)
            .filter(|(_, s)| **s == 0.0)
            .map(|(r, _)| r)
            .sum();
        let base = teleport + params.d * dangling * uniform;

        let next: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|u| {
                let inflow: f64 = csr.row(u).map(|(v, w)| w / csr.strength[v] * ranks[v]).sum();
                base + params.d * inflow
            })
            .collect();

        let change: f64 = next.iter().zip(&ranks).map(|(a, b)| (a - b).abs()).sum();
        ranks = next;
        if params.power_mode && change < params.tolerance {
            break;
        }
    }

    debug!(edge_type = %edge_type, nodes = n, links = csr.nnz() / 2, iterations, "PageRank converged");

    if params.normalize {
        normalize(&mut ranks);
    }
    ranks
}

/// Min-max scale into `[0.001, 1.001]`. Equal ranks all become 1.001.
pub fn normalize(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut min = values.iter().copied().fold(f64::INFINITY, f64::min);
    if max == min {
        min = max - 1.0;
    }
    for v in values.iter_mut() {
        *v = (*v - min) / (max - min) + 0.001;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeWeights, NodeId, Split, SplitComment};

    fn arena(n: usize) -> NodeArena {
        let comments: Vec<SplitComment> = (0..n)
            .map(|i| SplitComment {
                id: i as i64,
                grp_id: None,
                splits: vec![Split::new(0, 10)],
            })
            .collect();
        NodeArena::new(&comments)
    }

    fn reply(a: u32, b: u32, w: f64) -> Edge {
        Edge::new(NodeId(a, 0), NodeId(b, 0), EdgeWeights::default().with(EdgeType::ReplyTo, w))
    }

    #[test]
    fn hub_of_a_star_ranks_highest() {
        let edges = vec![reply(0, 1, 1.0), reply(0, 2, 1.0), reply(0, 3, 1.0), reply(0, 4, 1.0)];
        let raw = pagerank(
            &edges,
            &arena(5),
            EdgeType::ReplyTo,
            &PageRankParams {
                normalize: false,
                ..Default::default()
            },
        );
        assert!((raw.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(raw[1..].iter().all(|r| raw[0] > *r));

        let normalized = pagerank(&edges, &arena(5), EdgeType::ReplyTo, &PageRankParams::default());
        assert!(normalized.iter().all(|r| (0.001 - 1e-12..=1.001 + 1e-12).contains(r)));
        assert!((normalized[0] - 1.001).abs() < 1e-12);
        assert!((normalized[1] - 0.001).abs() < 1e-12);
    }

    #[test]
    fn no_edges_gives_uniform_ranks() {
        let ranks = pagerank(&[], &arena(3), EdgeType::ReplyTo, &PageRankParams::default());
        assert!(ranks.iter().all(|r| (r - 1.001).abs() < 1e-12));

        let raw = pagerank(
            &[],
            &arena(4),
            EdgeType::ReplyTo,
            &PageRankParams {
                normalize: false,
                ..Default::default()
            },
        );
        assert!(raw.iter().all(|r| (r - 0.25).abs() < 1e-12));
    }

    #[test]
    fn dangling_nodes_do_not_produce_nan() {
        let edges = vec![reply(0, 1, 1.0)];
        let ranks = pagerank(&edges, &arena(4), EdgeType::ReplyTo, &PageRankParams::default());
        assert!(ranks.iter().all(|r| r.is_finite()));
        assert!(ranks[0] > ranks[2]);
    }

    #[test]
    fn non_positive_and_other_type_weights_are_ignored() {
        let edges = vec![
            reply(0, 1, -1.0),
            Edge::new(NodeId(1, 0), NodeId(2, 0), EdgeWeights::default().with(EdgeType::Similarity, 0.9)),
        ];
        let ranks = pagerank(&edges, &arena(3), EdgeType::ReplyTo, &PageRankParams::default());
        assert!(ranks.iter().all(|r| (r - 1.001).abs() < 1e-12));
    }

    #[test]
    fn power_mode_matches_fixed_iterations() {
        let edges = vec![reply(0, 1, 1.0), reply(1, 2, 2.0), reply(2, 3, 1.0), reply(3, 0, 0.5)];
        let fixed = pagerank(&edges, &arena(4), EdgeType::ReplyTo, &PageRankParams::default());
        let power = pagerank(
            &edges,
            &arena(4),
            EdgeType::ReplyTo,
            &PageRankParams {
                power_mode: true,
                num_iterations: 1000,
                ..Default::default()
            },
        );
        for (a, b) in fixed.iter().zip(&power) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
