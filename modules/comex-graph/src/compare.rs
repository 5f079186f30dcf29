//! Pairwise comparison engine. Every admissible split pair is offered to
//! each enabled comparator once; pairs that collect at least one weight
//! become edges.

use rayon::prelude::*;
use tracing::{debug, info};

use comex_common::{Comment, ComexError};

use crate::config::{RootComparatorConfig, SameCommentConfig, SimilarityConfig, TemporalConfig};
use crate::model::{Edge, EdgeType, EdgeWeights, NodeArena, NodeId, SplitComment};
use crate::providers::{embed_checked, EmbeddingProvider};
use crate::similarity::cosine_similarity;

#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    SameArticle(RootComparatorConfig),
    SameComment(SameCommentConfig),
    ReplyTo(RootComparatorConfig),
    Temporal(TemporalConfig),
    Similarity(SimilarityConfig),
}

impl Comparator {
    pub fn edge_type(&self) -> EdgeType {
        match self {
            Comparator::SameArticle(_) => EdgeType::SameArticle,
            Comparator::SameComment(_) => EdgeType::SameComment,
            Comparator::ReplyTo(_) => EdgeType::ReplyTo,
            Comparator::Temporal(_) => EdgeType::Temporal,
            Comparator::Similarity(_) => EdgeType::Similarity,
        }
    }

    pub fn needs_embeddings(&self) -> bool {
        matches!(self, Comparator::Similarity(_))
    }

    fn weigh(&self, pair: &Pair<'_>, embeddings: &Embeddings) -> Option<f64> {
        match self {
            Comparator::SameComment(c) => {
                let same = pair.i == pair.j;
                (same && (!c.only_consecutive || pair.sj == pair.si + 1)).then_some(c.base_weight)
            }
            Comparator::SameArticle(c) => {
                let same = pair.a.article_id == pair.b.article_id;
                (same && pair.root_ok(c.only_root)).then_some(c.base_weight)
            }
            Comparator::ReplyTo(c) => {
                (pair.a.is_reply_pair(pair.b) && pair.root_ok(c.only_root)).then_some(c.base_weight)
            }
            Comparator::Temporal(c) => {
                if !pair.root_ok(c.only_root) {
                    return None;
                }
                let delta = (pair.a.timestamp - pair.b.timestamp).num_seconds().abs() as f64;
                // At or past the cutoff this is <= 0; a TEMPORAL filter drops it.
                Some(c.base_weight * (c.max_time - delta) / c.max_time)
            }
            Comparator::Similarity(c) => {
                if !pair.root_ok(c.only_root) {
                    return None;
                }
                let (va, vb) = if c.use_split_text {
                    (embeddings.split(pair.dense_a), embeddings.split(pair.dense_b))
                } else {
                    (embeddings.comment(pair.i), embeddings.comment(pair.j))
                };
                let sim = cosine_similarity(va, vb);
                (sim < c.max_similarity).then(|| c.base_weight * (1.0 + sim) / 2.0)
            }
        }
    }
}

struct Pair<'a> {
    i: usize,
    si: usize,
    j: usize,
    sj: usize,
    dense_a: usize,
    dense_b: usize,
    a: &'a Comment,
    b: &'a Comment,
}

impl Pair<'_> {
    fn root_ok(&self, only_root: bool) -> bool {
        !only_root || (self.si == 0 && self.sj == 0)
    }
}

/// Embeddings fetched ahead of comparison, per comment and/or per split.
#[derive(Debug, Clone, Default)]
pub struct Embeddings {
    comments: Vec<Vec<f32>>,
    splits: Vec<Vec<f32>>,
}

impl Embeddings {
    fn comment(&self, i: usize) -> &[f32] {
        &self.comments[i]
    }

    fn split(&self, dense: usize) -> &[f32] {
        &self.splits[dense]
    }
}

/// Fetch every vector the comparators will need, in one batch per granularity.
pub async fn fetch_embeddings(
    comparators: &[Comparator],
    split_comments: &[SplitComment],
    comments: &[Comment],
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<Embeddings, ComexError> {
    let mut embeddings = Embeddings::default();
    let Some(similarity) = comparators.iter().find_map(|c| match c {
        Comparator::Similarity(cfg) => Some(cfg),
        _ => None,
    }) else {
        return Ok(embeddings);
    };

    let provider = provider.ok_or_else(|| {
        ComexError::collaborator("SimilarityComparator is active but no embedding provider is configured")
    })?;

    if similarity.use_split_text {
        let texts: Vec<String> = split_comments
            .iter()
            .zip(comments)
            .flat_map(|(sc, c)| sc.splits.iter().map(move |s| s.text(&c.text).to_string()))
            .collect();
        embeddings.splits = embed_checked(provider, &texts).await?;
    } else {
        let texts: Vec<String> = comments.iter().map(|c| c.text.clone()).collect();
        embeddings.comments = embed_checked(provider, &texts).await?;
    }

    debug!(
        comments = embeddings.comments.len(),
        splits = embeddings.splits.len(),
        "Fetched embeddings for similarity"
    );
    Ok(embeddings)
}

/// Compare every admissible split pair and return the initial edge list.
///
/// Pairs are visited row-major: `i` over comments, `si` over its splits,
/// `j` from `i`, and `sj` from `si + 1` within the same comment. Rows run on
/// the rayon pool; results are concatenated in row order.
pub fn build_edges(
    split_comments: &[SplitComment],
    comments: &[Comment],
    comparators: &[Comparator],
    embeddings: &Embeddings,
) -> Vec<Edge> {
    assert_eq!(split_comments.len(), comments.len(), "one split comment per comment");
    if comparators.is_empty() {
        info!("No comparators enabled, graph has no edges");
        return Vec::new();
    }

    let arena = NodeArena::new(split_comments);
    let n = split_comments.len();

    let rows: Vec<Vec<Edge>> = (0..n)
        .into_par_iter()
        .map(|i| compare_row(i, split_comments, comments, comparators, embeddings, &arena))
        .collect();

    let edges: Vec<Edge> = rows.into_iter().flatten().collect();
    info!(
        comments = n,
        splits = arena.len(),
        comparators = comparators.len(),
        edges = edges.len(),
        "Built edges"
    );
    edges
}

fn compare_row(
    i: usize,
    split_comments: &[SplitComment],
    comments: &[Comment],
    comparators: &[Comparator],
    embeddings: &Embeddings,
    arena: &NodeArena,
) -> Vec<Edge> {
    let mut row = Vec::new();
    for si in 0..split_comments[i].splits.len() {
        for j in i..split_comments.len() {
            let start = if i == j { si + 1 } else { 0 };
            for sj in start..split_comments[j].splits.len() {
                let src = NodeId::new(i, si);
                let tgt = NodeId::new(j, sj);
                let pair = Pair {
                    i,
                    si,
                    j,
                    sj,
                    dense_a: arena.index(src),
                    dense_b: arena.index(tgt),
                    a: &comments[i],
                    b: &comments[j],
                };

                let mut wgts = EdgeWeights::default();
                for comparator in comparators {
                    if let Some(w) = comparator.weigh(&pair, embeddings) {
                        wgts.set(comparator.edge_type(), w);
                    }
                }
                if !wgts.is_empty() {
                    row.push(Edge::new(src, tgt, wgts));
                }
            }
        }
    }
    row
}
