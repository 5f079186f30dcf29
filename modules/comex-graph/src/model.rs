//! In-memory discourse graph: comments as ordered splits, typed edge weights,
//! and the dense node arena stages use for array-backed bookkeeping.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use comex_common::ComexError;

// --- Weight types ---

/// Relationship channel an edge can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    ReplyTo,
    SameArticle,
    Similarity,
    SameGroup,
    SameComment,
    Temporal,
}

impl EdgeType {
    pub const ALL: [EdgeType; 6] = [
        EdgeType::ReplyTo,
        EdgeType::SameArticle,
        EdgeType::Similarity,
        EdgeType::SameGroup,
        EdgeType::SameComment,
        EdgeType::Temporal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::ReplyTo => "REPLY_TO",
            EdgeType::SameArticle => "SAME_ARTICLE",
            EdgeType::Similarity => "SIMILARITY",
            EdgeType::SameGroup => "SAME_GROUP",
            EdgeType::SameComment => "SAME_COMMENT",
            EdgeType::Temporal => "TEMPORAL",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node scalar annotation written by rankers, mergers and clusterers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeWeightType {
    Size,
    #[serde(alias = "PAGE_RANK")]
    Pagerank,
    #[serde(alias = "DEGREECENTRALITY")]
    DegreeCentrality,
    Recency,
    Votes,
    Toxicity,
    MergeId,
    ClusterId,
}

impl NodeWeightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeWeightType::Size => "SIZE",
            NodeWeightType::Pagerank => "PAGERANK",
            NodeWeightType::DegreeCentrality => "DEGREE_CENTRALITY",
            NodeWeightType::Recency => "RECENCY",
            NodeWeightType::Votes => "VOTES",
            NodeWeightType::Toxicity => "TOXICITY",
            NodeWeightType::MergeId => "MERGE_ID",
            NodeWeightType::ClusterId => "CLUSTER_ID",
        }
    }
}

impl fmt::Display for NodeWeightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One optional value per edge type. An edge exists only while at least one is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct EdgeWeights {
    pub reply_to: Option<f64>,
    pub same_article: Option<f64>,
    pub similarity: Option<f64>,
    pub same_group: Option<f64>,
    pub same_comment: Option<f64>,
    pub temporal: Option<f64>,
}

impl EdgeWeights {
    pub fn get(&self, edge_type: EdgeType) -> Option<f64> {
        match edge_type {
            EdgeType::ReplyTo => self.reply_to,
            EdgeType::SameArticle => self.same_article,
            EdgeType::Similarity => self.similarity,
            EdgeType::SameGroup => self.same_group,
            EdgeType::SameComment => self.same_comment,
            EdgeType::Temporal => self.temporal,
        }
    }

    pub fn set(&mut self, edge_type: EdgeType, value: f64) {
        let slot = match edge_type {
            EdgeType::ReplyTo => &mut self.reply_to,
            EdgeType::SameArticle => &mut self.same_article,
            EdgeType::Similarity => &mut self.similarity,
            EdgeType::SameGroup => &mut self.same_group,
            EdgeType::SameComment => &mut self.same_comment,
            EdgeType::Temporal => &mut self.temporal,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        EdgeType::ALL.iter().all(|t| self.get(*t).is_none())
    }

    pub fn with(mut self, edge_type: EdgeType, value: f64) -> Self {
        self.set(edge_type, value);
        self
    }
}

/// Node annotations. Unset until the stage that produces them has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SplitWeights {
    pub size: Option<f64>,
    pub pagerank: Option<f64>,
    pub degree_centrality: Option<f64>,
    pub recency: Option<f64>,
    pub votes: Option<f64>,
    pub toxicity: Option<f64>,
    pub merge_id: Option<f64>,
    pub cluster_id: Option<f64>,
}

impl SplitWeights {
    pub fn get(&self, weight_type: NodeWeightType) -> Option<f64> {
        match weight_type {
            NodeWeightType::Size => self.size,
            NodeWeightType::Pagerank => self.pagerank,
            NodeWeightType::DegreeCentrality => self.degree_centrality,
            NodeWeightType::Recency => self.recency,
            NodeWeightType::Votes => self.votes,
            NodeWeightType::Toxicity => self.toxicity,
            NodeWeightType::MergeId => self.merge_id,
            NodeWeightType::ClusterId => self.cluster_id,
        }
    }

    pub fn set(&mut self, weight_type: NodeWeightType, value: f64) {
        let slot = match weight_type {
            NodeWeightType::Size => &mut self.size,
            NodeWeightType::Pagerank => &mut self.pagerank,
            NodeWeightType::DegreeCentrality => &mut self.degree_centrality,
            NodeWeightType::Recency => &mut self.recency,
            NodeWeightType::Votes => &mut self.votes,
            NodeWeightType::Toxicity => &mut self.toxicity,
            NodeWeightType::MergeId => &mut self.merge_id,
            NodeWeightType::ClusterId => &mut self.cluster_id,
        };
        *slot = Some(value);
    }
}

// --- Nodes ---

/// A sentence span `[s, e)` in character offsets of its comment's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub s: usize,
    pub e: usize,
    #[serde(default)]
    pub wgts: SplitWeights,
}

impl Split {
    pub fn new(s: usize, e: usize) -> Self {
        Self {
            s,
            e,
            wgts: SplitWeights::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.e - self.s
    }

    pub fn is_empty(&self) -> bool {
        self.e <= self.s
    }

    /// Slice this span out of the comment text it was computed from.
    pub fn text<'a>(&self, text: &'a str) -> &'a str {
        let start = byte_offset(text, self.s);
        let end = byte_offset(text, self.e);
        &text[start..end]
    }
}

fn byte_offset(text: &str, char_pos: usize) -> usize {
    text.char_indices()
        .nth(char_pos)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// A comment reduced to its ordered splits. Split order is part of node identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitComment {
    pub id: i64,
    #[serde(default)]
    pub grp_id: Option<i64>,
    pub splits: Vec<Split>,
}

/// Node identity: `(comment_index, split_index)` within one graph.
/// Serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32, pub u32);

impl NodeId {
    pub fn new(comment: usize, split: usize) -> Self {
        NodeId(comment as u32, split as u32)
    }

    pub fn comment(&self) -> usize {
        self.0 as usize
    }

    pub fn split(&self) -> usize {
        self.1 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.0, self.1)
    }
}

// --- Edges ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeId,
    pub tgt: NodeId,
    pub wgts: EdgeWeights,
}

impl Edge {
    pub fn new(src: NodeId, tgt: NodeId, wgts: EdgeWeights) -> Self {
        debug_assert!(src != tgt, "self edge on {src}");
        Self { src, tgt, wgts }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.src == node || self.tgt == node
    }
}

// --- Graph ---

/// The single mutable object threaded through every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub article_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub graph_id: Option<i64>,
    pub comments: Vec<SplitComment>,
    pub id2idx: BTreeMap<i64, usize>,
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Build an edgeless graph and its comment-id index.
    /// Rejects duplicate comment ids: node identity would be ambiguous.
    pub fn new(comments: Vec<SplitComment>) -> Result<Self, ComexError> {
        let mut id2idx = BTreeMap::new();
        for (i, comment) in comments.iter().enumerate() {
            if id2idx.insert(comment.id, i).is_some() {
                return Err(ComexError::Validation(format!(
                    "duplicate comment id {}",
                    comment.id
                )));
            }
        }
        Ok(Self {
            article_ids: None,
            graph_id: None,
            comments,
            id2idx,
            edges: Vec::new(),
        })
    }

    pub fn split_count(&self) -> usize {
        self.comments.iter().map(|c| c.splits.len()).sum()
    }

    pub fn split(&self, node: NodeId) -> &Split {
        &self.comments[node.comment()].splits[node.split()]
    }

    pub fn split_mut(&mut self, node: NodeId) -> &mut Split {
        &mut self.comments[node.comment()].splits[node.split()]
    }

    /// Iterate every node in comment-major order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.comments.iter().enumerate().flat_map(|(c, comment)| {
            (0..comment.splits.len()).map(move |s| NodeId::new(c, s))
        })
    }

    /// Dense index over the current comments.
    pub fn arena(&self) -> NodeArena {
        NodeArena::new(&self.comments)
    }

    /// Write one node weight on every split, in node order.
    pub fn assign_node_weights(&mut self, weight_type: NodeWeightType, values: &[Option<f64>]) {
        assert_eq!(values.len(), self.split_count(), "one value per split");
        let mut it = values.iter();
        for comment in &mut self.comments {
            for split in &mut comment.splits {
                if let Some(Some(v)) = it.next() {
                    split.wgts.set(weight_type, *v);
                }
            }
        }
    }

    /// Collect one node weight from every split, in node order.
    pub fn node_weights(&self, weight_type: NodeWeightType) -> Vec<Option<f64>> {
        self.comments
            .iter()
            .flat_map(|c| c.splits.iter().map(move |s| s.wgts.get(weight_type)))
            .collect()
    }
}

/// Dense `0..n` numbering of nodes: `offset[comment] + split_index`.
#[derive(Debug, Clone)]
pub struct NodeArena {
    offsets: Vec<usize>,
    len: usize,
}

impl NodeArena {
    pub fn new(comments: &[SplitComment]) -> Self {
        let mut offsets = Vec::with_capacity(comments.len());
        let mut len = 0;
        for comment in comments {
            offsets.push(len);
            len += comment.splits.len();
        }
        Self { offsets, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Dense index of a node. Panics on a node outside the graph.
    pub fn index(&self, node: NodeId) -> usize {
        let idx = self.offsets[node.comment()] + node.split();
        assert!(idx < self.len, "node {node} outside graph");
        idx
    }

    /// Node identity of a dense index.
    pub fn node(&self, idx: usize) -> NodeId {
        assert!(idx < self.len, "dense index {idx} outside graph");
        // Last comment whose offset is <= idx; empty comments share offsets.
        let comment = self.offsets.partition_point(|&o| o <= idx) - 1;
        NodeId::new(comment, idx - self.offsets[comment])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: i64, splits: usize) -> SplitComment {
        SplitComment {
            id,
            grp_id: None,
            splits: (0..splits).map(|i| Split::new(i * 20, i * 20 + 15)).collect(),
        }
    }

    #[test]
    fn arena_round_trips_with_empty_comments() {
        let graph = Graph::new(vec![comment(1, 2), comment(2, 0), comment(3, 3)]).unwrap();
        let arena = graph.arena();
        assert_eq!(arena.len(), 5);

        let nodes: Vec<NodeId> = graph.nodes().collect();
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(arena.index(*node), i);
            assert_eq!(arena.node(i), *node);
        }
        assert_eq!(arena.node(2), NodeId(2, 0));
    }

    #[test]
    fn duplicate_comment_ids_are_rejected() {
        let err = Graph::new(vec![comment(1, 1), comment(1, 2)]).unwrap_err();
        assert!(matches!(err, ComexError::Validation(_)));
    }

    #[test]
    fn split_text_uses_character_offsets() {
        let text = "Grüße aus Köln. Schön hier!";
        let split = Split::new(16, 27);
        assert_eq!(split.text(text), "Schön hier!");
        assert_eq!(Split::new(0, 15).text(text), "Grüße aus Köln.");
    }

    #[test]
    fn edge_weights_serialize_with_uppercase_keys() {
        let w = EdgeWeights::default().with(EdgeType::ReplyTo, 1.0);
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["REPLY_TO"], 1.0);
        assert!(json["SIMILARITY"].is_null());
        assert!(!w.is_empty());
        assert!(EdgeWeights::default().is_empty());
    }

    #[test]
    fn node_id_serializes_as_pair() {
        let json = serde_json::to_string(&NodeId(3, 1)).unwrap();
        assert_eq!(json, "[3,1]");
    }
}
