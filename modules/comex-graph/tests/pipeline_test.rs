//! End-to-end pipeline runs with in-process collaborators.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use comex_common::{Comment, ComexError, Engagement};
use comex_graph::{
    build_graph, build_graph_from_source, fingerprint, Collaborators, CommentSource, EdgeType,
    EmbeddingProvider, Graph, NodeId, NodeWeightType, Pipeline, RunConfig, ToxicityClassifier,
};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Letter histogram. Deterministic and cheap.
struct LetterEmbedder;

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
        Ok(v)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("connection refused")
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("connection refused")
    }
}

/// Scores a window by the share of real (non-padding) word vectors.
struct DensityClassifier;

#[async_trait]
impl ToxicityClassifier for DensityClassifier {
    async fn predict(&self, windows: Vec<Vec<Vec<f32>>>) -> Result<Vec<f32>> {
        Ok(windows
            .iter()
            .map(|w| {
                let words = w.iter().filter(|v| v.iter().any(|x| *x != 0.0)).count();
                words as f32 / w.len() as f32
            })
            .collect())
    }
}

struct SilentClassifier;

#[async_trait]
impl ToxicityClassifier for SilentClassifier {
    async fn predict(&self, _windows: Vec<Vec<Vec<f32>>>) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

struct MemorySource(Vec<Comment>);

#[async_trait]
impl CommentSource for MemorySource {
    async fn get_comments(&self, article_ids: &[i64]) -> Result<Vec<Comment>> {
        Ok(self.0.iter().filter(|c| article_ids.contains(&c.article_id)).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 9, 14, 18, 30, 0).unwrap()
}

fn two_comments() -> Vec<Comment> {
    vec![
        Comment::new(1, 100, "The new bike lanes are great. I ride to work every day now.", t0()),
        Comment::new(2, 100, "They removed all the parking. Shops on my street are suffering.", t0())
            .replying_to(1),
    ]
}

fn thread() -> Vec<Comment> {
    let texts = [
        "The council approved the budget yesterday. Libraries get more funding this year.",
        "More funding for libraries is overdue. The branch near me closes at five.",
        "Who decided on these priorities? Roads are falling apart everywhere.",
        "Roads were fixed last summer in our district. It took months though.",
        "Libraries matter for kids without internet at home. Keep them open late.",
        "This budget ignores public transport completely. Buses are always late.",
    ];
    let replies = [None, Some(1), None, Some(3), Some(2), Some(3)];
    texts
        .iter()
        .zip(replies)
        .enumerate()
        .map(|(i, (text, reply))| {
            let mut c = Comment::new(i as i64 + 1, 100 + (i as i64 % 2), *text, t0() + Duration::minutes(7 * i as i64));
            c.reply_to_id = reply;
            c.engagement = Engagement {
                upvotes: Some(3 * i as i64),
                downvotes: Some(i as i64 % 3),
                ..Default::default()
            };
            c
        })
        .collect()
}

fn config(overrides: serde_json::Value) -> RunConfig {
    RunConfig::layered(&RunConfig::builtin().unwrap(), &RunConfig::from_value(overrides).unwrap())
}

fn full_collaborators() -> Collaborators {
    Collaborators::default()
        .with_embedder(Arc::new(LetterEmbedder))
        .with_toxicity(Arc::new(DensityClassifier))
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reply_pair_builds_four_weights_on_three_edges() {
    let graph = build_graph(&two_comments(), &RunConfig::builtin().unwrap(), &Collaborators::default())
        .await
        .unwrap();

    assert_eq!(graph.split_count(), 4);
    assert_eq!(graph.id2idx.get(&2), Some(&1));

    let same_comment: Vec<(NodeId, NodeId)> = graph
        .edges
        .iter()
        .filter(|e| e.wgts.same_comment.is_some())
        .map(|e| (e.src, e.tgt))
        .collect();
    assert_eq!(same_comment, vec![(NodeId(0, 0), NodeId(0, 1)), (NodeId(1, 0), NodeId(1, 1))]);

    let roots: Vec<_> = graph
        .edges
        .iter()
        .filter(|e| e.src == NodeId(0, 0) && e.tgt == NodeId(1, 0))
        .collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].wgts.same_article, Some(1.0));
    assert_eq!(roots[0].wgts.reply_to, Some(1.0));

    let weights: usize = graph
        .edges
        .iter()
        .map(|e| EdgeType::ALL.iter().filter(|t| e.wgts.get(**t).is_some()).count())
        .sum();
    assert_eq!(weights, 4);
    assert_eq!(graph.edges.len(), 3);
}

#[tokio::test]
async fn identical_input_gives_identical_graphs() {
    let cfg = config(json!({
        "SameArticleComparator": { "only_root": false },
        "TemporalComparator": { "active": true },
        "SimilarityComparator": { "active": true },
    }));
    let collaborators = full_collaborators();

    let a = build_graph(&thread(), &cfg, &collaborators).await.unwrap();
    let b = build_graph(&thread(), &cfg, &collaborators).await.unwrap();
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());

    let mut pairs = HashSet::new();
    for edge in &a.edges {
        assert_ne!(edge.src, edge.tgt);
        assert!(pairs.insert((edge.src, edge.tgt)), "duplicate edge {}-{}", edge.src, edge.tgt);
        assert!(!pairs.contains(&(edge.tgt, edge.src)));
        if edge.src.comment() == edge.tgt.comment() {
            assert!(edge.src.split() < edge.tgt.split());
        }
    }
}

#[tokio::test]
async fn graph_serializes_with_pair_node_ids() {
    let graph = build_graph(&two_comments(), &RunConfig::builtin().unwrap(), &Collaborators::default())
        .await
        .unwrap();
    let value = serde_json::to_value(&graph).unwrap();

    assert_eq!(value["edges"][0]["src"], json!([0, 0]));
    assert_eq!(value["edges"][0]["wgts"]["SAME_COMMENT"], json!(1.0));
    assert!(value["comments"][0]["splits"][0]["wgts"]["PAGERANK"].is_null());

    let back: Graph = serde_json::from_value(value).unwrap();
    assert_eq!(back, graph);
}

#[tokio::test]
async fn empty_input_is_not_an_error() {
    let cfg = config(json!({ "PageRanker": { "active": true }, "ReplyToClusterer": {} }));
    let graph = build_graph(&[], &cfg, &Collaborators::default()).await.unwrap();
    assert!(graph.comments.is_empty());
    assert!(graph.edges.is_empty());
}

// ---------------------------------------------------------------------------
// Stage chains
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rank_filter_merge_cluster_chain() {
    let cfg = config(json!({
        "SameArticleComparator": { "only_root": false },
        "PageRanker": { "active": true, "edge_type": "SAME_ARTICLE" },
        "VotesRanker": {},
        "CentralityDegreeCalculator": {},
        "BottomSameArticleEdgeFilter": { "top_edges": 2 },
        "VotesFilter": { "threshold": 0.0 },
        "ReplyToNodeMerger": { "threshold": 1.0 },
        "MultiEdgeTypeClusterer": { "edge_types": ["SAME_ARTICLE", "SAME_COMMENT"], "algorithm": "gmc" },
    }));
    let comments = thread();
    let (graph, stats) = Pipeline::from_config(&cfg)
        .unwrap()
        .run_with_stats(&comments, &Collaborators::default())
        .await
        .unwrap();

    assert_eq!(stats.stages_run, 7);
    assert!(stats.edges_removed > 0);

    let ranks: Vec<f64> = graph
        .node_weights(NodeWeightType::Pagerank)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(ranks.iter().all(|r| (0.001..=1.001 + 1e-12).contains(r)));
    assert!(ranks.iter().any(|r| (r - 1.001).abs() < 1e-9));

    // Merge ids are dense and either -1 or shared by at least two nodes.
    let merge_ids: Vec<i64> = graph
        .node_weights(NodeWeightType::MergeId)
        .into_iter()
        .map(|m| m.unwrap() as i64)
        .collect();
    for id in merge_ids.iter().filter(|id| **id >= 0) {
        assert!(merge_ids.iter().filter(|m| *m == id).count() >= 2);
    }

    let clustered = graph.node_weights(NodeWeightType::ClusterId);
    assert!(clustered.iter().any(Option::is_some));
}

#[tokio::test]
async fn merge_follows_reply_chains_transitively() {
    // 1 <- 2 <- 3 reply chain, 4 stands alone.
    let mut comments: Vec<Comment> = (1..=4)
        .map(|id| Comment::new(id, 100, format!("Comment number {id} has one sentence."), t0()))
        .collect();
    comments[1].reply_to_id = Some(1);
    comments[2].reply_to_id = Some(2);

    let cfg = config(json!({ "ReplyToNodeMerger": { "threshold": 0.5 } }));
    let graph = build_graph(&comments, &cfg, &Collaborators::default()).await.unwrap();

    assert_eq!(
        graph.node_weights(NodeWeightType::MergeId),
        vec![Some(0.0), Some(0.0), Some(0.0), Some(-1.0)]
    );
    assert_eq!(graph.comments.len(), 4);
}

#[tokio::test]
async fn similarity_and_toxicity_use_collaborators() {
    let cfg = config(json!({
        "SimilarityComparator": { "active": true, "max_similarity": 1.01 },
        "ToxicityRanker": { "active": true, "window_length": 8 },
        "SimilarityEdgeFilter": { "threshold": 0.0 },
    }));
    let graph = build_graph(&thread(), &cfg, &full_collaborators()).await.unwrap();

    assert!(!graph.edges.is_empty());
    assert!(graph.edges.iter().all(|e| e.wgts.similarity.is_some()));

    // Every comment has at least eight words, so no window is padded.
    let toxicity = graph.node_weights(NodeWeightType::Toxicity);
    assert_eq!(toxicity.len(), graph.split_count());
    assert!(toxicity.iter().all(|t| *t == Some(1.0)));
}

#[tokio::test]
async fn split_level_toxicity_pads_short_windows() {
    let cfg = config(json!({
        "ToxicityRanker": { "active": true, "window_length": 20, "whole_comment": false },
    }));
    let graph = build_graph(&two_comments(), &cfg, &full_collaborators()).await.unwrap();

    let toxicity = graph.node_weights(NodeWeightType::Toxicity);
    // "The new bike lanes are great." has six words.
    assert_eq!(toxicity[0], Some((6.0f32 / 20.0) as f64));
    assert!(toxicity.iter().all(|t| t.unwrap() < 1.0));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn toxicity_without_classifier_fails() {
    let cfg = config(json!({ "ToxicityRanker": { "active": true } }));
    let collaborators = Collaborators::default().with_embedder(Arc::new(LetterEmbedder));
    let err = build_graph(&thread(), &cfg, &collaborators).await.unwrap_err();
    assert!(matches!(err, ComexError::Collaborator(_)));
}

#[tokio::test]
async fn classifier_count_mismatch_fails() {
    let cfg = config(json!({ "ToxicityRanker": { "active": true } }));
    let collaborators = Collaborators::default()
        .with_embedder(Arc::new(LetterEmbedder))
        .with_toxicity(Arc::new(SilentClassifier));
    let err = build_graph(&thread(), &cfg, &collaborators).await.unwrap_err();
    assert!(err.to_string().contains("scores"));
}

#[tokio::test]
async fn embedding_failure_propagates() {
    let cfg = config(json!({ "SimilarityComparator": { "active": true } }));
    let collaborators = Collaborators::default().with_embedder(Arc::new(BrokenEmbedder));
    let err = build_graph(&thread(), &cfg, &collaborators).await.unwrap_err();
    match err {
        ComexError::Collaborator(msg) => assert!(msg.contains("connection refused")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn misconfiguration_fails_before_any_stage() {
    let cfg = config(json!({ "GenericBottomEdgeFilter": { "top_edges": 2 } }));
    let err = Pipeline::from_config(&cfg).unwrap_err();
    assert!(matches!(err, ComexError::Config(_)));

    let cfg = config(json!({ "SameCommentComparator": { "only_consecutive": "sometimes" } }));
    assert!(Pipeline::from_config(&cfg).is_err());
}

// ---------------------------------------------------------------------------
// Source and fingerprint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn source_driven_build_records_article_ids() {
    let source = MemorySource(thread());
    let graph = build_graph_from_source(&source, &[100], &RunConfig::builtin().unwrap(), &Collaborators::default())
        .await
        .unwrap();

    assert_eq!(graph.article_ids, Some(vec![100]));
    assert_eq!(graph.comments.len(), 3);
    assert!(graph.comments.iter().all(|c| c.id % 2 == 1));
}

#[test]
fn fingerprint_tracks_effective_configuration() {
    let base = RunConfig::builtin().unwrap();
    let same = config(json!({ "SameArticleComparator": { "only_root": true } }));
    let different = config(json!({ "SameArticleComparator": { "only_root": false } }));

    assert_eq!(fingerprint(&[2, 1], &base), fingerprint(&[1, 2], &same));
    assert_ne!(fingerprint(&[1, 2], &base), fingerprint(&[1, 2], &different));
}
