//! Rankers: each writes one node weight on every split.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use comex_common::{Comment, ComexError};

use crate::config::{RecencyConfig, VotesConfig};
use crate::model::{EdgeType, Graph, NodeWeightType};
use crate::pagerank::{pagerank, PageRankParams};
use crate::providers::{embed_checked, Collaborators};

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum Ranker {
    PageRank { edge_type: EdgeType, params: PageRankParams },
    Degree,
    Size,
    Votes(VotesConfig),
    Recency(RecencyConfig),
    Toxicity { window_length: usize, whole_comment: bool },
}

impl Ranker {
    pub fn output(&self) -> NodeWeightType {
        match self {
            Ranker::PageRank { .. } => NodeWeightType::Pagerank,
            Ranker::Degree => NodeWeightType::DegreeCentrality,
            Ranker::Size => NodeWeightType::Size,
            Ranker::Votes(_) => NodeWeightType::Votes,
            Ranker::Recency(_) => NodeWeightType::Recency,
            Ranker::Toxicity { .. } => NodeWeightType::Toxicity,
        }
    }

    /// Rank without calling out. Returns false, leaving the graph untouched,
    /// for rankers that need a collaborator.
    pub fn apply_local(&self, graph: &mut Graph, comments: &[Comment]) -> bool {
        let values: Vec<Option<f64>> = match self {
            Ranker::PageRank { edge_type, params } => {
                pagerank(&graph.edges, &graph.arena(), *edge_type, params).into_iter().map(Some).collect()
            }
            Ranker::Degree => degree(graph),
            Ranker::Size => graph
                .comments
                .iter()
                .flat_map(|c| c.splits.iter().map(|s| Some(s.len() as f64)))
                .collect(),
            Ranker::Votes(cfg) => per_comment(graph, comments, |c| votes(c, cfg)),
            Ranker::Recency(cfg) => recency(graph, comments, cfg),
            Ranker::Toxicity { .. } => return false,
        };
        self.assign(graph, &values);
        true
    }

    pub async fn apply(
        &self,
        graph: &mut Graph,
        comments: &[Comment],
        collaborators: &Collaborators,
    ) -> Result<(), ComexError> {
        if self.apply_local(graph, comments) {
            return Ok(());
        }
        if let Ranker::Toxicity {
            window_length,
            whole_comment,
        } = self
        {
            let values = toxicity(graph, comments, collaborators, *window_length, *whole_comment).await?;
            self.assign(graph, &values);
        }
        Ok(())
    }

    fn assign(&self, graph: &mut Graph, values: &[Option<f64>]) {
        graph.assign_node_weights(self.output(), values);
        info!(weight = %self.output(), nodes = values.len(), "Ranked nodes");
    }
}

fn per_comment(graph: &Graph, comments: &[Comment], f: impl Fn(&Comment) -> f64) -> Vec<Option<f64>> {
    graph
        .comments
        .iter()
        .zip(comments)
        .flat_map(|(sc, c)| {
            let v = f(c);
            sc.splits.iter().map(move |_| Some(v))
        })
        .collect()
}

fn degree(graph: &Graph) -> Vec<Option<f64>> {
    let arena = graph.arena();
    let mut counts = vec![0usize; arena.len()];
    for edge in &graph.edges {
        counts[arena.index(edge.src)] += 1;
        counts[arena.index(edge.tgt)] += 1;
    }
    counts.into_iter().map(|c| Some(c as f64)).collect()
}

/// Enabled positive counters minus downvotes. Missing counters count as 0.
pub fn votes(comment: &Comment, cfg: &VotesConfig) -> f64 {
    let e = &comment.engagement;
    let count = |enabled: bool, value: Option<i64>| if enabled { value.unwrap_or(0) } else { 0 };

    let positive = count(cfg.use_upvotes, e.upvotes)
        + count(cfg.use_likes, e.likes)
        + count(cfg.use_love, e.love)
        + count(cfg.use_recommended, e.recommended)
        + count(cfg.use_recommendations, e.recommendations)
        + count(cfg.use_replies, e.num_replies);
    (positive - count(cfg.use_downvotes, e.downvotes)) as f64
}

fn recency(graph: &Graph, comments: &[Comment], cfg: &RecencyConfig) -> Vec<Option<f64>> {
    let reference = if cfg.use_youngest {
        comments.iter().map(|c| c.timestamp).max()
    } else {
        comments.iter().map(|c| c.timestamp).min()
    };
    let Some(reference) = reference else {
        return Vec::new();
    };
    per_comment(graph, comments, |c| (c.timestamp - reference).num_seconds() as f64)
}

/// Lower-cased `\w+` tokens.
pub fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

async fn toxicity(
    graph: &Graph,
    comments: &[Comment],
    collaborators: &Collaborators,
    window_length: usize,
    whole_comment: bool,
) -> Result<Vec<Option<f64>>, ComexError> {
    let embedder = collaborators
        .embedder()
        .ok_or_else(|| ComexError::collaborator("ToxicityRanker needs an embedding provider"))?;
    let classifier = collaborators
        .toxicity()
        .ok_or_else(|| ComexError::collaborator("ToxicityRanker needs a toxicity classifier"))?;

    // One window per comment when scoring whole comments, else one per split.
    // `owner[k]` is the window index for dense node k.
    let mut texts: Vec<Vec<String>> = Vec::new();
    let mut owner: Vec<usize> = Vec::with_capacity(graph.split_count());
    for (sc, c) in graph.comments.iter().zip(comments) {
        if sc.splits.is_empty() {
            continue;
        }
        if whole_comment {
            texts.push(trailing(words(&c.text), window_length));
            owner.extend(std::iter::repeat(texts.len() - 1).take(sc.splits.len()));
        } else {
            for split in &sc.splits {
                texts.push(trailing(words(split.text(&c.text)), window_length));
                owner.push(texts.len() - 1);
            }
        }
    }

    let mut vocabulary: Vec<String> = texts.iter().flatten().cloned().collect();
    vocabulary.sort();
    vocabulary.dedup();
    if vocabulary.is_empty() {
        warn!(nodes = owner.len(), "No words to score for toxicity, leaving TOXICITY unset");
        return Ok(vec![None; graph.split_count()]);
    }

    let vectors = embed_checked(embedder, &vocabulary).await?;
    let dim = vectors[0].len();
    let lookup: HashMap<&str, &Vec<f32>> = vocabulary.iter().map(String::as_str).zip(&vectors).collect();

    let windows: Vec<Vec<Vec<f32>>> = texts
        .iter()
        .map(|ws| {
            let mut window = vec![vec![0.0f32; dim]; window_length - ws.len()];
            window.extend(ws.iter().map(|w| lookup[w.as_str()].clone()));
            window
        })
        .collect();

    let expected = windows.len();
    let scores = classifier
        .predict(windows)
        .await
        .map_err(|e| ComexError::collaborator(format!("toxicity classifier failed: {e:#}")))?;
    if scores.len() != expected {
        return Err(ComexError::collaborator(format!(
            "toxicity classifier returned {} scores for {expected} windows",
            scores.len()
        )));
    }

    Ok(owner.into_iter().map(|k| Some(scores[k] as f64)).collect())
}

fn trailing(mut words: Vec<String>, window_length: usize) -> Vec<String> {
    if words.len() > window_length {
        words.drain(..words.len() - window_length);
    }
    words
}
