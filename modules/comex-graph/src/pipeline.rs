//! Pipeline: split, compare, then run the configured stages in category
//! order against one graph.
//!
//! Collaborator calls are awaited on the calling task. Comparison and every
//! stage that needs no collaborator run on the blocking pool, so a run never
//! stalls a runtime worker. Results are deterministic for a given input and
//! configuration.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use comex_common::{Comment, ComexError};

use crate::compare::{build_edges, fetch_embeddings, Comparator};
use crate::config::RunConfig;
use crate::model::Graph;
use crate::providers::CommentSource;
use crate::rank::Ranker;
use crate::stage::{Stage, StagePlan};
use crate::text::split_comment;

pub use crate::providers::Collaborators;

/// Counters from one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub comments: usize,
    pub splits: usize,
    pub edges_compared: usize,
    pub edges_removed: usize,
    pub stages_run: usize,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} comments, {} splits, {} edges compared, {} removed by {} stages",
            self.comments, self.splits, self.edges_compared, self.edges_removed, self.stages_run
        )
    }
}

/// A validated run configuration, ready to build graphs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    plan: StagePlan,
}

impl Pipeline {
    /// Validate the configuration. All configuration errors surface here,
    /// before any stage executes.
    pub fn from_config(config: &RunConfig) -> Result<Self, ComexError> {
        Ok(Self {
            plan: StagePlan::from_config(config)?,
        })
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub async fn run(&self, comments: &[Comment], collaborators: &Collaborators) -> Result<Graph, ComexError> {
        self.run_with_stats(comments, collaborators).await.map(|(graph, _)| graph)
    }

    pub async fn run_with_stats(
        &self,
        comments: &[Comment],
        collaborators: &Collaborators,
    ) -> Result<(Graph, PipelineStats), ComexError> {
        self.check_collaborators(collaborators)?;

        let split_comments = comments
            .iter()
            .map(|c| split_comment(c, self.plan.min_split_length))
            .collect();
        let mut graph = Graph::new(split_comments)?;

        let mut stats = PipelineStats {
            comments: comments.len(),
            splits: graph.split_count(),
            ..Default::default()
        };
        if stats.splits == 0 {
            warn!(comments = stats.comments, "No splits survived splitting, graph is empty");
        }

        let embeddings = fetch_embeddings(
            &self.plan.comparators,
            &graph.comments,
            comments,
            collaborators.embedder(),
        )
        .await?;

        let shared: Arc<[Comment]> = comments.into();
        let (split_comments, comparators) = (graph.comments.clone(), self.plan.comparators.clone());
        let input = Arc::clone(&shared);
        graph.edges =
            run_blocking(move || build_edges(&split_comments, &input, &comparators, &embeddings)).await?;
        stats.edges_compared = graph.edges.len();

        for (name, stage) in &self.plan.stages {
            match stage {
                Stage::Rank(ranker @ Ranker::Toxicity { .. }) => {
                    ranker.apply(&mut graph, comments, collaborators).await?
                }
                local => {
                    let (stage, input) = (local.clone(), Arc::clone(&shared));
                    graph = run_blocking(move || {
                        run_local(&stage, &mut graph, &input);
                        graph
                    })
                    .await?;
                }
            }
            stats.stages_run += 1;
            info!(stage = *name, edges = graph.edges.len(), "Stage complete");
        }

        stats.edges_removed = stats.edges_compared - graph.edges.len();
        info!(%stats, "Graph built");
        Ok((graph, stats))
    }

    /// Fail before any work if an active stage has no collaborator to call.
    fn check_collaborators(&self, collaborators: &Collaborators) -> Result<(), ComexError> {
        let similarity = self.plan.comparators.iter().any(Comparator::needs_embeddings);
        let toxicity = self
            .plan
            .stages
            .iter()
            .any(|(_, s)| matches!(s, Stage::Rank(Ranker::Toxicity { .. })));

        if (similarity || toxicity) && collaborators.embedder.is_none() {
            return Err(ComexError::collaborator(
                "an active stage needs embeddings but no embedding provider is configured",
            ));
        }
        if toxicity && collaborators.toxicity.is_none() {
            return Err(ComexError::collaborator(
                "ToxicityRanker is active but no toxicity classifier is configured",
            ));
        }
        Ok(())
    }
}

/// Apply a stage that needs no collaborator.
fn run_local(stage: &Stage, graph: &mut Graph, comments: &[Comment]) {
    match stage {
        Stage::Rank(ranker) => {
            ranker.apply_local(graph, comments);
        }
        Stage::Filter(filter) => filter.apply(graph),
        Stage::Merge(merger) => merger.apply(graph),
        Stage::Cluster(clusterer) => {
            clusterer.apply(graph);
        }
    }
}

/// Run CPU-bound work on the blocking pool. A panic inside `f` resumes on
/// the caller.
async fn run_blocking<T, F>(f: F) -> Result<T, ComexError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(ComexError::Anyhow(anyhow::anyhow!("blocking task cancelled: {e}"))),
    }
}

/// Validate `config` and build one graph from `comments`.
pub async fn build_graph(
    comments: &[Comment],
    config: &RunConfig,
    collaborators: &Collaborators,
) -> Result<Graph, ComexError> {
    Pipeline::from_config(config)?.run(comments, collaborators).await
}

/// Fetch the comments of `article_ids` and build their graph. The graph
/// records the requested article ids.
pub async fn build_graph_from_source(
    source: &dyn CommentSource,
    article_ids: &[i64],
    config: &RunConfig,
    collaborators: &Collaborators,
) -> Result<Graph, ComexError> {
    let pipeline = Pipeline::from_config(config)?;
    let comments = source
        .get_comments(article_ids)
        .await
        .map_err(|e| ComexError::collaborator(format!("comment source failed: {e:#}")))?;
    info!(articles = article_ids.len(), comments = comments.len(), "Fetched comments");

    let mut graph = pipeline.run(&comments, collaborators).await?;
    graph.article_ids = Some(article_ids.to_vec());
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn comments() -> Vec<Comment> {
        let t = Utc.with_ymd_and_hms(2020, 6, 1, 8, 0, 0).unwrap();
        vec![
            Comment::new(10, 1, "The bridge closes on Monday. Traffic will be rerouted.", t),
            Comment::new(11, 1, "That is a terrible plan. Nobody asked us first!", t).replying_to(10),
        ]
    }

    #[tokio::test]
    async fn stats_track_removed_edges() {
        let overrides = RunConfig::from_value(json!({ "SameCommentEdgeFilter": { "threshold": 2.0 } })).unwrap();
        let config = RunConfig::layered(&RunConfig::builtin().unwrap(), &overrides);
        let pipeline = Pipeline::from_config(&config).unwrap();

        let (graph, stats) = pipeline
            .run_with_stats(&comments(), &Collaborators::default())
            .await
            .unwrap();
        assert_eq!(stats.splits, 4);
        assert_eq!(stats.edges_compared, 3);
        assert_eq!(stats.edges_removed, 3);
        assert_eq!(stats.stages_run, 1);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn legacy_power_mode_override_builds_a_plan() {
        let overrides =
            RunConfig::from_value(json!({ "PageRanker": { "active": true, "user_power_mode": true } })).unwrap();
        let config = RunConfig::layered(&RunConfig::builtin().unwrap(), &overrides);
        let pipeline = Pipeline::from_config(&config).unwrap();
        assert!(pipeline.plan().stages.iter().any(|(name, stage)| {
            *name == "PageRanker" && matches!(stage, Stage::Rank(Ranker::PageRank { params, .. }) if params.power_mode)
        }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn building_yields_to_other_tasks() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let progressed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&progressed);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let graph = build_graph(&comments(), &RunConfig::builtin().unwrap(), &Collaborators::default())
            .await
            .unwrap();
        assert_eq!(graph.edges.len(), 3);
        assert!(progressed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panics_in_blocking_work_reach_the_caller() {
        let handle = tokio::spawn(run_blocking(|| -> usize { panic!("edge outside graph") }));
        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(run_blocking(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn similarity_without_embedder_fails_before_work() {
        let config = RunConfig::from_value(json!({ "SimilarityComparator": {} })).unwrap();
        let err = build_graph(&comments(), &config, &Collaborators::default()).await.unwrap_err();
        assert!(matches!(err, ComexError::Collaborator(_)));
    }

    #[tokio::test]
    async fn duplicate_comment_ids_are_a_validation_error() {
        let mut input = comments();
        input[1].id = 10;
        let err = build_graph(&input, &RunConfig::builtin().unwrap(), &Collaborators::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ComexError::Validation(_)));
    }
}
