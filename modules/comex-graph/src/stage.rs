//! Stage registry and configuration-time validation.
//!
//! Every configurable class name maps to a fixed [`StageKind`]. Loading a run
//! configuration resolves the active records into typed comparators and
//! stages, ordered by category (compare, rank, filter, merge, cluster) and
//! then by registry position.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use comex_common::ComexError;

use crate::cluster::Clusterer;
use crate::compare::Comparator;
use crate::config::{
    parse_record, BottomEdgeFilterConfig, ClustererConfig, EdgeFilterConfig, MultiClustererConfig,
    MultiNodeMergerConfig, NoFields, NodeMergerConfig, NodeWeightBottomFilterConfig, NodeWeightFilterConfig,
    OrEdgeFilterConfig, PageRankConfig, RecencyConfig, RootComparatorConfig, RunConfig, SameCommentConfig,
    SimilarityConfig, TemporalConfig, ToxicityConfig, VotesConfig, SPLITTER,
};
use crate::filter::Filter;
use crate::merge::Merger;
use crate::model::{EdgeType, EdgeType as E, NodeWeightType, NodeWeightType as W};
use crate::pagerank::PageRankParams;
use crate::rank::Ranker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Compare,
    Rank,
    Filter,
    Merge,
    Cluster,
}

/// What a class name configures. Specializations carry their fixed type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    SameArticleComparator,
    SameCommentComparator,
    ReplyToComparator,
    SimilarityComparator,
    TemporalComparator,
    PageRanker,
    CentralityDegreeCalculator,
    SizeRanker,
    VotesRanker,
    RecencyRanker,
    ToxicityRanker,
    EdgeFilter(Option<EdgeType>),
    OrEdgeFilter,
    BottomEdgeFilter(Option<EdgeType>),
    NodeWeightFilter(Option<NodeWeightType>),
    NodeWeightBottomFilter(Option<NodeWeightType>),
    NodeMerger(Option<EdgeType>),
    MultiNodeMerger,
    Clusterer(Option<EdgeType>),
    MultiEdgeTypeClusterer,
}

impl StageKind {
    pub fn category(&self) -> Category {
        use StageKind::*;
        match self {
            SameArticleComparator | SameCommentComparator | ReplyToComparator | SimilarityComparator
            | TemporalComparator => Category::Compare,
            PageRanker | CentralityDegreeCalculator | SizeRanker | VotesRanker | RecencyRanker
            | ToxicityRanker => Category::Rank,
            EdgeFilter(_) | OrEdgeFilter | BottomEdgeFilter(_) | NodeWeightFilter(_)
            | NodeWeightBottomFilter(_) => Category::Filter,
            NodeMerger(_) | MultiNodeMerger => Category::Merge,
            Clusterer(_) | MultiEdgeTypeClusterer => Category::Cluster,
        }
    }
}

pub static REGISTRY: &[(&str, StageKind)] = &[
    // comparators
    ("SameArticleComparator", StageKind::SameArticleComparator),
    ("SameCommentComparator", StageKind::SameCommentComparator),
    ("ReplyToComparator", StageKind::ReplyToComparator),
    ("SimilarityComparator", StageKind::SimilarityComparator),
    ("TemporalComparator", StageKind::TemporalComparator),
    // rankers
    ("PageRanker", StageKind::PageRanker),
    ("CentralityDegreeCalculator", StageKind::CentralityDegreeCalculator),
    ("SizeRanker", StageKind::SizeRanker),
    ("VotesRanker", StageKind::VotesRanker),
    ("RecencyRanker", StageKind::RecencyRanker),
    ("ToxicityRanker", StageKind::ToxicityRanker),
    // edge filters
    ("GenericEdgeFilter", StageKind::EdgeFilter(None)),
    ("SimilarityEdgeFilter", StageKind::EdgeFilter(Some(E::Similarity))),
    ("ReplyToEdgeFilter", StageKind::EdgeFilter(Some(E::ReplyTo))),
    ("SameCommentEdgeFilter", StageKind::EdgeFilter(Some(E::SameComment))),
    ("SameArticleEdgeFilter", StageKind::EdgeFilter(Some(E::SameArticle))),
    ("SameGroupEdgeFilter", StageKind::EdgeFilter(Some(E::SameGroup))),
    ("TemporalEdgeFilter", StageKind::EdgeFilter(Some(E::Temporal))),
    ("OrEdgeFilter", StageKind::OrEdgeFilter),
    ("GenericBottomEdgeFilter", StageKind::BottomEdgeFilter(None)),
    ("BottomSimilarityEdgeFilter", StageKind::BottomEdgeFilter(Some(E::Similarity))),
    ("BottomReplyToEdgeFilter", StageKind::BottomEdgeFilter(Some(E::ReplyTo))),
    ("BottomTemporalEdgeFilter", StageKind::BottomEdgeFilter(Some(E::Temporal))),
    ("BottomSameCommentFilter", StageKind::BottomEdgeFilter(Some(E::SameComment))),
    ("BottomSameArticleEdgeFilter", StageKind::BottomEdgeFilter(Some(E::SameArticle))),
    ("BottomSameGroupEdgeFilter", StageKind::BottomEdgeFilter(Some(E::SameGroup))),
    // node-weight filters
    ("GenericNodeWeightFilter", StageKind::NodeWeightFilter(None)),
    ("SizeFilter", StageKind::NodeWeightFilter(Some(W::Size))),
    ("PageRankFilter", StageKind::NodeWeightFilter(Some(W::Pagerank))),
    ("DegreeCentralityFilter", StageKind::NodeWeightFilter(Some(W::DegreeCentrality))),
    ("RecencyFilter", StageKind::NodeWeightFilter(Some(W::Recency))),
    ("VotesFilter", StageKind::NodeWeightFilter(Some(W::Votes))),
    ("ToxicityFilter", StageKind::NodeWeightFilter(Some(W::Toxicity))),
    ("GenericNodeWeightBottomFilter", StageKind::NodeWeightBottomFilter(None)),
    ("SizeBottomFilter", StageKind::NodeWeightBottomFilter(Some(W::Size))),
    ("PageRankBottomFilter", StageKind::NodeWeightBottomFilter(Some(W::Pagerank))),
    ("DegreeCentralityBottomFilter", StageKind::NodeWeightBottomFilter(Some(W::DegreeCentrality))),
    ("RecencyBottomFilter", StageKind::NodeWeightBottomFilter(Some(W::Recency))),
    ("VotesBottomFilter", StageKind::NodeWeightBottomFilter(Some(W::Votes))),
    ("ToxicityBottomFilter", StageKind::NodeWeightBottomFilter(Some(W::Toxicity))),
    // mergers
    ("GenericNodeMerger", StageKind::NodeMerger(None)),
    ("SimilarityNodeMerger", StageKind::NodeMerger(Some(E::Similarity))),
    ("ReplyToNodeMerger", StageKind::NodeMerger(Some(E::ReplyTo))),
    ("SameCommentNodeMerger", StageKind::NodeMerger(Some(E::SameComment))),
    ("SameArticleNodeMerger", StageKind::NodeMerger(Some(E::SameArticle))),
    ("SameGroupNodeMerger", StageKind::NodeMerger(Some(E::SameGroup))),
    ("TemporalNodeMerger", StageKind::NodeMerger(Some(E::Temporal))),
    ("MultiNodeMerger", StageKind::MultiNodeMerger),
    // clusterers
    ("GenericClusterer", StageKind::Clusterer(None)),
    ("SimilarityClusterer", StageKind::Clusterer(Some(E::Similarity))),
    ("ReplyToClusterer", StageKind::Clusterer(Some(E::ReplyTo))),
    ("SameCommentClusterer", StageKind::Clusterer(Some(E::SameComment))),
    ("SameArticleClusterer", StageKind::Clusterer(Some(E::SameArticle))),
    ("SameGroupClusterer", StageKind::Clusterer(Some(E::SameGroup))),
    ("TemporalClusterer", StageKind::Clusterer(Some(E::Temporal))),
    ("MultiEdgeTypeClusterer", StageKind::MultiEdgeTypeClusterer),
];

pub fn lookup(name: &str) -> Option<StageKind> {
    REGISTRY.iter().find(|(n, _)| *n == name).map(|(_, k)| *k)
}

/// A configured graph transformation that runs after comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Rank(Ranker),
    Filter(Filter),
    Merge(Merger),
    Cluster(Clusterer),
}

impl Stage {
    pub fn category(&self) -> Category {
        match self {
            Stage::Rank(_) => Category::Rank,
            Stage::Filter(_) => Category::Filter,
            Stage::Merge(_) => Category::Merge,
            Stage::Cluster(_) => Category::Cluster,
        }
    }
}

/// Everything a run needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub min_split_length: usize,
    pub comparators: Vec<Comparator>,
    /// `(class name, stage)` in execution order.
    pub stages: Vec<(&'static str, Stage)>,
}

impl StagePlan {
    pub fn from_config(config: &RunConfig) -> Result<Self, ComexError> {
        if let Some(unknown) = config.names().find(|n| *n != SPLITTER && lookup(n).is_none()) {
            return Err(ComexError::config(format!("unknown stage {unknown}")));
        }

        let min_split_length = config.splitter()?.min_length;
        let mut comparators = Vec::new();
        let mut stages = Vec::new();

        for (name, kind) in REGISTRY {
            if !config.is_active(name)? {
                continue;
            }
            let Some(record) = config.record(name) else {
                continue;
            };

            match kind.category() {
                Category::Compare => comparators.push(build_comparator(name, *kind, record)?),
                _ => stages.push((*name, build_stage(name, *kind, record)?)),
            }
        }

        // Registry order already groups categories; keep it explicit.
        stages.sort_by_key(|(_, stage)| stage.category());
        check_node_weight_sources(&stages)?;

        debug!(
            min_split_length,
            comparators = comparators.len(),
            stages = ?stages.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            "Loaded run configuration"
        );
        Ok(Self {
            min_split_length,
            comparators,
            stages,
        })
    }
}

type Record = serde_json::Map<String, serde_json::Value>;

fn build_comparator(name: &str, kind: StageKind, record: &Record) -> Result<Comparator, ComexError> {
    let comparator = match kind {
        StageKind::SameArticleComparator => Comparator::SameArticle(parse_record::<RootComparatorConfig>(name, record)?),
        StageKind::SameCommentComparator => Comparator::SameComment(parse_record::<SameCommentConfig>(name, record)?),
        StageKind::ReplyToComparator => Comparator::ReplyTo(parse_record::<RootComparatorConfig>(name, record)?),
        StageKind::TemporalComparator => {
            let cfg: TemporalConfig = parse_record(name, record)?;
            if !cfg.max_time.is_finite() || cfg.max_time <= 0.0 {
                return Err(ComexError::config(format!("{name}.max_time must be positive")));
            }
            Comparator::Temporal(cfg)
        }
        StageKind::SimilarityComparator => {
            let cfg: SimilarityConfig = parse_record(name, record)?;
            finite(name, "max_similarity", cfg.max_similarity)?;
            Comparator::Similarity(cfg)
        }
        other => unreachable!("{other:?} is not a comparator"),
    };

    let base_weight = match &comparator {
        Comparator::SameArticle(c) | Comparator::ReplyTo(c) => c.base_weight,
        Comparator::SameComment(c) => c.base_weight,
        Comparator::Temporal(c) => c.base_weight,
        Comparator::Similarity(c) => c.base_weight,
    };
    finite(name, "base_weight", base_weight)?;
    Ok(comparator)
}

fn build_stage(name: &str, kind: StageKind, record: &Record) -> Result<Stage, ComexError> {
    let stage = match kind {
        StageKind::PageRanker => {
            let cfg: PageRankConfig = parse_record(name, record)?;
            let edge_type = resolve(name, "edge_type", None, cfg.edge_type)?;
            if cfg.num_iterations < 1 {
                return Err(ComexError::config(format!("{name}.num_iterations must be at least 1")));
            }
            if !(0.0..=1.0).contains(&cfg.d) {
                return Err(ComexError::config(format!("{name}.d must lie in [0, 1], got {}", cfg.d)));
            }
            if !cfg.tolerance.is_finite() || cfg.tolerance <= 0.0 {
                return Err(ComexError::config(format!("{name}.tolerance must be positive")));
            }
            Stage::Rank(Ranker::PageRank {
                edge_type,
                params: PageRankParams {
                    d: cfg.d,
                    num_iterations: cfg.num_iterations as usize,
                    power_mode: cfg.use_power_mode,
                    tolerance: cfg.tolerance,
                    normalize: cfg.normalize,
                },
            })
        }
        StageKind::CentralityDegreeCalculator => {
            parse_record::<NoFields>(name, record)?;
            Stage::Rank(Ranker::Degree)
        }
        StageKind::SizeRanker => {
            parse_record::<NoFields>(name, record)?;
            Stage::Rank(Ranker::Size)
        }
        StageKind::VotesRanker => Stage::Rank(Ranker::Votes(parse_record::<VotesConfig>(name, record)?)),
        StageKind::RecencyRanker => Stage::Rank(Ranker::Recency(parse_record::<RecencyConfig>(name, record)?)),
        StageKind::ToxicityRanker => {
            let cfg: ToxicityConfig = parse_record(name, record)?;
            if cfg.window_length < 1 {
                return Err(ComexError::config(format!("{name}.window_length must be at least 1")));
            }
            Stage::Rank(Ranker::Toxicity {
                window_length: cfg.window_length as usize,
                whole_comment: cfg.whole_comment,
            })
        }
        StageKind::EdgeFilter(fixed) => {
            let cfg: EdgeFilterConfig = parse_record(name, record)?;
            Stage::Filter(Filter::Edge {
                edge_type: resolve(name, "edge_type", fixed, cfg.edge_type)?,
                threshold: finite(name, "threshold", cfg.threshold)?,
                smaller_as: cfg.smaller_as,
            })
        }
        StageKind::OrEdgeFilter => {
            let cfg: OrEdgeFilterConfig = parse_record(name, record)?;
            let candidates = [
                (E::ReplyTo, cfg.reply_to),
                (E::SameArticle, cfg.same_article),
                (E::Similarity, cfg.similarity),
                (E::SameGroup, cfg.same_group),
                (E::SameComment, cfg.same_comment),
                (E::Temporal, cfg.temporal),
            ];
            let mut thresholds = Vec::new();
            for (edge_type, threshold) in candidates {
                let Some(threshold) = threshold else { continue };
                let threshold = finite(name, edge_type.as_str(), threshold)?;
                if threshold >= 0.0 {
                    thresholds.push((edge_type, threshold));
                }
            }
            if thresholds.is_empty() {
                return Err(ComexError::config(format!("{name} has no enabled edge type")));
            }
            Stage::Filter(Filter::Or {
                thresholds,
                smaller_as: cfg.smaller_as,
            })
        }
        StageKind::BottomEdgeFilter(fixed) => {
            let cfg: BottomEdgeFilterConfig = parse_record(name, record)?;
            Stage::Filter(Filter::BottomEdge {
                edge_type: resolve(name, "edge_type", fixed, cfg.edge_type)?,
                top_edges: non_negative(name, "top_edges", cfg.top_edges)?,
                descending: cfg.descending_order,
            })
        }
        StageKind::NodeWeightFilter(fixed) => {
            let cfg: NodeWeightFilterConfig = parse_record(name, record)?;
            Stage::Filter(Filter::NodeWeight {
                weight: resolve(name, "node_weight_type", fixed, cfg.node_weight_type)?,
                threshold: finite(name, "threshold", cfg.threshold)?,
                smaller_as: cfg.smaller_as,
                strict: cfg.strict,
            })
        }
        StageKind::NodeWeightBottomFilter(fixed) => {
            let cfg: NodeWeightBottomFilterConfig = parse_record(name, record)?;
            Stage::Filter(Filter::NodeWeightBottom {
                weight: resolve(name, "node_weight_type", fixed, cfg.node_weight_type)?,
                top_k: non_negative(name, "top_k", cfg.top_k)?,
                descending: cfg.descending_order,
                strict: cfg.strict,
            })
        }
        StageKind::NodeMerger(fixed) => {
            let cfg: NodeMergerConfig = parse_record(name, record)?;
            Stage::Merge(Merger::Single {
                edge_type: resolve(name, "edge_type", fixed, cfg.edge_type)?,
                threshold: finite(name, "threshold", cfg.threshold)?,
                smaller_as: cfg.smaller_as,
            })
        }
        StageKind::MultiNodeMerger => {
            let cfg: MultiNodeMergerConfig = parse_record(name, record)?;
            if cfg.thresholds.is_empty() {
                return Err(ComexError::config(format!("{name}.thresholds must not be empty")));
            }
            for (edge_type, value) in cfg.thresholds.iter().chain(&cfg.weights) {
                finite(name, edge_type.as_str(), *value)?;
            }
            Stage::Merge(Merger::Multi {
                thresholds: cfg.thresholds,
                weights: cfg.weights,
                conjunction: cfg.conjunction,
                smaller_as: cfg.smaller_as,
            })
        }
        StageKind::Clusterer(fixed) => {
            let cfg: ClustererConfig = parse_record(name, record)?;
            Stage::Cluster(Clusterer {
                edge_types: vec![resolve(name, "edge_type", fixed, cfg.edge_type)?],
                algorithm: cfg.algorithm,
            })
        }
        StageKind::MultiEdgeTypeClusterer => {
            let cfg: MultiClustererConfig = parse_record(name, record)?;
            if cfg.edge_types.is_empty() {
                return Err(ComexError::config(format!("{name}.edge_types must not be empty")));
            }
            let mut seen = BTreeSet::new();
            let edge_types: Vec<EdgeType> = cfg.edge_types.into_iter().filter(|t| seen.insert(*t)).collect();
            Stage::Cluster(Clusterer {
                edge_types,
                algorithm: cfg.algorithm,
            })
        }
        other => unreachable!("{other:?} is a comparator"),
    };
    Ok(stage)
}

/// Pick the type a stage operates on. A specialization fixes it; an explicit
/// value may only repeat it.
fn resolve<T: Copy + PartialEq + fmt::Display>(
    name: &str,
    field: &str,
    fixed: Option<T>,
    given: Option<T>,
) -> Result<T, ComexError> {
    match (fixed, given) {
        (Some(f), Some(g)) if f != g => Err(ComexError::config(format!(
            "{name} operates on {f}, conflicting {field} {g}"
        ))),
        (Some(f), _) => Ok(f),
        (None, Some(g)) => Ok(g),
        (None, None) => Err(ComexError::config(format!("{name} requires {field}"))),
    }
}

fn finite(name: &str, field: &str, value: f64) -> Result<f64, ComexError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ComexError::config(format!("{name}.{field} must be finite, got {value}")))
    }
}

fn non_negative(name: &str, field: &str, value: i64) -> Result<usize, ComexError> {
    usize::try_from(value).map_err(|_| ComexError::config(format!("{name}.{field} must not be negative, got {value}")))
}

/// Node-weight filters run before merging and clustering, and read weights
/// that only an active ranker can have written.
fn check_node_weight_sources(stages: &[(&'static str, Stage)]) -> Result<(), ComexError> {
    let produced: BTreeSet<NodeWeightType> = stages
        .iter()
        .filter_map(|(_, stage)| match stage {
            Stage::Rank(ranker) => Some(ranker.output()),
            _ => None,
        })
        .collect();

    for (name, stage) in stages {
        let weight = match stage {
            Stage::Filter(Filter::NodeWeight { weight, .. })
            | Stage::Filter(Filter::NodeWeightBottom { weight, .. }) => *weight,
            _ => continue,
        };
        if matches!(weight, NodeWeightType::MergeId | NodeWeightType::ClusterId) {
            return Err(ComexError::config(format!(
                "{name} filters on {weight}, which is only assigned after filtering"
            )));
        }
        if !produced.contains(&weight) {
            return Err(ComexError::config(format!(
                "{name} filters on {weight}, but no active ranker produces it"
            )));
        }
    }
    Ok(())
}
