//! Layered run configuration.
//!
//! A run configuration maps stage and comparator class names to records.
//! Built-in defaults ship as TOML; per-request overrides are merged on top
//! field by field and the result is passed explicitly to the pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use comex_common::ComexError;

use crate::cluster::ClusterAlgorithm;
use crate::merge::Conjunction;
use crate::model::{EdgeType, NodeWeightType};

const BUILTIN_DEFAULTS: &str = include_str!("defaults.toml");

/// Pseudo-record carrying splitter settings; never a stage.
pub const SPLITTER: &str = "Splitter";

/// Field names older configurations use, with their current spelling.
const LEGACY_FIELDS: &[(&str, &str)] = &[
    ("user_power_mode", "use_power_mode"),
    ("use_leseempfehlungen", "use_recommendations"),
    ("k", "top_k"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunConfig {
    records: Map<String, Value>,
}

impl RunConfig {
    /// The defaults compiled into the crate.
    pub fn builtin() -> Result<Self, ComexError> {
        Self::from_toml_str(BUILTIN_DEFAULTS)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ComexError> {
        let value: Value = toml::from_str(content)
            .map_err(|e| ComexError::config(format!("invalid TOML run configuration: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ComexError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| ComexError::config(format!("invalid JSON run configuration: {e}")))?;
        Self::from_value(value)
    }

    /// Top level must be a table of tables. Legacy field names are
    /// rewritten to their current spelling so layering sees one key.
    pub fn from_value(value: Value) -> Result<Self, ComexError> {
        let Value::Object(mut records) = value else {
            return Err(ComexError::config("run configuration must be a table of records"));
        };
        for (name, record) in records.iter_mut() {
            let Value::Object(fields) = record else {
                return Err(ComexError::config(format!("record {name} must be a table")));
            };
            canonicalize(fields);
        }
        Ok(Self { records })
    }

    /// Read a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, ComexError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComexError::config(format!("failed to read run configuration {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Merge `overrides` onto `defaults`. Records merge field by field;
    /// a field present in the override replaces the default's value wholesale.
    pub fn layered(defaults: &RunConfig, overrides: &RunConfig) -> RunConfig {
        let mut records = defaults.records.clone();
        for (name, over) in &overrides.records {
            match (records.get_mut(name), over) {
                (Some(Value::Object(base)), Value::Object(fields)) => {
                    for (field, value) in fields {
                        base.insert(field.clone(), value.clone());
                    }
                }
                _ => {
                    records.insert(name.clone(), over.clone());
                }
            }
        }
        RunConfig { records }
    }

    /// Insert or replace one record.
    pub fn set(&mut self, name: impl Into<String>, mut record: Value) -> &mut Self {
        if let Value::Object(fields) = &mut record {
            canonicalize(fields);
        }
        self.records.insert(name.into(), record);
        self
    }

    pub fn record(&self, name: &str) -> Option<&Map<String, Value>> {
        self.records.get(name).and_then(Value::as_object)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Present and not switched off with `active = false`.
    pub fn is_active(&self, name: &str) -> Result<bool, ComexError> {
        let Some(record) = self.record(name) else {
            return Ok(false);
        };
        match record.get("active") {
            None => Ok(true),
            Some(Value::Bool(active)) => Ok(*active),
            Some(other) => Err(ComexError::config(format!(
                "{name}.active must be a boolean, got {other}"
            ))),
        }
    }

    pub fn splitter(&self) -> Result<SplitterConfig, ComexError> {
        match self.record(SPLITTER) {
            Some(record) => parse_record(SPLITTER, record),
            None => Ok(SplitterConfig::default()),
        }
    }
}

/// Rename legacy fields in place. A record spelling both forms keeps both
/// and fails to parse as a duplicate field.
fn canonicalize(fields: &mut Map<String, Value>) {
    for (legacy, current) in LEGACY_FIELDS {
        if fields.contains_key(*current) {
            continue;
        }
        if let Some(value) = fields.remove(*legacy) {
            fields.insert((*current).to_string(), value);
        }
    }
}

/// Deserialize a record into its typed form, ignoring the `active` switch.
pub(crate) fn parse_record<T: DeserializeOwned>(
    name: &str,
    record: &Map<String, Value>,
) -> Result<T, ComexError> {
    let mut fields = record.clone();
    fields.remove("active");
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| ComexError::config(format!("{name}: {e}")))
}

/// Cache key for one run: hex SHA-256 over the sorted, deduplicated article
/// ids and the effective configuration.
pub fn fingerprint(article_ids: &[i64], config: &RunConfig) -> String {
    let mut ids = article_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    let key = serde_json::json!({ "article_ids": ids, "config": config });
    let bytes = serde_json::to_vec(&key).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

// --- Record types ---

fn yes() -> bool {
    true
}

fn unit_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitterConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

fn default_min_length() -> usize {
    crate::text::DEFAULT_MIN_LENGTH
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SameCommentConfig {
    #[serde(default = "unit_weight")]
    pub base_weight: f64,
    #[serde(default = "yes")]
    pub only_consecutive: bool,
}

/// SameArticle and ReplyTo comparators.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootComparatorConfig {
    #[serde(default = "unit_weight")]
    pub base_weight: f64,
    #[serde(default = "yes")]
    pub only_root: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemporalConfig {
    #[serde(default = "unit_weight")]
    pub base_weight: f64,
    #[serde(default = "yes")]
    pub only_root: bool,
    /// Seconds.
    #[serde(default = "default_max_time")]
    pub max_time: f64,
}

fn default_max_time() -> f64 {
    3600.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimilarityConfig {
    #[serde(default = "unit_weight")]
    pub base_weight: f64,
    #[serde(default = "yes")]
    pub only_root: bool,
    #[serde(default = "default_max_similarity")]
    pub max_similarity: f64,
    #[serde(default)]
    pub use_split_text: bool,
}

fn default_max_similarity() -> f64 {
    0.75
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageRankConfig {
    pub edge_type: Option<EdgeType>,
    #[serde(default = "default_iterations")]
    pub num_iterations: i64,
    #[serde(default = "default_damping")]
    pub d: f64,
    #[serde(default = "yes")]
    pub normalize: bool,
    #[serde(default, alias = "user_power_mode")]
    pub use_power_mode: bool,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_iterations() -> i64 {
    100
}

fn default_damping() -> f64 {
    0.85
}

fn default_tolerance() -> f64 {
    1e-6
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VotesConfig {
    #[serde(default = "yes")]
    pub use_upvotes: bool,
    #[serde(default = "yes")]
    pub use_downvotes: bool,
    #[serde(default = "yes")]
    pub use_likes: bool,
    #[serde(default = "yes")]
    pub use_love: bool,
    #[serde(default = "yes")]
    pub use_recommended: bool,
    #[serde(default = "yes", alias = "use_leseempfehlungen")]
    pub use_recommendations: bool,
    #[serde(default)]
    pub use_replies: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecencyConfig {
    #[serde(default = "yes")]
    pub use_youngest: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToxicityConfig {
    #[serde(default = "default_window")]
    pub window_length: i64,
    #[serde(default = "yes")]
    pub whole_comment: bool,
}

fn default_window() -> i64 {
    125
}

/// SizeRanker and CentralityDegreeCalculator take no fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoFields {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeFilterConfig {
    pub edge_type: Option<EdgeType>,
    pub threshold: f64,
    #[serde(default)]
    pub smaller_as: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrEdgeFilterConfig {
    #[serde(default)]
    pub reply_to: Option<f64>,
    #[serde(default)]
    pub same_article: Option<f64>,
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub same_group: Option<f64>,
    #[serde(default)]
    pub same_comment: Option<f64>,
    #[serde(default)]
    pub temporal: Option<f64>,
    #[serde(default)]
    pub smaller_as: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BottomEdgeFilterConfig {
    pub edge_type: Option<EdgeType>,
    pub top_edges: i64,
    #[serde(default = "yes")]
    pub descending_order: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeWeightFilterConfig {
    pub node_weight_type: Option<NodeWeightType>,
    pub threshold: f64,
    #[serde(default)]
    pub smaller_as: bool,
    #[serde(default = "yes")]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeWeightBottomFilterConfig {
    pub node_weight_type: Option<NodeWeightType>,
    #[serde(alias = "k")]
    pub top_k: i64,
    #[serde(default = "yes")]
    pub descending_order: bool,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeMergerConfig {
    pub edge_type: Option<EdgeType>,
    pub threshold: f64,
    #[serde(default)]
    pub smaller_as: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiNodeMergerConfig {
    pub thresholds: BTreeMap<EdgeType, f64>,
    #[serde(default)]
    pub weights: BTreeMap<EdgeType, f64>,
    #[serde(default)]
    pub conjunction: Conjunction,
    #[serde(default)]
    pub smaller_as: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClustererConfig {
    pub edge_type: Option<EdgeType>,
    #[serde(default)]
    pub algorithm: ClusterAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiClustererConfig {
    pub edge_types: Vec<EdgeType>,
    #[serde(default)]
    pub algorithm: ClusterAlgorithm,
}
