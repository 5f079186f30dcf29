//! Discourse graph engine.
//!
//! Splits comments into sentence-level nodes, connects them with typed
//! weighted edges, and runs a configurable chain of ranking, filtering,
//! merging and clustering stages over the result.

pub mod cluster;
pub mod compare;
pub mod config;
pub mod filter;
pub mod merge;
pub mod model;
pub mod pagerank;
pub mod pipeline;
pub mod providers;
pub mod rank;
pub mod similarity;
pub mod stage;
pub mod text;

pub use config::{fingerprint, RunConfig};
pub use model::{Edge, EdgeType, EdgeWeights, Graph, NodeId, NodeWeightType, Split, SplitComment, SplitWeights};
pub use pipeline::{build_graph, build_graph_from_source, Collaborators, Pipeline, PipelineStats};
pub use providers::{CommentSource, EmbeddingProvider, ToxicityClassifier};
