use std::sync::Arc;

use async_trait::async_trait;

use comex_common::{Comment, ComexError};

// --- Collaborator traits ---

/// Read-only access to stored comments. Returned order is authoritative.
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn get_comments(&self, article_ids: &[i64]) -> anyhow::Result<Vec<Comment>>;
}

/// Text to fixed-length vector. Used for comment/split similarity and for
/// the word vectors fed to the toxicity classifier.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Batch of word-vector windows to one probability per window.
#[async_trait]
pub trait ToxicityClassifier: Send + Sync {
    async fn predict(&self, windows: Vec<Vec<Vec<f32>>>) -> anyhow::Result<Vec<f32>>;
}

/// External services a run may call. Each is only required when a stage
/// that depends on it is active.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub toxicity: Option<Arc<dyn ToxicityClassifier>>,
}

impl Collaborators {
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_toxicity(mut self, toxicity: Arc<dyn ToxicityClassifier>) -> Self {
        self.toxicity = Some(toxicity);
        self
    }

    pub fn embedder(&self) -> Option<&dyn EmbeddingProvider> {
        self.embedder.as_deref()
    }

    pub fn toxicity(&self) -> Option<&dyn ToxicityClassifier> {
        self.toxicity.as_deref()
    }
}

/// Embed `texts` in one call and check the provider kept its contract:
/// one vector per text, all non-empty and of the same length.
pub(crate) async fn embed_checked(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, ComexError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = provider
        .embed_batch(texts)
        .await
        .map_err(|e| ComexError::collaborator(format!("embedding provider failed: {e:#}")))?;

    if vectors.len() != texts.len() {
        return Err(ComexError::collaborator(format!(
            "embedding provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }

    let dim = vectors[0].len();
    if dim == 0 {
        return Err(ComexError::collaborator("embedding provider returned an empty vector"));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(ComexError::collaborator(format!(
            "embedding dimension mismatch: expected {dim}, got {}",
            bad.len()
        )));
    }

    Ok(vectors)
}
