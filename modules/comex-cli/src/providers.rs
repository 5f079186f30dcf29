//! HTTP and file-backed collaborators for the command-line driver.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use comex_common::Comment;
use comex_graph::{CommentSource, EmbeddingProvider, ToxicityClassifier};

/// Inputs per `/embeddings` request.
const EMBED_CHUNK: usize = 256;

// --- Embeddings ---

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        debug!(model = %self.model, inputs = texts.len(), "Embedding request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Embedding error ({}): {}", status, error_text));
        }

        let mut body: EmbeddingResponse = response.json().await?;
        body.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_chunk(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let chunks = try_join_all(texts.chunks(EMBED_CHUNK).map(|chunk| self.embed_chunk(chunk))).await?;
        Ok(chunks.into_iter().flatten().collect())
    }
}

// --- Toxicity ---

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<Vec<Vec<f32>>>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f32>>,
}

/// TensorFlow-Serving style `:predict` client. One sigmoid output per window.
pub struct HttpToxicityClassifier {
    http: reqwest::Client,
    url: String,
}

impl HttpToxicityClassifier {
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl ToxicityClassifier for HttpToxicityClassifier {
    async fn predict(&self, windows: Vec<Vec<Vec<f32>>>) -> Result<Vec<f32>> {
        debug!(windows = windows.len(), "Toxicity request");
        let response = self
            .http
            .post(&self.url)
            .json(&PredictRequest { instances: windows })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Toxicity classifier error ({}): {}", status, error_text));
        }

        let body: PredictResponse = response.json().await?;
        body.predictions
            .into_iter()
            .map(|p| p.first().copied().ok_or_else(|| anyhow!("Empty prediction")))
            .collect()
    }
}

// --- Comments ---

/// Comments read from a JSON array on disk.
pub struct JsonCommentSource {
    comments: Vec<Comment>,
}

impl JsonCommentSource {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read comments file: {}", path.display()))?;
        let comments: Vec<Comment> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse comments file: {}", path.display()))?;
        Ok(Self { comments })
    }

    /// Distinct article ids in file order.
    pub fn article_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        for comment in &self.comments {
            if !ids.contains(&comment.article_id) {
                ids.push(comment.article_id);
            }
        }
        ids
    }
}

#[async_trait]
impl CommentSource for JsonCommentSource {
    async fn get_comments(&self, article_ids: &[i64]) -> Result<Vec<Comment>> {
        Ok(self
            .comments
            .iter()
            .filter(|c| article_ids.contains(&c.article_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_source_filters_by_article_in_file_order() {
        let path = std::env::temp_dir().join(format!("comex-comments-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[
                {"id": 3, "article_id": 8, "text": "c", "timestamp": "2021-01-01T10:00:00Z"},
                {"id": 1, "article_id": 7, "text": "a", "timestamp": "2021-01-01T09:00:00Z", "upvotes": 4},
                {"id": 2, "article_id": 8, "text": "b", "timestamp": "2021-01-01T11:00:00Z", "reply_to": 3}
            ]"#,
        )
        .unwrap();

        let source = JsonCommentSource::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(source.article_ids(), vec![8, 7]);
        let comments = source.get_comments(&[8]).await.unwrap();
        let ids: Vec<i64> = comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(comments[1].reply_to_id, Some(3));
    }

    #[test]
    fn predict_response_parses_nested_scores() {
        let body: PredictResponse = serde_json::from_str(r#"{"predictions": [[0.25], [0.75]]}"#).unwrap();
        assert_eq!(body.predictions, vec![vec![0.25], vec![0.75]]);
    }
}
