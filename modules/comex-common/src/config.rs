use std::env;
use std::path::PathBuf;

use tracing::info;

/// Process configuration loaded from environment variables.
///
/// Everything the graph engine needs per run lives in the run configuration;
/// this only locates the external collaborators.
#[derive(Debug, Clone)]
pub struct Config {
    // Embedding provider (OpenAI-compatible /embeddings endpoint)
    pub embedding_api_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,

    // Toxicity classifier (`:predict` endpoint)
    pub toxicity_api_url: Option<String>,

    /// TOML file replacing the built-in stage defaults.
    pub defaults_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables. Every variable is optional.
    pub fn from_env() -> Self {
        Self {
            embedding_api_url: optional_env("EMBEDDING_API_URL"),
            embedding_api_key: optional_env("EMBEDDING_API_KEY"),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            toxicity_api_url: optional_env("TOXICITY_API_URL"),
            defaults_path: optional_env("COMEX_DEFAULTS").map(PathBuf::from),
        }
    }

    /// Log the configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            embedding_api_url = self.embedding_api_url.as_deref().unwrap_or("-"),
            embedding_api_key = if self.embedding_api_key.is_some() { "***" } else { "-" },
            embedding_model = self.embedding_model.as_str(),
            toxicity_api_url = self.toxicity_api_url.as_deref().unwrap_or("-"),
            defaults_path = ?self.defaults_path,
            "Loaded configuration"
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_api_url: None,
            embedding_api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            toxicity_api_url: None,
            defaults_path: None,
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
