use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use comex_common::Config;
use comex_graph::{build_graph_from_source, fingerprint, Collaborators, RunConfig};

mod providers;

use providers::{HttpEmbedder, HttpToxicityClassifier, JsonCommentSource};

#[derive(Parser)]
#[command(name = "comex", about = "Build discourse graphs from threaded comments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a graph and write it as JSON
    Build {
        /// JSON array of comments
        #[arg(long)]
        comments: PathBuf,
        /// Article ids to include (default: every article in the file)
        #[arg(long, value_delimiter = ',')]
        articles: Vec<i64>,
        /// Run configuration overrides (.json or .toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the cache key for a set of articles and configuration
    Fingerprint {
        #[arg(long, value_delimiter = ',', required = true)]
        articles: Vec<i64>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("comex=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Build {
            comments,
            articles,
            config: overrides,
            out,
        } => {
            config.log_redacted();
            let run_config = run_config(&config, overrides.as_deref())?;
            let source = JsonCommentSource::load(&comments)?;
            let articles = if articles.is_empty() { source.article_ids() } else { articles };

            info!(
                articles = ?articles,
                fingerprint = %fingerprint(&articles, &run_config),
                "Building graph"
            );
            let graph = build_graph_from_source(&source, &articles, &run_config, &collaborators(&config)).await?;

            let json = serde_json::to_string_pretty(&graph)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write graph: {}", path.display()))?;
                    info!(path = %path.display(), "Graph written");
                }
                None => println!("{json}"),
            }
        }
        Command::Fingerprint {
            articles,
            config: overrides,
        } => {
            let run_config = run_config(&config, overrides.as_deref())?;
            println!("{}", fingerprint(&articles, &run_config));
        }
    }

    Ok(())
}

/// Defaults (built in, or `COMEX_DEFAULTS`) with optional overrides on top.
fn run_config(config: &Config, overrides: Option<&Path>) -> Result<RunConfig> {
    let defaults = match &config.defaults_path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::builtin()?,
    };
    Ok(match overrides {
        Some(path) => RunConfig::layered(&defaults, &RunConfig::load(path)?),
        None => defaults,
    })
}

fn collaborators(config: &Config) -> Collaborators {
    let mut collaborators = Collaborators::default();
    if let Some(url) = &config.embedding_api_url {
        collaborators = collaborators.with_embedder(Arc::new(HttpEmbedder::new(
            url,
            config.embedding_api_key.as_deref(),
            &config.embedding_model,
        )));
    }
    if let Some(url) = &config.toxicity_api_url {
        collaborators = collaborators.with_toxicity(Arc::new(HttpToxicityClassifier::new(url)));
    }
    collaborators
}
