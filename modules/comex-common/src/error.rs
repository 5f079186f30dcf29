use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComexError {
    /// An enabled stage is misconfigured. Raised before any stage runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding provider or toxicity classifier is missing, failed,
    /// or returned malformed output.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ComexError {
    pub fn config(msg: impl Into<String>) -> Self {
        ComexError::Config(msg.into())
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        ComexError::Collaborator(msg.into())
    }
}
