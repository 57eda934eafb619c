use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Could not understand the question: {0}")]
    Synthesis(String),

    #[error("Unsafe query rejected: {0}")]
    UnsafeQuery(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NlqError {
    /// Message safe to hand back to the caller.
    pub fn user_message(&self) -> String {
        match self {
            NlqError::SchemaUnavailable(_) => {
                "The data service is temporarily unavailable. Please try again later.".to_string()
            }
            NlqError::Synthesis(_) | NlqError::UnsafeQuery(_) => {
                "Sorry, I could not understand the question.".to_string()
            }
            NlqError::Execution(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NlqError>;
