use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template placeholder {{{0}}} has no value")]
    Unbound(String),

    #[error("unbalanced brace in template at byte {position}")]
    Unbalanced { position: usize },
}

/// The backend answered, but not with the structured data we asked for.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("malformed response: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
    pub response: String,
}

impl MalformedResponse {
    pub fn new(reason: impl Into<String>, response: &str) -> Self {
        Self {
            reason: reason.into(),
            response: response.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    /// The prompt exceeds the model's context window. Retrying cannot help.
    #[error("input exceeds the model context window: {0}")]
    ContextTooLarge(String),

    /// Network failure, rate limit, server error, unexpected response shape.
    #[error("backend unavailable: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: BackendError },

    #[error("generation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Malformed(#[from] MalformedResponse),
}
