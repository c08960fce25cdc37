use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("upstream error: {message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("cached result unavailable")]
    CacheMiss,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("llm output invalid: {0}")]
    LlmInvalid(String),

    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    #[error("{0}")]
    Other(String),
}

impl ResearchError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        ResearchError::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Status code preserved from the vendor response, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ResearchError::Upstream { status, .. } => *status,
            _ => None,
        }
    }
}
