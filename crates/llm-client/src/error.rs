use thiserror::Error;

use research_core::ResearchError;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("llm disabled: no API key configured")]
    Disabled,

    #[error("llm http error: {message}")]
    Http { status: Option<u16>, message: String },

    #[error("llm response unparseable: {0}")]
    Unparseable(String),

    #[error("llm output invalid: {0}")]
    InvalidOutput(String),
}

impl From<LlmError> for ResearchError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Disabled => ResearchError::LlmUnavailable("no API key".to_string()),
            LlmError::Http { status, message } => ResearchError::Upstream { status, message },
            LlmError::Unparseable(msg) => ResearchError::LlmInvalid(msg),
            LlmError::InvalidOutput(msg) => ResearchError::LlmInvalid(msg),
        }
    }
}
