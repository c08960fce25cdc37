pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::EngineConfig;
pub use error::ResearchError;
pub use retry::{is_retryable, with_retries};
pub use types::*;
