pub mod analyzer;
pub mod chat;
pub mod error;
pub mod pricing;
pub mod summarize;
pub mod usage;

pub use analyzer::{payload_hash, AnalyzeOutcome, LlmClient, LlmClientConfig};
pub use chat::{ChatClient, ChatMessage, ChatOptions, ChatOutcome};
pub use error::LlmError;
pub use summarize::{NewsSentiment, TranscriptDigest};
pub use usage::{AdaptiveLimits, AdaptiveUsageMonitor};
