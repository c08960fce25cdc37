use dashmap::DashMap;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use research_cache::{BlobCache, ResultsStore};
use research_core::{LlmUsage, ResearchError};

use crate::chat::{ChatClient, ChatMessage, ChatOptions};
use crate::error::LlmError;
use crate::pricing::usage_from;
use crate::usage::AdaptiveUsageMonitor;

/// Models that accept `response_format: {"type": "json_object"}`.
const JSON_FORMAT_MODELS: &[&str] = &["gpt-4o", "gpt-4.1", "gpt-4-turbo", "gpt-3.5-turbo", "o3"];

/// Models that honor a deterministic `seed`.
const SEED_MODELS: &[&str] = &["gpt-4o", "gpt-4.1", "gpt-4-turbo", "gpt-3.5-turbo"];

const LLM_KV_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

const ANALYSIS_SYSTEM_PROMPT: &str = "\
你是一位專業的股票研究分析師。根據使用者提供的結構化數據（價格、動能、法人持股、\
分析師目標價、新聞情緒、財報摘要、總經環境），輸出一份投資分析。\
嚴格輸出 JSON（不得包含其他文字），格式如下：\
{\"summary\": \"整體分析摘要\", \
\"action\": {\"rating\": \"BUY|HOLD|SELL\", \"target_price\": 數字, \
\"confidence\": \"high|medium|low\", \"rationale\": \"決策理由\"}, \
\"key_risks\": [\"風險\"], \"catalysts\": [\"催化劑\"], \
\"segments\": {\"quality_score\": 0到100的數字, \"segment\": \"產業分類\"}}。\
rating 必須是 BUY、HOLD 或 SELL 三者之一，不可為 N/A。";

const REPAIR_SYSTEM_PROMPT: &str = "\
You repair malformed JSON. Reply with the corrected JSON document only, \
with no commentary and no code fences.";

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub fallback_model: String,
    pub summary_model: String,
    pub prompt_version: String,
    pub max_completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct AnalyzeOutcome {
    pub analysis: Value,
    pub usage: Option<LlmUsage>,
    pub payload_hash: String,
    pub from_cache: bool,
}

/// LLM façade: hash-keyed output cache, in-flight collapse of identical
/// requests, deterministic decode settings, layered parsing, and a one-shot
/// fallback model.
pub struct LlmClient {
    pub(crate) chat: ChatClient,
    pub(crate) config: LlmClientConfig,
    results: Option<Arc<ResultsStore>>,
    kv: Option<Arc<dyn BlobCache>>,
    pub monitor: AdaptiveUsageMonitor,
    inflight: DashMap<String, Arc<OnceCell<(Value, Option<LlmUsage>)>>>,
}

/// SHA-256 of `{payload, prompt_version, model}`, hex-encoded.
pub fn payload_hash(payload: &Value, prompt_version: &str, model: &str) -> String {
    let keyed = json!({
        "payload": payload,
        "prompt_version": prompt_version,
        "model": model,
    });
    let mut hasher = Sha256::new();
    hasher.update(keyed.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn seed_from_hash(hash: &str) -> u64 {
    let prefix = &hash[..hash.len().min(12)];
    u64::from_str_radix(prefix, 16).unwrap_or(0) % 1_000_000_000
}

fn model_matches(model: &str, table: &[&str]) -> bool {
    table.iter().any(|prefix| model.starts_with(prefix))
}

fn llm_kv_key(hash: &str) -> String {
    format!("llm_output_{hash}")
}

impl LlmClient {
    pub fn new(
        chat: ChatClient,
        config: LlmClientConfig,
        results: Option<Arc<ResultsStore>>,
        kv: Option<Arc<dyn BlobCache>>,
    ) -> Self {
        Self {
            chat,
            config,
            results,
            kv,
            monitor: AdaptiveUsageMonitor::default(),
            inflight: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.chat.is_enabled()
    }

    pub fn prompt_version(&self) -> &str {
        &self.config.prompt_version
    }

    /// Produce the investment analysis for a compact payload. Identical
    /// concurrent requests collapse onto one upstream call.
    pub async fn analyze(
        &self,
        payload: &Value,
        model: &str,
    ) -> Result<AnalyzeOutcome, ResearchError> {
        let hash = payload_hash(payload, &self.config.prompt_version, model);

        if let Some(cached) = self.lookup_cached(&hash).await? {
            return Ok(AnalyzeOutcome {
                analysis: cached,
                usage: None,
                payload_hash: hash,
                from_cache: true,
            });
        }

        let cell = self
            .inflight
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let result = cell
            .get_or_try_init(|| self.analyze_uncached(payload, model, &hash))
            .await
            .map(|v| v.clone());
        self.inflight.remove(&hash);

        let (analysis, usage) = result?;
        Ok(AnalyzeOutcome {
            analysis,
            usage,
            payload_hash: hash,
            from_cache: false,
        })
    }

    async fn lookup_cached(&self, hash: &str) -> Result<Option<Value>, ResearchError> {
        if let Some(results) = &self.results {
            if let Some(stored) = results.get_llm_output(hash).await? {
                return Ok(Some(stored.output));
            }
        }
        if let Some(kv) = &self.kv {
            if let Some(value) = kv.read(&llm_kv_key(hash), LLM_KV_TTL).await {
                if let Some(results) = &self.results {
                    // Backfill the durable index so the next hit skips disk.
                    let _ = results.put_llm_output(hash, "kv", &value).await;
                }
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn analyze_uncached(
        &self,
        payload: &Value,
        model: &str,
        hash: &str,
    ) -> Result<(Value, Option<LlmUsage>), ResearchError> {
        let mut usage_total = LlmUsage::default();

        match self.attempt_analysis(payload, model, hash, &mut usage_total).await {
            Ok(parsed) => {
                self.store_output(hash, model, &parsed).await;
                return Ok((parsed, Some(usage_total)));
            }
            Err(err) => {
                tracing::warn!(
                    "analysis via {model} failed ({err}), retrying with fallback {}",
                    self.config.fallback_model
                );
            }
        }

        let fallback = self.config.fallback_model.clone();
        let parsed = self
            .attempt_analysis(payload, &fallback, hash, &mut usage_total)
            .await
            .map_err(ResearchError::from)?;
        self.store_output(hash, &fallback, &parsed).await;
        Ok((parsed, Some(usage_total)))
    }

    async fn attempt_analysis(
        &self,
        payload: &Value,
        model: &str,
        hash: &str,
        usage_total: &mut LlmUsage,
    ) -> Result<Value, LlmError> {
        let messages = [
            ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
            ChatMessage::user(payload.to_string()),
        ];
        let options = ChatOptions {
            temperature: 0.0,
            max_tokens: self.config.max_completion_tokens,
            seed: model_matches(model, SEED_MODELS).then(|| seed_from_hash(hash)),
            json_mode: model_matches(model, JSON_FORMAT_MODELS),
        };

        let outcome = self.chat.complete(model, &messages, &options).await?;
        let usage = usage_from(model, &outcome.tokens);
        self.monitor.record(&usage);
        usage_total.add(&usage);

        let parsed = self.parse_lenient(&outcome.content).await?;
        validate_analysis(&parsed)?;
        Ok(parsed)
    }

    /// Three parse stages: cleaned text, brace-substring, then a repair pass
    /// through the smaller model.
    pub(crate) async fn parse_lenient(&self, raw: &str) -> Result<Value, LlmError> {
        if let Some(parsed) = parse_direct(raw) {
            return Ok(parsed);
        }

        let messages = [
            ChatMessage::system(REPAIR_SYSTEM_PROMPT),
            ChatMessage::user(raw.to_string()),
        ];
        let options = ChatOptions {
            temperature: 0.0,
            max_tokens: self.config.max_completion_tokens,
            seed: None,
            json_mode: model_matches(&self.config.summary_model, JSON_FORMAT_MODELS),
        };
        let repaired = self
            .chat
            .complete(&self.config.summary_model, &messages, &options)
            .await?;
        let usage = usage_from(&self.config.summary_model, &repaired.tokens);
        self.monitor.record(&usage);

        parse_direct(&repaired.content).ok_or_else(|| {
            LlmError::Unparseable(format!(
                "unparseable after repair: {}",
                raw.chars().take(120).collect::<String>()
            ))
        })
    }

    async fn store_output(&self, hash: &str, model: &str, parsed: &Value) {
        if let Some(results) = &self.results {
            if let Err(e) = results.put_llm_output(hash, model, parsed).await {
                tracing::warn!("failed to persist llm output: {e}");
            }
        }
        if let Some(kv) = &self.kv {
            if let Err(e) = kv.write(&llm_kv_key(hash), parsed).await {
                tracing::warn!("failed to cache llm output: {e}");
            }
        }
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Stages one and two: direct parse of the cleaned text, then the substring
/// between the first `{` and last `}`.
fn parse_direct(raw: &str) -> Option<Value> {
    let cleaned = strip_fences(raw);
    if let Ok(parsed) = serde_json::from_str::<Value>(cleaned) {
        if parsed.is_object() {
            return Some(parsed);
        }
    }
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&cleaned[start..=end]).ok()
}

fn validate_analysis(parsed: &Value) -> Result<(), LlmError> {
    let rating = parsed
        .get("action")
        .and_then(|a| a.get("rating"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if rating.is_empty() || rating.eq_ignore_ascii_case("n/a") {
        return Err(LlmError::InvalidOutput(format!(
            "missing or N/A action.rating (got {rating:?})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_keyed_on_all_inputs() {
        let payload = json!({"ticker": "NVDA", "price": 500.0});
        let a = payload_hash(&payload, "v3", "gpt-4o");
        let b = payload_hash(&payload, "v3", "gpt-4o");
        assert_eq!(a, b);
        assert_ne!(a, payload_hash(&payload, "v4", "gpt-4o"));
        assert_ne!(a, payload_hash(&payload, "v3", "gpt-4o-mini"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn seed_is_deterministic_and_bounded() {
        let hash = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
        let seed = seed_from_hash(hash);
        assert_eq!(seed, seed_from_hash(hash));
        assert!(seed < 1_000_000_000);
    }

    #[test]
    fn parse_direct_handles_fences_and_prose() {
        let fenced = "```json\n{\"action\": {\"rating\": \"BUY\"}}\n```";
        assert!(parse_direct(fenced).is_some());

        let chatty = "Here is my analysis: {\"action\": {\"rating\": \"HOLD\"}} hope it helps";
        let parsed = parse_direct(chatty).unwrap();
        assert_eq!(parsed["action"]["rating"], "HOLD");

        assert!(parse_direct("no json here").is_none());
    }

    #[test]
    fn validation_rejects_missing_or_na_rating() {
        assert!(validate_analysis(&json!({"action": {"rating": "BUY"}})).is_ok());
        assert!(validate_analysis(&json!({"action": {"rating": "N/A"}})).is_err());
        assert!(validate_analysis(&json!({"summary": "x"})).is_err());
    }

    #[test]
    fn json_mode_allowlist_is_prefix_based() {
        assert!(model_matches("gpt-4o-2024-08-06", JSON_FORMAT_MODELS));
        assert!(model_matches("gpt-4o-mini", SEED_MODELS));
        assert!(!model_matches("llama-3-70b", JSON_FORMAT_MODELS));
    }
}
