use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Engine configuration, resolved once at startup from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Result + fragment TTLs
    pub realtime_result_ttl_hours: u64,
    pub historical_result_ttl_days: u64,
    pub filing_summary_ttl_days: u64,
    pub news_cache_ttl_hours: u64,
    pub momentum_cache_ttl_hours: u64,
    pub thirteenf_ttl_days: u64,
    pub earnings_call_ttl_days: u64,
    pub analyst_aggregate_ttl_hours: u64,
    pub analyst_price_target_ttl_hours: u64,
    pub analyst_estimates_ttl_days: u64,
    pub analyst_ratings_ttl_hours: u64,
    pub analyst_grades_ttl_days: u64,
    pub macro_cache_ttl_hours: u64,

    // Retry
    pub api_retry_attempts: u32,
    pub api_retry_delay_ms: u64,

    // Batch + payload sizing
    pub batch_concurrency: usize,
    pub max_filings_for_llm: usize,
    pub news_article_limit: usize,
    pub macro_event_limit: usize,
    pub llm_max_completion_tokens: u32,

    // Momentum + guardrails
    pub momentum_strong_threshold: f64,
    pub momentum_severe_threshold: f64,
    pub weak_signal_target_cap: f64,
    pub weak_signal_target_floor: f64,
    pub llm_target_max_multiplier: f64,
    pub llm_target_min_multiplier: f64,
    pub price_target_sample_threshold: i64,
    pub extended_window_days: i64,
    pub insider_lookback_days: i64,
    pub insider_lookahead_days: i64,

    // Prewarm
    pub prewarm_tickers: Vec<String>,
    pub prewarm_interval_hours: u64,
    pub prewarm_include_llm: bool,

    // Vendors
    pub fmp_api_key: Option<String>,
    pub finnhub_api_key: Option<String>,
    pub alpha_vantage_api_key: Option<String>,
    pub sec_user_agent: String,
    pub upstream_rate_limit_per_min: usize,
    pub upstream_max_concurrent: usize,

    // LLM
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub analysis_model: String,
    pub summary_model: String,
    pub fallback_model: String,
    pub prompt_version: String,

    // Storage + server
    pub results_db_path: String,
    pub kv_cache_dir: PathBuf,
    pub bind_addr: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            realtime_result_ttl_hours: env_parse("REALTIME_RESULT_TTL_HOURS", 12),
            historical_result_ttl_days: env_parse("HISTORICAL_RESULT_TTL_DAYS", 120),
            filing_summary_ttl_days: env_parse("FILING_SUMMARY_TTL_DAYS", 180),
            news_cache_ttl_hours: env_parse("NEWS_CACHE_TTL_HOURS", 6),
            momentum_cache_ttl_hours: env_parse("MOMENTUM_CACHE_TTL_HOURS", 6),
            thirteenf_ttl_days: env_parse("THIRTEENF_TTL_DAYS", 30),
            earnings_call_ttl_days: env_parse("EARNINGS_CALL_TTL_DAYS", 30),
            analyst_aggregate_ttl_hours: env_parse("ANALYST_AGGREGATE_TTL_HOURS", 12),
            analyst_price_target_ttl_hours: env_parse("ANALYST_PRICE_TARGET_TTL_HOURS", 24),
            analyst_estimates_ttl_days: env_parse("ANALYST_ESTIMATES_TTL_DAYS", 7),
            analyst_ratings_ttl_hours: env_parse("ANALYST_RATINGS_TTL_HOURS", 24),
            analyst_grades_ttl_days: env_parse("ANALYST_GRADES_TTL_DAYS", 7),
            macro_cache_ttl_hours: env_parse("MACRO_CACHE_TTL_HOURS", 12),
            api_retry_attempts: env_parse("API_RETRY_ATTEMPTS", 3),
            api_retry_delay_ms: env_parse("API_RETRY_DELAY_MS", 1500),
            batch_concurrency: env_parse("BATCH_CONCURRENCY", 3),
            max_filings_for_llm: env_parse("MAX_FILINGS_FOR_LLM", 2),
            news_article_limit: env_parse("NEWS_ARTICLE_LIMIT", 4),
            macro_event_limit: env_parse("MACRO_EVENT_LIMIT", 8),
            llm_max_completion_tokens: env_parse("LLM_MAX_COMPLETION_TOKENS", 1600),
            momentum_strong_threshold: env_parse("MOMENTUM_STRONG_THRESHOLD", 70.0),
            momentum_severe_threshold: env_parse("MOMENTUM_SEVERE_THRESHOLD", 20.0),
            weak_signal_target_cap: env_parse("WEAK_SIGNAL_TARGET_CAP", 1.25),
            weak_signal_target_floor: env_parse("WEAK_SIGNAL_TARGET_FLOOR", 0.8),
            llm_target_max_multiplier: env_parse("LLM_TARGET_MAX_MULTIPLIER", 1.8),
            llm_target_min_multiplier: env_parse("LLM_TARGET_MIN_MULTIPLIER", 0.6),
            price_target_sample_threshold: env_parse("PRICE_TARGET_SAMPLE_THRESHOLD", 3),
            extended_window_days: env_parse("EXTENDED_WINDOW_DAYS", 45),
            insider_lookback_days: env_parse("INSIDER_LOOKBACK_DAYS", 90),
            insider_lookahead_days: env_parse("INSIDER_LOOKAHEAD_DAYS", 7),
            prewarm_tickers: env_list("PREWARM_TICKERS"),
            prewarm_interval_hours: env_parse("PREWARM_INTERVAL_HOURS", 6),
            prewarm_include_llm: env_parse("PREWARM_INCLUDE_LLM", false),
            fmp_api_key: env_opt("FMP_API_KEY"),
            finnhub_api_key: env_opt("FINNHUB_API_KEY"),
            alpha_vantage_api_key: env_opt("ALPHA_VANTAGE_API_KEY"),
            sec_user_agent: env_string(
                "SEC_USER_AGENT",
                "equity-research-engine admin@example.com",
            ),
            upstream_rate_limit_per_min: env_parse("UPSTREAM_RATE_LIMIT_PER_MIN", 300),
            upstream_max_concurrent: env_parse("UPSTREAM_MAX_CONCURRENT", 8),
            llm_api_key: env_opt("LLM_API_KEY").or_else(|| env_opt("OPENAI_API_KEY")),
            llm_base_url: env_string("LLM_BASE_URL", "https://api.openai.com/v1"),
            analysis_model: env_string("ANALYSIS_MODEL", "gpt-4o"),
            summary_model: env_string("SUMMARY_MODEL", "gpt-4o-mini"),
            fallback_model: env_string("FALLBACK_MODEL", "gpt-4o-mini"),
            prompt_version: env_string("PROMPT_VERSION", "v3"),
            results_db_path: env_string("RESULTS_DB_PATH", "data/research.db"),
            kv_cache_dir: PathBuf::from(env_string("KV_CACHE_DIR", "cache")),
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
        }
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm_api_key.is_some()
    }

    /// TTL applied to a stored bundle as a whole.
    pub fn analysis_ttl(&self, historical: bool) -> Duration {
        if historical {
            Duration::from_secs(self.historical_result_ttl_days * 24 * 3600)
        } else {
            Duration::from_secs(self.realtime_result_ttl_hours * 3600)
        }
    }

    pub fn news_ttl(&self) -> Duration {
        Duration::from_secs(self.news_cache_ttl_hours * 3600)
    }

    pub fn momentum_ttl(&self) -> Duration {
        Duration::from_secs(self.momentum_cache_ttl_hours * 3600)
    }

    pub fn filing_summary_ttl(&self) -> Duration {
        Duration::from_secs(self.filing_summary_ttl_days * 24 * 3600)
    }

    pub fn thirteenf_ttl(&self) -> Duration {
        Duration::from_secs(self.thirteenf_ttl_days * 24 * 3600)
    }

    pub fn earnings_call_ttl(&self) -> Duration {
        Duration::from_secs(self.earnings_call_ttl_days * 24 * 3600)
    }

    pub fn analyst_aggregate_ttl(&self) -> Duration {
        Duration::from_secs(self.analyst_aggregate_ttl_hours * 3600)
    }

    pub fn analyst_price_target_ttl(&self) -> Duration {
        Duration::from_secs(self.analyst_price_target_ttl_hours * 3600)
    }

    pub fn analyst_estimates_ttl(&self) -> Duration {
        Duration::from_secs(self.analyst_estimates_ttl_days * 24 * 3600)
    }

    pub fn analyst_ratings_ttl(&self) -> Duration {
        Duration::from_secs(self.analyst_ratings_ttl_hours * 3600)
    }

    pub fn analyst_grades_ttl(&self) -> Duration {
        Duration::from_secs(self.analyst_grades_ttl_days * 24 * 3600)
    }

    pub fn macro_ttl(&self) -> Duration {
        Duration::from_secs(self.macro_cache_ttl_hours * 3600)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.api_retry_delay_ms)
    }
}

impl Default for EngineConfig {
    /// Recognized-option defaults, independent of the environment. Used by
    /// tests.
    fn default() -> Self {
        Self {
            realtime_result_ttl_hours: 12,
            historical_result_ttl_days: 120,
            filing_summary_ttl_days: 180,
            news_cache_ttl_hours: 6,
            momentum_cache_ttl_hours: 6,
            thirteenf_ttl_days: 30,
            earnings_call_ttl_days: 30,
            analyst_aggregate_ttl_hours: 12,
            analyst_price_target_ttl_hours: 24,
            analyst_estimates_ttl_days: 7,
            analyst_ratings_ttl_hours: 24,
            analyst_grades_ttl_days: 7,
            macro_cache_ttl_hours: 12,
            api_retry_attempts: 3,
            api_retry_delay_ms: 1500,
            batch_concurrency: 3,
            max_filings_for_llm: 2,
            news_article_limit: 4,
            macro_event_limit: 8,
            llm_max_completion_tokens: 1600,
            momentum_strong_threshold: 70.0,
            momentum_severe_threshold: 20.0,
            weak_signal_target_cap: 1.25,
            weak_signal_target_floor: 0.8,
            llm_target_max_multiplier: 1.8,
            llm_target_min_multiplier: 0.6,
            price_target_sample_threshold: 3,
            extended_window_days: 45,
            insider_lookback_days: 90,
            insider_lookahead_days: 7,
            prewarm_tickers: Vec::new(),
            prewarm_interval_hours: 6,
            prewarm_include_llm: false,
            fmp_api_key: None,
            finnhub_api_key: None,
            alpha_vantage_api_key: None,
            sec_user_agent: "equity-research-engine admin@example.com".to_string(),
            upstream_rate_limit_per_min: 300,
            upstream_max_concurrent: 8,
            llm_api_key: None,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            analysis_model: "gpt-4o".to_string(),
            summary_model: "gpt-4o-mini".to_string(),
            fallback_model: "gpt-4o-mini".to_string(),
            prompt_version: "v3".to_string(),
            results_db_path: "data/research.db".to_string(),
            kv_cache_dir: PathBuf::from("cache"),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_options() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.realtime_result_ttl_hours, 12);
        assert_eq!(cfg.historical_result_ttl_days, 120);
        assert_eq!(cfg.filing_summary_ttl_days, 180);
        assert_eq!(cfg.api_retry_attempts, 3);
        assert_eq!(cfg.api_retry_delay_ms, 1500);
        assert_eq!(cfg.batch_concurrency, 3);
        assert_eq!(cfg.max_filings_for_llm, 2);
        assert_eq!(cfg.news_article_limit, 4);
        assert!((cfg.weak_signal_target_cap - 1.25).abs() < f64::EPSILON);
        assert!((cfg.llm_target_max_multiplier - 1.8).abs() < f64::EPSILON);
    }

    #[test]
    fn analysis_ttl_switches_on_history() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.analysis_ttl(false), Duration::from_secs(12 * 3600));
        assert_eq!(
            cfg.analysis_ttl(true),
            Duration::from_secs(120 * 24 * 3600)
        );
    }
}
