use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use llm_client::LlmClient;
use market_data::{AlphaVantageClient, FinnhubClient, FmpClient, SecClient, YahooClient};
use research_cache::{BlobCache, ProcessCache};
use research_core::{AnalystSignals, EngineConfig};

pub mod analyst;
pub mod earnings;
pub mod filings;
pub mod indicators;
pub mod institutional;
pub mod macro_context;
pub mod momentum;
pub mod news;
pub mod price;

/// Everything a fragment pipeline needs: configuration, the cache tiers, the
/// vendor façades and the LLM. Shared by reference across the fan-out.
pub struct FragmentContext {
    pub config: EngineConfig,
    pub kv: Arc<dyn BlobCache>,
    pub process: Arc<ProcessCache>,
    pub fmp: Option<Arc<FmpClient>>,
    pub finnhub: Option<Arc<FinnhubClient>>,
    pub yahoo: Arc<YahooClient>,
    pub alpha: Option<Arc<AlphaVantageClient>>,
    pub sec: Arc<SecClient>,
    pub llm: Arc<LlmClient>,
    /// Collapses concurrent analyst-signal aggregations per ticker.
    pub(crate) analyst_inflight: DashMap<String, Arc<OnceCell<AnalystSignals>>>,
}

impl FragmentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        kv: Arc<dyn BlobCache>,
        process: Arc<ProcessCache>,
        fmp: Option<Arc<FmpClient>>,
        finnhub: Option<Arc<FinnhubClient>>,
        yahoo: Arc<YahooClient>,
        alpha: Option<Arc<AlphaVantageClient>>,
        sec: Arc<SecClient>,
        llm: Arc<LlmClient>,
    ) -> Self {
        Self {
            config,
            kv,
            process,
            fmp,
            finnhub,
            yahoo,
            alpha,
            sec,
            llm,
            analyst_inflight: DashMap::new(),
        }
    }
}

/// Process-cache key for the hot quote table.
pub fn hot_quote_key(ticker: &str, date: NaiveDate) -> String {
    format!("fh_quote_{}_{date}", ticker.to_uppercase())
}
