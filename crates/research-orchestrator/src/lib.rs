use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use fragment_builders::{
    analyst, earnings, filings, institutional, macro_context, momentum, news, price,
    FragmentContext,
};
use llm_client::{AdaptiveLimits, LlmClient};
use research_cache::{ResultsStore, StoredBundle};
use research_core::{
    variant_full, variant_metrics, AnalysisBundle, AnalysisMode, AnalystMetrics, AnalystSignals,
    EngineConfig, FetchedData, FilingSummary, GuardrailFlags, InstitutionalSnapshot, LlmUsage,
    MacroContext, MarketSummary, MomentumMetrics, NewsDigest, RequestInput, ResearchError,
};

pub mod batch;
pub mod deferred;
pub mod guardrails;
pub mod payload;
pub mod prewarm;

pub use batch::{run_batch, BatchOutputRow, BatchRow, BatchRunner};
pub use deferred::DeferredQueue;

/// Bounded fan-out over per-filing summarization.
const FILING_POOL: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub mode: AnalysisMode,
    pub model: Option<String>,
}

/// Coordinates the fragment fan-out, the mode machine, payload assembly, the
/// LLM step and persistence. Owns all in-flight request state; assemblies for
/// one request key are serialized per process.
pub struct Orchestrator {
    config: EngineConfig,
    ctx: Arc<FragmentContext>,
    results: Arc<ResultsStore>,
    llm: Arc<LlmClient>,
    deferred: Arc<DeferredQueue>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

struct StalenessView {
    bundle_fresh: bool,
    news_fresh: bool,
    momentum_fresh: bool,
    filings_fresh: bool,
}

fn validate_ticker(raw: &str) -> Result<String, ResearchError> {
    let ticker = raw.trim().to_uppercase();
    if ticker.is_empty() || ticker.len() > 12 {
        return Err(ResearchError::Validation(format!(
            "invalid ticker: {raw:?}"
        )));
    }
    if !ticker
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ResearchError::Validation(format!(
            "invalid ticker: {raw:?}"
        )));
    }
    Ok(ticker)
}

fn parse_date(raw: &str) -> Result<NaiveDate, ResearchError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ResearchError::Validation(format!("invalid date: {raw:?}")))
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        ctx: Arc<FragmentContext>,
        results: Arc<ResultsStore>,
        llm: Arc<LlmClient>,
        deferred: Arc<DeferredQueue>,
    ) -> Self {
        Self {
            config,
            ctx,
            results,
            llm,
            deferred,
            key_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> Arc<FragmentContext> {
        self.ctx.clone()
    }

    pub fn results(&self) -> Arc<ResultsStore> {
        self.results.clone()
    }

    /// Clears the stored bundles for all three model variants and every KV
    /// entry whose decoded key contains the ticker. Returns
    /// (store rows deleted, cache files removed).
    pub async fn reset_cache(
        &self,
        ticker: &str,
        date: &str,
        model: Option<&str>,
    ) -> Result<(u64, usize), ResearchError> {
        let ticker = validate_ticker(ticker)?;
        let date = parse_date(date)?;
        let model = model.unwrap_or(&self.config.analysis_model);

        let deleted = self.results.delete_variants(&ticker, date, model).await?;
        let removed = self.ctx.kv.clear_matching(&ticker, None).await;
        tracing::info!(
            "reset cache for {ticker} {date}: {deleted} stored bundles, {removed} cache files"
        );
        Ok((deleted, removed))
    }

    /// The main entry point: produce (or reuse) the analysis bundle for
    /// `(ticker, date)` under the requested mode.
    pub async fn perform_analysis(
        self: &Arc<Self>,
        ticker: &str,
        date: &str,
        options: AnalysisOptions,
    ) -> Result<AnalysisBundle, ResearchError> {
        let ticker = validate_ticker(ticker)?;
        let date = parse_date(date)?;
        let today = Utc::now().date_naive();
        if date > today {
            return Err(ResearchError::Validation(format!(
                "date {date} is in the future"
            )));
        }

        let mode = options.mode;
        let model = options
            .model
            .unwrap_or_else(|| self.config.analysis_model.clone());
        let historical = date < today;

        if mode == AnalysisMode::Full && !self.llm.is_enabled() {
            return Err(ResearchError::LlmUnavailable(
                "full mode requires an LLM key".to_string(),
            ));
        }

        // One assembly per request key per process.
        let lock = self
            .key_locks
            .entry(format!("{ticker}|{date}|{model}"))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let analysis_ttl = self.config.analysis_ttl(historical);
        let stored = self.lookup_stored(&ticker, date, mode, &model).await?;

        if mode == AnalysisMode::CachedOnly {
            return match stored {
                Some(stored) if bundle_age(&stored) <= analysis_ttl => Ok(stored.bundle),
                _ => Err(ResearchError::CacheMiss),
            };
        }

        let staleness = stored
            .as_ref()
            .map(|s| self.staleness(s, analysis_ttl))
            .unwrap_or(StalenessView {
                bundle_fresh: false,
                news_fresh: false,
                momentum_fresh: false,
                filings_fresh: false,
            });

        // Fully fresh bundle: reuse without any fan-out.
        if let Some(stored) = &stored {
            let llm_satisfied = mode != AnalysisMode::Full || stored.bundle.analysis.is_some();
            if staleness.bundle_fresh
                && staleness.news_fresh
                && staleness.momentum_fresh
                && llm_satisfied
            {
                let bundle = stored.bundle.clone();
                if mode == AnalysisMode::Deferred && bundle.analysis.is_none() {
                    self.enqueue_completion(&ticker, date, &model);
                }
                return Ok(bundle);
            }
        }

        let bundle = self
            .assemble(&ticker, date, today, mode, &model, stored, staleness)
            .await?;
        Ok(bundle)
    }

    /// Exact variant first; a request that needs the LLM also accepts the
    /// legacy unsuffixed variant and rewrites it under the current one.
    async fn lookup_stored(
        &self,
        ticker: &str,
        date: NaiveDate,
        mode: AnalysisMode,
        model: &str,
    ) -> Result<Option<StoredBundle>, ResearchError> {
        match mode {
            AnalysisMode::CachedOnly => {
                for variant in [variant_full(model), variant_metrics(model), model.to_string()] {
                    if let Some(stored) = self.results.get_bundle(ticker, date, &variant).await? {
                        return Ok(Some(stored));
                    }
                }
                Ok(None)
            }
            AnalysisMode::Full => {
                if let Some(stored) = self
                    .results
                    .get_bundle(ticker, date, &variant_full(model))
                    .await?
                {
                    return Ok(Some(stored));
                }
                if let Some(stored) = self.results.get_bundle(ticker, date, model).await? {
                    // Legacy rows carried the LLM output under the bare model
                    // id; migrate in place.
                    self.results
                        .put_bundle(ticker, date, &variant_full(model), &stored.bundle)
                        .await?;
                    return Ok(Some(stored));
                }
                Ok(None)
            }
            AnalysisMode::MetricsOnly | AnalysisMode::Deferred => {
                for variant in [variant_metrics(model), variant_full(model)] {
                    if let Some(stored) = self.results.get_bundle(ticker, date, &variant).await? {
                        return Ok(Some(stored));
                    }
                }
                Ok(None)
            }
        }
    }

    fn staleness(&self, stored: &StoredBundle, analysis_ttl: Duration) -> StalenessView {
        let age = bundle_age(stored);
        StalenessView {
            bundle_fresh: age <= analysis_ttl,
            news_fresh: age <= self.config.news_ttl(),
            momentum_fresh: age <= self.config.momentum_ttl(),
            filings_fresh: age <= analysis_ttl,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn assemble(
        self: &Arc<Self>,
        ticker: &str,
        date: NaiveDate,
        today: NaiveDate,
        mode: AnalysisMode,
        model: &str,
        stored: Option<StoredBundle>,
        staleness: StalenessView,
    ) -> Result<AnalysisBundle, ResearchError> {
        let ctx = self.ctx.clone();
        let limits = self.llm.monitor.adaptive_limits(AdaptiveLimits {
            max_filings: self.config.max_filings_for_llm,
            news_limit: self.config.news_article_limit,
        });

        let stored_bundle = stored.map(|s| s.bundle);
        let reuse_news = staleness
            .news_fresh
            .then(|| stored_bundle.as_ref().and_then(|b| b.news.clone()))
            .flatten();
        let reuse_momentum = staleness
            .momentum_fresh
            .then(|| stored_bundle.as_ref().and_then(|b| b.momentum.clone()))
            .flatten();
        let reuse_fragments = staleness.bundle_fresh;
        let prior_summaries = staleness
            .filings_fresh
            .then(|| {
                stored_bundle
                    .as_ref()
                    .map(|b| b.per_filing_summaries.clone())
            })
            .flatten()
            .unwrap_or_default();

        let market_fut = price::build_market_summary(&ctx, ticker, date, today);
        let momentum_fut = self.momentum_fragment(ticker, date, reuse_momentum);
        let institutional_fut = self.institutional_fragment(
            ticker,
            date,
            reuse_fragments,
            stored_bundle.as_ref().and_then(|b| b.institutional.clone()),
        );
        let analyst_fut = self.analyst_fragment(
            ticker,
            date,
            today,
            reuse_fragments,
            stored_bundle.as_ref().and_then(|b| b.analyst_signals.clone()),
        );
        let earnings_fut = self.earnings_fragment(
            ticker,
            date,
            reuse_fragments,
            stored_bundle.as_ref().and_then(|b| b.earnings_call.clone()),
        );
        let macro_fut = self.macro_fragment(
            date,
            reuse_fragments,
            stored_bundle.as_ref().and_then(|b| b.macro_context.clone()),
        );
        let filings_fut = self.filings_fragment(ticker, date, limits.max_filings, prior_summaries);

        let (market_summary, momentum, institutional, analyst_signals, earnings_call, macro_ctx, (filings, per_filing_summaries)) = tokio::join!(
            market_fut,
            momentum_fut,
            institutional_fut,
            analyst_fut,
            earnings_fut,
            macro_fut,
            filings_fut,
        );

        // The news builder wants the company name for keyword extraction.
        let news = self
            .news_fragment(
                ticker,
                date,
                market_summary.name.as_deref(),
                limits.news_limit,
                reuse_news,
            )
            .await;

        let current_price = market_summary.price_meta.value;
        let analyst_metrics = derive_analyst_metrics(analyst_signals.as_ref(), current_price);
        let flags = guardrails::derive_flags(
            momentum.as_ref(),
            institutional.as_ref(),
            self.config.momentum_severe_threshold,
        );

        let payload = payload::compact_payload(&build_payload(
            ticker,
            date,
            &market_summary,
            momentum.as_ref(),
            institutional.as_ref(),
            analyst_signals.as_ref(),
            analyst_metrics.as_ref(),
            news.as_ref(),
            earnings_call.as_ref(),
            macro_ctx.as_ref(),
            &per_filing_summaries,
            flags,
        ));

        let mut bundle = AnalysisBundle {
            input: RequestInput {
                ticker: ticker.to_string(),
                date,
                mode,
                model: model.to_string(),
            },
            fetched: FetchedData {
                filings,
                finnhub_summary: Some(market_summary),
            },
            analysis: None,
            llm_usage: None,
            analysis_model: model.to_string(),
            news,
            momentum,
            institutional,
            earnings_call,
            analyst_signals,
            per_filing_summaries,
            analyst_metrics,
            macro_context: macro_ctx,
            inputs: Some(payload.clone()),
            generated_at: Utc::now(),
        };

        match mode {
            AnalysisMode::MetricsOnly | AnalysisMode::Deferred => {
                // Reuse any stored LLM output rather than calling out.
                if let Some(prior) = &stored_bundle {
                    bundle.analysis = prior.analysis.clone();
                    bundle.llm_usage = prior.llm_usage.clone();
                }
                let variant = variant_metrics(model);
                self.results
                    .put_bundle(ticker, date, &variant, &bundle)
                    .await?;
                if mode == AnalysisMode::Deferred
                    && bundle.analysis.is_none()
                    && self.llm.is_enabled()
                {
                    self.enqueue_completion(ticker, date, model);
                }
                Ok(bundle)
            }
            AnalysisMode::Full => {
                let outcome = self.llm.analyze(&payload, model).await?;
                let mut analysis = outcome.analysis;
                if let Some(price) = current_price {
                    guardrails::apply_target_guardrails(
                        &mut analysis,
                        price,
                        flags,
                        &self.config,
                    );
                }
                bundle.analysis = Some(analysis);
                bundle.llm_usage = outcome.usage.or_else(|| {
                    stored_bundle
                        .as_ref()
                        .and_then(|b| b.llm_usage.clone())
                        .or_else(|| Some(LlmUsage::default()))
                });
                let variant = variant_full(model);
                self.results
                    .put_bundle(ticker, date, &variant, &bundle)
                    .await?;
                Ok(bundle)
            }
            AnalysisMode::CachedOnly => Err(ResearchError::CacheMiss),
        }
    }

    fn enqueue_completion(self: &Arc<Self>, ticker: &str, date: NaiveDate, model: &str) {
        let orchestrator = self.clone();
        let ticker = ticker.to_string();
        let date = date.to_string();
        let model = model.to_string();
        let ticker_for_log = ticker.clone();
        let accepted = self.deferred.enqueue(async move {
            let options = AnalysisOptions {
                mode: AnalysisMode::Full,
                model: Some(model),
            };
            match orchestrator.perform_analysis(&ticker, &date, options).await {
                Ok(_) => tracing::info!("deferred completion finished for {ticker} {date}"),
                Err(e) => tracing::warn!("deferred completion failed for {ticker} {date}: {e}"),
            }
        });
        if !accepted {
            tracing::warn!("deferred queue unavailable, dropping completion for {ticker_for_log}");
        }
    }

    async fn momentum_fragment(
        &self,
        ticker: &str,
        date: NaiveDate,
        reuse: Option<MomentumMetrics>,
    ) -> Option<MomentumMetrics> {
        if let Some(reused) = reuse {
            return Some(reused);
        }
        match momentum::build_momentum(&self.ctx, ticker, date).await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!("momentum fragment failed for {ticker}: {e}");
                None
            }
        }
    }

    async fn institutional_fragment(
        &self,
        ticker: &str,
        date: NaiveDate,
        reuse: bool,
        stored: Option<InstitutionalSnapshot>,
    ) -> Option<InstitutionalSnapshot> {
        if reuse {
            if let Some(stored) = stored {
                return Some(stored);
            }
        }
        match institutional::build_institutional(&self.ctx, ticker, date).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("institutional fragment failed for {ticker}: {e}");
                Some(InstitutionalSnapshot::empty_with_error(e.to_string()))
            }
        }
    }

    async fn analyst_fragment(
        &self,
        ticker: &str,
        date: NaiveDate,
        today: NaiveDate,
        reuse: bool,
        stored: Option<AnalystSignals>,
    ) -> Option<AnalystSignals> {
        if reuse {
            if let Some(stored) = stored {
                return Some(stored);
            }
        }
        Some(analyst::build_analyst_signals(&self.ctx, ticker, date, today).await)
    }

    async fn earnings_fragment(
        &self,
        ticker: &str,
        date: NaiveDate,
        reuse: bool,
        stored: Option<research_core::EarningsCallSummary>,
    ) -> Option<research_core::EarningsCallSummary> {
        if reuse {
            if let Some(stored) = stored {
                return Some(stored);
            }
        }
        match earnings::build_earnings_call(&self.ctx, ticker, date).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("earnings fragment failed for {ticker}: {e}");
                None
            }
        }
    }

    async fn macro_fragment(
        &self,
        date: NaiveDate,
        reuse: bool,
        stored: Option<MacroContext>,
    ) -> Option<MacroContext> {
        if reuse {
            if let Some(stored) = stored {
                return Some(stored);
            }
        }
        match macro_context::build_macro(&self.ctx, date).await {
            Ok(context) => Some(context),
            Err(e) => {
                tracing::warn!("macro fragment failed: {e}");
                Some(MacroContext::empty_with_error(e.to_string()))
            }
        }
    }

    async fn news_fragment(
        &self,
        ticker: &str,
        date: NaiveDate,
        company_name: Option<&str>,
        article_limit: usize,
        reuse: Option<NewsDigest>,
    ) -> Option<NewsDigest> {
        if let Some(reused) = reuse {
            return Some(reused);
        }
        match news::build_news(&self.ctx, ticker, date, company_name, article_limit).await {
            Ok(digest) => Some(digest),
            Err(e) => {
                tracing::warn!("news fragment failed for {ticker}: {e}");
                Some(NewsDigest::empty_with_error(e.to_string()))
            }
        }
    }

    /// Filing index plus bounded per-filing summarization fan-out.
    async fn filings_fragment(
        &self,
        ticker: &str,
        date: NaiveDate,
        max_filings: usize,
        prior: Vec<FilingSummary>,
    ) -> (Vec<research_core::FilingRef>, Vec<FilingSummary>) {
        let filings = match filings::list_filings(&self.ctx, ticker, date).await {
            Ok(filings) => filings,
            Err(e) => {
                tracing::warn!("filing index failed for {ticker}: {e}");
                return (Vec::new(), prior);
            }
        };

        let semaphore = Arc::new(Semaphore::new(FILING_POOL));
        let mut handles = Vec::new();
        for filing in filings.iter().take(max_filings).cloned() {
            let ctx = self.ctx.clone();
            let ticker = ticker.to_string();
            let prior_match = filings::prior_summary(&prior, &filing).cloned();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                filings::build_filing_summary(&ctx, &ticker, &filing, prior_match.as_ref()).await
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(summary) = handle.await {
                summaries.push(summary);
            }
        }
        (filings, summaries)
    }
}

fn bundle_age(stored: &StoredBundle) -> Duration {
    (Utc::now() - stored.updated_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

fn derive_analyst_metrics(
    signals: Option<&AnalystSignals>,
    current_price: Option<f64>,
) -> Option<AnalystMetrics> {
    let signals = signals?;
    let price_target = signals.price_target_summary.as_ref();
    let target_mean = price_target.and_then(|pt| pt.target_mean);
    let target_vs_price_pct = match (target_mean, current_price) {
        (Some(mean), Some(price)) if price > 0.0 => Some((mean / price - 1.0) * 100.0),
        _ => None,
    };
    Some(AnalystMetrics {
        target_mean,
        target_vs_price_pct,
        rating_trend: signals.ratings.as_ref().and_then(|r| r.trend),
        consensus: signals
            .grades
            .as_ref()
            .and_then(|g| g.consensus.as_ref())
            .and_then(|c| c.consensus.clone()),
        grade_actions_30d: signals
            .grades
            .as_ref()
            .map(|g| g.recent_actions.len() as i64),
        target_confidence: price_target.and_then(|pt| pt.confidence),
    })
}

#[allow(clippy::too_many_arguments)]
fn build_payload(
    ticker: &str,
    date: NaiveDate,
    market: &MarketSummary,
    momentum: Option<&MomentumMetrics>,
    institutional: Option<&InstitutionalSnapshot>,
    analyst: Option<&AnalystSignals>,
    analyst_metrics: Option<&AnalystMetrics>,
    news: Option<&NewsDigest>,
    earnings: Option<&research_core::EarningsCallSummary>,
    macro_ctx: Option<&MacroContext>,
    filings: &[FilingSummary],
    flags: GuardrailFlags,
) -> Value {
    let momentum_block = momentum.map(|m| {
        json!({
            "score": m.score,
            "trend": m.trend_label,
            "returns": m.returns,
            "rsi14": m.rsi14,
            "volume_ratio": m.volume_ratio,
            "etf": m.etf,
        })
    });
    let institutional_block = institutional.map(|i| {
        json!({
            "signal": i.signal.label,
            "net_shares": i.signal.net_shares,
            "as_of": i.as_of,
            "insider_summary": i.insider_activity.as_ref().map(|a| a.summary.clone()),
            "upgrades_30d": i.analyst_actions.as_ref().map(|a| a.upgrades_30d),
            "downgrades_30d": i.analyst_actions.as_ref().map(|a| a.downgrades_30d),
        })
    });
    let analyst_block = analyst.map(|a| {
        json!({
            "price_target": a.price_target_summary,
            "rating_trend": a.ratings.as_ref().and_then(|r| r.trend),
            "consensus": a.grades.as_ref().and_then(|g| g.consensus.clone()),
        })
    });
    let news_block = news.map(|n| {
        json!({
            "sentiment": n.sentiment_label,
            "summary": n.summary,
            "events": n.supporting_events,
            "headlines": n.articles.iter().map(|a| a.title.clone()).collect::<Vec<_>>(),
        })
    });
    let filings_block: Vec<Value> = filings
        .iter()
        .map(|f| {
            json!({
                "form": f.form,
                "filing_date": f.filing_date,
                "mda_summary": f.mda_summary,
                "mda_excerpt": f.mda_excerpt,
            })
        })
        .collect();
    let valuation = json!({
        "market_cap": market.price_meta.market_cap,
        "year_high": market.price_meta.year_high,
        "year_low": market.price_meta.year_low,
        "target_upside_pct": analyst_metrics.and_then(|m| m.target_vs_price_pct),
    });
    let signal_hints = json!({
        "momentum_weak": momentum.map(|m| m.score <= 35.0),
        "momentum_strong": momentum.map(|m| m.score >= 65.0),
        "analyst_deteriorating": analyst_metrics
            .and_then(|m| m.rating_trend)
            .map(|t| t == research_core::RatingTrend::Deteriorating),
        "target_confidence": analyst_metrics.and_then(|m| m.target_confidence),
    });

    json!({
        "ticker": ticker,
        "date": date,
        "company": market.name,
        "sector": market.sector,
        "price": {
            "value": market.price_meta.value,
            "kind": market.price_meta.kind,
            "source": market.price_meta.source,
            "as_of": market.price_meta.as_of,
            "ma50": market.price_meta.ma50,
            "ma200": market.price_meta.ma200,
        },
        "momentum": momentum_block,
        "institutional": institutional_block,
        "analyst": analyst_block,
        "news": news_block,
        "earnings_call": earnings.map(|e| json!({
            "quarter": format!("{}Q{}", e.year, e.quarter),
            "summary": e.summary,
            "bullets": e.bullets,
        })),
        "filings": filings_block,
        "macro": macro_ctx.map(|m| json!({
            "treasury": m.treasury,
            "risk_premium": m.risk_premium,
            "events": m.events.iter().take(5).map(|e| e.event.clone()).collect::<Vec<_>>(),
        })),
        "valuation": valuation,
        "signal_hints": signal_hints,
        "guardrails": flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::TargetConfidence;

    #[test]
    fn ticker_validation() {
        assert_eq!(validate_ticker(" nvda ").unwrap(), "NVDA");
        assert_eq!(validate_ticker("BRK.B").unwrap(), "BRK.B");
        assert!(validate_ticker("").is_err());
        assert!(validate_ticker("NV DA").is_err());
        assert!(validate_ticker("WAY_TOO_LONG_TICKER").is_err());
    }

    #[test]
    fn date_validation() {
        assert!(parse_date("2024-01-02").is_ok());
        assert!(parse_date("01/02/2024").is_err());
        assert!(parse_date("not a date").is_err());
    }

    #[test]
    fn analyst_metrics_derivation() {
        let signals = AnalystSignals {
            price_target_summary: Some(research_core::PriceTargetSummary {
                target_mean: Some(150.0),
                confidence: Some(TargetConfidence::High),
                ..Default::default()
            }),
            ..Default::default()
        };
        let metrics = derive_analyst_metrics(Some(&signals), Some(100.0)).unwrap();
        assert_eq!(metrics.target_mean, Some(150.0));
        assert!((metrics.target_vs_price_pct.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(metrics.target_confidence, Some(TargetConfidence::High));

        assert!(derive_analyst_metrics(None, Some(100.0)).is_none());
    }

    #[test]
    fn payload_carries_guardrail_flags() {
        let market = MarketSummary {
            price_meta: research_core::PriceMeta {
                value: Some(100.0),
                as_of: "2024-01-02".to_string(),
                source: "fmp_historical".to_string(),
                kind: research_core::PriceKind::Historical,
                extended: None,
                year_high: None,
                year_low: None,
                ma50: None,
                ma200: None,
                intraday: None,
                market_cap: None,
            },
            name: Some("NVIDIA".to_string()),
            exchange: None,
            sector: Some("Technology".to_string()),
            industry: None,
        };
        let flags = GuardrailFlags {
            severe_momentum: true,
            selling_pressure: false,
        };
        let payload = build_payload(
            "NVDA",
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            &market,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            &[],
            flags,
        );
        assert_eq!(payload["guardrails"]["severe_momentum"], json!(true));
        assert_eq!(payload["ticker"], json!("NVDA"));
        let compacted = payload::compact_payload(&payload);
        // Nulls are gone after compaction but the flags survive.
        assert!(compacted.get("momentum").is_none());
        assert_eq!(compacted["guardrails"]["severe_momentum"], json!(true));
    }
}
