use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::ResearchError;

/// Execution mode for one analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    #[default]
    Full,
    CachedOnly,
    MetricsOnly,
    Deferred,
}

impl AnalysisMode {
    /// Whether the synchronous path runs the LLM.
    pub fn runs_llm(&self) -> bool {
        matches!(self, AnalysisMode::Full)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Full => "full",
            AnalysisMode::CachedOnly => "cached-only",
            AnalysisMode::MetricsOnly => "metrics-only",
            AnalysisMode::Deferred => "deferred",
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "" | "full" => Ok(AnalysisMode::Full),
            "cached-only" => Ok(AnalysisMode::CachedOnly),
            "metrics-only" => Ok(AnalysisMode::MetricsOnly),
            "deferred" => Ok(AnalysisMode::Deferred),
            other => Err(ResearchError::Validation(format!(
                "unknown mode: {other}"
            ))),
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one analysis request. All cache keys derive from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub ticker: String,
    pub baseline_date: NaiveDate,
    pub model_variant: String,
}

impl RequestKey {
    pub fn new(ticker: &str, baseline_date: NaiveDate, model_variant: impl Into<String>) -> Self {
        Self {
            ticker: ticker.trim().to_uppercase(),
            baseline_date,
            model_variant: model_variant.into(),
        }
    }
}

/// `<model>__full`: bundle where the LLM step ran.
pub fn variant_full(model: &str) -> String {
    format!("{model}__full")
}

/// `<model>__metrics`: bundle assembled without a synchronous LLM call.
pub fn variant_metrics(model: &str) -> String {
    format!("{model}__metrics")
}

/// The request echo embedded in every bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInput {
    pub ticker: String,
    pub date: NaiveDate,
    pub mode: AnalysisMode,
    pub model: String,
}

/// One EOD bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Hot quote kept in the process cache and used to enrich price meta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change_pct: Option<f64>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub day_high: Option<f64>,
    #[serde(default)]
    pub day_low: Option<f64>,
    #[serde(default)]
    pub previous_close: Option<f64>,
    #[serde(default)]
    pub year_high: Option<f64>,
    #[serde(default)]
    pub year_low: Option<f64>,
    #[serde(default)]
    pub ma50: Option<f64>,
    #[serde(default)]
    pub ma200: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub extended: Option<bool>,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceKind {
    #[serde(rename = "real-time")]
    RealTime,
    #[serde(rename = "historical")]
    Historical,
}

/// Where the reference price came from and what it covers.
/// Invariant: `kind == Historical` iff the baseline date is in the past.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceMeta {
    pub value: Option<f64>,
    pub as_of: String,
    pub source: String,
    pub kind: PriceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<bool>,
    #[serde(default)]
    pub year_high: Option<f64>,
    #[serde(default)]
    pub year_low: Option<f64>,
    #[serde(default)]
    pub ma50: Option<f64>,
    #[serde(default)]
    pub ma200: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intraday: Option<IntradayRange>,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntradayRange {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
}

/// Market context block assembled around the reference price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub price_meta: PriceMeta,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

/// One regulatory filing as listed by the filings index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingRef {
    pub form: String,
    pub filing_date: NaiveDate,
    #[serde(default)]
    pub report_date: Option<NaiveDate>,
    pub url: String,
    #[serde(default)]
    pub accession: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Llm,
    Fallback,
}

/// Condensed MD&A narrative for one filing. Only fallback summaries carry the
/// raw excerpt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingSummary {
    pub form: String,
    pub filing_date: NaiveDate,
    #[serde(default)]
    pub report_date: Option<NaiveDate>,
    pub mda_summary: String,
    pub summary_kind: SummaryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mda_excerpt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Strong,
    Neutral,
    Weak,
}

impl Trend {
    pub fn label_zh(&self) -> &'static str {
        match self {
            Trend::Strong => "強勢",
            Trend::Neutral => "中性",
            Trend::Weak => "弱勢",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowReturns {
    pub m3: Option<f64>,
    pub m6: Option<f64>,
    pub m12: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovingAverages {
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceVsMa {
    pub above_sma50: Option<bool>,
    pub above_sma200: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtfProxy {
    pub symbol: String,
    pub return_3m: Option<f64>,
}

/// Price-momentum technicals over ~1 year of EOD bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumMetrics {
    pub score: f64,
    pub trend: Trend,
    pub trend_label: String,
    pub returns: WindowReturns,
    pub moving_averages: MovingAverages,
    pub rsi14: Option<f64>,
    pub atr14: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub price_vs_ma: PriceVsMa,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etf: Option<EtfProxy>,
    pub reference_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetConfidence {
    High,
    Low,
}

/// Consensus price-target aggregate with windowed publisher counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTargetSummary {
    pub target_mean: Option<f64>,
    pub target_high: Option<f64>,
    pub target_low: Option<f64>,
    pub target_median: Option<f64>,
    pub last_month_count: Option<i64>,
    pub last_month_avg: Option<f64>,
    pub last_quarter_count: Option<i64>,
    pub last_quarter_avg: Option<f64>,
    pub last_year_count: Option<i64>,
    pub last_year_avg: Option<f64>,
    pub publishers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<TargetConfidence>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatePeriod {
    pub date: Option<NaiveDate>,
    pub revenue_avg: Option<f64>,
    pub revenue_low: Option<f64>,
    pub revenue_high: Option<f64>,
    pub eps_avg: Option<f64>,
    pub eps_low: Option<f64>,
    pub eps_high: Option<f64>,
    pub analysts_revenue: Option<i64>,
    pub analysts_eps: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystEstimates {
    pub quarterly: Vec<EstimatePeriod>,
    pub annual: Vec<EstimatePeriod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub date: Option<NaiveDate>,
    pub rating: Option<String>,
    pub score: Option<f64>,
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingTrend {
    Improving,
    Stable,
    Deteriorating,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingsOverview {
    pub snapshot: Option<RatingSnapshot>,
    pub historical: Vec<RatingSnapshot>,
    pub trend: Option<RatingTrend>,
    pub trend_delta: Option<f64>,
    pub trend_window_days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradeAction {
    pub date: Option<NaiveDate>,
    pub firm: Option<String>,
    pub action: Option<String>,
    pub previous_grade: Option<String>,
    pub new_grade: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradeCounts {
    pub date: Option<NaiveDate>,
    pub strong_buy: Option<i64>,
    pub buy: Option<i64>,
    pub hold: Option<i64>,
    pub sell: Option<i64>,
    pub strong_sell: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradeConsensus {
    pub consensus: Option<String>,
    pub strong_buy: Option<i64>,
    pub buy: Option<i64>,
    pub hold: Option<i64>,
    pub sell: Option<i64>,
    pub strong_sell: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradesOverview {
    pub recent_actions: Vec<GradeAction>,
    pub historical_counts: Vec<GradeCounts>,
    pub consensus: Option<GradeConsensus>,
}

/// Analyst consensus signals. Each sub-fragment is independently cacheable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystSignals {
    pub price_target_summary: Option<PriceTargetSummary>,
    pub estimates: Option<AnalystEstimates>,
    pub ratings: Option<RatingsOverview>,
    pub grades: Option<GradesOverview>,
    /// Whether the extended sub-fragments (estimates, grades) were in range.
    pub extended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalystSignals {
    pub fn empty_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldingsDirection {
    Accumulating,
    Reducing,
    Flat,
}

impl HoldingsDirection {
    pub fn from_net_shares(net: f64) -> Self {
        if net > 0.0 {
            HoldingsDirection::Accumulating
        } else if net < 0.0 {
            HoldingsDirection::Reducing
        } else {
            HoldingsDirection::Flat
        }
    }

    pub fn label_zh(&self) -> &'static str {
        match self {
            HoldingsDirection::Accumulating => "加碼",
            HoldingsDirection::Reducing => "減碼",
            HoldingsDirection::Flat => "持平",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingsSignal {
    pub direction: HoldingsDirection,
    pub label: String,
    pub net_shares: f64,
}

impl HoldingsSignal {
    pub fn from_net_shares(net: f64) -> Self {
        let direction = HoldingsDirection::from_net_shares(net);
        Self {
            direction,
            label: direction.label_zh().to_string(),
            net_shares: net,
        }
    }
}

impl Default for HoldingsSignal {
    fn default() -> Self {
        Self::from_net_shares(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HolderPosition {
    pub holder: String,
    pub shares: Option<f64>,
    pub value: Option<f64>,
    pub change_shares: Option<f64>,
    pub change_pct: Option<f64>,
    pub weight_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnershipMetrics {
    pub investors_holding: Option<i64>,
    pub total_invested: Option<f64>,
    pub ownership_pct: Option<f64>,
    pub new_positions: Option<i64>,
    pub closed_positions: Option<i64>,
    pub increased_positions: Option<i64>,
    pub reduced_positions: Option<i64>,
    pub net_shares: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsiderTrade {
    pub date: Option<NaiveDate>,
    pub insider: Option<String>,
    pub title: Option<String>,
    pub kind: Option<String>,
    pub shares: Option<f64>,
    pub price: Option<f64>,
}

/// Insider buy/sell statistics over the request window plus the last trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsiderActivity {
    pub buy_count: i64,
    pub sell_count: i64,
    pub buy_shares: f64,
    pub sell_shares: f64,
    pub net_shares: f64,
    pub summary: String,
    pub last_trades: Vec<InsiderTrade>,
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystActions {
    pub upgrades_7d: i64,
    pub downgrades_7d: i64,
    pub upgrades_30d: i64,
    pub downgrades_30d: i64,
    pub recent: Vec<GradeAction>,
}

/// Institutional ownership snapshot for the best available quarter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstitutionalSnapshot {
    pub as_of: Option<String>,
    pub signal: HoldingsSignal,
    pub top_holders: Vec<HolderPosition>,
    pub summary: Option<String>,
    pub metrics: Option<OwnershipMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insider_activity: Option<InsiderActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst_actions: Option<AnalystActions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstitutionalSnapshot {
    pub fn empty_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentTone {
    Optimistic,
    Neutral,
    Pessimistic,
}

impl SentimentTone {
    pub fn label_zh(&self) -> &'static str {
        match self {
            SentimentTone::Optimistic => "樂觀",
            SentimentTone::Neutral => "中性",
            SentimentTone::Pessimistic => "悲觀",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "樂觀" | "optimistic" | "positive" => Some(SentimentTone::Optimistic),
            "中性" | "neutral" => Some(SentimentTone::Neutral),
            "悲觀" | "pessimistic" | "negative" => Some(SentimentTone::Pessimistic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Source priority weight used for dedup and ordering.
    pub weight: i32,
    #[serde(default)]
    pub tickers: Vec<String>,
}

/// News fragment: filtered articles plus the LLM sentiment pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsDigest {
    pub sentiment: Option<SentimentTone>,
    pub sentiment_label: Option<String>,
    pub summary: Option<String>,
    pub supporting_events: Vec<String>,
    pub keywords: Vec<String>,
    pub articles: Vec<NewsArticle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NewsDigest {
    pub fn empty_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsCallSummary {
    pub year: i32,
    pub quarter: u32,
    pub summary: String,
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreasuryYields {
    pub y10: Option<f64>,
    pub y2: Option<f64>,
    pub spread: Option<f64>,
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EconomicEvent {
    pub date: Option<NaiveDate>,
    pub event: String,
    pub country: Option<String>,
    pub impact: Option<String>,
    pub actual: Option<f64>,
    pub estimate: Option<f64>,
    pub previous: Option<f64>,
}

/// Macro backdrop for the window around the baseline date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacroContext {
    pub events: Vec<EconomicEvent>,
    pub treasury: Option<TreasuryYields>,
    pub risk_premium: Option<f64>,
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MacroContext {
    pub fn empty_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Derived analyst aggregates surfaced next to the raw signals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystMetrics {
    pub target_mean: Option<f64>,
    pub target_vs_price_pct: Option<f64>,
    pub rating_trend: Option<RatingTrend>,
    pub consensus: Option<String>,
    pub grade_actions_30d: Option<i64>,
    pub target_confidence: Option<TargetConfidence>,
}

/// Post-LLM clamp inputs derived from momentum + institutional fragments.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GuardrailFlags {
    pub severe_momentum: bool,
    pub selling_pressure: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl LlmUsage {
    pub fn add(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.input_cost += other.input_cost;
        self.output_cost += other.output_cost;
        self.total_cost += other.total_cost;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedData {
    pub filings: Vec<FilingRef>,
    pub finnhub_summary: Option<MarketSummary>,
}

/// The finished analysis bundle, persisted atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisBundle {
    pub input: RequestInput,
    pub fetched: FetchedData,
    /// Free-form LLM output, validated on receipt.
    pub analysis: Option<Value>,
    pub llm_usage: Option<LlmUsage>,
    pub analysis_model: String,
    pub news: Option<NewsDigest>,
    pub momentum: Option<MomentumMetrics>,
    pub institutional: Option<InstitutionalSnapshot>,
    pub earnings_call: Option<EarningsCallSummary>,
    pub analyst_signals: Option<AnalystSignals>,
    pub per_filing_summaries: Vec<FilingSummary>,
    pub analyst_metrics: Option<AnalystMetrics>,
    #[serde(rename = "macro")]
    pub macro_context: Option<MacroContext>,
    /// The compact numeric payload handed to the LLM.
    pub inputs: Option<Value>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_all_spellings() {
        assert_eq!("full".parse::<AnalysisMode>().unwrap(), AnalysisMode::Full);
        assert_eq!(
            "cached-only".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::CachedOnly
        );
        assert_eq!(
            "metrics_only".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::MetricsOnly
        );
        assert_eq!(
            "Deferred".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::Deferred
        );
        assert!("stream".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn holdings_signal_labels_follow_net_shares() {
        assert_eq!(HoldingsSignal::from_net_shares(1200.0).label, "加碼");
        assert_eq!(HoldingsSignal::from_net_shares(-5.0).label, "減碼");
        assert_eq!(HoldingsSignal::from_net_shares(0.0).label, "持平");
    }

    #[test]
    fn request_key_uppercases_ticker() {
        let key = RequestKey::new(
            " nvda ",
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            "gpt-4o__full",
        );
        assert_eq!(key.ticker, "NVDA");
    }

    #[test]
    fn macro_field_serializes_under_reserved_name() {
        let bundle = AnalysisBundle {
            input: RequestInput {
                ticker: "NVDA".into(),
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                mode: AnalysisMode::Full,
                model: "gpt-4o".into(),
            },
            fetched: FetchedData::default(),
            analysis: None,
            llm_usage: None,
            analysis_model: "gpt-4o".into(),
            news: None,
            momentum: None,
            institutional: None,
            earnings_call: None,
            analyst_signals: None,
            per_filing_summaries: Vec::new(),
            analyst_metrics: None,
            macro_context: Some(MacroContext::default()),
            inputs: None,
            generated_at: Utc::now(),
        };
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.get("macro").is_some());
        assert!(json.get("macro_context").is_none());
    }
}
