use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use research_core::{Bar, QuoteSnapshot, ResearchError};

use crate::Fetcher;

const BASE: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Yahoo chart façade: EOD bars and a last-resort live quote, both served by
/// the same chart endpoint.
pub struct YahooClient {
    fetcher: Fetcher,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Vec<ChartResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "chartPreviousClose")]
    chart_previous_close: Option<f64>,
    #[serde(rename = "fiftyTwoWeekHigh")]
    fifty_two_week_high: Option<f64>,
    #[serde(rename = "fiftyTwoWeekLow")]
    fifty_two_week_low: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize, Default)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl YahooClient {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    async fn chart(
        &self,
        symbol: &str,
        params: &[(String, String)],
    ) -> Result<ChartResult, ResearchError> {
        let url = format!("{BASE}/{symbol}");
        let value = self.fetcher.get_json(&url, params, &[]).await?;
        let envelope: ChartEnvelope = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("yahoo chart decode: {e}")))?;
        if let Some(err) = envelope.chart.error {
            if !err.is_null() {
                return Err(ResearchError::upstream(
                    None,
                    format!("yahoo chart error for {symbol}: {err}"),
                ));
            }
        }
        envelope
            .chart
            .result
            .into_iter()
            .next()
            .ok_or_else(|| ResearchError::upstream(None, format!("yahoo: no chart for {symbol}")))
    }

    /// Daily bars inside `[from, to]`, oldest first. Rows with missing OHLC
    /// values are dropped.
    pub async fn chart_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, ResearchError> {
        let period1 = from
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        let period2 = to
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        let result = self
            .chart(
                symbol,
                &[
                    ("period1".to_string(), period1.to_string()),
                    ("period2".to_string(), period2.to_string()),
                    ("interval".to_string(), "1d".to_string()),
                ],
            )
            .await?;

        let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
        let mut bars = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            let Some(date) = DateTime::<Utc>::from_timestamp(*ts, 0).map(|dt| dt.date_naive())
            else {
                continue;
            };
            let (open, high, low, close) = match (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            ) {
                (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
                _ => continue,
            };
            bars.push(Bar {
                date,
                open,
                high,
                low,
                close,
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0.0),
            });
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    pub async fn live_quote(&self, symbol: &str) -> Result<QuoteSnapshot, ResearchError> {
        let result = self
            .chart(
                symbol,
                &[
                    ("range".to_string(), "1d".to_string()),
                    ("interval".to_string(), "1d".to_string()),
                ],
            )
            .await?;
        let price = result
            .meta
            .regular_market_price
            .filter(|p| *p > 0.0)
            .ok_or_else(|| {
                ResearchError::upstream(None, format!("yahoo: no market price for {symbol}"))
            })?;
        Ok(QuoteSnapshot {
            symbol: symbol.to_uppercase(),
            price,
            change_pct: None,
            open: None,
            day_high: None,
            day_low: None,
            previous_close: result.meta.chart_previous_close,
            year_high: result.meta.fifty_two_week_high,
            year_low: result.meta.fifty_two_week_low,
            ma50: None,
            ma200: None,
            market_cap: None,
            extended: None,
            as_of: Utc::now(),
        })
    }
}
