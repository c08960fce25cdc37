use chrono::NaiveDate;
use serde_json::Value;

use research_core::{Bar, ResearchError};

use crate::{pick_f64, Fetcher};

const BASE: &str = "https://www.alphavantage.co/query";

/// Alpha Vantage façade. Last resort in the historical price chain; only the
/// daily series is needed.
pub struct AlphaVantageClient {
    fetcher: Fetcher,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(fetcher: Fetcher, api_key: String) -> Self {
        Self { fetcher, api_key }
    }

    /// Recent daily bars, oldest first.
    pub async fn daily_bars(&self, symbol: &str) -> Result<Vec<Bar>, ResearchError> {
        let value = self
            .fetcher
            .get_json(
                BASE,
                &[
                    ("function".to_string(), "TIME_SERIES_DAILY".to_string()),
                    ("symbol".to_string(), symbol.to_string()),
                    ("outputsize".to_string(), "compact".to_string()),
                    ("apikey".to_string(), self.api_key.clone()),
                ],
                &[],
            )
            .await?;

        if let Some(note) = value.get("Note").or_else(|| value.get("Information")) {
            return Err(ResearchError::upstream(
                Some(429),
                format!("alpha vantage throttled: {note}"),
            ));
        }

        let series = value
            .get("Time Series (Daily)")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ResearchError::upstream(None, format!("alpha vantage: no series for {symbol}"))
            })?;

        let mut bars = Vec::with_capacity(series.len());
        for (day, fields) in series {
            let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") else {
                continue;
            };
            let (Some(open), Some(high), Some(low), Some(close)) = (
                pick_f64(fields, &["1. open"]),
                pick_f64(fields, &["2. high"]),
                pick_f64(fields, &["3. low"]),
                pick_f64(fields, &["4. close"]),
            ) else {
                continue;
            };
            bars.push(Bar {
                date,
                open,
                high,
                low,
                close,
                volume: pick_f64(fields, &["5. volume", "6. volume"]).unwrap_or(0.0),
            });
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Close at `date`, walking back up to `lookback` trading days.
    pub async fn close_at(
        &self,
        symbol: &str,
        date: NaiveDate,
        lookback: u32,
    ) -> Result<Option<(NaiveDate, f64)>, ResearchError> {
        let bars = self.daily_bars(symbol).await?;
        let earliest = date - chrono::Duration::days(lookback as i64);
        Ok(bars
            .iter()
            .rev()
            .find(|b| b.date <= date && b.date >= earliest)
            .map(|b| (b.date, b.close)))
    }
}
