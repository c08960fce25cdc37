use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use research_core::{NewsArticle, QuoteSnapshot, ResearchError};

use crate::Fetcher;

const BASE: &str = "https://finnhub.io/api/v1";

/// Finnhub façade: live quote and company news.
pub struct FinnhubClient {
    fetcher: Fetcher,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    /// Current price.
    c: Option<f64>,
    /// Percent change on the day.
    dp: Option<f64>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    pc: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FinnhubArticle {
    #[serde(default)]
    datetime: i64,
    #[serde(default)]
    headline: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    related: String,
}

impl FinnhubClient {
    pub fn new(fetcher: Fetcher, api_key: String) -> Self {
        Self { fetcher, api_key }
    }

    pub async fn quote(&self, symbol: &str) -> Result<QuoteSnapshot, ResearchError> {
        let url = format!("{BASE}/quote");
        let value = self
            .fetcher
            .get_json(
                &url,
                &[
                    ("symbol".to_string(), symbol.to_string()),
                    ("token".to_string(), self.api_key.clone()),
                ],
                &[],
            )
            .await?;
        let quote: FinnhubQuote = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("finnhub quote decode: {e}")))?;
        let price = quote
            .c
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ResearchError::upstream(None, format!("finnhub: no quote for {symbol}")))?;
        Ok(QuoteSnapshot {
            symbol: symbol.to_uppercase(),
            price,
            change_pct: quote.dp,
            open: quote.o,
            day_high: quote.h,
            day_low: quote.l,
            previous_close: quote.pc,
            year_high: None,
            year_low: None,
            ma50: None,
            ma200: None,
            market_cap: None,
            extended: None,
            as_of: Utc::now(),
        })
    }

    pub async fn company_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NewsArticle>, ResearchError> {
        let url = format!("{BASE}/company-news");
        let value = self
            .fetcher
            .get_json(
                &url,
                &[
                    ("symbol".to_string(), symbol.to_string()),
                    ("from".to_string(), from.to_string()),
                    ("to".to_string(), to.to_string()),
                    ("token".to_string(), self.api_key.clone()),
                ],
                &[],
            )
            .await?;
        let articles: Vec<FinnhubArticle> = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("finnhub news decode: {e}")))?;
        Ok(articles
            .into_iter()
            .filter(|a| !a.headline.is_empty() && !a.url.is_empty())
            .map(|a| NewsArticle {
                title: a.headline,
                url: a.url,
                source: if a.source.is_empty() {
                    "finnhub".to_string()
                } else {
                    a.source
                },
                published_at: DateTime::<Utc>::from_timestamp(a.datetime, 0),
                summary: if a.summary.is_empty() {
                    None
                } else {
                    Some(a.summary)
                },
                weight: 1,
                tickers: a
                    .related
                    .split(',')
                    .map(|t| t.trim().to_uppercase())
                    .filter(|t| !t.is_empty())
                    .collect(),
            })
            .collect())
    }
}
