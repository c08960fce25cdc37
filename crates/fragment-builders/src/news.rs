use chrono::{Duration as ChronoDuration, NaiveDate};
use std::collections::HashMap;

use research_core::{with_retries, NewsArticle, NewsDigest, ResearchError};

use crate::FragmentContext;

const FMP_FETCH_LIMIT: usize = 30;
const NEWS_LOOKBACK_DAYS: i64 = 7;

/// Deterministic keyword list used when the LLM is unavailable.
pub fn fallback_keywords(ticker: &str) -> Vec<String> {
    vec![
        ticker.to_string(),
        format!("{ticker} earnings"),
        format!("{ticker} outlook"),
        "guidance".to_string(),
        "margin".to_string(),
    ]
}

pub async fn build_news(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
    company_name: Option<&str>,
    article_limit: usize,
) -> Result<NewsDigest, ResearchError> {
    let kv_key = format!("news_{ticker}_{baseline}");
    if let Some(cached) = ctx.kv.read(&kv_key, ctx.config.news_ttl()).await {
        if let Ok(digest) = serde_json::from_value::<NewsDigest>(cached) {
            return Ok(digest);
        }
    }

    let keywords = if ctx.llm.is_enabled() {
        match ctx.llm.extract_keywords(ticker, company_name).await {
            Ok(keywords) => keywords,
            Err(e) => {
                tracing::debug!("keyword extraction failed for {ticker}: {e}");
                fallback_keywords(ticker)
            }
        }
    } else {
        fallback_keywords(ticker)
    };

    let from = baseline - ChronoDuration::days(NEWS_LOOKBACK_DAYS);
    let (fmp_articles, finnhub_articles) = tokio::join!(
        async {
            match &ctx.fmp {
                Some(fmp) => with_retries(
                    ctx.config.api_retry_attempts,
                    ctx.config.retry_delay(),
                    || fmp.stock_news(ticker, FMP_FETCH_LIMIT),
                )
                .await
                .map_err(|e| {
                    tracing::warn!("fmp news failed for {ticker}: {e}");
                    e
                })
                .ok(),
                None => None,
            }
        },
        async {
            match &ctx.finnhub {
                Some(finnhub) => with_retries(
                    ctx.config.api_retry_attempts,
                    ctx.config.retry_delay(),
                    || finnhub.company_news(ticker, from, baseline),
                )
                .await
                .map_err(|e| {
                    tracing::warn!("finnhub news failed for {ticker}: {e}");
                    e
                })
                .ok(),
                None => None,
            }
        },
    );

    if fmp_articles.is_none() && finnhub_articles.is_none() {
        return Err(ResearchError::upstream(None, "all news sources failed"));
    }

    let mut articles = fmp_articles.unwrap_or_default();
    articles.extend(finnhub_articles.unwrap_or_default());
    let articles = select_articles(articles, ticker, article_limit);

    let mut digest = NewsDigest {
        sentiment: None,
        sentiment_label: None,
        summary: None,
        supporting_events: Vec::new(),
        keywords,
        articles,
        error: None,
    };

    if ctx.llm.is_enabled() && !digest.articles.is_empty() {
        match ctx.llm.news_sentiment(ticker, &digest.articles).await {
            Ok(sentiment) => {
                digest.sentiment = Some(sentiment.tone);
                digest.sentiment_label = Some(sentiment.label);
                digest.summary = Some(sentiment.summary);
                digest.supporting_events = sentiment.supporting_events;
            }
            Err(e) => tracing::warn!("news sentiment failed for {ticker}: {e}"),
        }
    }

    if let Ok(json) = serde_json::to_value(&digest) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Ok(digest)
}

/// Dedup by URL then title (highest-weight source wins), filter to articles
/// that actually tag the ticker, order by (weight, published_at) descending,
/// trim to the limit.
pub fn select_articles(
    articles: Vec<NewsArticle>,
    ticker: &str,
    limit: usize,
) -> Vec<NewsArticle> {
    let ticker = ticker.to_uppercase();
    let mut by_key: HashMap<String, NewsArticle> = HashMap::new();
    for article in articles {
        if !article.tickers.iter().any(|t| t.eq_ignore_ascii_case(&ticker)) {
            continue;
        }
        let key = if article.url.is_empty() {
            format!("title:{}", article.title.to_lowercase())
        } else {
            format!("url:{}", article.url.to_lowercase())
        };
        match by_key.get(&key) {
            Some(existing) if existing.weight >= article.weight => {}
            _ => {
                by_key.insert(key, article);
            }
        }
    }

    // A second pass collapses same-title articles that differ only by URL.
    let mut by_title: HashMap<String, NewsArticle> = HashMap::new();
    for article in by_key.into_values() {
        let key = article.title.trim().to_lowercase();
        match by_title.get(&key) {
            Some(existing) if existing.weight >= article.weight => {}
            _ => {
                by_title.insert(key, article);
            }
        }
    }

    let mut selected: Vec<NewsArticle> = by_title.into_values().collect();
    selected.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| b.published_at.cmp(&a.published_at))
    });
    selected.truncate(limit);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn article(title: &str, url: &str, weight: i32, tickers: &[&str], hour: u32) -> NewsArticle {
        NewsArticle {
            title: title.to_string(),
            url: url.to_string(),
            source: "test".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 2, hour, 0, 0).single(),
            summary: None,
            weight,
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn dedup_keeps_highest_weight_source() {
        let articles = vec![
            article("NVDA beats", "https://a/1", 1, &["NVDA"], 10),
            article("NVDA beats", "https://a/1", 2, &["NVDA"], 10),
        ];
        let selected = select_articles(articles, "NVDA", 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].weight, 2);
    }

    #[test]
    fn dedup_collapses_same_title_across_urls() {
        let articles = vec![
            article("Chip demand surges", "https://a/1", 2, &["NVDA"], 10),
            article("Chip demand surges", "https://b/2", 1, &["NVDA"], 11),
        ];
        let selected = select_articles(articles, "NVDA", 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].url, "https://a/1");
    }

    #[test]
    fn filters_to_target_ticker() {
        let articles = vec![
            article("About NVDA", "https://a/1", 1, &["NVDA", "AMD"], 10),
            article("About AMD only", "https://a/2", 1, &["AMD"], 10),
            article("Untagged market wrap", "https://a/3", 3, &[], 10),
        ];
        let selected = select_articles(articles, "nvda", 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].title, "About NVDA");
    }

    #[test]
    fn orders_by_weight_then_recency_and_trims() {
        let articles = vec![
            article("older heavy", "https://a/1", 3, &["NVDA"], 8),
            article("newer heavy", "https://a/2", 3, &["NVDA"], 12),
            article("light", "https://a/3", 1, &["NVDA"], 23),
            article("mid", "https://a/4", 2, &["NVDA"], 9),
        ];
        let selected = select_articles(articles, "NVDA", 3);
        assert_eq!(
            selected.iter().map(|a| a.title.as_str()).collect::<Vec<_>>(),
            vec!["newer heavy", "older heavy", "mid"]
        );
    }

    #[test]
    fn fallback_keyword_shape() {
        let keywords = fallback_keywords("NVDA");
        assert_eq!(
            keywords,
            vec!["NVDA", "NVDA earnings", "NVDA outlook", "guidance", "margin"]
        );
    }
}
