use chrono::{Duration as ChronoDuration, NaiveDate};
use serde_json::Value;
use std::time::Duration;

use market_data::fmp::CompanyProfile;
use research_core::{
    with_retries, IntradayRange, MarketSummary, PriceKind, PriceMeta, QuoteSnapshot,
};

use crate::{hot_quote_key, FragmentContext};

const PROFILE_KV_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
const HOT_QUOTE_TTL: Duration = Duration::from_secs(45);

/// How many trading days the historical chain walks backwards from the
/// baseline before giving up on a source.
const HISTORICAL_BACKOFF_DAYS: i64 = 7;

/// Company profile with a month-long KV cache; feeds both the market summary
/// and the momentum ETF proxy.
pub async fn company_profile(
    ctx: &FragmentContext,
    ticker: &str,
) -> Option<CompanyProfile> {
    let key = format!("profile_{ticker}");
    if let Some(cached) = ctx.kv.read(&key, PROFILE_KV_TTL).await {
        if research_cache::is_empty_sentinel(&cached) {
            return None;
        }
        return Some(CompanyProfile {
            name: cached.get("name").and_then(Value::as_str).map(String::from),
            sector: cached.get("sector").and_then(Value::as_str).map(String::from),
            industry: cached.get("industry").and_then(Value::as_str).map(String::from),
            exchange: cached.get("exchange").and_then(Value::as_str).map(String::from),
            market_cap: cached.get("market_cap").and_then(Value::as_f64),
        });
    }

    let fmp = ctx.fmp.as_ref()?;
    let profile = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        fmp.profile(ticker)
    })
    .await;

    match profile {
        Ok(profile) => {
            let json = serde_json::json!({
                "name": profile.name,
                "sector": profile.sector,
                "industry": profile.industry,
                "exchange": profile.exchange,
                "market_cap": profile.market_cap,
            });
            let _ = ctx.kv.write(&key, &json).await;
            Some(profile)
        }
        Err(e) => {
            tracing::debug!("profile fetch failed for {ticker}: {e}");
            let _ = ctx.kv.write(&key, &research_cache::empty_sentinel()).await;
            None
        }
    }
}

/// Builds the market summary around the reference price. Never fails the
/// request: total source exhaustion degrades to a priceless fallback meta.
pub async fn build_market_summary(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
    today: NaiveDate,
) -> MarketSummary {
    let historical = baseline < today;
    let price_meta = if historical {
        historical_price_meta(ctx, ticker, baseline).await
    } else {
        realtime_price_meta(ctx, ticker, baseline).await
    };

    let profile = company_profile(ctx, ticker).await;
    MarketSummary {
        price_meta,
        name: profile.as_ref().and_then(|p| p.name.clone()),
        exchange: profile.as_ref().and_then(|p| p.exchange.clone()),
        sector: profile.as_ref().and_then(|p| p.sector.clone()),
        industry: profile.as_ref().and_then(|p| p.industry.clone()),
    }
}

fn meta_from_quote(quote: &QuoteSnapshot, source: &str, kind: PriceKind) -> PriceMeta {
    PriceMeta {
        value: Some(quote.price),
        as_of: quote.as_of.to_rfc3339(),
        source: source.to_string(),
        kind,
        extended: quote.extended,
        year_high: quote.year_high,
        year_low: quote.year_low,
        ma50: quote.ma50,
        ma200: quote.ma200,
        intraday: Some(IntradayRange {
            open: quote.open,
            high: quote.day_high,
            low: quote.day_low,
            previous_close: quote.previous_close,
        }),
        market_cap: quote.market_cap,
    }
}

fn meta_from_close(date: NaiveDate, close: f64, source: &str) -> PriceMeta {
    PriceMeta {
        value: Some(close),
        as_of: date.to_string(),
        source: source.to_string(),
        kind: PriceKind::Historical,
        extended: None,
        year_high: None,
        year_low: None,
        ma50: None,
        ma200: None,
        intraday: None,
        market_cap: None,
    }
}

/// Last close on or before `baseline`, at most `HISTORICAL_BACKOFF_DAYS`
/// trading days back.
fn close_near(
    bars: &[research_core::Bar],
    baseline: NaiveDate,
) -> Option<(NaiveDate, f64)> {
    let mut candidates: Vec<_> = bars.iter().filter(|b| b.date <= baseline).collect();
    candidates.sort_by_key(|b| b.date);
    let take = HISTORICAL_BACKOFF_DAYS as usize;
    candidates
        .iter()
        .rev()
        .take(take)
        .find(|b| b.close > 0.0)
        .map(|b| (b.date, b.close))
}

async fn historical_price_meta(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
) -> PriceMeta {
    let kv_key = format!("price_meta_{ticker}_{baseline}");
    let ttl = ctx.config.analysis_ttl(true);
    if let Some(cached) = ctx.kv.read(&kv_key, ttl).await {
        if let Ok(meta) = serde_json::from_value::<PriceMeta>(cached) {
            return meta;
        }
    }

    let from = baseline - ChronoDuration::days(HISTORICAL_BACKOFF_DAYS * 2 + 7);

    if let Some(fmp) = &ctx.fmp {
        let bars = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.historical_bars(ticker, from, baseline)
        })
        .await;
        match bars {
            Ok(bars) => {
                if let Some((date, close)) = close_near(&bars, baseline) {
                    let meta = meta_from_close(date, close, "fmp_historical");
                    let _ = ctx.kv.write(&kv_key, &serde_json::to_value(&meta).unwrap_or_default()).await;
                    return meta;
                }
            }
            Err(e) => tracing::debug!("fmp historical failed for {ticker}: {e}"),
        }
    }

    let yahoo_bars = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        ctx.yahoo.chart_bars(ticker, from, baseline)
    })
    .await;
    match yahoo_bars {
        Ok(bars) => {
            if let Some((date, close)) = close_near(&bars, baseline) {
                let meta = meta_from_close(date, close, "yahoo_chart");
                let _ = ctx.kv.write(&kv_key, &serde_json::to_value(&meta).unwrap_or_default()).await;
                return meta;
            }
        }
        Err(e) => tracing::debug!("yahoo chart failed for {ticker}: {e}"),
    }

    if let Some(alpha) = &ctx.alpha {
        let close = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            alpha.close_at(ticker, baseline, HISTORICAL_BACKOFF_DAYS as u32)
        })
        .await;
        match close {
            Ok(Some((date, close))) => {
                let meta = meta_from_close(date, close, "alpha_daily");
                let _ = ctx.kv.write(&kv_key, &serde_json::to_value(&meta).unwrap_or_default()).await;
                return meta;
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("alpha vantage failed for {ticker}: {e}"),
        }
    }

    // Every historical source exhausted: fall back to whatever trades now,
    // keeping the historical kind so the invariant on baseline dates holds.
    tracing::warn!("no historical price for {ticker} at {baseline}, using real-time fallback");
    match realtime_quote_chain(ctx, ticker, baseline).await {
        Some((quote, _)) => {
            let mut meta = meta_from_quote(&quote, "real-time_fallback", PriceKind::Historical);
            meta.as_of = baseline.to_string();
            meta
        }
        None => PriceMeta {
            value: None,
            as_of: baseline.to_string(),
            source: "real-time_fallback".to_string(),
            kind: PriceKind::Historical,
            extended: None,
            year_high: None,
            year_low: None,
            ma50: None,
            ma200: None,
            intraday: None,
            market_cap: None,
        },
    }
}

async fn realtime_price_meta(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
) -> PriceMeta {
    match realtime_quote_chain(ctx, ticker, baseline).await {
        Some((quote, source)) => meta_from_quote(&quote, &source, PriceKind::RealTime),
        None => PriceMeta {
            value: None,
            as_of: baseline.to_string(),
            source: "real-time_fallback".to_string(),
            kind: PriceKind::RealTime,
            extended: None,
            year_high: None,
            year_low: None,
            ma50: None,
            ma200: None,
            intraday: None,
            market_cap: None,
        },
    }
}

/// Hot-quote table, then FMP, then Finnhub, then Yahoo.
async fn realtime_quote_chain(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
) -> Option<(QuoteSnapshot, String)> {
    let hot_key = hot_quote_key(ticker, baseline);
    if let Some(quote) = ctx.process.get_as::<QuoteSnapshot>(&hot_key) {
        return Some((quote, "real-time_cached".to_string()));
    }

    if let Some(fmp) = &ctx.fmp {
        match with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.quote(ticker)
        })
        .await
        {
            Ok(quote) => {
                ctx.process.put_as(&hot_key, &quote, HOT_QUOTE_TTL);
                return Some((quote, "real-time_fmp".to_string()));
            }
            Err(e) => tracing::debug!("fmp quote failed for {ticker}: {e}"),
        }
    }

    if let Some(finnhub) = &ctx.finnhub {
        match with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            finnhub.quote(ticker)
        })
        .await
        {
            Ok(quote) => {
                ctx.process.put_as(&hot_key, &quote, HOT_QUOTE_TTL);
                return Some((quote, "real-time_finnhub".to_string()));
            }
            Err(e) => tracing::debug!("finnhub quote failed for {ticker}: {e}"),
        }
    }

    match with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        ctx.yahoo.live_quote(ticker)
    })
    .await
    {
        Ok(quote) => {
            ctx.process.put_as(&hot_key, &quote, HOT_QUOTE_TTL);
            Some((quote, "real-time_yahoo".to_string()))
        }
        Err(e) => {
            tracing::debug!("yahoo quote failed for {ticker}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::Bar;

    fn bar(date: NaiveDate, close: f64) -> Bar {
        Bar {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn close_near_walks_back_trading_days() {
        let baseline = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let bars = vec![
            bar(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), 101.0),
            bar(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(), 102.0),
            // After the baseline: must be ignored.
            bar(NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(), 110.0),
        ];
        let (date, close) = close_near(&bars, baseline).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert!((close - 102.0).abs() < f64::EPSILON);
    }

    #[test]
    fn close_near_gives_up_beyond_backoff() {
        let baseline = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        // Nine stale bars; the walk stops after seven without a positive close.
        let bars: Vec<Bar> = (0..9)
            .map(|i| {
                bar(
                    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + ChronoDuration::days(i),
                    0.0,
                )
            })
            .collect();
        assert!(close_near(&bars, baseline).is_none());
    }
}
