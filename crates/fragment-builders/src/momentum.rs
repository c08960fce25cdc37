use chrono::{Duration as ChronoDuration, NaiveDate};

use research_core::{
    with_retries, Bar, EtfProxy, MomentumMetrics, MovingAverages, PriceVsMa, ResearchError, Trend,
    WindowReturns,
};

use crate::indicators::{atr, last_sma, rsi, trailing_return};
use crate::price::company_profile;
use crate::FragmentContext;

/// Minimum history for a full computation: one trading year.
const MIN_BARS: usize = 252;

/// Static sector → proxy-ETF table; SPY when the sector is unknown.
const SECTOR_ETFS: &[(&str, &str)] = &[
    ("Technology", "XLK"),
    ("Communication Services", "XLC"),
    ("Consumer Cyclical", "XLY"),
    ("Consumer Defensive", "XLP"),
    ("Energy", "XLE"),
    ("Financial Services", "XLF"),
    ("Healthcare", "XLV"),
    ("Industrials", "XLI"),
    ("Basic Materials", "XLB"),
    ("Real Estate", "XLRE"),
    ("Utilities", "XLU"),
];

const FALLBACK_ETF: &str = "SPY";

pub fn etf_for_sector(sector: Option<&str>) -> &'static str {
    sector
        .and_then(|s| {
            SECTOR_ETFS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(s))
                .map(|(_, etf)| *etf)
        })
        .unwrap_or(FALLBACK_ETF)
}

pub async fn build_momentum(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
) -> Result<MomentumMetrics, ResearchError> {
    let kv_key = format!("momentum_{ticker}_{baseline}");
    if let Some(cached) = ctx.kv.read(&kv_key, ctx.config.momentum_ttl()).await {
        if let Ok(metrics) = serde_json::from_value::<MomentumMetrics>(cached) {
            return Ok(metrics);
        }
    }

    let bars = fetch_bars(ctx, ticker, baseline).await?;
    if bars.len() < 30 {
        return Err(ResearchError::upstream(
            None,
            format!("insufficient history for {ticker}: {} bars", bars.len()),
        ));
    }

    let mut metrics = compute_momentum(&bars, baseline);

    // Sector proxy: static table keyed on the company profile's sector.
    let sector = company_profile(ctx, ticker).await.and_then(|p| p.sector);
    let etf_symbol = etf_for_sector(sector.as_deref());
    let etf_return = match fetch_bars(ctx, etf_symbol, baseline).await {
        Ok(etf_bars) => {
            let closes: Vec<f64> = etf_bars.iter().map(|b| b.close).collect();
            trailing_return(&closes, 63)
        }
        Err(e) => {
            tracing::debug!("etf proxy bars failed for {etf_symbol}: {e}");
            None
        }
    };
    metrics.etf = Some(EtfProxy {
        symbol: etf_symbol.to_string(),
        return_3m: etf_return,
    });

    if let Ok(json) = serde_json::to_value(&metrics) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Ok(metrics)
}

async fn fetch_bars(
    ctx: &FragmentContext,
    symbol: &str,
    baseline: NaiveDate,
) -> Result<Vec<Bar>, ResearchError> {
    // 550 calendar days comfortably covers 252 trading days.
    let from = baseline - ChronoDuration::days(550);

    if let Some(fmp) = &ctx.fmp {
        match with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.historical_bars(symbol, from, baseline)
        })
        .await
        {
            Ok(bars) if !bars.is_empty() => return Ok(bars),
            Ok(_) => {}
            Err(e) => tracing::debug!("fmp bars failed for {symbol}: {e}"),
        }
    }

    with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        ctx.yahoo.chart_bars(symbol, from, baseline)
    })
    .await
}

/// Pure computation over bars up to the baseline.
pub fn compute_momentum(bars: &[Bar], baseline: NaiveDate) -> MomentumMetrics {
    let bars: Vec<&Bar> = bars.iter().filter(|b| b.date <= baseline).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let close = closes.last().copied().unwrap_or(0.0);

    if bars.len() < MIN_BARS {
        tracing::debug!(
            "momentum computed on {} bars (full window is {MIN_BARS})",
            bars.len()
        );
    }

    let returns = WindowReturns {
        m3: trailing_return(&closes, 63),
        m6: trailing_return(&closes, 126),
        m12: trailing_return(&closes, 252),
    };
    let moving_averages = MovingAverages {
        sma20: last_sma(&closes, 20),
        sma50: last_sma(&closes, 50),
        sma200: last_sma(&closes, 200),
    };
    let rsi14 = rsi(&closes, 14).last().copied();
    let owned: Vec<Bar> = bars.iter().map(|b| (*b).clone()).collect();
    let atr14 = atr(&owned, 14);

    let volume_ratio = match (avg_tail(&volumes, 5), avg_tail(&volumes, 30)) {
        (Some(v5), Some(v30)) if v30 > 0.0 => Some(v5 / v30),
        _ => None,
    };

    let above_sma50 = moving_averages.sma50.map(|ma| close > ma);
    let above_sma200 = moving_averages.sma200.map(|ma| close > ma);

    let trend = match (above_sma50, above_sma200, returns.m3) {
        (Some(true), Some(true), Some(r3)) if r3 > 0.10 => Trend::Strong,
        (Some(false), Some(false), Some(r3)) if r3 < -0.05 => Trend::Weak,
        _ => Trend::Neutral,
    };

    let mut contributions = 0.0;
    if let Some(r3) = returns.m3 {
        contributions += (r3 * 200.0).clamp(-20.0, 20.0);
    }
    if let Some(r6) = returns.m6 {
        contributions += (r6 * 150.0).clamp(-15.0, 15.0);
    }
    if let Some(r12) = returns.m12 {
        contributions += (r12 * 100.0).clamp(-10.0, 10.0);
    }
    if let Some(r) = rsi14 {
        contributions += ((r - 50.0) / 2.0).clamp(-10.0, 10.0);
    }
    if let Some(vr) = volume_ratio {
        contributions += ((vr - 1.0) * 20.0).clamp(-10.0, 10.0);
    }
    if let Some(above) = above_sma50 {
        contributions += if above { 5.0 } else { -5.0 };
    }
    if let Some(above) = above_sma200 {
        contributions += if above { 5.0 } else { -5.0 };
    }
    let score = (50.0 + contributions).clamp(0.0, 100.0);

    MomentumMetrics {
        score,
        trend,
        trend_label: trend.label_zh().to_string(),
        returns,
        moving_averages,
        rsi14,
        atr14,
        volume_ratio,
        price_vs_ma: PriceVsMa {
            above_sma50,
            above_sma200,
        },
        etf: None,
        reference_date: bars.last().map(|b| b.date).unwrap_or(baseline),
    }
}

fn avg_tail(data: &[f64], n: usize) -> Option<f64> {
    if data.len() < n || n == 0 {
        return None;
    }
    Some(data[data.len() - n..].iter().sum::<f64>() / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_bars(n: usize, start: f64, daily_gain: f64) -> Vec<Bar> {
        let first = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..n)
            .map(|i| {
                let close = start * (1.0 + daily_gain).powi(i as i32);
                Bar {
                    date: first + ChronoDuration::days(i as i64),
                    open: close * 0.995,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn uptrend_scores_high_and_strong() {
        let bars = synthetic_bars(300, 100.0, 0.002);
        let baseline = bars.last().unwrap().date;
        let metrics = compute_momentum(&bars, baseline);

        assert_eq!(metrics.trend, Trend::Strong);
        assert_eq!(metrics.trend_label, "強勢");
        assert!(metrics.score > 70.0);
        assert!(metrics.score <= 100.0);
        assert_eq!(metrics.price_vs_ma.above_sma50, Some(true));
    }

    #[test]
    fn downtrend_scores_low_and_weak() {
        let bars = synthetic_bars(300, 400.0, -0.002);
        let baseline = bars.last().unwrap().date;
        let metrics = compute_momentum(&bars, baseline);

        assert_eq!(metrics.trend, Trend::Weak);
        assert_eq!(metrics.trend_label, "弱勢");
        assert!(metrics.score < 30.0);
        assert!(metrics.score >= 0.0);
    }

    #[test]
    fn score_is_always_clamped() {
        for gain in [-0.02, -0.005, 0.0, 0.005, 0.02] {
            let bars = synthetic_bars(300, 100.0, gain);
            let baseline = bars.last().unwrap().date;
            let metrics = compute_momentum(&bars, baseline);
            assert!((0.0..=100.0).contains(&metrics.score), "gain {gain}");
        }
    }

    #[test]
    fn flat_series_is_neutral() {
        let bars = synthetic_bars(300, 100.0, 0.0);
        let baseline = bars.last().unwrap().date;
        let metrics = compute_momentum(&bars, baseline);
        assert_eq!(metrics.trend, Trend::Neutral);
    }

    #[test]
    fn sector_table_covers_fallback() {
        assert_eq!(etf_for_sector(Some("Technology")), "XLK");
        assert_eq!(etf_for_sector(Some("technology")), "XLK");
        assert_eq!(etf_for_sector(Some("Cryptofarming")), "SPY");
        assert_eq!(etf_for_sector(None), "SPY");
    }

    #[test]
    fn bars_after_baseline_are_ignored() {
        let mut bars = synthetic_bars(300, 100.0, 0.001);
        let baseline = bars[250].date;
        // Poison the tail with a crash that postdates the baseline.
        for bar in bars.iter_mut().skip(260) {
            bar.close = 1.0;
        }
        let metrics = compute_momentum(&bars, baseline);
        assert_eq!(metrics.reference_date, baseline);
        assert!(metrics.score > 50.0);
    }
}
