use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::OnceCell;

use research_core::{
    with_retries, AnalystEstimates, AnalystSignals, GradesOverview, PriceTargetSummary,
    RatingSnapshot, RatingTrend, RatingsOverview, TargetConfidence,
};

use crate::FragmentContext;

const RATING_TREND_WINDOW_DAYS: i64 = 30;
const HISTORICAL_RATINGS_LIMIT: usize = 60;
const GRADE_ACTIONS_LIMIT: usize = 20;
const GRADE_COUNT_MONTHS: usize = 12;
const ESTIMATE_QUARTERS: usize = 8;
const ESTIMATE_YEARS: usize = 5;

/// Aggregates the analyst sub-fragments. Concurrent requests for the same
/// ticker collapse onto the first computation.
pub async fn build_analyst_signals(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
    today: NaiveDate,
) -> AnalystSignals {
    let cell = ctx
        .analyst_inflight
        .entry(ticker.to_string())
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone();
    let signals = cell
        .get_or_init(|| compute_analyst_signals(ctx, ticker, baseline, today))
        .await
        .clone();
    ctx.analyst_inflight.remove(ticker);
    signals
}

async fn compute_analyst_signals(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
    today: NaiveDate,
) -> AnalystSignals {
    let aggregate_key = format!("analyst_signals_{ticker}_{baseline}");
    if let Some(cached) = ctx
        .kv
        .read(&aggregate_key, ctx.config.analyst_aggregate_ttl())
        .await
    {
        if let Ok(signals) = serde_json::from_value::<AnalystSignals>(cached) {
            return signals;
        }
    }

    let Some(fmp) = ctx.fmp.clone() else {
        return AnalystSignals::empty_with_error("analyst vendor not configured");
    };

    let extended = (today - baseline).num_days().abs() <= ctx.config.extended_window_days;

    let (price_target, ratings, estimates, grades) = tokio::join!(
        price_target_fragment(ctx, &fmp, ticker),
        ratings_fragment(ctx, &fmp, ticker),
        async {
            if extended {
                estimates_fragment(ctx, &fmp, ticker).await
            } else {
                None
            }
        },
        async {
            if extended {
                grades_fragment(ctx, &fmp, ticker).await
            } else {
                None
            }
        },
    );

    let mut signals = AnalystSignals {
        price_target_summary: price_target,
        estimates,
        ratings,
        grades,
        extended,
        error: None,
    };
    if signals.price_target_summary.is_none()
        && signals.ratings.is_none()
        && signals.estimates.is_none()
        && signals.grades.is_none()
    {
        signals.error = Some("all analyst sub-fragments unavailable".to_string());
    }

    if let Ok(json) = serde_json::to_value(&signals) {
        let _ = ctx.kv.write(&aggregate_key, &json).await;
    }
    signals
}

async fn price_target_fragment(
    ctx: &FragmentContext,
    fmp: &Arc<market_data::FmpClient>,
    ticker: &str,
) -> Option<PriceTargetSummary> {
    let kv_key = format!("analyst_pt_{ticker}");
    if let Some(cached) = ctx
        .kv
        .read(&kv_key, ctx.config.analyst_price_target_ttl())
        .await
    {
        if let Ok(summary) = serde_json::from_value::<PriceTargetSummary>(cached) {
            return Some(summary);
        }
    }

    let result = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        fmp.price_target_summary(ticker)
    })
    .await;

    match result {
        Ok(Some(mut summary)) => {
            summary.confidence = Some(target_confidence(
                &summary,
                ctx.config.price_target_sample_threshold,
            ));
            if let Ok(json) = serde_json::to_value(&summary) {
                let _ = ctx.kv.write(&kv_key, &json).await;
            }
            Some(summary)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("price target fetch failed for {ticker}: {e}");
            None
        }
    }
}

/// `high` iff the most recent window (month → quarter → year) containing at
/// least `sample_threshold` publishers has a non-null average.
pub fn target_confidence(summary: &PriceTargetSummary, sample_threshold: i64) -> TargetConfidence {
    let windows = [
        (summary.last_month_count, summary.last_month_avg),
        (summary.last_quarter_count, summary.last_quarter_avg),
        (summary.last_year_count, summary.last_year_avg),
    ];
    for (count, avg) in windows {
        if count.unwrap_or(0) >= sample_threshold {
            return if avg.is_some() {
                TargetConfidence::High
            } else {
                TargetConfidence::Low
            };
        }
    }
    TargetConfidence::Low
}

async fn ratings_fragment(
    ctx: &FragmentContext,
    fmp: &Arc<market_data::FmpClient>,
    ticker: &str,
) -> Option<RatingsOverview> {
    let kv_key = format!("analyst_ratings_{ticker}");
    if let Some(cached) = ctx
        .kv
        .read(&kv_key, ctx.config.analyst_ratings_ttl())
        .await
    {
        if let Ok(overview) = serde_json::from_value::<RatingsOverview>(cached) {
            return Some(overview);
        }
    }

    let snapshot = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        fmp.rating_snapshot(ticker)
    })
    .await;
    let historical = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        fmp.historical_ratings(ticker, HISTORICAL_RATINGS_LIMIT)
    })
    .await;

    let (snapshot, historical) = match (snapshot, historical) {
        (Ok(s), Ok(h)) => (s, h),
        (Ok(s), Err(e)) => {
            tracing::warn!("historical ratings failed for {ticker}: {e}");
            (s, Vec::new())
        }
        (Err(e), Ok(h)) => {
            tracing::warn!("rating snapshot failed for {ticker}: {e}");
            (None, h)
        }
        (Err(e), Err(_)) => {
            tracing::warn!("ratings unavailable for {ticker}: {e}");
            return None;
        }
    };

    let (trend, trend_delta) = rating_trend(&historical);
    let overview = RatingsOverview {
        snapshot,
        historical,
        trend,
        trend_delta,
        trend_window_days: RATING_TREND_WINDOW_DAYS,
    };
    if let Ok(json) = serde_json::to_value(&overview) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Some(overview)
}

/// Trend from the historical series: anchor = first entry at least 30 days
/// older than the latest; sign of (latest − anchor) score.
pub fn rating_trend(historical: &[RatingSnapshot]) -> (Option<RatingTrend>, Option<f64>) {
    match rating_trend_inner(historical) {
        Some((trend, delta)) => (Some(trend), Some(delta)),
        None => (None, None),
    }
}

fn rating_trend_inner(historical: &[RatingSnapshot]) -> Option<(RatingTrend, f64)> {
    let mut sorted: Vec<&RatingSnapshot> = historical.iter().filter(|r| r.date.is_some()).collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));

    let latest = sorted.first()?.to_owned();
    let latest_date = latest.date?;
    let anchor = sorted
        .iter()
        .find(|r| {
            r.date
                .map(|d| (latest_date - d).num_days() >= RATING_TREND_WINDOW_DAYS)
                .unwrap_or(false)
        })?
        .to_owned();

    let delta = latest.score? - anchor.score?;
    let trend = if delta > 0.0 {
        RatingTrend::Improving
    } else if delta < 0.0 {
        RatingTrend::Deteriorating
    } else {
        RatingTrend::Stable
    };
    Some((trend, delta))
}

async fn estimates_fragment(
    ctx: &FragmentContext,
    fmp: &Arc<market_data::FmpClient>,
    ticker: &str,
) -> Option<AnalystEstimates> {
    let kv_key = format!("analyst_estimates_{ticker}");
    if let Some(cached) = ctx
        .kv
        .read(&kv_key, ctx.config.analyst_estimates_ttl())
        .await
    {
        if let Ok(estimates) = serde_json::from_value::<AnalystEstimates>(cached) {
            return Some(estimates);
        }
    }

    let (quarterly, annual) = tokio::join!(
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.analyst_estimates(ticker, "quarter", ESTIMATE_QUARTERS)
        }),
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.analyst_estimates(ticker, "annual", ESTIMATE_YEARS)
        }),
    );

    let estimates = match (quarterly, annual) {
        (Ok(q), Ok(a)) => AnalystEstimates {
            quarterly: q,
            annual: a,
        },
        (Ok(q), Err(e)) => {
            tracing::warn!("annual estimates failed for {ticker}: {e}");
            AnalystEstimates {
                quarterly: q,
                annual: Vec::new(),
            }
        }
        (Err(e), Ok(a)) => {
            tracing::warn!("quarterly estimates failed for {ticker}: {e}");
            AnalystEstimates {
                quarterly: Vec::new(),
                annual: a,
            }
        }
        (Err(e), Err(_)) => {
            tracing::warn!("estimates unavailable for {ticker}: {e}");
            return None;
        }
    };

    if let Ok(json) = serde_json::to_value(&estimates) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Some(estimates)
}

async fn grades_fragment(
    ctx: &FragmentContext,
    fmp: &Arc<market_data::FmpClient>,
    ticker: &str,
) -> Option<GradesOverview> {
    let kv_key = format!("analyst_grades_{ticker}");
    if let Some(cached) = ctx
        .kv
        .read(&kv_key, ctx.config.analyst_grades_ttl())
        .await
    {
        if let Ok(grades) = serde_json::from_value::<GradesOverview>(cached) {
            return Some(grades);
        }
    }

    let (actions, counts, consensus) = tokio::join!(
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.grade_actions(ticker, GRADE_ACTIONS_LIMIT)
        }),
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.grade_historical_counts(ticker, GRADE_COUNT_MONTHS)
        }),
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.grade_consensus(ticker)
        }),
    );

    let recent_actions = actions.unwrap_or_else(|e| {
        tracing::warn!("grade actions failed for {ticker}: {e}");
        Vec::new()
    });
    let historical_counts = counts.unwrap_or_else(|e| {
        tracing::warn!("grade counts failed for {ticker}: {e}");
        Vec::new()
    });
    let consensus = consensus.unwrap_or_else(|e| {
        tracing::warn!("grade consensus failed for {ticker}: {e}");
        None
    });

    if recent_actions.is_empty() && historical_counts.is_empty() && consensus.is_none() {
        return None;
    }

    let grades = GradesOverview {
        recent_actions,
        historical_counts,
        consensus,
    };
    if let Ok(json) = serde_json::to_value(&grades) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Some(grades)
}
