use chrono::{Duration as ChronoDuration, NaiveDate};

use research_core::{with_retries, MacroContext, ResearchError};

use crate::FragmentContext;

const WINDOW_BEFORE_DAYS: i64 = 7;
const WINDOW_AFTER_DAYS: i64 = 7;

/// Economic calendar + treasury curve + risk premium for the window around
/// the baseline. Not ticker-keyed, so one fetch serves a whole batch.
pub async fn build_macro(
    ctx: &FragmentContext,
    baseline: NaiveDate,
) -> Result<MacroContext, ResearchError> {
    let window_start = baseline - ChronoDuration::days(WINDOW_BEFORE_DAYS);
    let window_end = baseline + ChronoDuration::days(WINDOW_AFTER_DAYS);

    let kv_key = format!("macro_{window_start}_{window_end}");
    if let Some(cached) = ctx.kv.read(&kv_key, ctx.config.macro_ttl()).await {
        if let Ok(context) = serde_json::from_value::<MacroContext>(cached) {
            return Ok(context);
        }
    }

    let Some(fmp) = ctx.fmp.clone() else {
        return Err(ResearchError::upstream(None, "macro vendor not configured"));
    };

    let (events, treasury, risk_premium) = tokio::join!(
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.economic_calendar(window_start, window_end)
        }),
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.treasury_yields(window_start, window_end)
        }),
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.market_risk_premium()
        }),
    );

    let mut failures = 0;
    let events = events.unwrap_or_else(|e| {
        tracing::warn!("economic calendar failed: {e}");
        failures += 1;
        Vec::new()
    });
    let treasury = treasury.unwrap_or_else(|e| {
        tracing::warn!("treasury yields failed: {e}");
        failures += 1;
        None
    });
    let risk_premium = risk_premium.unwrap_or_else(|e| {
        tracing::warn!("risk premium failed: {e}");
        failures += 1;
        None
    });

    if failures == 3 {
        return Err(ResearchError::upstream(None, "all macro sources failed"));
    }

    let mut limited = events;
    limited.truncate(ctx.config.macro_event_limit);

    let context = MacroContext {
        events: limited,
        treasury,
        risk_premium,
        window_start: Some(window_start),
        window_end: Some(window_end),
        error: None,
    };

    if let Ok(json) = serde_json::to_value(&context) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Ok(context)
}
