use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};

use research_core::{
    with_retries, AnalystActions, GradeAction, HolderPosition, HoldingsSignal, InsiderActivity,
    InsiderTrade, InstitutionalSnapshot, ResearchError,
};

use crate::FragmentContext;

const TOP_HOLDER_COUNT: usize = 5;
const QUARTER_FALLBACKS: usize = 3;
const INSIDER_FETCH_LIMIT: usize = 100;
const INSIDER_TRADES_SHOWN: usize = 5;
const ACTION_FETCH_LIMIT: usize = 50;

/// Quarter end on or before `date`.
pub fn quarter_end_on_or_before(date: NaiveDate) -> NaiveDate {
    let (year, month_day) = match date.month() {
        1..=3 => (date.year() - 1, (12, 31)),
        4..=6 => (date.year(), (3, 31)),
        7..=9 => (date.year(), (6, 30)),
        _ => (date.year(), (9, 30)),
    };
    NaiveDate::from_ymd_opt(year, month_day.0, month_day.1).unwrap_or(date)
}

fn previous_quarter_end(quarter_end: NaiveDate) -> NaiveDate {
    quarter_end_on_or_before(quarter_end - ChronoDuration::days(1))
}

pub async fn build_institutional(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
) -> Result<InstitutionalSnapshot, ResearchError> {
    let kv_key = format!("institutional_{ticker}_{baseline}");
    if let Some(cached) = ctx.kv.read(&kv_key, ctx.config.thirteenf_ttl()).await {
        if research_cache::is_empty_sentinel(&cached) {
            return Ok(InstitutionalSnapshot::empty_with_error(
                "no 13F data in recent quarters",
            ));
        }
        if let Ok(snapshot) = serde_json::from_value::<InstitutionalSnapshot>(cached) {
            return Ok(snapshot);
        }
    }

    let Some(fmp) = ctx.fmp.clone() else {
        return Err(ResearchError::upstream(None, "13F vendor not configured"));
    };

    // Current quarter first, then up to three quarters back.
    let mut quarter = quarter_end_on_or_before(baseline);
    let mut snapshot = None;
    for _ in 0..=QUARTER_FALLBACKS {
        match fetch_quarter(ctx, &fmp, ticker, quarter).await {
            Ok(Some(found)) => {
                snapshot = Some(found);
                break;
            }
            Ok(None) => {
                tracing::debug!("no 13F aggregate for {ticker} at {quarter}");
            }
            Err(e) => {
                tracing::warn!("13F fetch failed for {ticker} at {quarter}: {e}");
            }
        }
        quarter = previous_quarter_end(quarter);
    }

    let Some(mut snapshot) = snapshot else {
        let _ = ctx
            .kv
            .write(&kv_key, &research_cache::empty_sentinel())
            .await;
        return Ok(InstitutionalSnapshot::empty_with_error(
            "no 13F data in recent quarters",
        ));
    };

    // Enrichments are best-effort: their absence never drops the fragment.
    let (insiders, actions) = tokio::join!(
        insider_activity(ctx, &fmp, ticker, baseline),
        analyst_actions(ctx, &fmp, ticker, baseline),
    );
    snapshot.insider_activity = insiders;
    snapshot.analyst_actions = actions;

    if let Ok(json) = serde_json::to_value(&snapshot) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Ok(snapshot)
}

async fn fetch_quarter(
    ctx: &FragmentContext,
    fmp: &std::sync::Arc<market_data::FmpClient>,
    ticker: &str,
    quarter_end: NaiveDate,
) -> Result<Option<InstitutionalSnapshot>, ResearchError> {
    let (summary, holders) = tokio::join!(
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.institutional_summary(ticker, quarter_end)
        }),
        with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
            fmp.institutional_holders(ticker, quarter_end)
        }),
    );

    let summary = summary?;
    let holders = holders.unwrap_or_else(|e| {
        tracing::warn!("holder rows failed for {ticker} at {quarter_end}: {e}");
        Vec::new()
    });

    if summary.is_none() && holders.is_empty() {
        return Ok(None);
    }

    Ok(Some(normalize_quarter(
        ticker,
        quarter_end,
        summary,
        holders,
    )))
}

/// Top-5 by position value, net shares from the summary when present (else
/// summed row changes), and the localized accumulation signal.
pub fn normalize_quarter(
    ticker: &str,
    quarter_end: NaiveDate,
    summary: Option<market_data::fmp::InstitutionalSummary>,
    mut holders: Vec<HolderPosition>,
) -> InstitutionalSnapshot {
    holders.sort_by(|a, b| {
        b.value
            .unwrap_or(0.0)
            .partial_cmp(&a.value.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top_holders: Vec<HolderPosition> = holders.iter().take(TOP_HOLDER_COUNT).cloned().collect();

    let summary_net = summary.as_ref().and_then(|s| s.metrics.net_shares);
    let net_shares = summary_net.unwrap_or_else(|| {
        holders.iter().filter_map(|h| h.change_shares).sum::<f64>()
    });
    let signal = HoldingsSignal::from_net_shares(net_shares);

    let as_of = summary
        .as_ref()
        .and_then(|s| s.as_of.clone())
        .unwrap_or_else(|| quarter_end.to_string());

    let text = format!(
        "{} 於 {} 季度之機構持股整體{}（淨變動 {:.0} 股），前 {} 大持有機構合計揭露於 13F。",
        ticker,
        as_of,
        signal.label,
        net_shares,
        top_holders.len()
    );

    InstitutionalSnapshot {
        as_of: Some(as_of),
        signal,
        top_holders,
        summary: Some(text),
        metrics: summary.map(|s| s.metrics),
        insider_activity: None,
        analyst_actions: None,
        error: None,
    }
}

fn is_buy_kind(kind: &str) -> bool {
    let k = kind.to_lowercase();
    k.contains("purchase") || k.contains("buy") || k == "a" || k.starts_with("p-")
}

fn is_sell_kind(kind: &str) -> bool {
    let k = kind.to_lowercase();
    k.contains("sale") || k.contains("sell") || k == "d" || k.starts_with("s-")
}

async fn insider_activity(
    ctx: &FragmentContext,
    fmp: &std::sync::Arc<market_data::FmpClient>,
    ticker: &str,
    baseline: NaiveDate,
) -> Option<InsiderActivity> {
    let trades = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        fmp.insider_trades(ticker, INSIDER_FETCH_LIMIT)
    })
    .await;
    let trades = match trades {
        Ok(trades) => trades,
        Err(e) => {
            tracing::warn!("insider trades failed for {ticker}: {e}");
            return None;
        }
    };
    let window_start = baseline - ChronoDuration::days(ctx.config.insider_lookback_days);
    let window_end = baseline + ChronoDuration::days(ctx.config.insider_lookahead_days);
    Some(summarize_insiders(trades, window_start, window_end))
}

/// Buy/sell statistics plus the last five trades inside the window.
pub fn summarize_insiders(
    trades: Vec<InsiderTrade>,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> InsiderActivity {
    let mut in_window: Vec<InsiderTrade> = trades
        .into_iter()
        .filter(|t| {
            t.date
                .map(|d| d >= window_start && d <= window_end)
                .unwrap_or(false)
        })
        .collect();
    in_window.sort_by(|a, b| b.date.cmp(&a.date));

    let mut activity = InsiderActivity {
        window_start: Some(window_start),
        window_end: Some(window_end),
        ..Default::default()
    };
    for trade in &in_window {
        let shares = trade.shares.unwrap_or(0.0);
        let kind = trade.kind.as_deref().unwrap_or("");
        if is_buy_kind(kind) {
            activity.buy_count += 1;
            activity.buy_shares += shares;
        } else if is_sell_kind(kind) {
            activity.sell_count += 1;
            activity.sell_shares += shares;
        }
    }
    activity.net_shares = activity.buy_shares - activity.sell_shares;
    activity.summary = if activity.net_shares > 0.0 {
        format!("內部人淨買超 {:.0} 股", activity.net_shares)
    } else if activity.net_shares < 0.0 {
        format!("內部人淨賣超 {:.0} 股", -activity.net_shares)
    } else {
        "內部人交易持平".to_string()
    };
    activity.last_trades = in_window.into_iter().take(INSIDER_TRADES_SHOWN).collect();
    activity
}

fn is_upgrade(action: &str) -> bool {
    let a = action.to_lowercase();
    a.contains("upgrade") || a.contains("raise") || a.contains("initiat") && a.contains("buy")
}

fn is_downgrade(action: &str) -> bool {
    let a = action.to_lowercase();
    a.contains("downgrade") || a.contains("lower") || a.contains("cut")
}

async fn analyst_actions(
    ctx: &FragmentContext,
    fmp: &std::sync::Arc<market_data::FmpClient>,
    ticker: &str,
    baseline: NaiveDate,
) -> Option<AnalystActions> {
    let actions = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        fmp.grade_actions(ticker, ACTION_FETCH_LIMIT)
    })
    .await;
    let actions = match actions {
        Ok(actions) => actions,
        Err(e) => {
            tracing::warn!("analyst actions failed for {ticker}: {e}");
            return None;
        }
    };
    Some(count_actions(actions, baseline))
}

/// Upgrade/downgrade counts in 7- and 30-day windows around the baseline.
pub fn count_actions(actions: Vec<GradeAction>, baseline: NaiveDate) -> AnalystActions {
    let mut counted = AnalystActions::default();
    for action in &actions {
        let Some(date) = action.date else { continue };
        let distance = (date - baseline).num_days().abs();
        if distance > 30 {
            continue;
        }
        let label = action.action.as_deref().unwrap_or("");
        let up = is_upgrade(label);
        let down = is_downgrade(label);
        if distance <= 7 {
            if up {
                counted.upgrades_7d += 1;
            }
            if down {
                counted.downgrades_7d += 1;
            }
        }
        if up {
            counted.upgrades_30d += 1;
        }
        if down {
            counted.downgrades_30d += 1;
        }
    }
    counted.recent = actions
        .into_iter()
        .filter(|a| {
            a.date
                .map(|d| (d - baseline).num_days().abs() <= 30)
                .unwrap_or(false)
        })
        .take(10)
        .collect();
    counted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(name: &str, value: f64, change: f64) -> HolderPosition {
        HolderPosition {
            holder: name.to_string(),
            shares: Some(1000.0),
            value: Some(value),
            change_shares: Some(change),
            change_pct: None,
            weight_pct: None,
        }
    }

    #[test]
    fn quarter_end_boundaries() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(quarter_end_on_or_before(d(2024, 2, 15)), d(2023, 12, 31));
        assert_eq!(quarter_end_on_or_before(d(2024, 5, 1)), d(2024, 3, 31));
        assert_eq!(quarter_end_on_or_before(d(2024, 8, 9)), d(2024, 6, 30));
        assert_eq!(quarter_end_on_or_before(d(2024, 11, 30)), d(2024, 9, 30));
        assert_eq!(previous_quarter_end(d(2024, 3, 31)), d(2023, 12, 31));
    }

    #[test]
    fn normalize_sorts_and_takes_top_five() {
        let holders = (0..8)
            .map(|i| holder(&format!("fund{i}"), (i as f64) * 100.0, 10.0))
            .collect();
        let snap = normalize_quarter(
            "NVDA",
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            None,
            holders,
        );
        assert_eq!(snap.top_holders.len(), 5);
        assert_eq!(snap.top_holders[0].holder, "fund7");
        // No summary row: net shares sum the row-level changes.
        assert!((snap.signal.net_shares - 80.0).abs() < f64::EPSILON);
        assert_eq!(snap.signal.label, "加碼");
    }

    #[test]
    fn summary_net_shares_wins_over_row_sum() {
        let summary = market_data::fmp::InstitutionalSummary {
            as_of: Some("2024-03-31".to_string()),
            metrics: research_core::OwnershipMetrics {
                net_shares: Some(-500.0),
                ..Default::default()
            },
        };
        let snap = normalize_quarter(
            "NVDA",
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            Some(summary),
            vec![holder("a", 10.0, 100.0)],
        );
        assert!((snap.signal.net_shares + 500.0).abs() < f64::EPSILON);
        assert_eq!(snap.signal.label, "減碼");
    }

    #[test]
    fn insider_window_and_classification() {
        let baseline = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let t = |days_ago: i64, kind: &str, shares: f64| InsiderTrade {
            date: Some(baseline - ChronoDuration::days(days_ago)),
            insider: None,
            title: None,
            kind: Some(kind.to_string()),
            shares: Some(shares),
            price: None,
        };
        let trades = vec![
            t(2, "P-Purchase", 1000.0),
            t(10, "S-Sale", 400.0),
            t(20, "S-Sale", 100.0),
            // Outside the 90-day lookback: ignored.
            t(200, "P-Purchase", 99999.0),
        ];
        let activity = summarize_insiders(
            trades,
            baseline - ChronoDuration::days(90),
            baseline + ChronoDuration::days(7),
        );
        assert_eq!(activity.buy_count, 1);
        assert_eq!(activity.sell_count, 2);
        assert!((activity.net_shares - 500.0).abs() < f64::EPSILON);
        assert!(activity.summary.contains("淨買超"));
        assert_eq!(activity.last_trades.len(), 3);
    }

    #[test]
    fn action_windows_are_centered() {
        let baseline = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let action = |offset: i64, label: &str| GradeAction {
            date: Some(baseline + ChronoDuration::days(offset)),
            firm: None,
            action: Some(label.to_string()),
            previous_grade: None,
            new_grade: None,
        };
        let actions = vec![
            action(-3, "Upgrade"),
            action(5, "Downgrade"),
            action(-20, "Downgrade"),
            action(40, "Upgrade"),
        ];
        let counted = count_actions(actions, baseline);
        assert_eq!(counted.upgrades_7d, 1);
        assert_eq!(counted.downgrades_7d, 1);
        assert_eq!(counted.upgrades_30d, 1);
        assert_eq!(counted.downgrades_30d, 2);
        assert_eq!(counted.recent.len(), 3);
    }
}
