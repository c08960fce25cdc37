use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use research_core::AnalysisMode;
use research_orchestrator::AnalysisOptions;

use crate::{AppError, AppState};

const SELFTEST_TICKER: &str = "AAPL";

pub fn selftest_routes() -> Router<AppState> {
    Router::new().route("/selftest", get(run_selftest))
}

/// Exercises the orchestrator in-process for a fixed symbol at today's date.
/// Metrics-only, so it works without an LLM key and without prior cache.
async fn run_selftest(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let date = Utc::now().date_naive().to_string();
    let bundle = state
        .orchestrator
        .perform_analysis(
            SELFTEST_TICKER,
            &date,
            AnalysisOptions {
                mode: AnalysisMode::MetricsOnly,
                model: None,
            },
        )
        .await?;

    let price = bundle
        .fetched
        .finnhub_summary
        .as_ref()
        .and_then(|s| s.price_meta.value);
    Ok(Json(json!({
        "ok": true,
        "ticker": SELFTEST_TICKER,
        "date": date,
        "price": price,
        "price_source": bundle
            .fetched
            .finnhub_summary
            .as_ref()
            .map(|s| s.price_meta.source.clone()),
        "momentum_score": bundle.momentum.as_ref().map(|m| m.score),
        "news_articles": bundle.news.as_ref().map(|n| n.articles.len()),
        "analysis_present": bundle.analysis.is_some(),
    })))
}
