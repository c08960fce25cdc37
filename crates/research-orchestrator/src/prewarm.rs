use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use research_core::AnalysisMode;

use crate::{AnalysisOptions, Orchestrator};

/// Runs the configured ticker set through the orchestrator at startup and
/// every `prewarm_interval_hours` thereafter. Errors are logged, never fatal.
/// Returns `None` when no prewarm set is configured.
pub fn spawn_prewarmer(orchestrator: Arc<Orchestrator>) -> Option<JoinHandle<()>> {
    let config = orchestrator.config().clone();
    if config.prewarm_tickers.is_empty() {
        return None;
    }

    let mode = if config.prewarm_include_llm {
        AnalysisMode::Full
    } else {
        AnalysisMode::MetricsOnly
    };
    let interval = Duration::from_secs(config.prewarm_interval_hours.max(1) * 3600);

    Some(tokio::spawn(async move {
        loop {
            let date = Utc::now().date_naive().to_string();
            tracing::info!(
                "prewarming {} tickers for {date} ({mode})",
                config.prewarm_tickers.len()
            );
            for ticker in &config.prewarm_tickers {
                let options = AnalysisOptions {
                    mode,
                    model: None,
                };
                if let Err(e) = orchestrator.perform_analysis(ticker, &date, options).await {
                    tracing::warn!("prewarm failed for {ticker}: {e}");
                }
            }
            tokio::time::sleep(interval).await;
        }
    }))
}
