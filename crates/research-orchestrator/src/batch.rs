use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

use fragment_builders::{hot_quote_key, FragmentContext};
use research_core::{AnalysisBundle, AnalysisMode, ResearchError};

const PREFETCH_CHUNK: usize = 50;
const PREFETCH_QUOTE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRow {
    pub ticker: String,
    pub date: NaiveDate,
    pub model: Option<String>,
}

/// One CSV output row; column set is fixed regardless of what succeeded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutputRow {
    pub ticker: String,
    pub date: String,
    pub model: String,
    pub current_price: Option<f64>,
    pub llm_target_price: Option<f64>,
    pub recommendation: String,
    pub segment: String,
    pub quality_score: Option<f64>,
    pub news_sentiment: String,
    pub momentum_score: Option<f64>,
    pub trend_flag: String,
    pub institutional_signal: String,
    pub analyst_target_mean: Option<f64>,
    pub analyst_rating_trend: String,
    pub analyst_consensus: String,
}

/// The underlying orchestration call, injected so tests can count runs.
pub type BatchRunner = Arc<
    dyn Fn(
            BatchRow,
            AnalysisMode,
        ) -> Pin<Box<dyn Future<Output = Result<AnalysisBundle, ResearchError>> + Send>>
        + Send
        + Sync,
>;

/// Mode-scaled worker-pool size.
pub fn resolve_concurrency(mode: AnalysisMode, default: usize) -> usize {
    let default = default.max(1);
    match mode {
        AnalysisMode::MetricsOnly => default.min(2),
        AnalysisMode::CachedOnly => (default / 2).max(1),
        _ => default,
    }
}

fn memo_key(row: &BatchRow, mode: AnalysisMode) -> String {
    format!(
        "{}|{}|{}|{}",
        row.ticker,
        row.date,
        row.model.as_deref().unwrap_or("default"),
        mode
    )
}

/// Bounded worker pool with FIFO claim over the row list. Duplicate
/// `(ticker, date, model, mode)` tuples share one orchestration run through
/// the memo map; failed rows surface as `ERROR:<message>` rows.
pub async fn run_batch(
    rows: Vec<BatchRow>,
    mode: AnalysisMode,
    default_concurrency: usize,
    runner: BatchRunner,
) -> Vec<BatchOutputRow> {
    let concurrency = resolve_concurrency(mode, default_concurrency).min(rows.len().max(1));
    let rows = Arc::new(rows);
    let slots: Arc<Vec<Mutex<Option<BatchOutputRow>>>> =
        Arc::new((0..rows.len()).map(|_| Mutex::new(None)).collect());
    let memo: Arc<DashMap<String, Arc<OnceCell<Result<Arc<AnalysisBundle>, String>>>>> =
        Arc::new(DashMap::new());
    let next = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let rows = rows.clone();
        let slots = slots.clone();
        let memo = memo.clone();
        let next = next.clone();
        let runner = runner.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                if idx >= rows.len() {
                    break;
                }
                let row = rows[idx].clone();
                let key = memo_key(&row, mode);
                let cell = memo
                    .entry(key)
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone();
                let result = cell
                    .get_or_init(|| {
                        let row = row.clone();
                        let runner = runner.clone();
                        async move {
                            runner(row, mode)
                                .await
                                .map(Arc::new)
                                .map_err(|e| e.to_string())
                        }
                    })
                    .await
                    .clone();
                let output = output_row(&row, result);
                *slots[idx].lock().unwrap_or_else(|e| e.into_inner()) = Some(output);
            }
        }));
    }
    for worker in workers {
        let _ = worker.await;
    }

    slots
        .iter()
        .zip(rows.iter())
        .map(|(slot, row)| {
            slot.lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .unwrap_or_else(|| error_row(row, "worker aborted"))
        })
        .collect()
}

fn error_row(row: &BatchRow, message: &str) -> BatchOutputRow {
    BatchOutputRow {
        ticker: row.ticker.clone(),
        date: row.date.to_string(),
        model: row.model.clone().unwrap_or_default(),
        recommendation: format!("ERROR:{message}"),
        ..Default::default()
    }
}

fn analysis_str(analysis: Option<&Value>, path: &[&str]) -> String {
    let mut node = match analysis {
        Some(v) => v,
        None => return String::new(),
    };
    for key in path {
        match node.get(key) {
            Some(next) => node = next,
            None => return String::new(),
        }
    }
    node.as_str().unwrap_or_default().to_string()
}

fn analysis_f64(analysis: Option<&Value>, path: &[&str]) -> Option<f64> {
    let mut node = analysis?;
    for key in path {
        node = node.get(key)?;
    }
    node.as_f64()
}

fn output_row(row: &BatchRow, result: Result<Arc<AnalysisBundle>, String>) -> BatchOutputRow {
    let bundle = match result {
        Ok(bundle) => bundle,
        Err(message) => return error_row(row, &message),
    };
    let analysis = bundle.analysis.as_ref();

    BatchOutputRow {
        ticker: bundle.input.ticker.clone(),
        date: bundle.input.date.to_string(),
        model: bundle.analysis_model.clone(),
        current_price: bundle
            .fetched
            .finnhub_summary
            .as_ref()
            .and_then(|s| s.price_meta.value),
        llm_target_price: analysis_f64(analysis, &["action", "target_price"]),
        recommendation: analysis_str(analysis, &["action", "rating"]),
        segment: analysis_str(analysis, &["segments", "segment"]),
        quality_score: analysis_f64(analysis, &["segments", "quality_score"]),
        news_sentiment: bundle
            .news
            .as_ref()
            .and_then(|n| n.sentiment_label.clone())
            .unwrap_or_default(),
        momentum_score: bundle.momentum.as_ref().map(|m| m.score),
        trend_flag: bundle
            .momentum
            .as_ref()
            .map(|m| m.trend_label.clone())
            .unwrap_or_default(),
        institutional_signal: bundle
            .institutional
            .as_ref()
            .map(|i| i.signal.label.clone())
            .unwrap_or_default(),
        analyst_target_mean: bundle
            .analyst_metrics
            .as_ref()
            .and_then(|m| m.target_mean),
        analyst_rating_trend: bundle
            .analyst_metrics
            .as_ref()
            .and_then(|m| m.rating_trend)
            .map(|t| format!("{t:?}").to_lowercase())
            .unwrap_or_default(),
        analyst_consensus: bundle
            .analyst_metrics
            .as_ref()
            .and_then(|m| m.consensus.clone())
            .unwrap_or_default(),
    }
}

/// One multi-symbol quote request per 50 tickers for rows dated today or
/// later, warming the process hot-quote table before the pool starts.
pub async fn prefetch_quotes(ctx: &FragmentContext, rows: &[BatchRow], today: NaiveDate) {
    let Some(fmp) = &ctx.fmp else {
        return;
    };
    let mut tickers: Vec<String> = rows
        .iter()
        .filter(|row| row.date >= today)
        .map(|row| row.ticker.to_uppercase())
        .collect();
    tickers.sort();
    tickers.dedup();
    if tickers.is_empty() {
        return;
    }

    for chunk in tickers.chunks(PREFETCH_CHUNK) {
        match fmp.batch_quotes(chunk).await {
            Ok(quotes) => {
                for quote in quotes {
                    let key = hot_quote_key(&quote.symbol, today);
                    ctx.process.put_as(&key, &quote, PREFETCH_QUOTE_TTL);
                }
            }
            Err(e) => tracing::warn!("quote prefetch chunk failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use research_core::{FetchedData, RequestInput};

    fn bundle_for(row: &BatchRow) -> AnalysisBundle {
        AnalysisBundle {
            input: RequestInput {
                ticker: row.ticker.clone(),
                date: row.date,
                mode: AnalysisMode::MetricsOnly,
                model: "gpt-4o".to_string(),
            },
            fetched: FetchedData::default(),
            analysis: Some(serde_json::json!({
                "action": {"rating": "BUY", "target_price": 150.0},
                "segments": {"segment": "semis", "quality_score": 82.0},
            })),
            llm_usage: None,
            analysis_model: "gpt-4o".to_string(),
            news: None,
            momentum: None,
            institutional: None,
            earnings_call: None,
            analyst_signals: None,
            per_filing_summaries: Vec::new(),
            analyst_metrics: None,
            macro_context: None,
            inputs: None,
            generated_at: Utc::now(),
        }
    }

    fn row(ticker: &str) -> BatchRow {
        BatchRow {
            ticker: ticker.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            model: None,
        }
    }

    #[test]
    fn concurrency_scales_with_mode() {
        assert_eq!(resolve_concurrency(AnalysisMode::Full, 3), 3);
        assert_eq!(resolve_concurrency(AnalysisMode::MetricsOnly, 3), 2);
        assert_eq!(resolve_concurrency(AnalysisMode::MetricsOnly, 1), 1);
        assert_eq!(resolve_concurrency(AnalysisMode::CachedOnly, 3), 1);
        assert_eq!(resolve_concurrency(AnalysisMode::CachedOnly, 8), 4);
        assert_eq!(resolve_concurrency(AnalysisMode::Deferred, 0), 1);
    }

    #[tokio::test]
    async fn duplicate_rows_share_one_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let runner: BatchRunner = Arc::new(move |row, _mode| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(bundle_for(&row))
            })
        });

        let rows = vec![row("NVDA"), row("NVDA")];
        let output = run_batch(rows, AnalysisMode::MetricsOnly, 3, runner).await;

        assert_eq!(output.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(output[0].recommendation, "BUY");
        assert_eq!(output[1].recommendation, "BUY");
    }

    #[tokio::test]
    async fn one_output_row_per_input_row() {
        let runner: BatchRunner = Arc::new(|row, _mode| {
            Box::pin(async move {
                if row.ticker == "BAD" {
                    Err(ResearchError::Validation("unknown ticker".to_string()))
                } else {
                    Ok(bundle_for(&row))
                }
            })
        });

        let rows = vec![row("NVDA"), row("BAD"), row("AAPL")];
        let output = run_batch(rows, AnalysisMode::Full, 2, runner).await;

        assert_eq!(output.len(), 3);
        assert_eq!(output[0].ticker, "NVDA");
        assert!(output[1].recommendation.starts_with("ERROR:"));
        assert_eq!(output[2].recommendation, "BUY");
    }

    #[tokio::test]
    async fn errors_are_memoized_too() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let runner: BatchRunner = Arc::new(move |_row, _mode| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResearchError::upstream(Some(500), "vendor down"))
            })
        });

        let rows = vec![row("NVDA"), row("NVDA"), row("NVDA")];
        let output = run_batch(rows, AnalysisMode::Full, 3, runner).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(output.iter().all(|r| r.recommendation.starts_with("ERROR:")));
    }
}
