use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;

use research_core::{AnalysisMode, ResearchError};
use research_orchestrator::batch::prefetch_quotes;
use research_orchestrator::{run_batch, AnalysisOptions, BatchRow, BatchRunner};

use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub mode: Option<String>,
}

pub fn batch_routes() -> Router<AppState> {
    Router::new().route("/api/batch", post(run_batch_endpoint))
}

/// CSV in, CSV out. The executor itself only sees parsed rows; all
/// spreadsheet handling stays at this boundary.
async fn run_batch_endpoint(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mode: AnalysisMode = query
        .mode
        .as_deref()
        .unwrap_or("full")
        .parse()
        .map_err(AppError::from)?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError(ResearchError::Validation(format!("bad multipart body: {e}")))
    })? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload.csv").to_string();
            let bytes = field.bytes().await.map_err(|e| {
                AppError(ResearchError::Validation(format!("unreadable upload: {e}")))
            })?;
            upload = Some((file_name, bytes.to_vec()));
            break;
        }
    }
    let (file_name, bytes) = upload.ok_or_else(|| {
        AppError(ResearchError::Validation(
            "multipart field 'file' is required".to_string(),
        ))
    })?;

    if file_name.to_lowercase().ends_with(".xlsx") {
        return Err(AppError(ResearchError::Validation(
            "XLSX uploads are not supported; upload CSV with columns ticker,date[,model]"
                .to_string(),
        )));
    }

    let rows = parse_rows(&bytes)?;
    if rows.is_empty() {
        return Err(AppError(ResearchError::Validation(
            "no valid rows in upload".to_string(),
        )));
    }

    let ctx = state.orchestrator.context();
    prefetch_quotes(&ctx, &rows, Utc::now().date_naive()).await;

    let orchestrator = state.orchestrator.clone();
    let runner: BatchRunner = Arc::new(move |row: BatchRow, mode: AnalysisMode| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            let options = AnalysisOptions {
                mode,
                model: row.model.clone(),
            };
            orchestrator
                .perform_analysis(&row.ticker, &row.date.to_string(), options)
                .await
        })
    });

    let concurrency = state.orchestrator.config().batch_concurrency;
    let output = run_batch(rows, mode, concurrency, runner).await;

    let csv = write_csv(&output)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"batch_results.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

/// Accepts a header row (`ticker,date[,model]`) or bare positional rows.
/// Rows that fail validation are dropped, not fatal.
fn parse_rows(bytes: &[u8]) -> Result<Vec<BatchRow>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            AppError(ResearchError::Validation(format!("unreadable CSV: {e}")))
        })?;
        let Some(ticker) = record.get(0) else { continue };
        if index == 0 && ticker.eq_ignore_ascii_case("ticker") {
            continue;
        }
        if ticker.is_empty() {
            continue;
        }
        let Some(date_raw) = record.get(1) else {
            tracing::warn!("batch row {index} missing date, skipped");
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d") else {
            tracing::warn!("batch row {index} has invalid date {date_raw:?}, skipped");
            continue;
        };
        let model = record
            .get(2)
            .map(str::to_string)
            .filter(|m| !m.is_empty());
        rows.push(BatchRow {
            ticker: ticker.to_uppercase(),
            date,
            model,
        });
    }
    Ok(rows)
}

fn write_csv(rows: &[research_orchestrator::BatchOutputRow]) -> Result<String, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).map_err(|e| {
            AppError(ResearchError::Other(format!("csv serialization: {e}")))
        })?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError(ResearchError::Other(format!("csv flush: {e}"))))?;
    String::from_utf8(bytes)
        .map_err(|e| AppError(ResearchError::Other(format!("csv encoding: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_header() {
        let with_header = b"ticker,date,model\nNVDA,2024-01-02,gpt-4o\naapl,2024-01-03\n";
        let rows = parse_rows(with_header).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ticker, "NVDA");
        assert_eq!(rows[0].model.as_deref(), Some("gpt-4o"));
        assert_eq!(rows[1].ticker, "AAPL");
        assert_eq!(rows[1].model, None);

        let headerless = b"NVDA,2024-01-02\nNVDA,2024-01-02\n";
        let rows = parse_rows(headerless).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
    }

    #[test]
    fn invalid_rows_are_dropped_not_fatal() {
        let input = b"NVDA,2024-01-02\nBADDATE,not-a-date\n,2024-01-05\nAAPL,2024-01-06\n";
        let rows = parse_rows(input).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ticker, "NVDA");
        assert_eq!(rows[1].ticker, "AAPL");
    }

    #[test]
    fn output_csv_has_one_line_per_row_plus_header() {
        let rows = vec![
            research_orchestrator::BatchOutputRow {
                ticker: "NVDA".to_string(),
                recommendation: "BUY".to_string(),
                ..Default::default()
            },
            research_orchestrator::BatchOutputRow {
                ticker: "AAPL".to_string(),
                recommendation: "ERROR:vendor down".to_string(),
                ..Default::default()
            },
        ];
        let csv = write_csv(&rows).unwrap();
        let lines: Vec<&str> = csv.trim_end().lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ticker,date,model,current_price,llm_target_price,recommendation"));
        assert!(lines[2].contains("ERROR:vendor down"));
    }
}
