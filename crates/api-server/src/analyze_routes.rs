use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use research_core::{AnalysisBundle, AnalysisMode, ResearchError};
use research_orchestrator::AnalysisOptions;

use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub ticker: Option<String>,
    pub date: Option<String>,
    /// Either spelling is accepted; `analysis_model` wins.
    pub model: Option<String>,
    pub analysis_model: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub ticker: Option<String>,
    pub date: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub ok: bool,
    pub cleared_results: u64,
    pub cleared_cache_files: usize,
}

pub fn analyze_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/reset-cache", post(reset_cache))
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisBundle>, AppError> {
    let ticker = request
        .ticker
        .ok_or_else(|| ResearchError::Validation("ticker is required".to_string()))?;
    let date = request
        .date
        .ok_or_else(|| ResearchError::Validation("date is required".to_string()))?;

    let mode: AnalysisMode = request
        .mode
        .as_deref()
        .unwrap_or("full")
        .parse()
        .map_err(AppError::from)?;
    let model = request.analysis_model.or(request.model);

    let bundle = state
        .orchestrator
        .perform_analysis(&ticker, &date, AnalysisOptions { mode, model })
        .await?;
    Ok(Json(bundle))
}

async fn reset_cache(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<ResetResponse>, AppError> {
    let ticker = request
        .ticker
        .ok_or_else(|| ResearchError::Validation("ticker is required".to_string()))?;
    let date = request
        .date
        .ok_or_else(|| ResearchError::Validation("date is required".to_string()))?;

    let (cleared_results, cleared_cache_files) = state
        .orchestrator
        .reset_cache(&ticker, &date, request.model.as_deref())
        .await?;
    Ok(Json(ResetResponse {
        ok: true,
        cleared_results,
        cleared_cache_files,
    }))
}
