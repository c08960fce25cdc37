use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

use fragment_builders::FragmentContext;
use llm_client::{ChatClient, LlmClient, LlmClientConfig};
use market_data::{AlphaVantageClient, FinnhubClient, FmpClient, HttpFetcher, SecClient, YahooClient};
use research_cache::{BlobCache, DiskKvCache, ProcessCache, ResultsStore};
use research_core::{EngineConfig, ResearchError};
use research_orchestrator::{DeferredQueue, Orchestrator};

mod analyze_routes;
mod batch_routes;
mod selftest;

pub use analyze_routes::analyze_routes;
pub use batch_routes::batch_routes;
pub use selftest::selftest_routes;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// HTTP mapping for engine errors; typed errors stay typed until this edge.
#[derive(Debug)]
pub struct AppError(pub ResearchError);

impl From<ResearchError> for AppError {
    fn from(err: ResearchError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ResearchError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ResearchError::CacheMiss => (
                StatusCode::CONFLICT,
                "cached result unavailable".to_string(),
            ),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(analyze_routes())
        .merge(batch_routes())
        .merge(selftest_routes())
        .with_state(state)
}

/// Wires the cache tiers, vendor clients, LLM and orchestrator from the
/// environment, then serves the API.
pub async fn run_server() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();

    let kv: Arc<dyn BlobCache> = Arc::new(DiskKvCache::new(config.kv_cache_dir.clone())?);
    let process = Arc::new(ProcessCache::new());
    let results = Arc::new(ResultsStore::open(&config.results_db_path).await?);

    let fetcher = Arc::new(HttpFetcher::new(
        config.upstream_rate_limit_per_min,
        config.upstream_max_concurrent,
    ));
    let fmp = config
        .fmp_api_key
        .clone()
        .map(|key| Arc::new(FmpClient::new(fetcher.clone(), key)));
    let finnhub = config
        .finnhub_api_key
        .clone()
        .map(|key| Arc::new(FinnhubClient::new(fetcher.clone(), key)));
    let alpha = config
        .alpha_vantage_api_key
        .clone()
        .map(|key| Arc::new(AlphaVantageClient::new(fetcher.clone(), key)));
    let yahoo = Arc::new(YahooClient::new(fetcher.clone()));
    let sec = Arc::new(SecClient::new(fetcher.clone(), config.sec_user_agent.clone()));

    let chat = ChatClient::new(config.llm_base_url.clone(), config.llm_api_key.clone());
    let llm = Arc::new(LlmClient::new(
        chat,
        LlmClientConfig {
            fallback_model: config.fallback_model.clone(),
            summary_model: config.summary_model.clone(),
            prompt_version: config.prompt_version.clone(),
            max_completion_tokens: config.llm_max_completion_tokens,
        },
        Some(results.clone()),
        Some(kv.clone()),
    ));

    let ctx = Arc::new(FragmentContext::new(
        config.clone(),
        kv,
        process,
        fmp,
        finnhub,
        yahoo,
        alpha,
        sec,
        llm.clone(),
    ));

    let deferred = Arc::new(DeferredQueue::start());
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        ctx,
        results,
        llm,
        deferred,
    ));

    if research_orchestrator::prewarm::spawn_prewarmer(orchestrator.clone()).is_some() {
        tracing::info!(
            "prewarmer scheduled for {} tickers",
            config.prewarm_tickers.len()
        );
    }

    let router = build_router(AppState {
        orchestrator,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
