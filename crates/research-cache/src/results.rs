use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use research_core::{variant_full, variant_metrics, AnalysisBundle, ResearchError};

/// A bundle as read back from the store. Freshness against per-fragment TTLs
/// is the caller's decision.
#[derive(Debug, Clone)]
pub struct StoredBundle {
    pub bundle: AnalysisBundle,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredLlmOutput {
    pub output: Value,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

/// Durable index of finalized bundles keyed by (ticker, date, model variant),
/// plus the LLM output cache keyed by payload hash.
#[derive(Clone)]
pub struct ResultsStore {
    pool: SqlitePool,
}

impl ResultsStore {
    pub async fn open(path: &str) -> Result<Self, ResearchError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ResearchError::Storage(format!("create {}: {e}", parent.display())))?;
            }
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| ResearchError::Storage(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ResearchError::Storage(e.to_string()))?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Fresh private store; used by tests.
    pub async fn open_in_memory() -> Result<Self, ResearchError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ResearchError::Storage(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| ResearchError::Storage(e.to_string()))?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), ResearchError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analysis_results (
                ticker TEXT NOT NULL,
                analysis_date TEXT NOT NULL,
                model_variant TEXT NOT NULL,
                bundle_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (ticker, analysis_date, model_variant)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ResearchError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS llm_cache (
                payload_hash TEXT PRIMARY KEY,
                output_json TEXT NOT NULL,
                model TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ResearchError::Storage(e.to_string()))?;

        Ok(())
    }

    pub async fn get_bundle(
        &self,
        ticker: &str,
        date: NaiveDate,
        model_variant: &str,
    ) -> Result<Option<StoredBundle>, ResearchError> {
        let row = sqlx::query(
            "SELECT bundle_json, updated_at FROM analysis_results
             WHERE ticker = ? AND analysis_date = ? AND model_variant = ?",
        )
        .bind(ticker)
        .bind(date.to_string())
        .bind(model_variant)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ResearchError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let bundle_json: String = row.get("bundle_json");
        let updated_at: String = row.get("updated_at");
        let bundle = serde_json::from_str(&bundle_json)
            .map_err(|e| ResearchError::Storage(format!("corrupt bundle: {e}")))?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| ResearchError::Storage(format!("corrupt timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(Some(StoredBundle { bundle, updated_at }))
    }

    /// Upsert; the bundle is the unit of atomicity.
    pub async fn put_bundle(
        &self,
        ticker: &str,
        date: NaiveDate,
        model_variant: &str,
        bundle: &AnalysisBundle,
    ) -> Result<(), ResearchError> {
        let bundle_json = serde_json::to_string(bundle)
            .map_err(|e| ResearchError::Storage(format!("serialize bundle: {e}")))?;
        sqlx::query(
            "INSERT INTO analysis_results (ticker, analysis_date, model_variant, bundle_json, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (ticker, analysis_date, model_variant)
             DO UPDATE SET bundle_json = excluded.bundle_json, updated_at = excluded.updated_at",
        )
        .bind(ticker)
        .bind(date.to_string())
        .bind(model_variant)
        .bind(bundle_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ResearchError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Removes the bare, `__full` and `__metrics` variants for a model.
    pub async fn delete_variants(
        &self,
        ticker: &str,
        date: NaiveDate,
        model: &str,
    ) -> Result<u64, ResearchError> {
        let mut deleted = 0;
        for variant in [
            model.to_string(),
            variant_full(model),
            variant_metrics(model),
        ] {
            let result = sqlx::query(
                "DELETE FROM analysis_results
                 WHERE ticker = ? AND analysis_date = ? AND model_variant = ?",
            )
            .bind(ticker)
            .bind(date.to_string())
            .bind(&variant)
            .execute(&self.pool)
            .await
            .map_err(|e| ResearchError::Storage(e.to_string()))?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    pub async fn get_llm_output(
        &self,
        payload_hash: &str,
    ) -> Result<Option<StoredLlmOutput>, ResearchError> {
        let row = sqlx::query(
            "SELECT output_json, model, updated_at FROM llm_cache WHERE payload_hash = ?",
        )
        .bind(payload_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ResearchError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let output_json: String = row.get("output_json");
        let model: String = row.get("model");
        let updated_at: String = row.get("updated_at");
        let output = serde_json::from_str(&output_json)
            .map_err(|e| ResearchError::Storage(format!("corrupt llm cache entry: {e}")))?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| ResearchError::Storage(format!("corrupt timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(Some(StoredLlmOutput {
            output,
            model,
            updated_at,
        }))
    }

    pub async fn put_llm_output(
        &self,
        payload_hash: &str,
        model: &str,
        output: &Value,
    ) -> Result<(), ResearchError> {
        let output_json = serde_json::to_string(output)
            .map_err(|e| ResearchError::Storage(format!("serialize llm output: {e}")))?;
        sqlx::query(
            "INSERT INTO llm_cache (payload_hash, output_json, model, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (payload_hash)
             DO UPDATE SET output_json = excluded.output_json, model = excluded.model,
                           updated_at = excluded.updated_at",
        )
        .bind(payload_hash)
        .bind(model)
        .bind(output_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ResearchError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::{AnalysisMode, FetchedData, RequestInput};
    use serde_json::json;

    fn sample_bundle(ticker: &str, model: &str) -> AnalysisBundle {
        AnalysisBundle {
            input: RequestInput {
                ticker: ticker.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                mode: AnalysisMode::Full,
                model: model.to_string(),
            },
            fetched: FetchedData::default(),
            analysis: Some(json!({"action": {"rating": "BUY"}})),
            llm_usage: None,
            analysis_model: model.to_string(),
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

    #[tokio::test]
    async fn bundle_upsert_and_read_back() {
        let store = ResultsStore::open_in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bundle = sample_bundle("NVDA", "gpt-4o");

        store
            .put_bundle("NVDA", date, "gpt-4o__full", &bundle)
            .await
            .unwrap();
        let stored = store
            .get_bundle("NVDA", date, "gpt-4o__full")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.bundle.input.ticker, "NVDA");

        // Upsert overwrites in place.
        store
            .put_bundle("NVDA", date, "gpt-4o__full", &bundle)
            .await
            .unwrap();
        assert!(store
            .get_bundle("NVDA", date, "gpt-4o__full")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_bundle("NVDA", date, "gpt-4o__metrics")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_variants_removes_all_three() {
        let store = ResultsStore::open_in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bundle = sample_bundle("NVDA", "gpt-4o");

        for variant in ["gpt-4o", "gpt-4o__full", "gpt-4o__metrics"] {
            store.put_bundle("NVDA", date, variant, &bundle).await.unwrap();
        }
        let deleted = store.delete_variants("NVDA", date, "gpt-4o").await.unwrap();
        assert_eq!(deleted, 3);
        for variant in ["gpt-4o", "gpt-4o__full", "gpt-4o__metrics"] {
            assert!(store.get_bundle("NVDA", date, variant).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn llm_cache_round_trip() {
        let store = ResultsStore::open_in_memory().await.unwrap();
        let output = json!({"action": {"rating": "HOLD", "target_price": 120.0}});

        store.put_llm_output("abc123", "gpt-4o", &output).await.unwrap();
        let hit = store.get_llm_output("abc123").await.unwrap().unwrap();
        assert_eq!(hit.output, output);
        assert_eq!(hit.model, "gpt-4o");
        assert!(store.get_llm_output("missing").await.unwrap().is_none());
    }
}
