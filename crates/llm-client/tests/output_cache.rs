//! The LLM output cache must short-circuit before any network call: the chat
//! client here has no key, so a cache miss would error instead of returning.

use std::sync::Arc;

use llm_client::{payload_hash, ChatClient, LlmClient, LlmClientConfig};
use research_cache::{BlobCache, MemoryKvCache, ResultsStore};
use serde_json::json;

fn disabled_client(
    results: Option<Arc<ResultsStore>>,
    kv: Option<Arc<dyn BlobCache>>,
) -> LlmClient {
    LlmClient::new(
        ChatClient::new("http://localhost:0".to_string(), None),
        LlmClientConfig {
            fallback_model: "gpt-4o-mini".to_string(),
            summary_model: "gpt-4o-mini".to_string(),
            prompt_version: "v3".to_string(),
            max_completion_tokens: 800,
        },
        results,
        kv,
    )
}

#[tokio::test]
async fn results_store_hit_short_circuits() {
    let results = Arc::new(ResultsStore::open_in_memory().await.unwrap());
    let client = disabled_client(Some(results.clone()), None);

    let payload = json!({"ticker": "NVDA", "price": 500.0});
    let hash = payload_hash(&payload, "v3", "gpt-4o");
    let cached = json!({"action": {"rating": "BUY", "target_price": 600.0}});
    results.put_llm_output(&hash, "gpt-4o", &cached).await.unwrap();

    let outcome = client.analyze(&payload, "gpt-4o").await.unwrap();
    assert!(outcome.from_cache);
    assert_eq!(outcome.analysis, cached);
    assert_eq!(outcome.payload_hash, hash);
    assert!(outcome.usage.is_none());
}

#[tokio::test]
async fn identical_payloads_return_identical_analysis() {
    let results = Arc::new(ResultsStore::open_in_memory().await.unwrap());
    let client = disabled_client(Some(results.clone()), None);

    let payload = json!({"ticker": "NVDA", "momentum": {"score": 72.5}});
    let hash = payload_hash(&payload, "v3", "gpt-4o");
    let cached = json!({"action": {"rating": "HOLD", "target_price": 510.25}});
    results.put_llm_output(&hash, "gpt-4o", &cached).await.unwrap();

    let first = client.analyze(&payload, "gpt-4o").await.unwrap();
    let second = client.analyze(&payload, "gpt-4o").await.unwrap();
    assert_eq!(
        serde_json::to_vec(&first.analysis).unwrap(),
        serde_json::to_vec(&second.analysis).unwrap()
    );
}

#[tokio::test]
async fn kv_hit_backfills_the_results_store() {
    let results = Arc::new(ResultsStore::open_in_memory().await.unwrap());
    let kv: Arc<dyn BlobCache> = Arc::new(MemoryKvCache::new());
    let client = disabled_client(Some(results.clone()), Some(kv.clone()));

    let payload = json!({"ticker": "AAPL"});
    let hash = payload_hash(&payload, "v3", "gpt-4o");
    let cached = json!({"action": {"rating": "SELL", "target_price": 150.0}});
    kv.write(&format!("llm_output_{hash}"), &cached).await.unwrap();

    let outcome = client.analyze(&payload, "gpt-4o").await.unwrap();
    assert!(outcome.from_cache);
    assert_eq!(outcome.analysis, cached);

    // The durable index now carries the entry too.
    assert!(results.get_llm_output(&hash).await.unwrap().is_some());
}

#[tokio::test]
async fn cache_miss_with_disabled_llm_errors() {
    let client = disabled_client(None, None);
    let result = client.analyze(&json!({"ticker": "TSLA"}), "gpt-4o").await;
    assert!(result.is_err());
}
