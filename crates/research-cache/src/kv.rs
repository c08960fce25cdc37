use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use research_core::ResearchError;

/// Sentinel stored for upstream lookups that returned nothing, so absence is
/// cached too and known-missing data does not trigger retry storms.
pub fn empty_sentinel() -> Value {
    json!({ "__empty": true })
}

pub fn is_empty_sentinel(value: &Value) -> bool {
    value
        .get("__empty")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Content-keyed blob cache. Disk-backed in production, in-memory for tests.
/// Prefix scanning (for per-ticker invalidation) is part of the contract.
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Returns the stored value iff its age is within `max_age`.
    async fn read(&self, key: &str, max_age: Duration) -> Option<Value>;

    /// Overwrites atomically.
    async fn write(&self, key: &str, value: &Value) -> Result<(), ResearchError>;

    /// Removes every entry whose decoded key contains `ticker` (and `date`
    /// when given). Returns the number of entries removed. Idempotent.
    async fn clear_matching(&self, ticker: &str, date: Option<&str>) -> usize;
}

fn key_matches(decoded: &str, ticker: &str, date: Option<&str>) -> bool {
    decoded.contains(ticker) && date.map_or(true, |d| decoded.contains(d))
}

/// One JSON file per URL-encoded key; freshness by file modification time.
pub struct DiskKvCache {
    dir: PathBuf,
}

impl DiskKvCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ResearchError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| ResearchError::Cache(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }

    fn decode_file_name(path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_str()?;
        urlencoding::decode(stem).ok().map(|s| s.into_owned())
    }
}

#[async_trait]
impl BlobCache for DiskKvCache {
    async fn read(&self, key: &str, max_age: Duration) -> Option<Value> {
        let path = self.path_for(key);
        let meta = std::fs::metadata(&path).ok()?;
        let modified = meta.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).ok()?;
        if age > max_age {
            return None;
        }
        let bytes = std::fs::read(&path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), ResearchError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ResearchError::Cache(format!("serialize {key}: {e}")))?;
        std::fs::write(&tmp, bytes)
            .map_err(|e| ResearchError::Cache(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| ResearchError::Cache(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    async fn clear_matching(&self, ticker: &str, date: Option<&str>) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(decoded) = Self::decode_file_name(&path) else {
                continue;
            };
            if key_matches(&decoded, ticker, date) && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

/// In-memory implementation used by tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryKvCache {
    entries: DashMap<String, (Value, Instant)>,
}

impl MemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BlobCache for MemoryKvCache {
    async fn read(&self, key: &str, max_age: Duration) -> Option<Value> {
        let entry = self.entries.get(key)?;
        let (value, written_at) = entry.value();
        if written_at.elapsed() > max_age {
            return None;
        }
        Some(value.clone())
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), ResearchError> {
        self.entries
            .insert(key.to_string(), (value.clone(), Instant::now()));
        Ok(())
    }

    async fn clear_matching(&self, ticker: &str, date: Option<&str>) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| key_matches(e.key(), ticker, date))
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disk_round_trip_and_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskKvCache::new(dir.path()).unwrap();

        let value = json!({"price": 123.45, "source": "fmp_quote"});
        cache.write("fh_quote_AAPL_2025-11-08", &value).await.unwrap();

        let hit = cache
            .read("fh_quote_AAPL_2025-11-08", Duration::from_secs(60))
            .await;
        assert_eq!(hit, Some(value));

        // Zero max_age means everything is stale.
        let stale = cache
            .read("fh_quote_AAPL_2025-11-08", Duration::ZERO)
            .await;
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn disk_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskKvCache::new(dir.path()).unwrap();

        cache.write("k", &json!(1)).await.unwrap();
        cache.write("k", &json!(2)).await.unwrap();
        assert_eq!(
            cache.read("k", Duration::from_secs(60)).await,
            Some(json!(2))
        );
    }

    #[tokio::test]
    async fn clear_matching_is_prefix_scoped_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskKvCache::new(dir.path()).unwrap();

        cache
            .write("filing_summary_NVDA_10-K_2024-02-21", &json!({}))
            .await
            .unwrap();
        cache.write("momentum_NVDA_2024-01-02", &json!({})).await.unwrap();
        cache.write("momentum_AAPL_2024-01-02", &json!({})).await.unwrap();

        assert_eq!(cache.clear_matching("NVDA", None).await, 2);
        assert_eq!(cache.clear_matching("NVDA", None).await, 0);
        assert!(cache
            .read("momentum_AAPL_2024-01-02", Duration::from_secs(60))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn clear_matching_respects_date_constraint() {
        let cache = MemoryKvCache::new();
        cache.write("news_NVDA_2024-01-02", &json!({})).await.unwrap();
        cache.write("news_NVDA_2024-01-03", &json!({})).await.unwrap();

        assert_eq!(cache.clear_matching("NVDA", Some("2024-01-02")).await, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sentinel_round_trip() {
        assert!(is_empty_sentinel(&empty_sentinel()));
        assert!(!is_empty_sentinel(&json!({"price": 1.0})));
        assert!(!is_empty_sentinel(&json!(null)));
    }
}
