use std::future::Future;
use std::time::Duration;

use crate::error::ResearchError;

const RETRYABLE_FRAGMENTS: &[&str] = &[
    "timeout",
    "timed out",
    "socket hang up",
    "temporarily unavailable",
    "connection reset",
    "host unreachable",
    "dns",
];

/// Whether an error is worth retrying: transient HTTP statuses, transport
/// failures, or messages that look like flaky network conditions.
pub fn is_retryable(err: &ResearchError) -> bool {
    match err {
        ResearchError::Upstream { status, message } => {
            if let Some(code) = status {
                if *code == 408 || *code == 429 || *code >= 500 {
                    return true;
                }
            }
            let lower = message.to_lowercase();
            RETRYABLE_FRAGMENTS.iter().any(|frag| lower.contains(frag))
        }
        _ => false,
    }
}

/// Run `op` up to `attempts` times, sleeping `base_delay * attempt_index`
/// between tries (linear backoff). Non-retryable errors propagate immediately.
pub async fn with_retries<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, ResearchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResearchError>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) || attempt == attempts {
                    return Err(err);
                }
                let delay = base_delay * attempt;
                tracing::debug!(
                    "retryable error (attempt {}/{}), sleeping {:?}: {}",
                    attempt,
                    attempts,
                    delay,
                    err
                );
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ResearchError::Other("retries exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ResearchError {
        ResearchError::upstream(Some(503), "service unavailable")
    }

    #[test]
    fn classifies_http_statuses() {
        assert!(is_retryable(&ResearchError::upstream(Some(408), "x")));
        assert!(is_retryable(&ResearchError::upstream(Some(429), "x")));
        assert!(is_retryable(&ResearchError::upstream(Some(502), "x")));
        assert!(!is_retryable(&ResearchError::upstream(Some(404), "x")));
        assert!(!is_retryable(&ResearchError::upstream(Some(400), "x")));
    }

    #[test]
    fn classifies_transport_messages() {
        assert!(is_retryable(&ResearchError::upstream(
            None,
            "error sending request: operation timed out"
        )));
        assert!(is_retryable(&ResearchError::upstream(
            None,
            "socket hang up"
        )));
        assert!(is_retryable(&ResearchError::upstream(
            None,
            "Connection reset by peer"
        )));
        assert!(!is_retryable(&ResearchError::upstream(None, "not found")));
        assert!(!is_retryable(&ResearchError::Validation("bad date".into())));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(5, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ResearchError::Validation("bad ticker".into())) }
        })
        .await;
        assert!(matches!(result, Err(ResearchError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
