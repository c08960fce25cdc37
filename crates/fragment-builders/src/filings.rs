use chrono::NaiveDate;
use std::time::Duration;

use research_core::{with_retries, FilingRef, FilingSummary, ResearchError, SummaryKind};

use crate::FragmentContext;

const FILINGS_INDEX_TTL: Duration = Duration::from_secs(24 * 3600);
const FILING_FORMS: &[&str] = &["10-K", "10-Q"];
const FILINGS_INDEX_LIMIT: usize = 4;

/// Characters of raw MD&A attached to fallback summaries.
const EXCERPT_LEN: usize = 400;

const FALLBACK_SUMMARY: &str = "（未啟用 LLM 摘要，以下為 MD&A 原文節錄）";

/// Most recent 10-K/10-Q filings on or before the baseline date.
pub async fn list_filings(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
) -> Result<Vec<FilingRef>, ResearchError> {
    let kv_key = format!("filings_index_{ticker}_{baseline}");
    if let Some(cached) = ctx.kv.read(&kv_key, FILINGS_INDEX_TTL).await {
        if let Ok(filings) = serde_json::from_value::<Vec<FilingRef>>(cached) {
            return Ok(filings);
        }
    }

    let filings = with_retries(ctx.config.api_retry_attempts, ctx.config.retry_delay(), || {
        ctx.sec
            .recent_filings(ticker, FILING_FORMS, baseline, FILINGS_INDEX_LIMIT)
    })
    .await?;

    if let Ok(json) = serde_json::to_value(&filings) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    Ok(filings)
}

fn summary_kv_key(ticker: &str, filing: &FilingRef) -> String {
    format!(
        "filing_summary_{ticker}_{}_{}",
        filing.form, filing.filing_date
    )
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_LEN) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn fallback_summary(filing: &FilingRef, mda_text: &str) -> FilingSummary {
    FilingSummary {
        form: filing.form.clone(),
        filing_date: filing.filing_date,
        report_date: filing.report_date,
        mda_summary: FALLBACK_SUMMARY.to_string(),
        summary_kind: SummaryKind::Fallback,
        mda_excerpt: Some(excerpt(mda_text)),
    }
}

/// Per-filing summary pipeline: prior bundle → KV cache → MD&A fetch →
/// LLM summarizer, with the deterministic excerpt fallback. A stored
/// fallback is upgraded once an LLM key becomes available.
pub async fn build_filing_summary(
    ctx: &FragmentContext,
    ticker: &str,
    filing: &FilingRef,
    prior: Option<&FilingSummary>,
) -> FilingSummary {
    let llm_enabled = ctx.llm.is_enabled();

    if let Some(prior) = prior {
        if prior.summary_kind == SummaryKind::Llm || !llm_enabled {
            return prior.clone();
        }
    }

    let kv_key = summary_kv_key(ticker, filing);
    if let Some(cached) = ctx
        .kv
        .read(&kv_key, ctx.config.filing_summary_ttl())
        .await
    {
        if let Ok(stored) = serde_json::from_value::<FilingSummary>(cached) {
            if stored.summary_kind == SummaryKind::Llm || !llm_enabled {
                return stored;
            }
        }
    }

    let mda_text = match with_retries(
        ctx.config.api_retry_attempts,
        ctx.config.retry_delay(),
        || ctx.sec.fetch_mda(&filing.url),
    )
    .await
    {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::debug!("empty MD&A for {} {}", ticker, filing.url);
            return fallback_summary(filing, "");
        }
        Err(e) => {
            tracing::warn!("MD&A fetch failed for {} {}: {e}", ticker, filing.url);
            return fallback_summary(filing, "");
        }
    };

    let summary = if llm_enabled {
        match ctx.llm.summarize_mda(ticker, &mda_text).await {
            Ok(text) => FilingSummary {
                form: filing.form.clone(),
                filing_date: filing.filing_date,
                report_date: filing.report_date,
                mda_summary: text,
                summary_kind: SummaryKind::Llm,
                mda_excerpt: None,
            },
            Err(e) => {
                tracing::warn!("MD&A summarization failed for {ticker}: {e}");
                fallback_summary(filing, &mda_text)
            }
        }
    } else {
        fallback_summary(filing, &mda_text)
    };

    if let Ok(json) = serde_json::to_value(&summary) {
        let _ = ctx.kv.write(&kv_key, &json).await;
    }
    summary
}

/// Looks up a prior summary of the same (form, filing_date) in a stored
/// bundle's summaries.
pub fn prior_summary<'a>(
    stored: &'a [FilingSummary],
    filing: &FilingRef,
) -> Option<&'a FilingSummary> {
    stored
        .iter()
        .find(|s| s.form == filing.form && s.filing_date == filing.filing_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filing() -> FilingRef {
        FilingRef {
            form: "10-Q".to_string(),
            filing_date: NaiveDate::from_ymd_opt(2024, 2, 21).unwrap(),
            report_date: NaiveDate::from_ymd_opt(2024, 1, 28),
            url: "https://example.test/filing.htm".to_string(),
            accession: None,
        }
    }

    #[test]
    fn fallback_carries_bounded_excerpt() {
        let text = "a".repeat(1000);
        let summary = fallback_summary(&filing(), &text);
        assert_eq!(summary.summary_kind, SummaryKind::Fallback);
        assert_eq!(summary.mda_excerpt.as_ref().unwrap().len(), EXCERPT_LEN);
    }

    #[test]
    fn prior_summary_matches_on_form_and_date() {
        let f = filing();
        let stored = vec![FilingSummary {
            form: "10-Q".to_string(),
            filing_date: f.filing_date,
            report_date: None,
            mda_summary: "prior".to_string(),
            summary_kind: SummaryKind::Llm,
            mda_excerpt: None,
        }];
        assert!(prior_summary(&stored, &f).is_some());

        let other = FilingRef {
            form: "10-K".to_string(),
            ..f
        };
        assert!(prior_summary(&stored, &other).is_none());
    }

    #[test]
    fn summary_kv_key_is_per_form_and_date() {
        let key = summary_kv_key("NVDA", &filing());
        assert_eq!(key, "filing_summary_NVDA_10-Q_2024-02-21");
    }
}
