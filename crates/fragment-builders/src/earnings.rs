use chrono::{Datelike, NaiveDate};

use research_core::{with_retries, EarningsCallSummary, ResearchError};

use crate::FragmentContext;

/// (year, quarter) of the baseline date.
pub fn quarter_of(date: NaiveDate) -> (i32, u32) {
    (date.year(), (date.month() - 1) / 3 + 1)
}

fn previous_quarter(year: i32, quarter: u32) -> (i32, u32) {
    if quarter == 1 {
        (year - 1, 4)
    } else {
        (year, quarter - 1)
    }
}

fn transcript_excerpt(content: &str) -> String {
    match content.char_indices().nth(400) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}

/// Baseline quarter first, then the prior quarter. Missing quarters are
/// cached as placeholders so the fallback loop advances without refetching.
pub async fn build_earnings_call(
    ctx: &FragmentContext,
    ticker: &str,
    baseline: NaiveDate,
) -> Result<Option<EarningsCallSummary>, ResearchError> {
    let Some(fmp) = ctx.fmp.clone() else {
        return Ok(None);
    };

    let (mut year, mut quarter) = quarter_of(baseline);
    for _ in 0..2 {
        let kv_key = format!("earnings_call_{ticker}_{year}Q{quarter}");
        if let Some(cached) = ctx.kv.read(&kv_key, ctx.config.earnings_call_ttl()).await {
            if research_cache::is_empty_sentinel(&cached) {
                (year, quarter) = previous_quarter(year, quarter);
                continue;
            }
            if let Ok(summary) = serde_json::from_value::<EarningsCallSummary>(cached) {
                return Ok(Some(summary));
            }
        }

        let transcript = with_retries(
            ctx.config.api_retry_attempts,
            ctx.config.retry_delay(),
            || fmp.earnings_call_transcript(ticker, year, quarter),
        )
        .await?;

        match transcript {
            Some(transcript) => {
                let summary = if ctx.llm.is_enabled() {
                    match ctx.llm.summarize_transcript(ticker, &transcript.content).await {
                        Ok(digest) => EarningsCallSummary {
                            year,
                            quarter,
                            summary: digest.summary,
                            bullets: digest.bullets,
                        },
                        Err(e) => {
                            tracing::warn!("transcript summarization failed for {ticker}: {e}");
                            EarningsCallSummary {
                                year,
                                quarter,
                                summary: transcript_excerpt(&transcript.content),
                                bullets: Vec::new(),
                            }
                        }
                    }
                } else {
                    EarningsCallSummary {
                        year,
                        quarter,
                        summary: transcript_excerpt(&transcript.content),
                        bullets: Vec::new(),
                    }
                };

                if let Ok(json) = serde_json::to_value(&summary) {
                    let _ = ctx.kv.write(&kv_key, &json).await;
                }
                return Ok(Some(summary));
            }
            None => {
                // Placeholder so the next request skips straight to the
                // prior quarter.
                let _ = ctx
                    .kv
                    .write(&kv_key, &research_cache::empty_sentinel())
                    .await;
                (year, quarter) = previous_quarter(year, quarter);
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_mapping() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        assert_eq!(quarter_of(d(1, 15)), (2024, 1));
        assert_eq!(quarter_of(d(3, 31)), (2024, 1));
        assert_eq!(quarter_of(d(4, 1)), (2024, 2));
        assert_eq!(quarter_of(d(12, 31)), (2024, 4));
    }

    #[test]
    fn previous_quarter_wraps_year() {
        assert_eq!(previous_quarter(2024, 1), (2023, 4));
        assert_eq!(previous_quarter(2024, 3), (2024, 2));
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "字".repeat(900);
        assert_eq!(transcript_excerpt(&long).chars().count(), 400);
    }
}
