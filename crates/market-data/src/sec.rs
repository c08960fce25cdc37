use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::OnceCell;

use research_core::{FilingRef, ResearchError};

use crate::Fetcher;

const TICKER_MAP_URL: &str = "https://www.sec.gov/files/company_tickers.json";
const SUBMISSIONS_BASE: &str = "https://data.sec.gov/submissions";
const ARCHIVES_BASE: &str = "https://www.sec.gov/Archives/edgar/data";

/// SEC EDGAR façade: filings index and MD&A text extraction. EDGAR requires a
/// descriptive User-Agent on every request.
pub struct SecClient {
    fetcher: Fetcher,
    user_agent: String,
    ticker_map: OnceCell<HashMap<String, u64>>,
}

#[derive(Debug, Deserialize)]
struct TickerRow {
    cik_str: u64,
    ticker: String,
}

#[derive(Debug, Deserialize)]
struct Submissions {
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

#[derive(Debug, Deserialize, Default)]
struct RecentFilings {
    #[serde(default)]
    form: Vec<String>,
    #[serde(default, rename = "filingDate")]
    filing_date: Vec<String>,
    #[serde(default, rename = "reportDate")]
    report_date: Vec<String>,
    #[serde(default, rename = "accessionNumber")]
    accession_number: Vec<String>,
    #[serde(default, rename = "primaryDocument")]
    primary_document: Vec<String>,
}

impl SecClient {
    pub fn new(fetcher: Fetcher, user_agent: String) -> Self {
        Self {
            fetcher,
            user_agent,
            ticker_map: OnceCell::new(),
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![("User-Agent", self.user_agent.clone())]
    }

    async fn cik_for(&self, ticker: &str) -> Result<u64, ResearchError> {
        let map = self
            .ticker_map
            .get_or_try_init(|| async {
                let value = self
                    .fetcher
                    .get_json(TICKER_MAP_URL, &[], &self.headers())
                    .await?;
                let rows: HashMap<String, TickerRow> = serde_json::from_value(value)
                    .map_err(|e| {
                        ResearchError::upstream(None, format!("sec ticker map decode: {e}"))
                    })?;
                Ok::<_, ResearchError>(
                    rows.into_values()
                        .map(|row| (row.ticker.to_uppercase(), row.cik_str))
                        .collect(),
                )
            })
            .await?;
        map.get(&ticker.to_uppercase())
            .copied()
            .ok_or_else(|| ResearchError::Validation(format!("unknown ticker: {ticker}")))
    }

    /// Most recent filings of the given forms on or before `as_of`.
    pub async fn recent_filings(
        &self,
        ticker: &str,
        forms: &[&str],
        as_of: NaiveDate,
        limit: usize,
    ) -> Result<Vec<FilingRef>, ResearchError> {
        let cik = self.cik_for(ticker).await?;
        let url = format!("{SUBMISSIONS_BASE}/CIK{cik:010}.json");
        let value = self.fetcher.get_json(&url, &[], &self.headers()).await?;
        let submissions: Submissions = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("sec submissions decode: {e}")))?;
        let recent = submissions.filings.recent;

        let mut filings = Vec::new();
        for i in 0..recent.form.len() {
            let form = &recent.form[i];
            if !forms.iter().any(|f| f.eq_ignore_ascii_case(form)) {
                continue;
            }
            let Some(filing_date) = recent
                .filing_date
                .get(i)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if filing_date > as_of {
                continue;
            }
            let Some(accession) = recent.accession_number.get(i) else {
                continue;
            };
            let Some(document) = recent.primary_document.get(i) else {
                continue;
            };
            let accession_compact = accession.replace('-', "");
            filings.push(FilingRef {
                form: form.clone(),
                filing_date,
                report_date: recent
                    .report_date
                    .get(i)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
                url: format!("{ARCHIVES_BASE}/{cik}/{accession_compact}/{document}"),
                accession: Some(accession.clone()),
            });
            if filings.len() >= limit {
                break;
            }
        }
        Ok(filings)
    }

    /// Fetches the filing document and extracts the MD&A narrative.
    pub async fn fetch_mda(&self, url: &str) -> Result<String, ResearchError> {
        let html = self.fetcher.get_text(url, &[], &self.headers()).await?;
        let text = strip_html(&html);
        Ok(extract_mda(&text))
    }
}

/// Crude tag stripper; filings are table-heavy HTML and only the prose
/// matters downstream.
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&#8217;", "'")
        .replace("&#8220;", "\"")
        .replace("&#8221;", "\"");
    let mut compact = String::with_capacity(decoded.len());
    let mut last_space = false;
    for ch in decoded.chars() {
        if ch.is_whitespace() {
            if !last_space {
                compact.push(' ');
            }
            last_space = true;
        } else {
            compact.push(ch);
            last_space = false;
        }
    }
    compact
}

const MDA_CAP: usize = 24_000;

/// Locates the MD&A section: the last "management's discussion" heading
/// (earlier hits are usually the table of contents), cut at the next item
/// boundary.
fn extract_mda(text: &str) -> String {
    let lower = text.to_lowercase();
    let needles = [
        "management's discussion and analysis",
        "management\u{2019}s discussion and analysis",
        "managements discussion and analysis",
    ];
    let start = needles
        .iter()
        .filter_map(|n| lower.rfind(n))
        .max()
        .unwrap_or(0);

    let tail = &lower[start..];
    let end_markers = [
        "quantitative and qualitative disclosures",
        "item 7a",
        "item 3.",
        "item 8.",
    ];
    let end = end_markers
        .iter()
        .filter_map(|m| tail.find(m))
        .min()
        .unwrap_or(tail.len())
        .min(MDA_CAP);

    let mut end_byte = (start + end).min(text.len());
    while end_byte > 0 && !text.is_char_boundary(end_byte) {
        end_byte -= 1;
    }
    let mut start_byte = start.min(end_byte);
    while start_byte < text.len() && !text.is_char_boundary(start_byte) {
        start_byte += 1;
    }
    text[start_byte..end_byte].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_flattens_markup() {
        let html = "<p>Revenue <b>grew</b>&nbsp;12%</p>";
        assert_eq!(strip_html(html).trim(), "Revenue grew 12%");
    }

    #[test]
    fn extract_mda_prefers_last_heading_and_stops_at_item_boundary() {
        let doc = "Table of contents: Management's Discussion and Analysis ... page 30. \
                   Intro text. Management's Discussion and Analysis of Financial Condition. \
                   Revenue grew on data center demand. \
                   Quantitative and Qualitative Disclosures about market risk.";
        let mda = extract_mda(doc);
        assert!(mda.starts_with("Management's Discussion and Analysis of Financial Condition"));
        assert!(mda.contains("data center demand"));
        assert!(!mda.to_lowercase().contains("quantitative and qualitative"));
    }
}
