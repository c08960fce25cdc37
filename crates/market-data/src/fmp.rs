use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use research_core::{
    Bar, EconomicEvent, EstimatePeriod, GradeAction, GradeConsensus, GradeCounts, HolderPosition,
    InsiderTrade, NewsArticle, OwnershipMetrics, PriceTargetSummary, QuoteSnapshot, RatingSnapshot,
    ResearchError, TreasuryYields,
};

use crate::{pick_date, pick_f64, pick_i64, pick_str, Fetcher};

const BASE_V3: &str = "https://financialmodelingprep.com/api/v3";
const BASE_V4: &str = "https://financialmodelingprep.com/api/v4";

/// Financial Modeling Prep façade. The widest of the vendor surfaces:
/// quotes, EOD history, analyst aggregates, 13F ownership, insider trades,
/// macro series, transcripts and news.
pub struct FmpClient {
    fetcher: Fetcher,
    api_key: String,
}

#[derive(Debug, Clone)]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct InstitutionalSummary {
    pub as_of: Option<String>,
    pub metrics: OwnershipMetrics,
}

#[derive(Debug, Clone)]
pub struct Transcript {
    pub year: i32,
    pub quarter: u32,
    pub date: Option<NaiveDate>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct FmpQuote {
    symbol: String,
    price: Option<f64>,
    #[serde(alias = "changesPercentage")]
    changes_percentage: Option<f64>,
    open: Option<f64>,
    #[serde(alias = "dayHigh")]
    day_high: Option<f64>,
    #[serde(alias = "dayLow")]
    day_low: Option<f64>,
    #[serde(alias = "previousClose")]
    previous_close: Option<f64>,
    #[serde(alias = "yearHigh")]
    year_high: Option<f64>,
    #[serde(alias = "yearLow")]
    year_low: Option<f64>,
    #[serde(alias = "priceAvg50")]
    price_avg_50: Option<f64>,
    #[serde(alias = "priceAvg200")]
    price_avg_200: Option<f64>,
    #[serde(alias = "marketCap")]
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FmpHistoricalEnvelope {
    #[serde(default)]
    historical: Vec<FmpHistoricalBar>,
}

#[derive(Debug, Deserialize)]
struct FmpHistoricalBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct FmpEstimate {
    date: Option<NaiveDate>,
    #[serde(alias = "estimatedRevenueAvg")]
    revenue_avg: Option<f64>,
    #[serde(alias = "estimatedRevenueLow")]
    revenue_low: Option<f64>,
    #[serde(alias = "estimatedRevenueHigh")]
    revenue_high: Option<f64>,
    #[serde(alias = "estimatedEpsAvg")]
    eps_avg: Option<f64>,
    #[serde(alias = "estimatedEpsLow")]
    eps_low: Option<f64>,
    #[serde(alias = "estimatedEpsHigh")]
    eps_high: Option<f64>,
    #[serde(alias = "numberAnalystEstimatedRevenue", alias = "numberAnalystsEstimatedRevenue")]
    analysts_revenue: Option<i64>,
    #[serde(alias = "numberAnalystEstimatedEps", alias = "numberAnalystsEstimatedEps")]
    analysts_eps: Option<i64>,
}

impl FmpClient {
    pub fn new(fetcher: Fetcher, api_key: String) -> Self {
        Self { fetcher, api_key }
    }

    fn query(&self, mut params: Vec<(String, String)>) -> Vec<(String, String)> {
        params.push(("apikey".to_string(), self.api_key.clone()));
        params
    }

    async fn get(&self, url: &str, params: Vec<(String, String)>) -> Result<Value, ResearchError> {
        self.fetcher.get_json(url, &self.query(params), &[]).await
    }

    fn quote_from(q: FmpQuote) -> QuoteSnapshot {
        QuoteSnapshot {
            symbol: q.symbol,
            price: q.price.unwrap_or(f64::NAN),
            change_pct: q.changes_percentage,
            open: q.open,
            day_high: q.day_high,
            day_low: q.day_low,
            previous_close: q.previous_close,
            year_high: q.year_high,
            year_low: q.year_low,
            ma50: q.price_avg_50,
            ma200: q.price_avg_200,
            market_cap: q.market_cap,
            extended: None,
            as_of: Utc::now(),
        }
    }

    /// Latest quote for one symbol.
    pub async fn quote(&self, symbol: &str) -> Result<QuoteSnapshot, ResearchError> {
        let url = format!("{BASE_V3}/quote/{symbol}");
        let value = self.get(&url, Vec::new()).await?;
        let quotes: Vec<FmpQuote> = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("fmp quote decode: {e}")))?;
        let quote = quotes
            .into_iter()
            .next()
            .ok_or_else(|| ResearchError::upstream(None, format!("fmp: no quote for {symbol}")))?;
        if quote.price.is_none() {
            return Err(ResearchError::upstream(
                None,
                format!("fmp: quote for {symbol} has no price"),
            ));
        }
        Ok(Self::quote_from(quote))
    }

    /// One multi-symbol quote request; used by the batch prefetcher.
    pub async fn batch_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>, ResearchError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{BASE_V3}/quote/{}", symbols.join(","));
        let value = self.get(&url, Vec::new()).await?;
        let quotes: Vec<FmpQuote> = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("fmp batch quote decode: {e}")))?;
        Ok(quotes
            .into_iter()
            .filter(|q| q.price.is_some())
            .map(Self::quote_from)
            .collect())
    }

    /// Daily EOD bars, oldest first.
    pub async fn historical_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, ResearchError> {
        let url = format!("{BASE_V3}/historical-price-full/{symbol}");
        let value = self
            .get(
                &url,
                vec![
                    ("from".to_string(), from.to_string()),
                    ("to".to_string(), to.to_string()),
                ],
            )
            .await?;
        let envelope: FmpHistoricalEnvelope = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("fmp historical decode: {e}")))?;
        let mut bars: Vec<Bar> = envelope
            .historical
            .into_iter()
            .map(|b| Bar {
                date: b.date,
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
            })
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    pub async fn profile(&self, symbol: &str) -> Result<CompanyProfile, ResearchError> {
        let url = format!("{BASE_V3}/profile/{symbol}");
        let value = self.get(&url, Vec::new()).await?;
        let first = value
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .unwrap_or(Value::Null);
        Ok(CompanyProfile {
            name: pick_str(&first, &["companyName", "name"]),
            sector: pick_str(&first, &["sector"]),
            industry: pick_str(&first, &["industry"]),
            exchange: pick_str(&first, &["exchangeShortName", "exchange"]),
            market_cap: pick_f64(&first, &["mktCap", "marketCap"]),
        })
    }

    /// Consensus price target merged from the consensus and windowed-summary
    /// endpoints. The mean walks `targetConsensus|targetMean|targetAvg`.
    pub async fn price_target_summary(
        &self,
        symbol: &str,
    ) -> Result<Option<PriceTargetSummary>, ResearchError> {
        let consensus_url = format!("{BASE_V4}/price-target-consensus");
        let summary_url = format!("{BASE_V4}/price-target-summary");
        let params = vec![("symbol".to_string(), symbol.to_string())];

        let (consensus, summary) = tokio::join!(
            self.get(&consensus_url, params.clone()),
            self.get(&summary_url, params),
        );

        let consensus = first_row(consensus?);
        let summary = first_row(summary?);
        if consensus.is_null() && summary.is_null() {
            return Ok(None);
        }

        Ok(Some(PriceTargetSummary {
            target_mean: pick_f64(&consensus, &["targetConsensus", "targetMean", "targetAvg"]),
            target_high: pick_f64(&consensus, &["targetHigh", "targetMax"]),
            target_low: pick_f64(&consensus, &["targetLow", "targetMin"]),
            target_median: pick_f64(&consensus, &["targetMedian"]),
            last_month_count: pick_i64(&summary, &["lastMonth", "lastMonthCount"]),
            last_month_avg: pick_f64(&summary, &["lastMonthAvgPriceTarget", "lastMonthAvg"]),
            last_quarter_count: pick_i64(&summary, &["lastQuarter", "lastQuarterCount"]),
            last_quarter_avg: pick_f64(&summary, &["lastQuarterAvgPriceTarget", "lastQuarterAvg"]),
            last_year_count: pick_i64(&summary, &["lastYear", "lastYearCount"]),
            last_year_avg: pick_f64(&summary, &["lastYearAvgPriceTarget", "lastYearAvg"]),
            publishers: pick_i64(&summary, &["publishers", "allTime"]),
            confidence: None,
        }))
    }

    pub async fn analyst_estimates(
        &self,
        symbol: &str,
        period: &str,
        limit: usize,
    ) -> Result<Vec<EstimatePeriod>, ResearchError> {
        let url = format!("{BASE_V3}/analyst-estimates/{symbol}");
        let value = self
            .get(
                &url,
                vec![
                    ("period".to_string(), period.to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await?;
        let estimates: Vec<FmpEstimate> = serde_json::from_value(value)
            .map_err(|e| ResearchError::upstream(None, format!("fmp estimates decode: {e}")))?;
        Ok(estimates
            .into_iter()
            .map(|e| EstimatePeriod {
                date: e.date,
                revenue_avg: e.revenue_avg,
                revenue_low: e.revenue_low,
                revenue_high: e.revenue_high,
                eps_avg: e.eps_avg,
                eps_low: e.eps_low,
                eps_high: e.eps_high,
                analysts_revenue: e.analysts_revenue,
                analysts_eps: e.analysts_eps,
            })
            .collect())
    }

    pub async fn rating_snapshot(&self, symbol: &str) -> Result<Option<RatingSnapshot>, ResearchError> {
        let url = format!("{BASE_V3}/rating/{symbol}");
        let value = self.get(&url, Vec::new()).await?;
        let row = first_row(value);
        if row.is_null() {
            return Ok(None);
        }
        Ok(Some(rating_from(&row)))
    }

    pub async fn historical_ratings(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<RatingSnapshot>, ResearchError> {
        let url = format!("{BASE_V3}/historical-rating/{symbol}");
        let value = self
            .get(&url, vec![("limit".to_string(), limit.to_string())])
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows.iter().map(rating_from).collect())
    }

    /// Recent analyst upgrade/downgrade actions, newest first.
    pub async fn grade_actions(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<GradeAction>, ResearchError> {
        let url = format!("{BASE_V4}/upgrades-downgrades");
        let value = self
            .get(&url, vec![("symbol".to_string(), symbol.to_string())])
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .take(limit)
            .map(|row| GradeAction {
                date: pick_date(row, &["publishedDate", "date"]),
                firm: pick_str(row, &["gradingCompany", "company", "firm"]),
                action: pick_str(row, &["action", "newsTitle"]),
                previous_grade: pick_str(row, &["previousGrade", "priorGrade"]),
                new_grade: pick_str(row, &["newGrade", "grade"]),
            })
            .collect())
    }

    pub async fn grade_historical_counts(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<GradeCounts>, ResearchError> {
        let url = format!("{BASE_V4}/grades-historical");
        let value = self
            .get(
                &url,
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| GradeCounts {
                date: pick_date(row, &["date"]),
                strong_buy: pick_i64(row, &["analystRatingsStrongBuy", "strongBuy"]),
                buy: pick_i64(row, &["analystRatingsBuy", "buy"]),
                hold: pick_i64(row, &["analystRatingsHold", "hold"]),
                sell: pick_i64(row, &["analystRatingsSell", "sell"]),
                strong_sell: pick_i64(row, &["analystRatingsStrongSell", "strongSell"]),
            })
            .collect())
    }

    pub async fn grade_consensus(&self, symbol: &str) -> Result<Option<GradeConsensus>, ResearchError> {
        let url = format!("{BASE_V4}/upgrades-downgrades-consensus");
        let value = self
            .get(&url, vec![("symbol".to_string(), symbol.to_string())])
            .await?;
        let row = first_row(value);
        if row.is_null() {
            return Ok(None);
        }
        Ok(Some(GradeConsensus {
            consensus: pick_str(&row, &["consensus"]),
            strong_buy: pick_i64(&row, &["strongBuy"]),
            buy: pick_i64(&row, &["buy"]),
            hold: pick_i64(&row, &["hold"]),
            sell: pick_i64(&row, &["sell"]),
            strong_sell: pick_i64(&row, &["strongSell"]),
        }))
    }

    /// Symbol-level 13F aggregate for one quarter.
    pub async fn institutional_summary(
        &self,
        symbol: &str,
        quarter_end: NaiveDate,
    ) -> Result<Option<InstitutionalSummary>, ResearchError> {
        let url = format!("{BASE_V4}/institutional-ownership/symbol-ownership");
        let value = self
            .get(
                &url,
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("date".to_string(), quarter_end.to_string()),
                    ("includeCurrentQuarter".to_string(), "false".to_string()),
                ],
            )
            .await?;
        let row = first_row(value);
        if row.is_null() {
            return Ok(None);
        }
        Ok(Some(InstitutionalSummary {
            as_of: pick_str(&row, &["date", "reportDate"]),
            metrics: OwnershipMetrics {
                investors_holding: pick_i64(&row, &["investorsHolding", "numberOfInvestors"]),
                total_invested: pick_f64(&row, &["totalInvested", "totalValue"]),
                ownership_pct: pick_f64(&row, &["ownershipPercent", "ownershipPercentage"]),
                new_positions: pick_i64(&row, &["newPositions"]),
                closed_positions: pick_i64(&row, &["closedPositions", "soldOutPositions"]),
                increased_positions: pick_i64(&row, &["increasedPositions"]),
                reduced_positions: pick_i64(&row, &["reducedPositions"]),
                net_shares: pick_f64(
                    &row,
                    &["netSharesChange", "netChangeShares", "sharesChange"],
                ),
            },
        }))
    }

    /// Holder rows for one quarter. Rows alias 4–5 names per attribute.
    pub async fn institutional_holders(
        &self,
        symbol: &str,
        quarter_end: NaiveDate,
    ) -> Result<Vec<HolderPosition>, ResearchError> {
        let url = format!("{BASE_V4}/institutional-ownership/institutional-holders/symbol-ownership-percent");
        let value = self
            .get(
                &url,
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("date".to_string(), quarter_end.to_string()),
                    ("page".to_string(), "0".to_string()),
                ],
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| HolderPosition {
                holder: pick_str(
                    row,
                    &["investorName", "holder", "institutionName", "name", "entityName"],
                )
                .unwrap_or_else(|| "unknown".to_string()),
                shares: pick_f64(
                    row,
                    &["sharesNumber", "shares", "sharesHeld", "numberOfShares"],
                ),
                value: pick_f64(row, &["marketValue", "value", "positionValue", "totalValue"]),
                change_shares: pick_f64(
                    row,
                    &["changeInSharesNumber", "changeShares", "sharesChange", "changeInShares"],
                ),
                change_pct: pick_f64(
                    row,
                    &["changeInSharesNumberPercentage", "changePercent", "sharesChangePercent"],
                ),
                weight_pct: pick_f64(row, &["weight", "weightPercent", "ownership"]),
            })
            .collect())
    }

    pub async fn insider_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<InsiderTrade>, ResearchError> {
        let url = format!("{BASE_V4}/insider-trading");
        let value = self
            .get(
                &url,
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| InsiderTrade {
                date: pick_date(row, &["transactionDate", "filingDate", "date"]),
                insider: pick_str(row, &["reportingName", "insiderName", "name"]),
                title: pick_str(row, &["typeOfOwner", "title", "position"]),
                kind: pick_str(
                    row,
                    &["transactionType", "acquistionOrDisposition", "acquisitionOrDisposition"],
                ),
                shares: pick_f64(row, &["securitiesTransacted", "shares", "amount"]),
                price: pick_f64(row, &["price", "transactionPrice"]),
            })
            .collect())
    }

    pub async fn economic_calendar(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<EconomicEvent>, ResearchError> {
        let url = format!("{BASE_V3}/economic_calendar");
        let value = self
            .get(
                &url,
                vec![
                    ("from".to_string(), from.to_string()),
                    ("to".to_string(), to.to_string()),
                ],
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let event = pick_str(row, &["event", "title"])?;
                Some(EconomicEvent {
                    date: pick_date(row, &["date"]),
                    event,
                    country: pick_str(row, &["country"]),
                    impact: pick_str(row, &["impact", "importance"]),
                    actual: pick_f64(row, &["actual"]),
                    estimate: pick_f64(row, &["estimate", "consensus"]),
                    previous: pick_f64(row, &["previous", "prev"]),
                })
            })
            .collect())
    }

    /// Latest 10y/2y constant-maturity yields inside the window.
    pub async fn treasury_yields(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<TreasuryYields>, ResearchError> {
        let url = format!("{BASE_V4}/treasury");
        let value = self
            .get(
                &url,
                vec![
                    ("from".to_string(), from.to_string()),
                    ("to".to_string(), to.to_string()),
                ],
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        // Rows come newest-first; take the first row carrying both tenors.
        for row in &rows {
            let y10 = pick_f64(row, &["year10", "year_10", "y10"]);
            let y2 = pick_f64(row, &["year2", "year_2", "y2"]);
            if y10.is_some() || y2.is_some() {
                let spread = match (y10, y2) {
                    (Some(a), Some(b)) => Some(a - b),
                    _ => None,
                };
                return Ok(Some(TreasuryYields {
                    y10,
                    y2,
                    spread,
                    as_of: pick_date(row, &["date"]),
                }));
            }
        }
        Ok(None)
    }

    pub async fn market_risk_premium(&self) -> Result<Option<f64>, ResearchError> {
        let url = format!("{BASE_V4}/market_risk_premium");
        let value = self.get(&url, Vec::new()).await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        let us = rows.iter().find(|row| {
            pick_str(row, &["country"])
                .map(|c| c.eq_ignore_ascii_case("united states") || c == "US")
                .unwrap_or(false)
        });
        Ok(us
            .or(rows.first())
            .and_then(|row| pick_f64(row, &["totalEquityRiskPremium", "riskPremium"])))
    }

    pub async fn earnings_call_transcript(
        &self,
        symbol: &str,
        year: i32,
        quarter: u32,
    ) -> Result<Option<Transcript>, ResearchError> {
        let url = format!("{BASE_V3}/earning_call_transcript/{symbol}");
        let value = self
            .get(
                &url,
                vec![
                    ("year".to_string(), year.to_string()),
                    ("quarter".to_string(), quarter.to_string()),
                ],
            )
            .await?;
        let row = first_row(value);
        if row.is_null() {
            return Ok(None);
        }
        let content = pick_str(&row, &["content", "transcript"]).unwrap_or_default();
        if content.is_empty() {
            return Ok(None);
        }
        Ok(Some(Transcript {
            year,
            quarter,
            date: pick_date(&row, &["date"]),
            content,
        }))
    }

    pub async fn stock_news(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<NewsArticle>, ResearchError> {
        let url = format!("{BASE_V3}/stock_news");
        let value = self
            .get(
                &url,
                vec![
                    ("tickers".to_string(), symbol.to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let title = pick_str(row, &["title", "headline"])?;
                let article_url = pick_str(row, &["url", "link"])?;
                Some(NewsArticle {
                    title,
                    url: article_url,
                    source: pick_str(row, &["site", "source", "publisher"])
                        .unwrap_or_else(|| "fmp".to_string()),
                    published_at: parse_datetime(row),
                    summary: pick_str(row, &["text", "summary", "description"]),
                    weight: 2,
                    tickers: pick_str(row, &["symbol", "tickers"])
                        .map(|s| s.split(',').map(|t| t.trim().to_uppercase()).collect())
                        .unwrap_or_default(),
                })
            })
            .collect())
    }
}

fn first_row(value: Value) -> Value {
    match value {
        Value::Array(mut rows) => {
            if rows.is_empty() {
                Value::Null
            } else {
                rows.swap_remove(0)
            }
        }
        other => other,
    }
}

fn rating_from(row: &Value) -> RatingSnapshot {
    RatingSnapshot {
        date: pick_date(row, &["date"]),
        rating: pick_str(row, &["rating"]),
        score: pick_f64(row, &["ratingScore", "score"]),
        recommendation: pick_str(row, &["ratingRecommendation", "recommendation"]),
    }
}

fn parse_datetime(row: &Value) -> Option<DateTime<Utc>> {
    let raw = pick_str(row, &["publishedDate", "date", "datetime"])?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_row_handles_arrays_and_objects() {
        assert_eq!(first_row(json!([1, 2])), json!(1));
        assert_eq!(first_row(json!([])), Value::Null);
        assert_eq!(first_row(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn rating_from_reads_vendor_aliases() {
        let row = json!({"date": "2024-05-01", "rating": "A-", "ratingScore": 4, "ratingRecommendation": "Buy"});
        let snap = rating_from(&row);
        assert_eq!(snap.rating.as_deref(), Some("A-"));
        assert_eq!(snap.score, Some(4.0));
        assert_eq!(snap.recommendation.as_deref(), Some("Buy"));
    }

    #[test]
    fn news_datetime_parses_fmp_format() {
        let row = json!({"publishedDate": "2024-01-02 14:30:00"});
        assert!(parse_datetime(&row).is_some());
    }
}
