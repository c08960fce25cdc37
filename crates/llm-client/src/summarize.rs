use serde_json::Value;

use research_core::{NewsArticle, SentimentTone};

use crate::analyzer::LlmClient;
use crate::chat::{ChatMessage, ChatOptions};
use crate::error::LlmError;
use crate::pricing::usage_from;

const SUMMARY_MAX_TOKENS: u32 = 700;

/// Cap on raw text shipped to the summary model.
const SOURCE_TEXT_CAP: usize = 16_000;

#[derive(Debug, Clone)]
pub struct NewsSentiment {
    pub tone: SentimentTone,
    pub label: String,
    pub summary: String,
    pub supporting_events: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TranscriptDigest {
    pub summary: String,
    pub bullets: Vec<String>,
}

fn clip(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Task-specific summarization calls. All run against the secondary model
/// with strict JSON output, mirroring the main analysis call at a smaller
/// scale.
impl LlmClient {
    async fn summary_call(&self, system: &str, user: String) -> Result<Value, LlmError> {
        let model = self.config.summary_model.clone();
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let options = ChatOptions {
            temperature: 0.0,
            max_tokens: SUMMARY_MAX_TOKENS,
            seed: None,
            json_mode: true,
        };
        let outcome = self.chat.complete(&model, &messages, &options).await?;
        self.monitor.record(&usage_from(&model, &outcome.tokens));
        self.parse_lenient(&outcome.content).await
    }

    /// Condense an MD&A section into a short narrative.
    pub async fn summarize_mda(&self, ticker: &str, mda_text: &str) -> Result<String, LlmError> {
        let system = "你是財報分析助手。閱讀使用者提供的 MD&A（管理層討論與分析）段落，\
             以繁體中文摘要經營狀況、成長動能與風險。\
             輸出 JSON：{\"summary\": \"200字以內的摘要\"}";
        let parsed = self
            .summary_call(
                system,
                format!("公司：{ticker}\n\nMD&A 原文：\n{}", clip(mda_text, SOURCE_TEXT_CAP)),
            )
            .await?;
        parsed
            .get("summary")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::InvalidOutput("mda summary missing".to_string()))
    }

    /// Summarize an earnings-call transcript into a narrative plus bullets.
    pub async fn summarize_transcript(
        &self,
        ticker: &str,
        transcript: &str,
    ) -> Result<TranscriptDigest, LlmError> {
        let system = "你是法說會逐字稿分析助手。摘要重點並列出要點。\
             輸出 JSON：{\"summary\": \"摘要\", \"bullets\": [\"要點\"]}";
        let parsed = self
            .summary_call(
                system,
                format!(
                    "公司：{ticker}\n\n法說會逐字稿：\n{}",
                    clip(transcript, SOURCE_TEXT_CAP)
                ),
            )
            .await?;
        let summary = parsed
            .get("summary")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::InvalidOutput("transcript summary missing".to_string()))?;
        Ok(TranscriptDigest {
            summary,
            bullets: string_list(&parsed, "bullets"),
        })
    }

    /// Sentiment pass over the filtered article list.
    pub async fn news_sentiment(
        &self,
        ticker: &str,
        articles: &[NewsArticle],
    ) -> Result<NewsSentiment, LlmError> {
        let system = "你是新聞情緒分析助手。判斷整體新聞情緒並摘要。\
             sentiment_label 必須是 樂觀、中性、悲觀 三者之一。\
             輸出 JSON：{\"sentiment_label\": \"樂觀|中性|悲觀\", \
             \"summary\": \"摘要\", \"supporting_events\": [\"支持事件\"]}";
        let mut digest = format!("公司：{ticker}\n\n新聞列表：\n");
        for article in articles {
            digest.push_str("- ");
            digest.push_str(&article.title);
            if let Some(summary) = &article.summary {
                digest.push_str("：");
                digest.push_str(clip(summary, 300));
            }
            digest.push('\n');
        }
        let parsed = self.summary_call(system, digest).await?;

        let label = parsed
            .get("sentiment_label")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let tone = SentimentTone::from_label(&label).ok_or_else(|| {
            LlmError::InvalidOutput(format!("unrecognized sentiment label: {label:?}"))
        })?;
        Ok(NewsSentiment {
            tone,
            label: tone.label_zh().to_string(),
            summary: parsed
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            supporting_events: string_list(&parsed, "supporting_events"),
        })
    }

    /// Search keywords for the news fetch. The deterministic fallback list
    /// lives with the news builder; this is only the LLM variant.
    pub async fn extract_keywords(
        &self,
        ticker: &str,
        company_name: Option<&str>,
    ) -> Result<Vec<String>, LlmError> {
        let system = "你是新聞檢索助手。為指定公司產生英文新聞搜尋關鍵字。\
             輸出 JSON：{\"keywords\": [\"關鍵字\"]}，最多 6 個。";
        let parsed = self
            .summary_call(
                system,
                format!(
                    "公司代號：{ticker}\n公司名稱：{}",
                    company_name.unwrap_or("unknown")
                ),
            )
            .await?;
        let keywords = string_list(&parsed, "keywords");
        if keywords.is_empty() {
            return Err(LlmError::InvalidOutput("no keywords returned".to_string()));
        }
        Ok(keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_char_boundaries() {
        let text = "動能強勁的公司";
        assert_eq!(clip(text, 2), "動能");
        assert_eq!(clip("short", 100), "short");
    }

    #[test]
    fn string_list_filters_blanks() {
        let value = serde_json::json!({"bullets": ["a", "", "  ", "b"]});
        assert_eq!(string_list(&value, "bullets"), vec!["a", "b"]);
        assert!(string_list(&value, "missing").is_empty());
    }
}
