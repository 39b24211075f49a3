//! Headline summary and story clustering via the Anthropic Messages API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::config::SummaryConfig;
use crate::feeds::{Category, NewsItem};

const ANTHROPIC_VERSION: &str = "2023-06-01";

const TRANSFER_FOCUS: &str = "\n\nIMPORTANT: It's transfer window time! Pay special attention to any transfer news - signings, rumors, departures. For any player mentioned in transfer context, include their name and position abbreviation (GK, CB, RB, LB, CDM, CM, CAM, RW, LW, ST, CF).";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("summary API returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

/// Headlines covering the same story. Indices are the 1-based numbers the
/// headlines were given in the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryCluster {
    pub topic: String,
    #[serde(default)]
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryData {
    pub summary: Option<String>,
    pub clusters: Vec<StoryCluster>,
    pub generated_at: DateTime<Utc>,
}

impl SummaryData {
    fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            summary: None,
            clusters: Vec::new(),
            generated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    summary: Option<String>,
    #[serde(default)]
    clusters: Vec<StoryCluster>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Newest news-category headlines, tagged with their source, as fed to the
/// model.
pub fn headlines(items: &[NewsItem], max: usize) -> Vec<String> {
    items
        .iter()
        .filter(|item| item.category == Category::News)
        .take(max)
        .map(|item| format!("\"{}\" ({})", item.title, item.source))
        .collect()
}

/// January, or June through August.
pub fn is_transfer_window(date: NaiveDate) -> bool {
    matches!(date.month(), 1 | 6..=8)
}

pub fn build_prompt(headlines: &[String], max_headlines: usize, today: NaiveDate) -> String {
    let numbered = headlines
        .iter()
        .take(max_headlines)
        .enumerate()
        .map(|(i, h)| format!("{}. {}", i + 1, h))
        .collect::<Vec<_>>()
        .join("\n");

    let transfer_focus = if is_transfer_window(today) {
        TRANSFER_FOCUS
    } else {
        ""
    };

    format!(
        r#"You are a Portsmouth FC fan analyzing the latest Pompey news. Based on these headlines:

{numbered}

Provide a JSON response with:
1. "summary": A 2-3 sentence summary of the key Pompey news right now. Casual but informed tone.{transfer_focus}
2. "clusters": An array of story clusters where multiple headlines cover the same topic (e.g., same transfer rumor, same match). Each cluster has "topic" (brief label) and "indices" (array of headline numbers that overlap). Only include clusters with 2+ headlines. Empty array if no overlaps.

Example response format:
{{"summary": "Your summary here...", "clusters": [{{"topic": "Smith transfer rumor", "indices": [1, 4, 7]}}, {{"topic": "Derby result", "indices": [2, 5]}}]}}

Respond with only valid JSON, no other text."#
    )
}

/// Read the model's reply. Anything that is not the expected JSON object is
/// kept whole as the summary text.
pub fn parse_summary(raw: &str, generated_at: DateTime<Utc>) -> SummaryData {
    let trimmed = strip_code_fence(raw.trim());

    match serde_json::from_str::<ModelReply>(trimmed) {
        Ok(reply) => SummaryData {
            summary: reply.summary.filter(|s| !s.trim().is_empty()),
            clusters: reply
                .clusters
                .into_iter()
                .filter(|c| c.indices.len() >= 2)
                .collect(),
            generated_at,
        },
        Err(_) => SummaryData {
            summary: Some(raw.trim().to_string()).filter(|s| !s.is_empty()),
            clusters: Vec::new(),
            generated_at,
        },
    }
}

fn strip_code_fence(text: &str) -> &str {
    text.strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(text)
}

pub struct SummaryClient {
    client: Client,
    config: SummaryConfig,
    api_key: Option<String>,
    clock: Arc<dyn Clock>,
}

impl SummaryClient {
    pub fn new(
        config: SummaryConfig,
        api_key: Option<String>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Result<Self, SummaryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            api_key,
            clock,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn generate(&self, headlines: &[String]) -> Result<SummaryData, SummaryError> {
        let now = self.clock.now();
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(SummaryData::empty(now));
        };
        if headlines.is_empty() {
            return Ok(SummaryData::empty(now));
        }

        let prompt = build_prompt(headlines, self.config.max_headlines, now.date_naive());
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        debug!(
            "Requesting summary of {} headlines from {}",
            headlines.len().min(self.config.max_headlines),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Summary generation failed with status {}", status);
            return Err(SummaryError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let reply: MessagesResponse = response.json().await?;
        let text = reply
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text);

        Ok(match text {
            Some(text) => parse_summary(&text, now),
            None => SummaryData::empty(now),
        })
    }
}
