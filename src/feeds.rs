//! Feed aggregation: fetch every configured source concurrently, keep what
//! succeeded, and merge it into one newest-first, de-duplicated list.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use futures::future::join_all;
use html2text::render::text_renderer::TrivialDecorator;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::FeedSource;

/// Titles agreeing on this many leading (lower-cased) characters are treated
/// as the same story. Known approximation: distinct stories with a long
/// shared lead get merged, and reworded leads of one story do not.
pub const DEDUP_PREFIX_CHARS: usize = 50;

const DESCRIPTION_MAX_CHARS: usize = 300;

/// Wide enough that rendered descriptions never wrap.
const RENDER_WIDTH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    News,
    Official,
    Social,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::News, Category::Official, Category::Social];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::News => "news",
            Category::Official => "official",
            Category::Social => "social",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    pub source: String,
    pub source_url: String,
    pub published: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl NewsItem {
    pub fn from_entry(source: &FeedSource, entry: RawEntry, fetched_at: DateTime<Utc>) -> Self {
        let title = entry
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let link = entry
            .link
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "#".to_string());

        // Thumbnails are only rendered for video sources
        let thumbnail = match source.category {
            Category::Official => entry.thumbnail,
            Category::News | Category::Social => None,
        };

        Self {
            title,
            link,
            source: source.name.clone(),
            source_url: source.url.clone(),
            published: entry.published.unwrap_or(fetched_at),
            description: entry.description.as_deref().and_then(snippet),
            category: source.category,
            thumbnail,
        }
    }
}

/// One entry as handed over by a feed transport, before normalisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
}

impl From<feed_rs::model::Entry> for RawEntry {
    fn from(entry: feed_rs::model::Entry) -> Self {
        let link = entry
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| entry.links.first())
            .map(|l| l.href.clone());

        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .or_else(|| {
                entry
                    .media
                    .iter()
                    .find_map(|m| m.description.as_ref().map(|d| d.content.clone()))
            });

        let thumbnail = entry
            .media
            .iter()
            .flat_map(|m| m.thumbnails.iter())
            .map(|t| t.image.uri.clone())
            .next();

        Self {
            title: entry.title.map(|t| t.content),
            link,
            published: entry.published.or(entry.updated),
            description,
            thumbnail,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("malformed feed: {0}")]
    Parse(#[from] parser::ParseFeedError),
}

/// Fetches and parses a single feed URL.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError>;
}

pub struct HttpFeedTransport {
    client: Client,
}

impl HttpFeedTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for HttpFeedTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus(status.as_u16()));
        }
        let bytes = response.bytes().await?;

        let parsed = parser::parse(&bytes[..])?;
        Ok(parsed.entries.into_iter().map(RawEntry::from).collect())
    }
}

/// Fetch every source concurrently and wait for all of them to settle.
///
/// A failed source is logged and contributes nothing; the call itself never
/// fails. The result is sorted newest first with near-duplicate titles
/// collapsed onto their most recent instance.
pub async fn fetch_all_news(
    sources: &[FeedSource],
    transport: &dyn FeedTransport,
    clock: &dyn Clock,
) -> Vec<NewsItem> {
    let fetches = sources.iter().map(|source| async move {
        debug!("Fetching feed: {} ({})", source.name, source.rss_url);
        (source, transport.fetch(&source.rss_url).await)
    });
    let settled = join_all(fetches).await;

    let fetched_at = clock.now();
    let mut batches = Vec::with_capacity(settled.len());
    for (source, result) in settled {
        match result {
            Ok(entries) => {
                debug!("Fetched {} entries from '{}'", entries.len(), source.name);
                batches.push(
                    entries
                        .into_iter()
                        .map(|entry| NewsItem::from_entry(source, entry, fetched_at))
                        .collect(),
                );
            }
            Err(e) => error!("Failed to fetch '{}': {}", source.name, e),
        }
    }

    let items = merge_and_dedup(batches);
    info!(
        "Aggregated {} items from {} sources",
        items.len(),
        sources.len()
    );
    items
}

pub fn merge_and_dedup(batches: Vec<Vec<NewsItem>>) -> Vec<NewsItem> {
    let mut items: Vec<NewsItem> = batches.into_iter().flatten().collect();
    // sort_by is stable, so equal timestamps keep merge order
    items.sort_by(|a, b| b.published.cmp(&a.published));
    dedup_by_title(items)
}

/// Keep the first item for each normalised title prefix.
pub fn dedup_by_title(items: Vec<NewsItem>) -> Vec<NewsItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(title_key(&item.title)))
        .collect()
}

pub fn title_key(title: &str) -> String {
    title.to_lowercase().chars().take(DEDUP_PREFIX_CHARS).collect()
}

pub fn filter_by_category(items: &[NewsItem], category: Category) -> Vec<NewsItem> {
    items
        .iter()
        .filter(|item| item.category == category)
        .cloned()
        .collect()
}

/// Coarse human age of `timestamp` as seen from `now`.
pub fn relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let mins = (now - timestamp).num_minutes();
    let hours = mins / 60;
    let days = hours / 24;

    if mins < 1 {
        "just now".to_string()
    } else if mins < 60 {
        format!("{}m ago", mins)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else if days < 7 {
        format!("{}d ago", days)
    } else {
        timestamp.format("%-d %b").to_string()
    }
}

/// Plain-text snippet from feed markup; `None` when nothing readable is left.
fn snippet(markup: &str) -> Option<String> {
    let text = strip_markup(markup);
    if text.is_empty() {
        return None;
    }
    if text.chars().count() <= DESCRIPTION_MAX_CHARS {
        return Some(text);
    }
    let cut: String = text.chars().take(DESCRIPTION_MAX_CHARS).collect();
    Some(format!("{}…", cut.trim_end()))
}

/// Text content of feed markup with every entity decoded and whitespace
/// collapsed to single spaces.
pub fn strip_markup(markup: &str) -> String {
    let text = html2text::config::with_decorator(TrivialDecorator::new())
        .string_from_read(markup.as_bytes(), RENDER_WIDTH)
        .unwrap_or_else(|_| markup.to_string());

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
