use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::clock::Clock;
use crate::config::FeedSource;
use crate::feeds::{fetch_all_news, FeedTransport, NewsItem};
use crate::fixtures::{Fixture, FixturesClient, MatchResult, Standing};

/// Everything the page renders, captured by one refresh.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub items: Vec<NewsItem>,
    pub fixtures: Vec<Fixture>,
    pub results: Vec<MatchResult>,
    pub standings: Vec<Standing>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewsService {
    sources: Vec<FeedSource>,
    transport: Arc<dyn FeedTransport>,
    fixtures: FixturesClient,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    refreshing: RwLock<bool>,
    /// Held for the duration of a collect so callers share one fetch
    fetch_lock: Mutex<()>,
}

impl NewsService {
    pub fn new(
        sources: Vec<FeedSource>,
        transport: Arc<dyn FeedTransport>,
        fixtures: FixturesClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources,
            transport,
            fixtures,
            clock,
            snapshot: RwLock::new(None),
            refreshing: RwLock::new(false),
            fetch_lock: Mutex::new(()),
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Latest snapshot, fetching one inline if none has been taken yet.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        if let Some(snapshot) = self.snapshot.read().await.clone() {
            return snapshot;
        }

        let _fetch = self.fetch_lock.lock().await;
        // Another caller may have filled it while we waited
        if let Some(snapshot) = self.snapshot.read().await.clone() {
            return snapshot;
        }

        let snapshot = Arc::new(self.collect().await);
        *self.snapshot.write().await = Some(snapshot.clone());
        snapshot
    }

    pub async fn refresh(&self) {
        // Check if already refreshing
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return;
            }
            *refreshing = true;
        }

        let _fetch = self.fetch_lock.lock().await;
        let snapshot = self.collect().await;
        info!(
            "Refresh complete: {} items, {} fixtures, {} results",
            snapshot.items.len(),
            snapshot.fixtures.len(),
            snapshot.results.len()
        );
        *self.snapshot.write().await = Some(Arc::new(snapshot));

        *self.refreshing.write().await = false;
    }

    async fn collect(&self) -> Snapshot {
        let (items, fixtures, results, standings) = tokio::join!(
            fetch_all_news(&self.sources, self.transport.as_ref(), self.clock.as_ref()),
            self.fixtures.upcoming_fixtures(),
            self.fixtures.recent_results(),
            self.fixtures.standings(),
        );

        Snapshot {
            items,
            fixtures,
            results,
            standings,
            updated_at: self.clock.now(),
        }
    }
}

pub async fn start_background_refresh(service: Arc<NewsService>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes.max(1) * 60);

    info!("Starting initial snapshot refresh");
    service.refresh().await;

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled snapshot refresh");
        service.refresh().await;
    }
}
