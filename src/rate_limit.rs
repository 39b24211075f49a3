use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Daily limit reached. Try again tomorrow.")]
    DailyLimitReached,
    #[error("Rate limit exceeded. Try again in {minutes_left} minutes.")]
    ClientLimited { minutes_left: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub per_client: u32,
    pub window: Duration,
    pub daily: u32,
}

#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    count: u32,
    resets_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Usage {
    clients: HashMap<String, ClientWindow>,
    day: NaiveDate,
    daily_count: u32,
}

/// Per-client fixed windows plus a global counter that resets at the UTC
/// day boundary.
pub struct UsageLimiter {
    limits: Limits,
    clock: Arc<dyn Clock>,
    usage: Mutex<Usage>,
}

impl UsageLimiter {
    pub fn new(limits: Limits, clock: Arc<dyn Clock>) -> Self {
        let day = clock.now().date_naive();
        Self {
            limits,
            clock,
            usage: Mutex::new(Usage {
                clients: HashMap::new(),
                day,
                daily_count: 0,
            }),
        }
    }

    /// Count one request from `client`, or say why it is refused.
    /// Refused requests are not counted.
    pub fn check(&self, client: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let mut guard = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let usage = &mut *guard;

        if usage.day != now.date_naive() {
            usage.day = now.date_naive();
            usage.daily_count = 0;
        }

        if usage.daily_count >= self.limits.daily {
            return Err(RateLimitError::DailyLimitReached);
        }

        // Drop windows that have lapsed so the map tracks only live clients
        usage.clients.retain(|_, w| now < w.resets_at);

        match usage.clients.get_mut(client) {
            Some(window) if window.count >= self.limits.per_client => {
                let secs = (window.resets_at - now).num_seconds();
                let minutes_left = (secs + 59) / 60;
                debug!("Client {} limited for {} more minutes", client, minutes_left);
                return Err(RateLimitError::ClientLimited { minutes_left });
            }
            Some(window) => window.count += 1,
            None => {
                usage.clients.insert(
                    client.to_string(),
                    ClientWindow {
                        count: 1,
                        resets_at: now + self.limits.window,
                    },
                );
            }
        }

        usage.daily_count += 1;
        Ok(())
    }

    pub fn daily_count(&self) -> u32 {
        self.usage.lock().unwrap_or_else(|e| e.into_inner()).daily_count
    }
}

/// Client identity for rate limiting: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then "unknown".
pub fn client_id(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
