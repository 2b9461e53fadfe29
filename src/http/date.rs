//! Cached `Date` header value.
//!
//! Formatting the date on every response is wasted work when a second-level
//! resolution is all HTTP needs. The current string is published as an
//! immutable snapshot that connections read without locking, and a
//! background task replaces it periodically.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

pub struct CachedDate {
    current: ArcSwap<String>,
}

impl Default for CachedDate {
    fn default() -> Self {
        Self::new()
    }
}

impl CachedDate {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(http_date(Utc::now())),
        }
    }

    /// A cache pinned to `value`; it changes only through [`CachedDate::set`].
    pub fn fixed(value: impl Into<String>) -> Self {
        Self {
            current: ArcSwap::from_pointee(value.into()),
        }
    }

    pub fn get(&self) -> Arc<String> {
        self.current.load_full()
    }

    pub fn set(&self, value: impl Into<String>) {
        self.current.store(Arc::new(value.into()));
    }

    pub fn refresh(&self) {
        self.set(http_date(Utc::now()));
    }

    /// Spawns a task refreshing the cache every `every`.
    pub fn spawn_refresher(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                cache.refresh();
            }
        })
    }
}

/// Formats a timestamp as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
