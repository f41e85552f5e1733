use std::{future::Future, sync::Arc, time::Duration};

use moka::future::Cache;

use crate::{error::Result, types::StatsSummary};

/// Summaries keyed by normalized username, fresh for `ttl` after storing.
///
/// Concurrent misses on one key share a single fetch. Failed fetches are
/// not stored.
#[derive(Clone)]
pub struct SummaryCache {
    entries: Cache<String, Arc<StatsSummary>>,
}

#[must_use]
pub fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

impl SummaryCache {
    #[must_use]
    pub fn new(ttl: Duration, capacity: Option<usize>) -> Self {
        let mut builder = Cache::builder().time_to_live(ttl);
        if let Some(capacity) = capacity {
            builder = builder.max_capacity(capacity as u64);
        }
        Self {
            entries: builder.build(),
        }
    }

    pub async fn get(&self, username: &str) -> Option<Arc<StatsSummary>> {
        self.entries.get(&normalize(username)).await
    }

    pub async fn insert(&self, username: &str, summary: Arc<StatsSummary>) {
        self.entries.insert(normalize(username), summary).await;
    }

    /// Cached value, or the result of `init`, which is stored on success.
    /// While one caller runs `init` for a key, others for that key wait for
    /// its result.
    pub async fn get_or_try_insert_with<F>(
        &self,
        username: &str,
        init: F,
    ) -> Result<Arc<StatsSummary>>
    where
        F: Future<Output = Result<Arc<StatsSummary>>>,
    {
        self.entries
            .try_get_with(normalize(username), init)
            .await
            .map_err(|error| error.as_ref().clone())
    }

    /// Approximate until pending maintenance has run; see `sync`.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies pending expirations and evictions.
    pub async fn sync(&self) {
        self.entries.run_pending_tasks().await;
    }
}
