use std::sync::Arc;

use anyhow::Context;

use crate::{
    cache::SummaryCache,
    conf::Conf,
    error::{Error, Result},
    scratch::{self, Paging, ProfileSource, ScratchClient},
    stats,
    types::StatsSummary,
};

#[derive(Clone)]
pub struct Lookup {
    source: Arc<dyn ProfileSource>,
    cache: Arc<SummaryCache>,
    paging: Paging,
}

impl Lookup {
    pub fn new(
        source: Arc<dyn ProfileSource>,
        cache: Arc<SummaryCache>,
        paging: Paging,
    ) -> Self {
        Self {
            source,
            cache,
            paging,
        }
    }

    /// Scratch API client and cache as configured.
    pub fn from_conf(conf: &Conf) -> anyhow::Result<Self> {
        let client =
            ScratchClient::new(&conf.api_base_url, conf.request_timeout())
                .context("Failed to build Scratch API client")?;
        let cache = SummaryCache::new(conf.cache_ttl(), conf.cache_capacity);
        let paging = Paging {
            page_size: conf.page_size,
            max_projects: conf.max_projects,
        };
        Ok(Self::new(Arc::new(client), Arc::new(cache), paging))
    }

    /// Cached summary for `username`, or a fresh fetch + aggregate which is
    /// then cached. Concurrent lookups of one uncached user share a fetch.
    #[tracing::instrument(skip(self))]
    pub async fn summary(&self, username: &str) -> Result<Arc<StatsSummary>> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::Validation);
        }
        if let Some(summary) = self.cache.get(username).await {
            tracing::debug!("Cache hit.");
            return Ok(summary);
        }
        tracing::debug!("Cache miss.");
        self.cache
            .get_or_try_insert_with(username, self.fetch(username))
            .await
    }

    async fn fetch(&self, username: &str) -> Result<Arc<StatsSummary>> {
        let (profile, projects) =
            scratch::fetch_user(self.source.as_ref(), username, self.paging)
                .await
                .inspect_err(|error| {
                    tracing::warn!(?error, "Fetch failed.");
                })?;
        Ok(Arc::new(stats::summarize(
            &profile,
            &projects,
            chrono::Utc::now(),
        )))
    }
}
