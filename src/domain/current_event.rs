//! Current gameweek lookup
//!
//! Resolution order is cache, then repository, then the live
//! `/bootstrap-static/` endpoint. An empty repository is a miss. The
//! cache key is partitioned by season so a rollover never serves last
//! season's gameweek.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::client::{RequestOptions, ResilientClient, TimeoutClass};
use crate::database::Database;
use crate::error::SyncError;
use crate::models::{BootstrapStatic, Event};
use crate::sync::EventContextSource;

/// Season label for a date, e.g. `"2425"` for 2024/25
///
/// Seasons roll over on the first of July.
pub fn season_for(date: DateTime<Utc>) -> String {
    let start_year = if date.month() >= 7 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{:02}{:02}", start_year % 100, (start_year + 1) % 100)
}

pub struct CurrentEventService {
    client: Arc<ResilientClient>,
    db: Arc<dyn Database>,
    cache: CacheStore<Event>,
    prefix: String,
    pinned_season: Option<String>,
}

impl CurrentEventService {
    pub fn new(
        client: Arc<ResilientClient>,
        db: Arc<dyn Database>,
        cache: CacheStore<Event>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            db,
            cache,
            prefix: prefix.into(),
            pinned_season: None,
        }
    }

    /// Pin the season partition instead of deriving it from the clock
    pub fn with_season(mut self, season: impl Into<String>) -> Self {
        self.pinned_season = Some(season.into());
        self
    }

    /// The season in effect right now
    pub fn season(&self) -> String {
        self.pinned_season
            .clone()
            .unwrap_or_else(|| season_for(Utc::now()))
    }

    pub fn cache_key(&self) -> CacheKey {
        self.key_for(&self.season())
    }

    fn key_for(&self, season: &str) -> CacheKey {
        CacheKey::partitioned(&format!("{}:event:current", self.prefix), season)
    }

    /// The current gameweek, or `None` before the season starts
    pub async fn current_event(&self) -> Result<Option<Event>, SyncError> {
        let season = self.season();
        let key = self.key_for(&season);

        if let Some(event) = self.cache.get(&key).await {
            debug!(event_id = event.event_id, %season, "Current event from cache");
            return Ok(Some(event));
        }

        match self.db.find_current_event(&season).await {
            Ok(Some(event)) => {
                debug!(event_id = event.event_id, %season, "Current event from repository");
                self.cache.write_through(&key, &event).await;
                return Ok(Some(event));
            }
            Ok(None) => debug!(%season, "No current event stored, asking upstream"),
            Err(e) => warn!(error = %e, "Current event lookup failed, asking upstream"),
        }

        self.fetch_from_upstream(&season).await
    }

    /// Drop the cached value and resolve from upstream
    pub async fn refresh(&self) -> Result<Option<Event>, SyncError> {
        let season = self.season();
        self.invalidate_season(&season).await;
        self.fetch_from_upstream(&season).await
    }

    /// Remove the cached current event; failures are logged
    pub async fn invalidate(&self) {
        self.invalidate_season(&self.season()).await;
    }

    async fn invalidate_season(&self, season: &str) {
        if let Err(e) = self.cache.invalidate(&self.key_for(season)).await {
            warn!(error = %e, "Failed to invalidate current event");
        }
    }

    async fn fetch_from_upstream(&self, season: &str) -> Result<Option<Event>, SyncError> {
        let bootstrap: BootstrapStatic = self
            .client
            .get(
                "/bootstrap-static/",
                RequestOptions::with_timeout(TimeoutClass::Long),
            )
            .await?;

        let current = bootstrap.current_event();
        let events = bootstrap.into_events();

        if let Err(e) = self.db.upsert_events(season, &events).await {
            warn!(error = %e, count = events.len(), "Failed to store gameweeks");
        }

        match &current {
            Some(event) => {
                info!(event_id = event.event_id, season, "Current event resolved from upstream");
                self.cache.write_through(&self.key_for(season), event).await;
            }
            None => info!(season, "Upstream reports no current event"),
        }

        Ok(current)
    }
}

#[async_trait]
impl EventContextSource for CurrentEventService {
    async fn current_event_id(&self) -> Result<Option<i32>, SyncError> {
        Ok(self.current_event().await?.map(|event| event.event_id))
    }
}
