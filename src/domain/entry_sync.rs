//! Entry sync function and cached entry lookups

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cache::{CacheKey, CacheStore};
use crate::client::{RequestOptions, ResilientClient};
use crate::database::Database;
use crate::error::{HttpError, SyncError};
use crate::models::{EntityId, EntryInfo, EntryResponse};
use crate::sync::{EntityDirectory, EntitySync};

/// Synchronizes fantasy entries from `/entry/{id}/`
///
/// Each sync upserts the entry by `entry_id` and writes the stored row
/// through to the entry cache, so replays are harmless.
pub struct EntrySyncer {
    client: Arc<ResilientClient>,
    db: Arc<dyn Database>,
    cache: Arc<CacheStore<EntryInfo>>,
    prefix: String,
}

impl EntrySyncer {
    pub fn new(
        client: Arc<ResilientClient>,
        db: Arc<dyn Database>,
        cache: Arc<CacheStore<EntryInfo>>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            db,
            cache,
            prefix: prefix.into(),
        }
    }

    pub fn cache_key(&self, entry_id: EntityId) -> CacheKey {
        CacheKey::entity(&self.prefix, "entry", entry_id)
    }

    /// Fetch, persist and cache one entry; returns the stored record
    pub async fn sync_entry(
        &self,
        entry_id: EntityId,
        event_context: Option<i32>,
    ) -> Result<EntryInfo, SyncError> {
        let response: EntryResponse = self
            .client
            .get(&format!("/entry/{}/", entry_id), RequestOptions::default())
            .await
            .map_err(|e| match e {
                HttpError::ClientError { status: 404 } => SyncError::NotFound(entry_id),
                e => SyncError::Http(e),
            })?;

        if response.id != entry_id {
            return Err(SyncError::InvalidData(format!(
                "requested entry {} but upstream returned {}",
                entry_id, response.id
            )));
        }

        let stored = self
            .db
            .upsert_entry(&response.into_entry_info(event_context))
            .await?;
        self.cache.write_through(&self.cache_key(entry_id), &stored).await;

        debug!(entry_id, event_context, "Entry synced");
        Ok(stored)
    }

    /// Read an entry through the cache; `None` if it was never synced
    pub async fn get_entry(&self, entry_id: EntityId) -> Result<Option<EntryInfo>, SyncError> {
        let db = self.db.clone();
        let result = self
            .cache
            .get_or_load(&self.cache_key(entry_id), move || async move {
                db.find_entry(entry_id)
                    .await?
                    .ok_or(SyncError::NotFound(entry_id))
            })
            .await;

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read several entries through the cache with one repository query
    /// for all misses; unknown ids are skipped
    pub async fn get_entries(&self, entry_ids: &[EntityId]) -> Result<Vec<EntryInfo>, SyncError> {
        let keys: Vec<CacheKey> = entry_ids.iter().map(|&id| self.cache_key(id)).collect();
        let by_key: HashMap<CacheKey, EntityId> = keys
            .iter()
            .cloned()
            .zip(entry_ids.iter().copied())
            .collect();

        let db = self.db.clone();
        let prefix = self.prefix.clone();
        let found = self
            .cache
            .get_all_or_load(&keys, move |missing| async move {
                let ids: Vec<EntityId> = missing.iter().filter_map(|k| by_key.get(k).copied()).collect();
                let entries = db.find_entries(&ids).await?;
                Ok::<_, SyncError>(
                    entries
                        .into_iter()
                        .map(|e| (CacheKey::entity(&prefix, "entry", e.entry_id), e))
                        .collect(),
                )
            })
            .await?;

        Ok(keys.iter().filter_map(|k| found.get(k).cloned()).collect())
    }

    /// Load every stored entry into the cache
    pub async fn warm_up(&self) -> Result<usize, SyncError> {
        let db = self.db.clone();
        let prefix = self.prefix.clone();
        let count = self
            .cache
            .warm_up(move || async move {
                let ids = db.list_entry_ids().await?;
                let entries = db.find_entries(&ids).await?;
                Ok::<_, SyncError>(
                    entries
                        .into_iter()
                        .map(|e| (CacheKey::entity(&prefix, "entry", e.entry_id), e))
                        .collect(),
                )
            })
            .await?;

        info!(count, "Entry cache warmed up");
        Ok(count)
    }
}

#[async_trait]
impl EntitySync for EntrySyncer {
    async fn sync(&self, entity_id: EntityId, event_context: Option<i32>) -> Result<(), SyncError> {
        self.sync_entry(entity_id, event_context).await.map(|_| ())
    }
}

#[async_trait]
impl EntityDirectory for EntrySyncer {
    async fn all_entity_ids(&self) -> Result<Vec<EntityId>, SyncError> {
        Ok(self.db.list_entry_ids().await?)
    }
}
