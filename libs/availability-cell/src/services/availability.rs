use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    AvailabilityBlock, AvailabilityError, BlockDeletion, BlockSource, CreateBlockRequest,
    SaveWorkingProfileRequest, UpdateBlockRequest, WeekGrid, WorkingProfile,
};
use crate::services::blocks::{BlockStore, SupabaseBlockStore};
use crate::services::profile::{ProfileStore, SupabaseProfileStore};
use crate::services::upstream::{UpstreamCalendar, UpstreamError};
use crate::services::week;

/// Everything the slot resolver needs about one professional and date,
/// apart from the appointments.
#[derive(Debug, Clone)]
pub struct DayContext {
    pub profile: WorkingProfile,
    pub blocks: Vec<AvailabilityBlock>,
}

pub struct AvailabilityService {
    profiles: Arc<dyn ProfileStore>,
    blocks: Arc<dyn BlockStore>,
    upstream: Arc<dyn UpstreamCalendar>,
}

impl AvailabilityService {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        blocks: Arc<dyn BlockStore>,
        upstream: Arc<dyn UpstreamCalendar>,
    ) -> Self {
        Self { profiles, blocks, upstream }
    }

    pub fn from_config(config: &AppConfig, upstream: Arc<dyn UpstreamCalendar>) -> Self {
        Self::new(
            Arc::new(SupabaseProfileStore::new(config)),
            Arc::new(SupabaseBlockStore::new(config)),
            upstream,
        )
    }

    pub fn block_store(&self) -> Arc<dyn BlockStore> {
        self.blocks.clone()
    }

    pub async fn get_profile(&self, professional_id: Uuid) -> Result<WorkingProfile, AvailabilityError> {
        self.profiles
            .get(professional_id)
            .await?
            .ok_or(AvailabilityError::ProfileNotFound(professional_id))
    }

    pub async fn save_profile(
        &self,
        professional_id: Uuid,
        request: SaveWorkingProfileRequest,
    ) -> Result<WorkingProfile, AvailabilityError> {
        let profile = request.into_profile(professional_id);
        profile.validate()?;

        let saved = self.profiles.upsert(&profile).await?;
        info!("Working profile saved for professional {}", professional_id);
        Ok(saved)
    }

    pub async fn create_block(
        &self,
        professional_id: Uuid,
        request: CreateBlockRequest,
    ) -> Result<AvailabilityBlock, AvailabilityError> {
        request.kind.validate()?;

        let block = AvailabilityBlock::manual(professional_id, request.kind, request.title);
        let created = self.blocks.insert(&block).await?;

        info!("Created {} block {} for professional {}", created.kind.as_str(), created.id, professional_id);
        Ok(created)
    }

    pub async fn get_block(&self, professional_id: Uuid, block_id: Uuid) -> Result<AvailabilityBlock, AvailabilityError> {
        self.blocks
            .get(professional_id, block_id)
            .await?
            .filter(|block| !block.is_tombstoned())
            .ok_or(AvailabilityError::BlockNotFound(block_id))
    }

    pub async fn update_block(
        &self,
        professional_id: Uuid,
        block_id: Uuid,
        request: UpdateBlockRequest,
    ) -> Result<AvailabilityBlock, AvailabilityError> {
        let original = self.get_block(professional_id, block_id).await?;

        if original.is_external_event() {
            return Err(AvailabilityError::Validation(
                "Imported blocks are managed by the connected calendar".to_string(),
            ));
        }

        let mut block = original.clone();
        let mut stale_reference = None;

        if let Some(kind) = request.kind {
            kind.validate()?;

            if kind != block.kind {
                // The exported event no longer matches; drop it so the next export recreates it.
                if let Some(reference) = block.upstream_reference().map(str::to_string) {
                    match self.upstream.delete_event(professional_id, &reference).await {
                        Ok(()) | Err(UpstreamError::NotConnected) => {}
                        Err(e) => {
                            warn!("Upstream delete of {} failed after block {} changed: {}", reference, block_id, e);
                            stale_reference = Some(reference);
                        }
                    }
                    block.source = BlockSource::Manual { exported_event_id: None };
                }
                block.kind = kind;
            }
        }

        if let Some(title) = request.title {
            block.title = Some(title);
        }
        block.updated_at = Utc::now();

        let updated = self.blocks.update(&block).await?;

        if let Some(reference) = stale_reference {
            if let Err(e) = self.park_stale_event(&original, reference).await {
                self.blocks.update(&original).await?;
                return Err(e);
            }
        }

        Ok(updated)
    }

    /// Keeps an upstream event that could not be deleted as a tombstone of
    /// the block's previous shape, so reconciliation retries the delete.
    async fn park_stale_event(&self, previous: &AvailabilityBlock, reference: String) -> Result<(), AvailabilityError> {
        let now = Utc::now();
        let mut stale = previous.clone();
        stale.id = Uuid::new_v4();
        stale.source = BlockSource::Manual { exported_event_id: Some(reference.clone()) };
        stale.deleted_at = Some(now);
        stale.updated_at = now;

        self.blocks.insert(&stale).await?;
        info!("Upstream event {} parked as tombstone {} for reconciliation", reference, stale.id);
        Ok(())
    }

    /// Removes a block. A block mirrored upstream is tombstoned first; it is
    /// purged once the upstream event is gone, otherwise the reconciler
    /// retries the upstream delete.
    pub async fn delete_block(&self, professional_id: Uuid, block_id: Uuid) -> Result<BlockDeletion, AvailabilityError> {
        let block = self.get_block(professional_id, block_id).await?;

        let Some(reference) = block.upstream_reference() else {
            self.blocks.purge(professional_id, block_id).await?;
            info!("Deleted block {} for professional {}", block_id, professional_id);
            return Ok(BlockDeletion::Deleted);
        };

        self.blocks.tombstone(professional_id, block_id, Utc::now()).await?;

        match self.upstream.delete_event(professional_id, reference).await {
            Ok(()) => {
                self.blocks.purge(professional_id, block_id).await?;
                info!("Deleted block {} and upstream event {}", block_id, reference);
                Ok(BlockDeletion::Deleted)
            }
            Err(UpstreamError::NotConnected) => {
                self.blocks.purge(professional_id, block_id).await?;
                info!("Deleted block {}; no calendar connected to remove event {}", block_id, reference);
                Ok(BlockDeletion::Deleted)
            }
            Err(e) => {
                warn!("Upstream delete of {} failed, block {} left for reconciliation: {}", reference, block_id, e);
                Ok(BlockDeletion::Tombstoned)
            }
        }
    }

    pub async fn blocks_covering_date(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        let candidates = self.blocks.list_active(professional_id, Some((date, date))).await?;
        Ok(candidates.into_iter().filter(|block| block.covers_date(date)).collect())
    }

    pub async fn blocks_covering(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        let candidates = self.blocks_covering_date(professional_id, date).await?;
        Ok(candidates.into_iter().filter(|block| block.covers(date, time)).collect())
    }

    pub async fn day_context(&self, professional_id: Uuid, date: NaiveDate) -> Result<DayContext, AvailabilityError> {
        let profile = self.get_profile(professional_id).await?;
        let blocks = self.blocks_covering_date(professional_id, date).await?;
        debug!("{} blocks cover {} for professional {}", blocks.len(), date, professional_id);

        Ok(DayContext { profile, blocks })
    }

    pub async fn week(&self, professional_id: Uuid, week_start: NaiveDate) -> Result<WeekGrid, AvailabilityError> {
        let profile = self.get_profile(professional_id).await?;
        let week_end = week_start + Duration::days(6);
        let blocks = self.blocks.list_active(professional_id, Some((week_start, week_end))).await?;

        Ok(week::project(&blocks, &profile, week_start))
    }
}
