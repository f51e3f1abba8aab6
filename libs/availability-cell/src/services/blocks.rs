use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{filter_value, SupabaseClient};

use crate::models::{AvailabilityBlock, AvailabilityError, BlockRow};

#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn insert(&self, block: &AvailabilityBlock) -> Result<AvailabilityBlock, AvailabilityError>;

    async fn update(&self, block: &AvailabilityBlock) -> Result<AvailabilityBlock, AvailabilityError>;

    /// Includes tombstoned blocks.
    async fn get(&self, professional_id: Uuid, block_id: Uuid) -> Result<Option<AvailabilityBlock>, AvailabilityError>;

    /// Live blocks that may touch `[from, to]`. Weekly blocks are always
    /// candidates; callers apply exact per-date matching.
    async fn list_active(
        &self,
        professional_id: Uuid,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<AvailabilityBlock>, AvailabilityError>;

    async fn list_tombstoned(&self, professional_id: Uuid) -> Result<Vec<AvailabilityBlock>, AvailabilityError>;

    /// Includes tombstoned blocks, so a pending upstream delete is never re-imported.
    async fn find_by_external_id(
        &self,
        professional_id: Uuid,
        external_event_id: &str,
    ) -> Result<Option<AvailabilityBlock>, AvailabilityError>;

    async fn tombstone(&self, professional_id: Uuid, block_id: Uuid, at: DateTime<Utc>) -> Result<(), AvailabilityError>;

    async fn purge(&self, professional_id: Uuid, block_id: Uuid) -> Result<(), AvailabilityError>;

    async fn list_external(&self, professional_id: Uuid) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        Ok(self
            .list_active(professional_id, None)
            .await?
            .into_iter()
            .filter(|block| block.is_external_event())
            .collect())
    }

    /// Manual blocks that have not been mirrored upstream yet.
    async fn list_pending_export(&self, professional_id: Uuid) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        Ok(self
            .list_active(professional_id, None)
            .await?
            .into_iter()
            .filter(|block| !block.is_external_event() && block.upstream_reference().is_none())
            .collect())
    }
}

fn into_blocks(rows: Vec<BlockRow>) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
    rows.into_iter().map(AvailabilityBlock::try_from).collect()
}

// ==============================================================================
// POSTGREST
// ==============================================================================

pub struct SupabaseBlockStore {
    supabase: SupabaseClient,
    token: String,
}

impl SupabaseBlockStore {
    const TABLE: &'static str = "/rest/v1/availability_blocks";

    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            token: config.service_token().to_string(),
        }
    }

    async fn fetch(&self, query: &str) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        let path = format!("{}?{}", Self::TABLE, query);
        let rows: Vec<BlockRow> = self.supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await?;
        into_blocks(rows)
    }

    async fn write(&self, method: Method, path: &str, block: &AvailabilityBlock) -> Result<AvailabilityBlock, AvailabilityError> {
        let body = serde_json::to_value(BlockRow::from(block))
            .map_err(|e| AvailabilityError::Validation(e.to_string()))?;

        let rows: Vec<BlockRow> = self.supabase
            .request_with_headers(
                method,
                path,
                Some(&self.token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        let row = rows.into_iter().next().ok_or(AvailabilityError::BlockNotFound(block.id))?;
        AvailabilityBlock::try_from(row)
    }
}

#[async_trait]
impl BlockStore for SupabaseBlockStore {
    async fn insert(&self, block: &AvailabilityBlock) -> Result<AvailabilityBlock, AvailabilityError> {
        debug!("Inserting {} block for professional {}", block.kind.as_str(), block.professional_id);
        self.write(Method::POST, Self::TABLE, block).await
    }

    async fn update(&self, block: &AvailabilityBlock) -> Result<AvailabilityBlock, AvailabilityError> {
        let path = format!("{}?id=eq.{}&professional_id=eq.{}", Self::TABLE, block.id, block.professional_id);
        self.write(Method::PATCH, &path, block).await
    }

    async fn get(&self, professional_id: Uuid, block_id: Uuid) -> Result<Option<AvailabilityBlock>, AvailabilityError> {
        let blocks = self
            .fetch(&format!("id=eq.{}&professional_id=eq.{}", block_id, professional_id))
            .await?;
        Ok(blocks.into_iter().next())
    }

    async fn list_active(
        &self,
        professional_id: Uuid,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        let mut query = format!("professional_id=eq.{}&deleted_at=is.null", professional_id);

        if let Some((from, to)) = window {
            // Weekly rows, or date-bound rows whose [start_date, end_date ?? start_date] meets the window.
            query.push_str(&format!(
                "&or=(block_type.in.(weekly_day,weekly_range),and(start_date.lte.{to},or(end_date.gte.{from},and(end_date.is.null,start_date.gte.{from}))))",
                from = from,
                to = to,
            ));
        }
        query.push_str("&order=created_at.asc");

        self.fetch(&query).await
    }

    async fn list_tombstoned(&self, professional_id: Uuid) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        self.fetch(&format!("professional_id=eq.{}&deleted_at=not.is.null", professional_id))
            .await
    }

    async fn find_by_external_id(
        &self,
        professional_id: Uuid,
        external_event_id: &str,
    ) -> Result<Option<AvailabilityBlock>, AvailabilityError> {
        let blocks = self
            .fetch(&format!(
                "professional_id=eq.{}&external_event_id=eq.{}",
                professional_id,
                filter_value(external_event_id)
            ))
            .await?;
        Ok(blocks.into_iter().next())
    }

    async fn tombstone(&self, professional_id: Uuid, block_id: Uuid, at: DateTime<Utc>) -> Result<(), AvailabilityError> {
        let path = format!("{}?id=eq.{}&professional_id=eq.{}", Self::TABLE, block_id, professional_id);
        self.supabase
            .execute(
                Method::PATCH,
                &path,
                Some(&self.token),
                Some(json!({ "deleted_at": at, "updated_at": Utc::now() })),
            )
            .await?;
        Ok(())
    }

    async fn purge(&self, professional_id: Uuid, block_id: Uuid) -> Result<(), AvailabilityError> {
        let path = format!("{}?id=eq.{}&professional_id=eq.{}", Self::TABLE, block_id, professional_id);
        self.supabase
            .execute(Method::DELETE, &path, Some(&self.token), None)
            .await?;
        Ok(())
    }
}

// ==============================================================================
// IN-MEMORY
// ==============================================================================

/// Process-local store for tests and local development.
#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<Uuid, AvailabilityBlock>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.is_empty()
    }

    async fn select<F>(&self, professional_id: Uuid, predicate: F) -> Vec<AvailabilityBlock>
    where
        F: Fn(&AvailabilityBlock) -> bool + Send,
    {
        let blocks = self.blocks.read().await;
        let mut selected: Vec<AvailabilityBlock> = blocks
            .values()
            .filter(|block| block.professional_id == professional_id && predicate(block))
            .cloned()
            .collect();
        selected.sort_by_key(|block| block.created_at);
        selected
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn insert(&self, block: &AvailabilityBlock) -> Result<AvailabilityBlock, AvailabilityError> {
        let mut blocks = self.blocks.write().await;

        // Mirrors the (professional_id, external_event_id) unique index.
        if let Some(reference) = block.upstream_reference() {
            let duplicate = blocks.values().any(|existing| {
                existing.professional_id == block.professional_id
                    && existing.upstream_reference() == Some(reference)
            });
            if duplicate {
                return Err(AvailabilityError::Conflict(format!(
                    "Block for external event {} already exists",
                    reference
                )));
            }
        }

        blocks.insert(block.id, block.clone());
        Ok(block.clone())
    }

    async fn update(&self, block: &AvailabilityBlock) -> Result<AvailabilityBlock, AvailabilityError> {
        let mut blocks = self.blocks.write().await;
        match blocks.get_mut(&block.id) {
            Some(existing) if existing.professional_id == block.professional_id => {
                *existing = block.clone();
                Ok(block.clone())
            }
            _ => Err(AvailabilityError::BlockNotFound(block.id)),
        }
    }

    async fn get(&self, professional_id: Uuid, block_id: Uuid) -> Result<Option<AvailabilityBlock>, AvailabilityError> {
        let blocks = self.blocks.read().await;
        Ok(blocks
            .get(&block_id)
            .filter(|block| block.professional_id == professional_id)
            .cloned())
    }

    async fn list_active(
        &self,
        professional_id: Uuid,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        Ok(self
            .select(professional_id, |block| {
                if block.is_tombstoned() {
                    return false;
                }
                match (window, block.kind.date_bounds()) {
                    (Some((from, to)), Some((first, last))) => first <= to && last >= from,
                    _ => true,
                }
            })
            .await)
    }

    async fn list_tombstoned(&self, professional_id: Uuid) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        Ok(self.select(professional_id, |block| block.is_tombstoned()).await)
    }

    async fn find_by_external_id(
        &self,
        professional_id: Uuid,
        external_event_id: &str,
    ) -> Result<Option<AvailabilityBlock>, AvailabilityError> {
        let matches = self
            .select(professional_id, |block| block.upstream_reference() == Some(external_event_id))
            .await;
        Ok(matches.into_iter().next())
    }

    async fn tombstone(&self, professional_id: Uuid, block_id: Uuid, at: DateTime<Utc>) -> Result<(), AvailabilityError> {
        let mut blocks = self.blocks.write().await;
        match blocks.get_mut(&block_id) {
            Some(block) if block.professional_id == professional_id => {
                block.deleted_at = Some(at);
                block.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(AvailabilityError::BlockNotFound(block_id)),
        }
    }

    async fn purge(&self, professional_id: Uuid, block_id: Uuid) -> Result<(), AvailabilityError> {
        let mut blocks = self.blocks.write().await;
        if blocks.get(&block_id).map_or(false, |block| block.professional_id == professional_id) {
            blocks.remove(&block_id);
        }
        Ok(())
    }
}
