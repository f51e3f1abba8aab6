use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{CalendarConnection, ConnectionStatus, SyncError, TokenGrant};

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get(&self, professional_id: Uuid) -> Result<Option<CalendarConnection>, SyncError>;

    async fn list_connected(&self) -> Result<Vec<CalendarConnection>, SyncError>;

    async fn save_tokens(&self, professional_id: Uuid, grant: &TokenGrant, expires_at: DateTime<Utc>) -> Result<(), SyncError>;

    async fn mark_disconnected(&self, professional_id: Uuid, reason: &str) -> Result<(), SyncError>;

    /// `error` of `None` clears the previous one.
    async fn record_sync(&self, professional_id: Uuid, at: DateTime<Utc>, error: Option<String>) -> Result<(), SyncError>;
}

// ==============================================================================
// POSTGREST
// ==============================================================================

pub struct SupabaseConnectionStore {
    supabase: SupabaseClient,
    token: String,
}

impl SupabaseConnectionStore {
    const TABLE: &'static str = "/rest/v1/calendar_connections";

    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            token: config.service_token().to_string(),
        }
    }

    async fn patch(&self, professional_id: Uuid, body: serde_json::Value) -> Result<(), SyncError> {
        self.supabase
            .execute(
                Method::PATCH,
                &format!("{}?professional_id=eq.{}", Self::TABLE, professional_id),
                Some(&self.token),
                Some(body),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for SupabaseConnectionStore {
    async fn get(&self, professional_id: Uuid) -> Result<Option<CalendarConnection>, SyncError> {
        let path = format!("{}?professional_id=eq.{}", Self::TABLE, professional_id);
        let rows: Vec<CalendarConnection> = self.supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_connected(&self) -> Result<Vec<CalendarConnection>, SyncError> {
        let path = format!("{}?status=eq.connected&order=professional_id.asc", Self::TABLE);
        let rows: Vec<CalendarConnection> = self.supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await?;
        debug!("{} connected calendars", rows.len());
        Ok(rows)
    }

    async fn save_tokens(&self, professional_id: Uuid, grant: &TokenGrant, expires_at: DateTime<Utc>) -> Result<(), SyncError> {
        let mut body = json!({
            "access_token": grant.access_token,
            "expires_at": expires_at,
            "updated_at": Utc::now(),
        });
        if let Some(refresh_token) = &grant.refresh_token {
            body["refresh_token"] = json!(refresh_token);
        }
        self.patch(professional_id, body).await
    }

    async fn mark_disconnected(&self, professional_id: Uuid, reason: &str) -> Result<(), SyncError> {
        warn!("Calendar of professional {} disconnected: {}", professional_id, reason);
        self.patch(
            professional_id,
            json!({
                "status": ConnectionStatus::Disconnected,
                "last_error": reason,
                "updated_at": Utc::now(),
            }),
        )
        .await
    }

    async fn record_sync(&self, professional_id: Uuid, at: DateTime<Utc>, error: Option<String>) -> Result<(), SyncError> {
        // A failed pass keeps the last successful timestamp.
        let body = match error {
            None => json!({ "last_synced_at": at, "last_error": null, "updated_at": Utc::now() }),
            Some(error) => json!({ "last_error": error, "updated_at": Utc::now() }),
        };
        self.patch(professional_id, body).await
    }
}

// ==============================================================================
// IN-MEMORY
// ==============================================================================

#[derive(Default)]
pub struct InMemoryConnectionStore {
    connections: RwLock<HashMap<Uuid, CalendarConnection>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, connection: CalendarConnection) {
        info!("Registered calendar connection for professional {}", connection.professional_id);
        self.connections.write().await.insert(connection.professional_id, connection);
    }

    async fn modify<F>(&self, professional_id: Uuid, change: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut CalendarConnection) + Send,
    {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&professional_id)
            .ok_or(SyncError::NotConnected(professional_id))?;
        change(connection);
        connection.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn get(&self, professional_id: Uuid) -> Result<Option<CalendarConnection>, SyncError> {
        Ok(self.connections.read().await.get(&professional_id).cloned())
    }

    async fn list_connected(&self) -> Result<Vec<CalendarConnection>, SyncError> {
        let connections = self.connections.read().await;
        let mut connected: Vec<CalendarConnection> = connections
            .values()
            .filter(|c| c.is_connected())
            .cloned()
            .collect();
        connected.sort_by_key(|c| c.professional_id);
        Ok(connected)
    }

    async fn save_tokens(&self, professional_id: Uuid, grant: &TokenGrant, expires_at: DateTime<Utc>) -> Result<(), SyncError> {
        self.modify(professional_id, |connection| {
            connection.access_token = grant.access_token.clone();
            connection.expires_at = expires_at;
            if let Some(refresh_token) = &grant.refresh_token {
                connection.refresh_token = refresh_token.clone();
            }
        })
        .await
    }

    async fn mark_disconnected(&self, professional_id: Uuid, reason: &str) -> Result<(), SyncError> {
        self.modify(professional_id, |connection| {
            connection.status = ConnectionStatus::Disconnected;
            connection.last_error = Some(reason.to_string());
        })
        .await
    }

    async fn record_sync(&self, professional_id: Uuid, at: DateTime<Utc>, error: Option<String>) -> Result<(), SyncError> {
        self.modify(professional_id, |connection| match error {
            None => {
                connection.last_synced_at = Some(at);
                connection.last_error = None;
            }
            Some(error) => connection.last_error = Some(error),
        })
        .await
    }
}
