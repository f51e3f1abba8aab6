use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{EventPayload, ProviderError, ProviderEvent, TokenGrant};

/// Operations the reconciler needs from an external calendar.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Every event overlapping `[from, to)`, recurring series expanded into instances.
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderEvent>, ProviderError>;

    /// Returns the provider's event id.
    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        payload: &EventPayload,
    ) -> Result<String, ProviderError>;

    /// Deleting an event that is already gone succeeds.
    async fn delete_event(&self, access_token: &str, calendar_id: &str, event_id: &str) -> Result<(), ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;
}
