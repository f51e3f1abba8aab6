use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::models::{CalendarConnection, ProviderError, SyncError};
use crate::services::connections::ConnectionStore;
use crate::services::provider::CalendarProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Valid(String),
    /// The grant is gone; the connection has been marked disconnected.
    Revoked,
}

/// Hands out usable access tokens, refreshing them when they are about to expire.
pub struct CredentialManager {
    connections: Arc<dyn ConnectionStore>,
    provider: Arc<dyn CalendarProvider>,
}

impl CredentialManager {
    pub fn new(connections: Arc<dyn ConnectionStore>, provider: Arc<dyn CalendarProvider>) -> Self {
        Self { connections, provider }
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionStore> {
        &self.connections
    }

    pub fn provider(&self) -> &Arc<dyn CalendarProvider> {
        &self.provider
    }

    /// A transient refresh failure is returned as an error and retried on the next pass.
    pub async fn access_token(&self, connection: &CalendarConnection, now: DateTime<Utc>) -> Result<Credential, SyncError> {
        if !connection.needs_refresh(now) {
            return Ok(Credential::Valid(connection.access_token.clone()));
        }

        debug!("Refreshing access token of professional {}", connection.professional_id);
        match self.provider.refresh_token(&connection.refresh_token).await {
            Ok(grant) => {
                let expires_at = now + Duration::seconds(grant.expires_in);
                self.connections
                    .save_tokens(connection.professional_id, &grant, expires_at)
                    .await?;
                info!("Access token refreshed for professional {}", connection.professional_id);
                Ok(Credential::Valid(grant.access_token))
            }
            Err(ProviderError::InvalidGrant) => {
                self.connections
                    .mark_disconnected(connection.professional_id, "Calendar access was revoked; reconnect required")
                    .await?;
                Ok(Credential::Revoked)
            }
            Err(e) => Err(e.into()),
        }
    }
}
