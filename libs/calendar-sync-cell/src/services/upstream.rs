use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use availability_cell::services::{UpstreamCalendar, UpstreamError};

use crate::models::CalendarConnection;
use crate::services::credentials::{Credential, CredentialManager};

/// Immediate upstream deletes issued by the booking and block APIs.
pub struct ConnectedCalendar {
    credentials: Arc<CredentialManager>,
}

impl ConnectedCalendar {
    pub fn new(credentials: Arc<CredentialManager>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl UpstreamCalendar for ConnectedCalendar {
    async fn delete_event(&self, professional_id: Uuid, external_event_id: &str) -> Result<(), UpstreamError> {
        let connection = self
            .credentials
            .connections()
            .get(professional_id)
            .await
            .map_err(|e| UpstreamError::Failed(e.to_string()))?
            .filter(CalendarConnection::is_connected)
            .ok_or(UpstreamError::NotConnected)?;

        let access_token = match self.credentials.access_token(&connection, Utc::now()).await {
            Ok(Credential::Valid(token)) => token,
            Ok(Credential::Revoked) => return Err(UpstreamError::NotConnected),
            Err(e) => return Err(UpstreamError::Failed(e.to_string())),
        };

        debug!("Deleting upstream event {} of professional {}", external_event_id, professional_id);
        self.credentials
            .provider()
            .delete_event(&access_token, &connection.calendar_id, external_event_id)
            .await
            .map_err(|e| UpstreamError::Failed(e.to_string()))
    }
}
