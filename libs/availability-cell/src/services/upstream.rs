use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("No external calendar connected")]
    NotConnected,

    #[error("External calendar error: {0}")]
    Failed(String),
}

/// Write access to the professional's connected calendar, as needed when a
/// local record that was mirrored upstream goes away.
#[async_trait]
pub trait UpstreamCalendar: Send + Sync {
    async fn delete_event(&self, professional_id: Uuid, external_event_id: &str) -> Result<(), UpstreamError>;
}

/// Used when calendar sync is not configured for the deployment.
pub struct NoUpstreamCalendar;

#[async_trait]
impl UpstreamCalendar for NoUpstreamCalendar {
    async fn delete_event(&self, _professional_id: Uuid, _external_event_id: &str) -> Result<(), UpstreamError> {
        Err(UpstreamError::NotConnected)
    }
}
