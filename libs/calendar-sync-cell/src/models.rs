// libs/calendar-sync-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use appointment_cell::models::AppointmentError;
use availability_cell::models::AvailabilityError;
use shared_database::SupabaseError;
use shared_models::error::AppError;
use shared_utils::WallClockError;

/// Refresh this long before the provider's stated expiry.
pub const TOKEN_EXPIRY_SKEW_SECONDS: i64 = 60;

// ==============================================================================
// CONNECTIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Stored provider credential of one professional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConnection {
    pub professional_id: Uuid,
    pub provider: String,
    pub calendar_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub status: ConnectionStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarConnection {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(TOKEN_EXPIRY_SKEW_SECONDS) <= now
    }
}

/// What the status endpoint exposes. Never carries tokens.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub professional_id: Uuid,
    pub connected: bool,
    pub provider: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn disconnected(professional_id: Uuid) -> Self {
        Self {
            professional_id,
            connected: false,
            provider: None,
            last_synced_at: None,
            last_error: None,
        }
    }
}

impl From<&CalendarConnection> for SyncStatus {
    fn from(connection: &CalendarConnection) -> Self {
        Self {
            professional_id: connection.professional_id,
            connected: connection.is_connected(),
            provider: Some(connection.provider.clone()),
            last_synced_at: connection.last_synced_at,
            last_error: connection.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
    /// Only present when the provider rotates the refresh token.
    pub refresh_token: Option<String>,
}

// ==============================================================================
// PROVIDER EVENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// All-day boundary. Provider end dates are exclusive.
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

/// An event as listed by the provider, reduced to what import needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub id: String,
    pub summary: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub cancelled: bool,
    /// Marked "free" upstream; does not make the professional busy.
    pub transparent: bool,
    /// Tagged by our own export.
    pub exported_by_us: bool,
}

impl ProviderEvent {
    pub fn counts_as_busy(&self) -> bool {
        !self.cancelled && !self.transparent && !self.exported_by_us
    }
}

/// Event to create upstream. Times are already resolved to the deployment zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    pub summary: String,
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub time_zone: String,
    /// RFC 5545 recurrence line, e.g. `RRULE:FREQ=WEEKLY;BYDAY=MO`.
    pub recurrence: Option<String>,
    /// Local record this event mirrors; stored as a private property.
    pub origin_id: Uuid,
}

// ==============================================================================
// RECONCILIATION RUNS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub imported: u32,
    pub updated: u32,
    pub removed: u32,
    pub exported: u32,
    pub deleted_upstream: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfessionalSyncResult {
    pub professional_id: Uuid,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
    pub counts: SyncCounts,
    /// Item-level failures; the rest of the pass still committed.
    #[serde(default)]
    pub item_errors: Vec<String>,
}

impl ProfessionalSyncResult {
    pub fn skipped(professional_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            professional_id,
            outcome: SyncOutcome::Skipped { reason: reason.into() },
            counts: SyncCounts::default(),
            item_errors: Vec::new(),
        }
    }

    pub fn failed(professional_id: Uuid, counts: SyncCounts, error: impl Into<String>) -> Self {
        Self {
            professional_id,
            outcome: SyncOutcome::Failed { error: error.into() },
            counts,
            item_errors: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Skipped { .. })
    }
}

/// Append-only audit record of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub results: Vec<ProfessionalSyncResult>,
    pub error: Option<String>,
}

impl ReconciliationRun {
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            results: Vec::new(),
            error: None,
        }
    }

    /// Completed unless every attempted professional failed.
    pub fn finish(&mut self, results: Vec<ProfessionalSyncResult>, finished_at: DateTime<Utc>) {
        self.failed = results.iter().filter(|r| r.is_failure()).count() as u32;
        self.skipped = results.iter().filter(|r| r.is_skipped()).count() as u32;
        self.succeeded = results.len() as u32 - self.failed - self.skipped;
        self.results = results;
        self.finished_at = Some(finished_at);

        let attempted = self.succeeded + self.failed;
        self.status = if attempted > 0 && self.succeeded == 0 {
            RunStatus::Error
        } else {
            RunStatus::Completed
        };
    }

    pub fn abort(&mut self, error: impl Into<String>, finished_at: DateTime<Utc>) {
        self.status = RunStatus::Error;
        self.error = Some(error.into());
        self.finished_at = Some(finished_at);
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The refresh token was revoked or expired for good.
    #[error("Credential revoked (invalid_grant)")]
    InvalidGrant,

    #[error("Provider rate limit reached")]
    RateLimited,

    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Unexpected provider response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No calendar connected for professional {0}")]
    NotConnected(Uuid),

    #[error("Reconciliation already running for professional {0}")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error("Time conversion error: {0}")]
    Clock(#[from] WallClockError),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Database error: {0}")]
    Storage(#[from] SupabaseError),
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        SyncError::Lock(err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotConnected(_) => AppError::NotFound(err.to_string()),
            SyncError::AlreadyRunning(_) => AppError::Conflict(err.to_string()),
            SyncError::Provider(_) => AppError::ExternalService(err.to_string()),
            SyncError::Availability(inner) => inner.into(),
            SyncError::Appointment(inner) => inner.into(),
            SyncError::Lock(_) => AppError::Unavailable(err.to_string()),
            SyncError::Clock(_) => AppError::Internal(err.to_string()),
            SyncError::Storage(_) => AppError::Database(err.to_string()),
        }
    }
}
