// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use availability_cell::models::{minute_of_day, AvailabilityError};
use availability_cell::services::{BookedInterval, SlotRejection};
use shared_database::SupabaseError;
use shared_models::error::AppError;
use shared_utils::WallClockError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    /// Wall-clock date and time in the deployment zone.
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: i32,
    pub appointment_type: AppointmentType,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub status: AppointmentStatus,
    pub reminder_sent_24h_at: Option<DateTime<Utc>>,
    pub reminder_sent_1h_at: Option<DateTime<Utc>>,
    pub external_event_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn start_minute(&self) -> i64 {
        minute_of_day(self.appointment_time)
    }

    pub fn end_minute(&self) -> i64 {
        self.start_minute() + self.duration_minutes as i64
    }

    pub fn booked_interval(&self) -> BookedInterval {
        BookedInterval {
            appointment_id: self.id,
            date: self.appointment_date,
            start_time: self.appointment_time,
            duration_minutes: self.duration_minutes,
        }
    }

    /// Plain time overlap on the same date, as the storage exclusion sees it.
    pub fn overlaps(&self, other: &Appointment) -> bool {
        self.professional_id == other.professional_id
            && self.appointment_date == other.appointment_date
            && self.start_minute() < other.end_minute()
            && other.start_minute() < self.end_minute()
    }

    pub fn reminder_sent_at(&self, lead: ReminderLead) -> Option<DateTime<Utc>> {
        match lead {
            ReminderLead::DayBefore => self.reminder_sent_24h_at,
            ReminderLead::HourBefore => self.reminder_sent_1h_at,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id || self.professional_id.to_string() == user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    InPerson,
    Remote,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::InPerson => write!(f, "in_person"),
            AppointmentType::Remote => write!(f, "remote"),
        }
    }
}

/// The two fixed reminder lead times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderLead {
    DayBefore,
    HourBefore,
}

impl ReminderLead {
    pub const ALL: [ReminderLead; 2] = [ReminderLead::DayBefore, ReminderLead::HourBefore];

    pub fn lead(&self) -> Duration {
        match self {
            ReminderLead::DayBefore => Duration::hours(24),
            ReminderLead::HourBefore => Duration::hours(1),
        }
    }

    /// Column holding the set-once marker.
    pub fn marker_column(&self) -> &'static str {
        match self {
            ReminderLead::DayBefore => "reminder_sent_24h_at",
            ReminderLead::HourBefore => "reminder_sent_1h_at",
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub professional_id: Uuid,
    /// Defaults to the caller.
    pub patient_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    /// Defaults to the professional's session duration.
    pub duration_minutes: Option<i32>,
    pub appointment_type: AppointmentType,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Slot is not bookable: {0}")]
    SlotUnavailable(SlotRejection),

    #[error("Slot is no longer available")]
    SlotTaken,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error("Time conversion error: {0}")]
    Clock(#[from] WallClockError),

    #[error("Database error: {0}")]
    Storage(SupabaseError),
}

impl From<SupabaseError> for AppointmentError {
    fn from(err: SupabaseError) -> Self {
        // The exclusion constraint on overlapping active appointments answers 409.
        if err.is_conflict() {
            AppointmentError::SlotTaken
        } else {
            AppointmentError::Storage(err)
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound(_) => AppError::NotFound(err.to_string()),
            AppointmentError::SlotUnavailable(_) | AppointmentError::ValidationError(_) => {
                AppError::ValidationError(err.to_string())
            }
            AppointmentError::SlotTaken | AppointmentError::InvalidStatusTransition { .. } => {
                AppError::Conflict(err.to_string())
            }
            AppointmentError::Availability(inner) => inner.into(),
            AppointmentError::Clock(_) => AppError::Internal(err.to_string()),
            AppointmentError::Storage(_) => AppError::Database(err.to_string()),
        }
    }
}
