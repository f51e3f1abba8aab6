// libs/reminder-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, ReminderLead};
use shared_database::SupabaseError;
use shared_models::error::AppError;

/// Read-only view of a user from the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub push_token: Option<String>,
}

impl Contact {
    pub fn is_reachable(&self) -> bool {
        self.email.as_deref().map_or(false, |e| !e.is_empty())
            || self.push_token.as_deref().map_or(false, |t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTemplate {
    AppointmentReminder24h,
    AppointmentReminder1h,
}

impl From<ReminderLead> for ReminderTemplate {
    fn from(lead: ReminderLead) -> Self {
        match lead {
            ReminderLead::DayBefore => ReminderTemplate::AppointmentReminder24h,
            ReminderLead::HourBefore => ReminderTemplate::AppointmentReminder1h,
        }
    }
}

impl fmt::Display for ReminderTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderTemplate::AppointmentReminder24h => write!(f, "appointment_reminder_24h"),
            ReminderTemplate::AppointmentReminder1h => write!(f, "appointment_reminder_1h"),
        }
    }
}

/// Aggregate result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Confirmed appointments considered.
    pub examined: u32,
    pub sent_24h: u32,
    pub sent_1h: u32,
    /// Due reminders that could not be delivered or recorded.
    pub failed: u32,
    /// Due reminders with nobody to deliver to, or already claimed by another sweep.
    pub skipped: u32,
}

impl SweepReport {
    pub fn record_sent(&mut self, lead: ReminderLead) {
        match lead {
            ReminderLead::DayBefore => self.sent_24h += 1,
            ReminderLead::HourBefore => self.sent_1h += 1,
        }
    }

    pub fn total_sent(&self) -> u32 {
        self.sent_24h + self.sent_1h
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    pub swept_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: SweepReport,
}

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Invalid sweep secret")]
    Unauthorized,

    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error("Database error: {0}")]
    Storage(#[from] SupabaseError),
}

impl From<ReminderError> for AppError {
    fn from(err: ReminderError) -> Self {
        match err {
            ReminderError::Unauthorized => AppError::Auth(err.to_string()),
            ReminderError::Appointment(inner) => inner.into(),
            ReminderError::Storage(_) => AppError::Database(err.to_string()),
        }
    }
}
