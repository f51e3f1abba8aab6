use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, ReminderLead};

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Fails with `SlotTaken` when an active appointment of the same
    /// professional overlaps.
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError>;

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError>;

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Non-cancelled appointments of one professional on one date.
    async fn list_active_on(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError>;

    /// Confirmed, not yet exported, on or after `from`.
    async fn list_unexported(&self, professional_id: Uuid, from: NaiveDate) -> Result<Vec<Appointment>, AppointmentError>;

    /// Cancelled appointments whose upstream event still exists.
    async fn list_cancelled_with_reference(&self, professional_id: Uuid) -> Result<Vec<Appointment>, AppointmentError>;

    async fn set_external_event(&self, appointment_id: Uuid, external_event_id: Option<String>) -> Result<(), AppointmentError>;

    /// Confirmed appointments dated within `[from, to]`, for every professional.
    async fn list_confirmed_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Appointment>, AppointmentError>;

    /// Sets the marker only if it is still unset. Returns whether this call set it.
    async fn mark_reminder_sent(&self, appointment_id: Uuid, lead: ReminderLead, at: DateTime<Utc>) -> Result<bool, AppointmentError>;
}

// ==============================================================================
// POSTGREST
// ==============================================================================

pub struct SupabaseAppointmentStore {
    supabase: SupabaseClient,
    token: String,
}

impl SupabaseAppointmentStore {
    const TABLE: &'static str = "/rest/v1/appointments";

    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            token: config.service_token().to_string(),
        }
    }

    async fn fetch(&self, query: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("{}?{}", Self::TABLE, query);
        Ok(self.supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await?)
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        debug!("Inserting appointment for professional {} on {} {}",
               appointment.professional_id, appointment.appointment_date, appointment.appointment_time);

        let body = serde_json::to_value(appointment)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;

        let rows: Vec<Appointment> = self.supabase
            .request_with_headers(
                Method::POST,
                Self::TABLE,
                Some(&self.token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        rows.into_iter().next().ok_or(AppointmentError::NotFound(appointment.id))
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let body = serde_json::to_value(appointment)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;

        let rows: Vec<Appointment> = self.supabase
            .request_with_headers(
                Method::PATCH,
                &format!("{}?id=eq.{}", Self::TABLE, appointment.id),
                Some(&self.token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        rows.into_iter().next().ok_or(AppointmentError::NotFound(appointment.id))
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.fetch(&format!("id=eq.{}", appointment_id)).await?.into_iter().next())
    }

    async fn list_active_on(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.fetch(&format!(
            "professional_id=eq.{}&appointment_date=eq.{}&status=neq.cancelled&order=appointment_time.asc",
            professional_id, date
        ))
        .await
    }

    async fn list_unexported(&self, professional_id: Uuid, from: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.fetch(&format!(
            "professional_id=eq.{}&status=eq.confirmed&external_event_id=is.null&appointment_date=gte.{}",
            professional_id, from
        ))
        .await
    }

    async fn list_cancelled_with_reference(&self, professional_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        self.fetch(&format!(
            "professional_id=eq.{}&status=eq.cancelled&external_event_id=not.is.null",
            professional_id
        ))
        .await
    }

    async fn set_external_event(&self, appointment_id: Uuid, external_event_id: Option<String>) -> Result<(), AppointmentError> {
        self.supabase
            .execute(
                Method::PATCH,
                &format!("{}?id=eq.{}", Self::TABLE, appointment_id),
                Some(&self.token),
                Some(json!({
                    "external_event_id": external_event_id,
                    "updated_at": Utc::now()
                })),
            )
            .await?;
        Ok(())
    }

    async fn list_confirmed_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.fetch(&format!(
            "status=eq.confirmed&appointment_date=gte.{}&appointment_date=lte.{}&order=appointment_date.asc,appointment_time.asc",
            from, to
        ))
        .await
    }

    async fn mark_reminder_sent(&self, appointment_id: Uuid, lead: ReminderLead, at: DateTime<Utc>) -> Result<bool, AppointmentError> {
        let column = lead.marker_column();
        // The `is.null` filter makes the write conditional: a concurrent sweep updates zero rows.
        let path = format!("{}?id=eq.{}&{}=is.null", Self::TABLE, appointment_id, column);

        let rows: Vec<Appointment> = self.supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(&self.token),
                Some(json!({ column: at, "updated_at": Utc::now() })),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        Ok(!rows.is_empty())
    }
}

// ==============================================================================
// IN-MEMORY
// ==============================================================================

/// Process-local store. Enforces the same overlap exclusion the database does.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Appointment> {
        self.appointments.read().await.values().cloned().collect()
    }

    async fn select<F>(&self, predicate: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool + Send,
    {
        let appointments = self.appointments.read().await;
        let mut selected: Vec<Appointment> = appointments.values().filter(|a| predicate(a)).cloned().collect();
        selected.sort_by_key(|a| (a.appointment_date, a.appointment_time));
        selected
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;

        let overlapping = appointment.is_active()
            && appointments
                .values()
                .any(|existing| existing.is_active() && existing.overlaps(appointment));
        if overlapping {
            return Err(AppointmentError::SlotTaken);
        }

        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get_mut(&appointment.id) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(appointment.clone())
            }
            None => Err(AppointmentError::NotFound(appointment.id)),
        }
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.appointments.read().await.get(&appointment_id).cloned())
    }

    async fn list_active_on(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .select(|a| a.professional_id == professional_id && a.appointment_date == date && a.is_active())
            .await)
    }

    async fn list_unexported(&self, professional_id: Uuid, from: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .select(|a| {
                a.professional_id == professional_id
                    && a.status == AppointmentStatus::Confirmed
                    && a.external_event_id.is_none()
                    && a.appointment_date >= from
            })
            .await)
    }

    async fn list_cancelled_with_reference(&self, professional_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .select(|a| {
                a.professional_id == professional_id
                    && a.status == AppointmentStatus::Cancelled
                    && a.external_event_id.is_some()
            })
            .await)
    }

    async fn set_external_event(&self, appointment_id: Uuid, external_event_id: Option<String>) -> Result<(), AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(&appointment_id)
            .ok_or(AppointmentError::NotFound(appointment_id))?;
        appointment.external_event_id = external_event_id;
        appointment.updated_at = Utc::now();
        Ok(())
    }

    async fn list_confirmed_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .select(|a| a.status == AppointmentStatus::Confirmed && a.appointment_date >= from && a.appointment_date <= to)
            .await)
    }

    async fn mark_reminder_sent(&self, appointment_id: Uuid, lead: ReminderLead, at: DateTime<Utc>) -> Result<bool, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(&appointment_id)
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        let marker = match lead {
            ReminderLead::DayBefore => &mut appointment.reminder_sent_24h_at,
            ReminderLead::HourBefore => &mut appointment.reminder_sent_1h_at,
        };
        if marker.is_some() {
            return Ok(false);
        }
        *marker = Some(at);
        Ok(true)
    }
}
