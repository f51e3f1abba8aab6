// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use availability_cell::services::{
    AvailabilityService, BookedInterval, DayContext, SlotResolver, UpstreamCalendar, UpstreamError,
};
use shared_utils::WallClock;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CreateAppointmentRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::AppointmentStore;

pub struct BookingService {
    availability: Arc<AvailabilityService>,
    appointments: Arc<dyn AppointmentStore>,
    upstream: Arc<dyn UpstreamCalendar>,
    lifecycle: AppointmentLifecycleService,
    clock: WallClock,
}

impl BookingService {
    pub fn new(
        availability: Arc<AvailabilityService>,
        appointments: Arc<dyn AppointmentStore>,
        upstream: Arc<dyn UpstreamCalendar>,
        clock: WallClock,
    ) -> Self {
        Self {
            availability,
            appointments,
            upstream,
            lifecycle: AppointmentLifecycleService::new(),
            clock,
        }
    }

    pub fn clock(&self) -> WallClock {
        self.clock
    }

    async fn booked_on(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<BookedInterval>, AppointmentError> {
        Ok(self
            .appointments
            .list_active_on(professional_id, date)
            .await?
            .iter()
            .map(Appointment::booked_interval)
            .collect())
    }

    /// `Ok` when bookable, `SlotUnavailable` with the first failing rule otherwise.
    pub async fn check_slot(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: Option<i32>,
    ) -> Result<(), AppointmentError> {
        self.check_slot_at(Utc::now(), professional_id, date, time, duration_minutes).await
    }

    pub async fn check_slot_at(
        &self,
        now: DateTime<Utc>,
        professional_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: Option<i32>,
    ) -> Result<(), AppointmentError> {
        let context = self.availability.day_context(professional_id, date).await?;
        let duration = duration_minutes.unwrap_or(context.profile.session_duration_minutes);
        self.check_slot_in(&context, now, professional_id, date, time, duration).await
    }

    async fn check_slot_in(
        &self,
        context: &DayContext,
        now: DateTime<Utc>,
        professional_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: i32,
    ) -> Result<(), AppointmentError> {
        let booked = self.booked_on(professional_id, date).await?;

        SlotResolver::new(&context.profile, &context.blocks, &booked)
            .with_clock(self.clock)
            .not_before(now)
            .check(date, time, duration_minutes)
            .map_err(AppointmentError::SlotUnavailable)
    }

    pub async fn list_free_slots(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<NaiveTime>, AppointmentError> {
        self.list_free_slots_at(Utc::now(), professional_id, date).await
    }

    pub async fn list_free_slots_at(
        &self,
        now: DateTime<Utc>,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, AppointmentError> {
        let context = self.availability.day_context(professional_id, date).await?;
        let booked = self.booked_on(professional_id, date).await?;

        let slots = SlotResolver::new(&context.profile, &context.blocks, &booked)
            .with_clock(self.clock)
            .not_before(now)
            .free_slots(date);

        debug!("{} free slots for professional {} on {}", slots.len(), professional_id, date);
        Ok(slots)
    }

    pub async fn create_appointment(
        &self,
        patient_id: Uuid,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.create_appointment_at(Utc::now(), patient_id, request).await
    }

    /// Validate-then-insert. The store's overlap exclusion settles races
    /// between two requests that both passed validation.
    pub async fn create_appointment_at(
        &self,
        now: DateTime<Utc>,
        patient_id: Uuid,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        if patient_id == request.professional_id {
            return Err(AppointmentError::ValidationError(
                "Professionals cannot book themselves".to_string(),
            ));
        }

        let context = self.availability.day_context(request.professional_id, request.appointment_date).await?;
        let duration = request
            .duration_minutes
            .unwrap_or(context.profile.session_duration_minutes);

        self.check_slot_in(
            &context,
            now,
            request.professional_id,
            request.appointment_date,
            request.appointment_time,
            duration,
        )
        .await?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            professional_id: request.professional_id,
            patient_id,
            appointment_date: request.appointment_date,
            appointment_time: request.appointment_time,
            duration_minutes: duration,
            appointment_type: request.appointment_type,
            location: request.location,
            meeting_link: request.meeting_link,
            status: AppointmentStatus::Pending,
            reminder_sent_24h_at: None,
            reminder_sent_1h_at: None,
            external_event_id: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.appointments.insert(&appointment).await?;
        info!("Booked appointment {} with professional {} on {} {}",
              created.id, created.professional_id, created.appointment_date, created.appointment_time);

        Ok(created)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    pub async fn transition(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.get_appointment(appointment_id).await?;
        self.lifecycle.validate_status_transition(appointment.status, new_status)?;

        appointment.status = new_status;
        appointment.updated_at = Utc::now();

        let updated = self.appointments.update(&appointment).await?;
        info!("Appointment {} is now {}", appointment_id, new_status);
        Ok(updated)
    }

    pub async fn confirm_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(appointment_id, AppointmentStatus::Confirmed).await
    }

    /// Cancels locally, then best-effort removes the exported upstream event.
    /// If that fails the reference stays and the reconciler retries.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.get_appointment(appointment_id).await?;
        self.lifecycle.validate_status_transition(appointment.status, AppointmentStatus::Cancelled)?;

        appointment.status = AppointmentStatus::Cancelled;
        appointment.cancellation_reason = reason;
        appointment.updated_at = Utc::now();
        let mut cancelled = self.appointments.update(&appointment).await?;
        info!("Appointment {} cancelled", appointment_id);

        if let Some(reference) = cancelled.external_event_id.clone() {
            match self.upstream.delete_event(cancelled.professional_id, &reference).await {
                Ok(()) | Err(UpstreamError::NotConnected) => {
                    self.appointments.set_external_event(appointment_id, None).await?;
                    cancelled.external_event_id = None;
                }
                Err(e) => {
                    warn!("Upstream event {} for cancelled appointment {} left for reconciliation: {}",
                          reference, appointment_id, e);
                }
            }
        }

        Ok(cancelled)
    }
}
