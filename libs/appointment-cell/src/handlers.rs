// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CancelAppointmentRequest, CreateAppointmentRequest,
};
use crate::services::BookingService;

#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<BookingService>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub professional_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct SlotCheckQuery {
    pub professional_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: Option<i32>,
}

fn parse_user_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Invalid user id in token".to_string()))
}

fn ensure_participant(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if !user.is_admin() && !appointment.is_participant(&user.id) {
        return Err(AppError::Forbidden("Not a participant of this appointment".to_string()));
    }
    Ok(())
}

fn ensure_professional(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if !user.can_manage(&appointment.professional_id.to_string()) {
        return Err(AppError::Forbidden("Only the professional can do this".to_string()));
    }
    Ok(())
}

// ==============================================================================
// SLOT QUERIES
// ==============================================================================

pub async fn list_free_slots(
    State(state): State<AppointmentState>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state.booking.list_free_slots(query.professional_id, query.date).await?;

    Ok(Json(json!({
        "professional_id": query.professional_id,
        "date": query.date,
        "slots": slots,
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn check_slot(
    State(state): State<AppointmentState>,
    Query(query): Query<SlotCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let result = state
        .booking
        .check_slot(query.professional_id, query.date, query.time, query.duration_minutes)
        .await;

    match result {
        Ok(()) => Ok(Json(json!({ "bookable": true }))),
        Err(AppointmentError::SlotUnavailable(rejection)) => {
            debug!("Slot {} {} rejected: {}", query.date, query.time, rejection);
            Ok(Json(json!({
                "bookable": false,
                "reason": rejection,
                "message": rejection.to_string()
            })))
        }
        Err(e) => Err(e.into()),
    }
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = parse_user_id(&user)?;
    let patient_id = request.patient_id.unwrap_or(caller);

    if patient_id != caller && !user.is_admin() {
        return Err(AppError::Forbidden("Cannot book on behalf of another patient".to_string()));
    }

    let appointment = state.booking.create_appointment(patient_id, request).await?;
    Ok(Json(json!(appointment)))
}

pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(appointment_id).await?;
    ensure_participant(&user, &appointment)?;

    Ok(Json(json!(appointment)))
}

pub async fn confirm_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(appointment_id).await?;
    ensure_professional(&user, &appointment)?;

    let confirmed = state.booking.confirm_appointment(appointment_id).await?;
    Ok(Json(json!(confirmed)))
}

pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(appointment_id).await?;
    ensure_participant(&user, &appointment)?;

    let reason = request.and_then(|Json(body)| body.reason);
    let cancelled = state.booking.cancel_appointment(appointment_id, reason).await?;
    Ok(Json(json!(cancelled)))
}

pub async fn complete_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(appointment_id).await?;
    ensure_professional(&user, &appointment)?;

    let completed = state.booking.transition(appointment_id, AppointmentStatus::Completed).await?;
    Ok(Json(json!(completed)))
}

pub async fn mark_no_show(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(appointment_id).await?;
    ensure_professional(&user, &appointment)?;

    let updated = state.booking.transition(appointment_id, AppointmentStatus::NoShow).await?;
    Ok(Json(json!(updated)))
}
