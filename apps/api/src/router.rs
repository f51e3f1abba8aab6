use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::handlers::AppointmentState;
use appointment_cell::router::appointment_routes;
use appointment_cell::services::BookingService;
use availability_cell::handlers::AvailabilityState;
use availability_cell::router::availability_routes;
use availability_cell::services::AvailabilityService;
use calendar_sync_cell::handlers::CalendarSyncState;
use calendar_sync_cell::router::calendar_sync_routes;
use calendar_sync_cell::services::CalendarReconciler;
use reminder_cell::handlers::ReminderState;
use reminder_cell::router::reminder_routes;
use reminder_cell::services::ReminderSweeper;
use shared_config::AppConfig;

/// Everything the cells share, built once at startup.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub availability: Arc<AvailabilityService>,
    pub booking: Arc<BookingService>,
    pub reconciler: Arc<CalendarReconciler>,
    pub sweeper: Arc<ReminderSweeper>,
}

pub fn create_router(services: Services) -> Router {
    let config = services.config.clone();

    Router::new()
        .route("/", get(|| async { "Scheduling API is running!" }))
        .nest("/availability", availability_routes(AvailabilityState {
            config: config.clone(),
            service: services.availability,
        }))
        .nest("/appointments", appointment_routes(AppointmentState {
            config: config.clone(),
            booking: services.booking,
        }))
        .nest("/calendar-sync", calendar_sync_routes(CalendarSyncState {
            config: config.clone(),
            reconciler: services.reconciler,
        }))
        .nest("/reminders", reminder_routes(ReminderState {
            config,
            sweeper: services.sweeper,
        }))
}
