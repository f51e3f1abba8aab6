use axum::{
    Router,
    routing::post,
};

use crate::handlers::{self, ReminderState};

/// Called by the scheduler, not by users: guarded by the cron secret instead of a JWT.
pub fn reminder_routes(state: ReminderState) -> Router {
    Router::new()
        .route("/sweep", post(handlers::sweep))
        .with_state(state)
}
