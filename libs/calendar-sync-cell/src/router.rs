use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, CalendarSyncState};

pub fn calendar_sync_routes(state: CalendarSyncState) -> Router {
    let protected_routes = Router::new()
        .route("/runs/latest", get(handlers::latest_run))
        .route("/{professional_id}/reconcile", post(handlers::reconcile))
        .route("/{professional_id}/status", get(handlers::get_status))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
