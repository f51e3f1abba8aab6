use axum::{
    Router,
    routing::{get, put},
    middleware,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AvailabilityState};

pub fn availability_routes(state: AvailabilityState) -> Router {
    let protected_routes = Router::new()
        .route("/{professional_id}/profile", get(handlers::get_profile).put(handlers::save_profile))
        .route("/{professional_id}/blocks", get(handlers::list_blocks).post(handlers::create_block))
        .route(
            "/{professional_id}/blocks/{block_id}",
            put(handlers::update_block).delete(handlers::delete_block),
        )
        .route("/{professional_id}/week", get(handlers::get_week))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
