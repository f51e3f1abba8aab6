use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::services::CalendarReconciler;

#[derive(Clone)]
pub struct CalendarSyncState {
    pub config: Arc<AppConfig>,
    pub reconciler: Arc<CalendarReconciler>,
}

fn ensure_can_manage(user: &User, professional_id: Uuid) -> Result<(), AppError> {
    if !user.can_manage(&professional_id.to_string()) {
        return Err(AppError::Forbidden("Not allowed to manage this calendar".to_string()));
    }
    Ok(())
}

#[axum::debug_handler]
pub async fn reconcile(
    State(state): State<CalendarSyncState>,
    Path(professional_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&user, professional_id)?;

    info!("On-demand reconciliation for professional {} requested by {}", professional_id, user.id);
    let result = state.reconciler.reconcile_professional(professional_id).await?;
    Ok(Json(json!(result)))
}

#[axum::debug_handler]
pub async fn get_status(
    State(state): State<CalendarSyncState>,
    Path(professional_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&user, professional_id)?;

    let status = state.reconciler.status(professional_id).await?;
    Ok(Json(json!(status)))
}

pub async fn latest_run(
    State(state): State<CalendarSyncState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    let run = state.reconciler.latest_run().await?;
    Ok(Json(json!({ "run": run })))
}
