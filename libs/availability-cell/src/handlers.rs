use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreateBlockRequest, SaveWorkingProfileRequest, UpdateBlockRequest};
use crate::services::AvailabilityService;

#[derive(Clone)]
pub struct AvailabilityState {
    pub config: Arc<AppConfig>,
    pub service: Arc<AvailabilityService>,
}

#[derive(Debug, Deserialize)]
pub struct BlocksQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    pub start: NaiveDate,
}

fn ensure_can_manage(user: &User, professional_id: Uuid) -> Result<(), AppError> {
    if !user.can_manage(&professional_id.to_string()) {
        return Err(AppError::Forbidden("Not allowed to manage this schedule".to_string()));
    }
    Ok(())
}

// ==============================================================================
// WORKING PROFILE
// ==============================================================================

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let profile = state.service.get_profile(professional_id).await?;
    Ok(Json(json!(profile)))
}

#[axum::debug_handler]
pub async fn save_profile(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<SaveWorkingProfileRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&user, professional_id)?;

    let profile = state.service.save_profile(professional_id, request).await?;
    Ok(Json(json!(profile)))
}

// ==============================================================================
// BLOCKS
// ==============================================================================

pub async fn list_blocks(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<BlocksQuery>,
) -> Result<Json<Value>, AppError> {
    let blocks = state.service.blocks_covering_date(professional_id, query.date).await?;

    Ok(Json(json!({
        "date": query.date,
        "blocks": blocks,
        "total": blocks.len()
    })))
}

#[axum::debug_handler]
pub async fn create_block(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBlockRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&user, professional_id)?;

    let block = state.service.create_block(professional_id, request).await?;
    Ok(Json(json!(block)))
}

pub async fn update_block(
    State(state): State<AvailabilityState>,
    Path((professional_id, block_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateBlockRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&user, professional_id)?;

    let block = state.service.update_block(professional_id, block_id, request).await?;
    Ok(Json(json!(block)))
}

pub async fn delete_block(
    State(state): State<AvailabilityState>,
    Path((professional_id, block_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    ensure_can_manage(&user, professional_id)?;

    let outcome = state.service.delete_block(professional_id, block_id).await?;

    Ok(Json(json!({
        "block_id": block_id,
        "outcome": outcome
    })))
}

// ==============================================================================
// WEEK VIEW
// ==============================================================================

pub async fn get_week(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<WeekQuery>,
) -> Result<Json<Value>, AppError> {
    let grid = state.service.week(professional_id, query.start).await?;
    Ok(Json(json!(grid)))
}
