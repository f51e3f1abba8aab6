use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{ReminderError, SweepResponse};
use crate::services::ReminderSweeper;

type HmacSha256 = Hmac<Sha256>;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

#[derive(Clone)]
pub struct ReminderState {
    pub config: Arc<AppConfig>,
    pub sweeper: Arc<ReminderSweeper>,
}

/// Compares MACs of both secrets so the check takes the same time wherever they differ.
fn verify_cron_secret(config: &AppConfig, headers: &HeaderMap) -> Result<(), ReminderError> {
    let expected = config.reminder_cron_secret.as_bytes();
    if expected.is_empty() {
        return Err(ReminderError::Unauthorized);
    }

    let presented = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ReminderError::Unauthorized)?;

    let tag = |secret: &[u8]| -> Result<HmacSha256, ReminderError> {
        let mut mac = HmacSha256::new_from_slice(expected).map_err(|_| ReminderError::Unauthorized)?;
        mac.update(secret);
        Ok(mac)
    };

    let expected_tag = tag(expected)?.finalize().into_bytes();
    tag(presented.as_bytes())?
        .verify_slice(&expected_tag)
        .map_err(|_| ReminderError::Unauthorized)
}

#[axum::debug_handler]
pub async fn sweep(
    State(state): State<ReminderState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, AppError> {
    if let Err(e) = verify_cron_secret(&state.config, &headers) {
        warn!("Rejected reminder sweep trigger");
        return Err(e.into());
    }

    let swept_at = Utc::now();
    let report = state.sweeper.sweep_at(swept_at).await?;
    info!("Reminder sweep triggered externally sent {} reminders", report.total_sent());

    Ok(Json(SweepResponse { swept_at, report }))
}
