//! External cron trigger endpoints. The same sweeps also run in-process on
//! intervals; these exist so a platform scheduler can drive them too.

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use chrono::Utc;
use tracing::warn;

use yoyaku_reminder::{dispatch, outbox};
use yoyaku_types::api::SweepReport;

use crate::AppState;

/// Refuses every caller unless the configured shared secret matches.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = state.config.cron_secret.as_deref() else {
        warn!("cron endpoint called but no cron secret is configured");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let provided = headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if provided != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

pub async fn reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, StatusCode> {
    authorize(&state, &headers)?;
    let report = dispatch::run_reminder_sweep(&state.db, &state.line, Utc::now())
        .await
        .map_err(crate::internal)?;
    Ok(Json(report))
}

pub async fn outbox_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, StatusCode> {
    authorize(&state, &headers)?;
    let report = outbox::sweep(&state.db, &state.line, Utc::now())
        .await
        .map_err(crate::internal)?;
    Ok(Json(report))
}
