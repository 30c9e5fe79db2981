//! Customer-facing endpoints behind the LIFF page. There is no session
//! here; the LIFF SDK supplies the LINE user id and every operation checks
//! it against the reservation's linked identity.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use yoyaku_db::{parse_ts, ts};
use yoyaku_types::api::{LiffCancelRequest, LiffChangeRequest, LiffReservation};
use yoyaku_types::status::ReservationStatus;

use crate::{block, internal, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationsQuery {
    pub line_user_id: String,
}

pub async fn reservations(
    State(state): State<AppState>,
    Query(q): Query<ReservationsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let from = ts(Utc::now());
    let rows = block(&state, move |db| db.list_reservations_for_line_user(&q.line_user_id, &from))
        .await
        .map_err(internal)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(LiffReservation {
            id: row.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
            store_name: row.store_name,
            start_at: parse_ts(&row.start_at).map_err(internal)?,
            duration_min: row.duration_min as u32,
            status: ReservationStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?,
            note: row.note,
        });
    }
    Ok(Json(out))
}

pub async fn cancel(
    State(state): State<AppState>,
    Json(req): Json<LiffCancelRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let rid = req.reservation_id.to_string();
    let contact = block(&state, move |db| db.get_reservation_contact(&rid))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    // Only the linked identity may cancel.
    if contact.customer_line_user_id.as_deref() != Some(req.line_user_id.as_str()) {
        return Err(StatusCode::FORBIDDEN);
    }

    let current = ReservationStatus::parse(&contact.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    if !current.can_transition_to(ReservationStatus::Cancelled) {
        return Err(StatusCode::CONFLICT);
    }

    let rid = req.reservation_id.to_string();
    block(&state, move |db| {
        db.update_reservation_status(&rid, ReservationStatus::Cancelled.as_str())
    })
    .await
    .map_err(internal)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Flags the reservation for rescheduling. The slot itself only moves when
/// staff apply the change, so this transition exists only from `scheduled`.
pub async fn request_change(
    State(state): State<AppState>,
    Json(req): Json<LiffChangeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let rid = req.reservation_id.to_string();
    let contact = block(&state, move |db| db.get_reservation_contact(&rid))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if contact.customer_line_user_id.as_deref() != Some(req.line_user_id.as_str()) {
        return Err(StatusCode::FORBIDDEN);
    }

    let current = ReservationStatus::parse(&contact.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    if !current.can_transition_to(ReservationStatus::ChangeRequested) {
        return Err(StatusCode::CONFLICT);
    }

    let rid = req.reservation_id.to_string();
    block(&state, move |db| {
        db.update_reservation_status(&rid, ReservationStatus::ChangeRequested.as_str())
    })
    .await
    .map_err(internal)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}
