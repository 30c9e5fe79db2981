//! Staff-facing reservation CRUD. Naive JST wall-clock input is accepted
//! here and converted to UTC instants before anything touches storage.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::warn;
use uuid::Uuid;

use yoyaku_db::models::{CustomerRow, ReservationRow};
use yoyaku_db::{is_unique_violation, parse_ts, ts};
use yoyaku_line::{messages, PushSender};
use yoyaku_reminder::{outbox, time};
use yoyaku_types::api::{
    CreateReservationRequest, CreateReservationResponse, LineNotification, LinkTokenResponse,
    ReservationSummary, UpdateReservationRequest,
};
use yoyaku_types::models::{Claims, Reservation};
use yoyaku_types::status::ReservationStatus;

use crate::stores::store_for;
use crate::{block, internal, AppState};

const LINK_TOKEN_TTL_HOURS: i64 = 24;

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = store_for(&state, &claims).await?;

    // Exactly one way to name the customer.
    if req.customer_id.is_some() == req.customer_name.is_some() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (start, end) =
        parse_slot(&req.start_at, req.duration_min).map_err(|_| StatusCode::BAD_REQUEST)?;

    let now = Utc::now();
    let customer = match req.customer_id {
        Some(id) => {
            let id = id.to_string();
            block(&state, move |db| db.get_customer(&id))
                .await
                .map_err(internal)?
                .ok_or(StatusCode::NOT_FOUND)?
        }
        None => {
            let name = req.customer_name.as_deref().unwrap_or_default().trim().to_string();
            if name.is_empty() {
                return Err(StatusCode::BAD_REQUEST);
            }
            let id = Uuid::new_v4().to_string();
            let created_at = ts(now);
            let insert_id = id.clone();
            let insert_name = name.clone();
            block(&state, move |db| {
                db.create_customer(&insert_id, &insert_name, None, None, &created_at)?;
                Ok(())
            })
            .await
            .map_err(internal)?;
            CustomerRow { id, display_name: name, phone_number: None, line_user_id: None }
        }
    };

    let reservation_id = Uuid::new_v4().to_string();
    {
        let id = reservation_id.clone();
        let store_id = store.id.clone();
        let customer_id = customer.id.clone();
        let note = req.note.clone();
        let created_at = ts(now);
        let result = block(&state, move |db| {
            db.create_reservation(
                &id,
                &store_id,
                Some(&customer_id),
                &ts(start),
                &ts(end),
                req.duration_min as i64,
                note.as_deref(),
                &created_at,
            )
        })
        .await;
        if let Err(e) = result {
            if is_unique_violation(&e) {
                return Err(StatusCode::CONFLICT);
            }
            return Err(internal(e));
        }
    }

    let line_notification =
        send_confirmation(&state, &customer, &reservation_id, &store.name, start, req.duration_min, req.note.as_deref(), now)
            .await;

    let id = reservation_id.clone();
    let row = block(&state, move |db| db.get_reservation(&id))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    let reservation = reservation_from_row(&row).map_err(internal)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateReservationResponse { reservation, line_notification }),
    ))
}

/// Pushes the creation confirmation when the customer is reachable over
/// LINE; a failed push parks the message in the outbox instead of failing
/// the reservation.
#[allow(clippy::too_many_arguments)]
async fn send_confirmation(
    state: &AppState,
    customer: &CustomerRow,
    reservation_id: &str,
    store_name: &str,
    start: DateTime<Utc>,
    duration_min: u32,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> LineNotification {
    let Some(line_user_id) = customer.line_user_id.as_deref() else {
        return LineNotification::Skipped;
    };

    let message =
        messages::reservation_confirmed(&time::format_jst(start), store_name, duration_min, note);

    match state.line.push(line_user_id, std::slice::from_ref(&message)).await {
        Ok(()) => LineNotification::Sent,
        Err(push_err) => {
            warn!("confirmation push failed, queueing: {}", push_err);
            let uid = line_user_id.to_string();
            let cid = customer.id.to_string();
            let rid = reservation_id.to_string();
            let queued = block(state, move |db| {
                outbox::enqueue(db, &uid, Some(&cid), Some(&rid), &message, now)
            })
            .await;
            if let Err(e) = queued {
                warn!("could not enqueue confirmation: {:#}", e);
            }
            LineNotification::Queued
        }
    }
}

pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateReservationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = store_for(&state, &claims).await?;
    let row = fetch_owned(&state, &store.id, id).await?;

    let current = ReservationStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    if current.is_terminal() {
        return Err(StatusCode::CONFLICT);
    }

    let duration_min = req.duration_min.unwrap_or(row.duration_min as u32);
    let (start, end) = match &req.start_at {
        Some(s) => parse_slot(s, duration_min).map_err(|_| StatusCode::BAD_REQUEST)?,
        None => {
            if duration_min == 0 || duration_min % 30 != 0 {
                return Err(StatusCode::BAD_REQUEST);
            }
            let start = parse_ts(&row.start_at).map_err(internal)?;
            (start, start + Duration::minutes(duration_min as i64))
        }
    };
    // Absent keeps the stored note, an explicit null clears it.
    let note = match req.note {
        Some(note) => note,
        None => row.note,
    };

    {
        let rid = id.to_string();
        let result = block(&state, move |db| {
            db.update_reservation_schedule(&rid, &ts(start), &ts(end), duration_min as i64, note.as_deref())
        })
        .await;
        if let Err(e) = result {
            if is_unique_violation(&e) {
                return Err(StatusCode::CONFLICT);
            }
            return Err(internal(e));
        }
    }

    let rid = id.to_string();
    let row = block(&state, move |db| db.get_reservation(&rid))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(reservation_from_row(&row).map_err(internal)?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = store_for(&state, &claims).await?;
    let row = fetch_owned(&state, &store.id, id).await?;

    let current = ReservationStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    if !current.can_transition_to(ReservationStatus::Cancelled) {
        return Err(StatusCode::CONFLICT);
    }

    let rid = id.to_string();
    block(&state, move |db| {
        db.update_reservation_status(&rid, ReservationStatus::Cancelled.as_str())
    })
    .await
    .map_err(internal)?;

    let rid = id.to_string();
    let row = block(&state, move |db| db.get_reservation(&rid))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(reservation_from_row(&row).map_err(internal)?))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = store_for(&state, &claims).await?;

    let store_id = store.id.clone();
    let from = ts(Utc::now());
    let rows = block(&state, move |db| db.list_store_reservations(&store_id, &from))
        .await
        .map_err(internal)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(ReservationSummary {
            id: row.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
            start_at: parse_ts(&row.start_at).map_err(internal)?,
            duration_min: row.duration_min as u32,
            status: ReservationStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?,
            customer_name: row.customer_name,
            note: row.note,
        });
    }
    Ok(Json(out))
}

/// Issues a fresh single-use link token and the LIFF URL carrying it.
/// Re-issuing replaces any previous pending token.
pub async fn issue_link_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = store_for(&state, &claims).await?;
    let row = fetch_owned(&state, &store.id, id).await?;

    let current = ReservationStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    if current.is_terminal() {
        return Err(StatusCode::CONFLICT);
    }

    let link_token = Uuid::new_v4().simple().to_string();
    let link_expires_at = Utc::now() + Duration::hours(LINK_TOKEN_TTL_HOURS);
    // Token and id are hex strings, so the URL needs no escaping.
    let liff_url = format!(
        "https://liff.line.me/{}/link?rid={}&token={}",
        state.config.liff_id, id, link_token
    );

    let rid = id.to_string();
    let token = link_token.clone();
    let url = liff_url.clone();
    let expires = ts(link_expires_at);
    block(&state, move |db| db.set_link_token(&rid, &token, &url, &expires))
        .await
        .map_err(internal)?;

    Ok(Json(LinkTokenResponse { liff_url, link_token, link_expires_at }))
}

async fn fetch_owned(
    state: &AppState,
    store_id: &str,
    id: Uuid,
) -> Result<ReservationRow, StatusCode> {
    let rid = id.to_string();
    let row = block(state, move |db| db.get_reservation(&rid))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    // A reservation of another store is indistinguishable from a missing one.
    if row.store_id != store_id {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(row)
}

/// Validates the JST wall-clock slot: minutes on :00/:30, duration a
/// positive multiple of 30.
fn parse_slot(start_at: &str, duration_min: u32) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
    if duration_min == 0 || duration_min % 30 != 0 {
        anyhow::bail!("duration must be a positive multiple of 30 minutes");
    }
    let start = time::parse_local_jst(start_at)?;
    let wall = time::jst_wall(start);
    if wall.second() != 0 || wall.minute() % 30 != 0 {
        anyhow::bail!("start time must fall on :00 or :30");
    }
    Ok((start, start + Duration::minutes(duration_min as i64)))
}

pub(crate) fn reservation_from_row(row: &ReservationRow) -> anyhow::Result<Reservation> {
    Ok(Reservation {
        id: row.id.parse()?,
        store_id: row.store_id.parse()?,
        customer_id: row.customer_id.as_deref().map(str::parse).transpose()?,
        start_at: parse_ts(&row.start_at)?,
        end_at: parse_ts(&row.end_at)?,
        duration_min: row.duration_min as u32,
        status: ReservationStatus::parse(&row.status)
            .ok_or_else(|| anyhow::anyhow!("unknown status '{}'", row.status))?,
        note: row.note.clone(),
        link_status: row.link_status.as_deref().and_then(yoyaku_types::status::LinkStatus::parse),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;

    fn staff_with_store(state: &AppState) -> Claims {
        let user = Uuid::new_v4();
        state
            .db
            .create_staff_user(&user.to_string(), &format!("{user}@example.com"), "hash", &ts(Utc::now()))
            .unwrap();
        state
            .db
            .create_store(
                &Uuid::new_v4().to_string(),
                "Salon A",
                None,
                None,
                Some(&user.to_string()),
                &ts(Utc::now()),
            )
            .unwrap();
        Claims { sub: user, email: "staff@example.com".into(), exp: 0 }
    }

    fn walk_in(start_at: &str, duration_min: u32) -> CreateReservationRequest {
        CreateReservationRequest {
            customer_id: None,
            customer_name: Some("山田".into()),
            start_at: start_at.into(),
            duration_min,
            note: None,
        }
    }

    #[test]
    fn slot_validation_rules() {
        assert!(parse_slot("2025-11-08T10:00:00", 60).is_ok());
        assert!(parse_slot("2025-11-08T10:30:00", 30).is_ok());
        assert!(parse_slot("2025-11-08T10:15:00", 60).is_err(), "minute must be :00/:30");
        assert!(parse_slot("2025-11-08T10:00:30", 60).is_err(), "seconds must be zero");
        assert!(parse_slot("2025-11-08T10:00:00", 45).is_err(), "duration granularity");
        assert!(parse_slot("2025-11-08T10:00:00", 0).is_err());
        assert!(parse_slot("2025-11-08 10:00", 60).is_err(), "format is strict");
    }

    #[test]
    fn slot_start_is_converted_from_jst() {
        let (start, end) = parse_slot("2025-11-08T10:00:00", 90).unwrap();
        assert_eq!(ts(start), "2025-11-08T01:00:00Z");
        assert_eq!(ts(end), "2025-11-08T02:30:00Z");
    }

    #[test]
    fn update_request_note_is_tri_state() {
        let absent: UpdateReservationRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.note, None);

        let cleared: UpdateReservationRequest = serde_json::from_str(r#"{"note":null}"#).unwrap();
        assert_eq!(cleared.note, Some(None));

        let replaced: UpdateReservationRequest =
            serde_json::from_str(r#"{"note":"カット"}"#).unwrap();
        assert_eq!(replaced.note, Some(Some("カット".into())));
    }

    #[tokio::test]
    async fn patch_keeps_clears_or_replaces_the_note() {
        let state = test_state();
        let claims = staff_with_store(&state);

        let mut req = walk_in("2025-11-08T10:00:00", 60);
        req.note = Some("カット".into());
        create(State(state.clone()), Extension(claims.clone()), Json(req)).await.ok();
        let store = state.db.get_store_for_user(&claims.sub.to_string()).unwrap().unwrap();
        let id: Uuid = state
            .db
            .list_store_reservations(&store.id, "2025-01-01T00:00:00Z")
            .unwrap()[0]
            .id
            .parse()
            .unwrap();

        let patch = |note| UpdateReservationRequest { start_at: None, duration_min: None, note };

        // Absent field leaves the note alone.
        update(State(state.clone()), Extension(claims.clone()), Path(id), Json(patch(None)))
            .await
            .unwrap();
        let row = state.db.get_reservation(&id.to_string()).unwrap().unwrap();
        assert_eq!(row.note.as_deref(), Some("カット"));

        // Explicit null clears it.
        update(State(state.clone()), Extension(claims.clone()), Path(id), Json(patch(Some(None))))
            .await
            .unwrap();
        let row = state.db.get_reservation(&id.to_string()).unwrap().unwrap();
        assert_eq!(row.note, None);

        // A value replaces it.
        update(
            State(state.clone()),
            Extension(claims),
            Path(id),
            Json(patch(Some(Some("パーマ".into())))),
        )
        .await
        .unwrap();
        let row = state.db.get_reservation(&id.to_string()).unwrap().unwrap();
        assert_eq!(row.note.as_deref(), Some("パーマ"));
    }

    #[tokio::test]
    async fn create_walk_in_reservation_skips_notification() {
        let state = test_state();
        let claims = staff_with_store(&state);

        let res = create(
            State(state.clone()),
            Extension(claims.clone()),
            Json(walk_in("2025-11-08T10:00:00", 60)),
        )
        .await;
        assert!(res.is_ok());

        let rows = state
            .db
            .list_store_reservations(
                &state.db.get_store_for_user(&claims.sub.to_string()).unwrap().unwrap().id,
                "2025-01-01T00:00:00Z",
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_name.as_deref(), Some("山田"));
    }

    #[tokio::test]
    async fn double_booking_a_slot_is_a_conflict() {
        let state = test_state();
        let claims = staff_with_store(&state);

        create(State(state.clone()), Extension(claims.clone()), Json(walk_in("2025-11-08T10:00:00", 60)))
            .await
            .ok();
        let err = create(
            State(state.clone()),
            Extension(claims.clone()),
            Json(walk_in("2025-11-08T10:00:00", 30)),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn customer_id_and_name_are_mutually_exclusive() {
        let state = test_state();
        let claims = staff_with_store(&state);

        let both = CreateReservationRequest {
            customer_id: Some(Uuid::new_v4()),
            customer_name: Some("山田".into()),
            start_at: "2025-11-08T10:00:00".into(),
            duration_min: 60,
            note: None,
        };
        let err = create(State(state.clone()), Extension(claims.clone()), Json(both))
            .await
            .err()
            .unwrap();
        assert_eq!(err, StatusCode::BAD_REQUEST);

        let neither = CreateReservationRequest {
            customer_id: None,
            customer_name: None,
            start_at: "2025-11-08T10:00:00".into(),
            duration_min: 60,
            note: None,
        };
        let err = create(State(state), Extension(claims), Json(neither)).await.err().unwrap();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn staff_cancel_follows_the_state_machine() {
        let state = test_state();
        let claims = staff_with_store(&state);
        create(State(state.clone()), Extension(claims.clone()), Json(walk_in("2025-11-08T10:00:00", 60)))
            .await
            .ok();
        let store = state.db.get_store_for_user(&claims.sub.to_string()).unwrap().unwrap();
        let id: Uuid = state
            .db
            .list_store_reservations(&store.id, "2025-01-01T00:00:00Z")
            .unwrap()[0]
            .id
            .parse()
            .unwrap();

        assert!(cancel(State(state.clone()), Extension(claims.clone()), Path(id)).await.is_ok());

        // Cancelling twice hits the terminal-state guard.
        let err = cancel(State(state), Extension(claims), Path(id)).await.err().unwrap();
        assert_eq!(err, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn other_stores_reservations_are_invisible() {
        let state = test_state();
        let owner = staff_with_store(&state);
        create(State(state.clone()), Extension(owner.clone()), Json(walk_in("2025-11-08T10:00:00", 60)))
            .await
            .ok();
        let store = state.db.get_store_for_user(&owner.sub.to_string()).unwrap().unwrap();
        let id: Uuid = state
            .db
            .list_store_reservations(&store.id, "2025-01-01T00:00:00Z")
            .unwrap()[0]
            .id
            .parse()
            .unwrap();

        let stranger = staff_with_store(&state);
        let err = cancel(State(state), Extension(stranger), Path(id)).await.err().unwrap();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn link_token_issuance_builds_liff_url() {
        let state = test_state();
        let claims = staff_with_store(&state);
        create(State(state.clone()), Extension(claims.clone()), Json(walk_in("2025-11-08T10:00:00", 60)))
            .await
            .ok();
        let store = state.db.get_store_for_user(&claims.sub.to_string()).unwrap().unwrap();
        let id: Uuid = state
            .db
            .list_store_reservations(&store.id, "2025-01-01T00:00:00Z")
            .unwrap()[0]
            .id
            .parse()
            .unwrap();

        assert!(issue_link_token(State(state.clone()), Extension(claims), Path(id)).await.is_ok());

        let row = state.db.get_reservation(&id.to_string()).unwrap().unwrap();
        assert_eq!(row.link_status.as_deref(), Some("pending"));
        let token = row.link_token.unwrap();
        assert_eq!(token.len(), 32);
    }
}
