//! Staff reporting: the upcoming reminder schedule, recent delivery
//! history, and monthly reservation counts.

use std::collections::HashSet;

use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use yoyaku_db::parse_ts;
use yoyaku_db::ts;
use yoyaku_reminder::time;
use yoyaku_types::api::{
    HistoryEntry, ReminderCustomerEntry, ReminderCustomersResponse, ReminderOverviewResponse,
    ReminderStatsResponse, ScheduleEntry,
};
use yoyaku_types::models::{Claims, ReminderChannel, ReminderKind, ReminderLogStatus};
use yoyaku_types::status::ReservationStatus;

use crate::stores::store_for;
use crate::{block, internal, AppState};

const HISTORY_LIMIT: u32 = 300;

pub async fn overview(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReminderOverviewResponse>, StatusCode> {
    let store = store_for(&state, &claims).await?;
    let store_id: Uuid = store.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let now = Utc::now();

    let sid = store.id.clone();
    let from = ts(now);
    let upcoming = block(&state, move |db| db.list_store_reservations(&sid, &from))
        .await
        .map_err(internal)?;

    let live_ids: Vec<String> = upcoming
        .iter()
        .filter(|r| ReservationStatus::parse(&r.status).is_some_and(|s| s.is_active()))
        .map(|r| r.id.clone())
        .collect();

    let today = time::civil_date_of(now);
    let mut schedule = Vec::new();
    for kind in ReminderKind::ALL {
        let ids = live_ids.clone();
        let sent: HashSet<String> = block(&state, move |db| {
            db.sent_reservation_ids(kind.as_str(), ReminderChannel::Line.as_str(), &ids)
        })
        .await
        .map_err(internal)?
        .into_iter()
        .collect();

        for row in &upcoming {
            if !live_ids.contains(&row.id) || sent.contains(&row.id) {
                continue;
            }
            let start_at = parse_ts(&row.start_at).map_err(internal)?;
            let send_day = time::civil_date_of(start_at) - chrono::Duration::days(kind.offset_days());
            // A send day already behind us means the window was missed or
            // the reservation was created inside it; nothing is scheduled.
            if send_day < today {
                continue;
            }
            schedule.push(ScheduleEntry {
                kind,
                reservation_id: row.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
                reservation_start_at: start_at,
                send_at: time::civil_day_utc_bounds(send_day).0,
                customer_name: row.customer_name.clone(),
            });
        }
    }
    schedule.sort_by_key(|e| e.send_at);

    let sid = store.id.clone();
    let history_rows = block(&state, move |db| db.reminder_history_for_store(&sid, HISTORY_LIMIT))
        .await
        .map_err(internal)?;

    let mut history = Vec::with_capacity(history_rows.len());
    for row in history_rows {
        history.push(HistoryEntry {
            id: row.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
            reservation_id: row
                .reservation_id
                .parse()
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
            kind: ReminderKind::parse(&row.kind).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?,
            channel: ReminderChannel::parse(&row.channel).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?,
            status: ReminderLogStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?,
            error: row.error,
            attempted_at: parse_ts(&row.attempted_at).map_err(internal)?,
            reservation_start_at: parse_ts(&row.reservation_start_at).map_err(internal)?,
            customer_name: row.customer_name,
        });
    }

    Ok(Json(ReminderOverviewResponse { store_id, schedule, history }))
}

/// Per-customer view of who is up for a reminder next. Rows arrive ordered
/// by start time, so the first reservation seen per customer is their next
/// one; the sent flags refer to that reservation.
pub async fn customers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReminderCustomersResponse>, StatusCode> {
    let store = store_for(&state, &claims).await?;

    let sid = store.id.clone();
    let from = ts(Utc::now());
    let rows = block(&state, move |db| db.upcoming_customer_reservations(&sid, &from))
        .await
        .map_err(internal)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut next = Vec::new();
    for row in rows {
        if seen.insert(row.customer_id.clone()) {
            next.push(row);
        }
    }

    let ids: Vec<String> = next.iter().map(|r| r.reservation_id.clone()).collect();
    let lookup = ids.clone();
    let sent_7d: HashSet<String> = block(&state, move |db| {
        db.sent_reservation_ids(
            ReminderKind::SevenDaysBefore.as_str(),
            ReminderChannel::Line.as_str(),
            &lookup,
        )
    })
    .await
    .map_err(internal)?
    .into_iter()
    .collect();
    let sent_1d: HashSet<String> = block(&state, move |db| {
        db.sent_reservation_ids(
            ReminderKind::OneDayBefore.as_str(),
            ReminderChannel::Line.as_str(),
            &ids,
        )
    })
    .await
    .map_err(internal)?
    .into_iter()
    .collect();

    let mut customers = Vec::with_capacity(next.len());
    for row in next {
        customers.push(ReminderCustomerEntry {
            customer_id: row.customer_id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
            customer_name: row.customer_name,
            phone_number: row.phone_number,
            next_reservation_at: parse_ts(&row.start_at).map_err(internal)?,
            status: ReservationStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?,
            sent_7d: sent_7d.contains(&row.reservation_id),
            sent_1d: sent_1d.contains(&row.reservation_id),
        });
    }

    Ok(Json(ReminderCustomersResponse { customers }))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReminderStatsResponse>, StatusCode> {
    let store = store_for(&state, &claims).await?;
    let (this_start, next_start, next_end) = time::jst_month_bounds(Utc::now());

    let sid = store.id.clone();
    let this_month = block(&state, move |db| {
        db.count_active_reservations_between(&sid, &ts(this_start), &ts(next_start))
    })
    .await
    .map_err(internal)?;

    let sid = store.id;
    let next_month = block(&state, move |db| {
        db.count_active_reservations_between(&sid, &ts(next_start), &ts(next_end))
    })
    .await
    .map_err(internal)?;

    Ok(Json(ReminderStatsResponse { this_month, next_month }))
}
