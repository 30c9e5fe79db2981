//! Staff-facing customer lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use yoyaku_db::parse_ts;
use yoyaku_types::api::{CustomerDetailResponse, ReservationSummary};
use yoyaku_types::models::{Claims, Customer};
use yoyaku_types::status::ReservationStatus;

use crate::stores::store_for;
use crate::{block, internal, AppState};

/// Customer detail plus their reservation history at the caller's store.
/// A customer with no reservations there is indistinguishable from a
/// missing one.
pub async fn detail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomerDetailResponse>, StatusCode> {
    let store = store_for(&state, &claims).await?;

    let cid = id.to_string();
    let customer = block(&state, move |db| db.get_customer(&cid))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let cid = id.to_string();
    let sid = store.id.clone();
    let rows = block(&state, move |db| db.list_customer_reservations(&cid, &sid))
        .await
        .map_err(internal)?;
    if rows.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    let mut reservations = Vec::with_capacity(rows.len());
    for row in rows {
        reservations.push(ReservationSummary {
            id: row.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
            start_at: parse_ts(&row.start_at).map_err(internal)?,
            duration_min: row.duration_min as u32,
            status: ReservationStatus::parse(&row.status).ok_or(StatusCode::INTERNAL_SERVER_ERROR)?,
            customer_name: row.customer_name,
            note: row.note,
        });
    }

    Ok(Json(CustomerDetailResponse {
        customer: Customer {
            id,
            display_name: customer.display_name,
            phone_number: customer.phone_number,
            line_user_id: customer.line_user_id,
        },
        reservations,
    }))
}
