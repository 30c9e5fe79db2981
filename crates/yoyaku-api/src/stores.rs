use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use uuid::Uuid;

use yoyaku_db::models::StoreRow;
use yoyaku_types::api::StoreMeResponse;
use yoyaku_types::models::Claims;

use crate::{block, internal, AppState};

/// Resolves the caller's store. Strictly by `stores.user_id`; a staff user
/// with no bound store gets 404, never somebody else's store.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let store = store_for(&state, &claims).await?;
    let store_id: Uuid = store.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(StoreMeResponse {
        store_id,
        store_name: store.name,
    }))
}

/// Shared store lookup for all store-scoped handlers.
pub(crate) async fn store_for(state: &AppState, claims: &Claims) -> Result<StoreRow, StatusCode> {
    let user_id = claims.sub.to_string();
    block(state, move |db| db.get_store_for_user(&user_id))
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;
    use yoyaku_db::ts;

    #[tokio::test]
    async fn unbound_user_gets_not_found() {
        let state = test_state();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "ghost@example.com".into(),
            exp: 0,
        };
        let err = me(State(state), Extension(claims)).await.err().unwrap();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bound_user_resolves_only_their_store() {
        let state = test_state();
        let now = ts(chrono::Utc::now());
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        state
            .db
            .create_staff_user(&owner.to_string(), "a@example.com", "hash", &now)
            .unwrap();
        state
            .db
            .create_store("store-1", "Salon A", None, None, Some(&owner.to_string()), &now)
            .unwrap();

        let claims = Claims { sub: owner, email: "a@example.com".into(), exp: 0 };
        let store = store_for(&state, &claims).await.unwrap();
        assert_eq!(store.id, "store-1");

        let stranger = Claims { sub: other, email: "b@example.com".into(), exp: 0 };
        assert_eq!(store_for(&state, &stranger).await.err(), Some(StatusCode::NOT_FOUND));
    }
}
