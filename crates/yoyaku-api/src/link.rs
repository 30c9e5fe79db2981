//! Public link-confirmation endpoint, called from the LIFF page after the
//! customer scanned the QR code and LIFF resolved their LINE identity.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use yoyaku_db::link::{LinkError, LinkOutcome};
use yoyaku_types::api::{ConfirmLinkRequest, ConfirmLinkResponse};

use crate::{block, AppState};

pub async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmLinkRequest>,
) -> impl IntoResponse {
    let now = Utc::now();
    let outcome = block(&state, move |db| {
        Ok(db.confirm_link(
            &req.reservation_id.to_string(),
            &req.token,
            &req.line_user_id,
            req.display_name.as_deref(),
            now,
        ))
    })
    .await;

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            tracing::error!("link confirm failed: {:#}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "リンク処理に失敗しました。");
        }
    };

    match outcome {
        Ok(LinkOutcome::Linked) => {
            info!("reservation linked to LINE account");
            Json(ConfirmLinkResponse { ok: true, already_linked: false }).into_response()
        }
        Ok(LinkOutcome::AlreadyLinked) => {
            Json(ConfirmLinkResponse { ok: true, already_linked: true }).into_response()
        }
        Err(LinkError::ReservationNotFound) => {
            error_response(StatusCode::NOT_FOUND, "予約が見つかりません。")
        }
        Err(LinkError::InvalidToken) => {
            error_response(StatusCode::BAD_REQUEST, "リンク用トークンが正しくありません。")
        }
        Err(LinkError::TokenExpired) => error_response(
            StatusCode::BAD_REQUEST,
            "リンク用トークンの有効期限が切れています。店舗で再発行してください。",
        ),
        Err(LinkError::IdentityConflict) => error_response(
            StatusCode::CONFLICT,
            "このLINEアカウントは別のお客様情報に連携済みです。",
        ),
        Err(LinkError::Db(e)) => {
            tracing::error!("link confirm failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "リンク処理に失敗しました。")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(json!({ "error": message }))).into_response()
}
