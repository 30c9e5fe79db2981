//! LINE platform webhook. The signature is verified against the raw body
//! before anything is parsed or touched; handled events always answer 200
//! so the platform does not re-deliver them.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};

use yoyaku_line::webhook::{parse_postback_data, WebhookEvent, WebhookPayload};
use yoyaku_line::{signature, Message};
use yoyaku_reminder::outbox;
use yoyaku_types::status::{decide_reply, ReminderReply, ReplyDecision, ReservationStatus};

use crate::{block, AppState};

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    let sig = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !signature::verify_signature(&state.config.channel_secret, &body, sig) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    for event in payload.events {
        match event {
            WebhookEvent::Postback { source, reply_token, postback } => {
                handle_postback(&state, source.user_id.as_deref(), &reply_token, &postback.data)
                    .await;
            }
            WebhookEvent::Follow { source } => {
                if let Some(user_id) = source.user_id {
                    match outbox::drain_for_user(&state.db, &state.line, &user_id, Utc::now()).await
                    {
                        Ok(report) if report.sent > 0 || report.failed > 0 => {
                            info!("follow drain: {} sent, {} failed", report.sent, report.failed);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("follow drain failed: {:#}", e),
                    }
                }
            }
            WebhookEvent::Other => {}
        }
    }

    Ok(StatusCode::OK)
}

async fn handle_postback(state: &AppState, user_id: Option<&str>, reply_token: &str, data: &str) {
    let Some((reply, reservation_id)) = parse_postback_data(data) else {
        warn!("unrecognized postback data: {}", data);
        return;
    };
    let Some(reply) = ReminderReply::parse(&reply) else {
        warn!("unknown reminder reply '{}'", reply);
        return;
    };

    let rid = reservation_id.clone();
    let contact = match block(state, move |db| db.get_reservation_contact(&rid)).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            warn!("postback for unknown reservation {}", reservation_id);
            return;
        }
        Err(e) => {
            warn!("postback lookup failed: {:#}", e);
            return;
        }
    };

    // The replying account must be the one linked to this reservation. An
    // unlinked reservation or an anonymous sender never matches.
    let (Some(linked), Some(caller)) = (contact.customer_line_user_id.as_deref(), user_id) else {
        warn!("postback without a linked identity for reservation {}", reservation_id);
        return;
    };
    if linked != caller {
        warn!("postback identity mismatch for reservation {}", reservation_id);
        return;
    }

    let Some(current) = ReservationStatus::parse(&contact.status) else {
        warn!("reservation {} has unreadable status '{}'", reservation_id, contact.status);
        return;
    };

    let text = match decide_reply(current, reply) {
        ReplyDecision::Transition(next) => {
            let rid = reservation_id.clone();
            if let Err(e) =
                block(state, move |db| db.update_reservation_status(&rid, next.as_str())).await
            {
                warn!("status transition failed: {:#}", e);
                return;
            }
            info!("reservation {} -> {}", reservation_id, next.as_str());
            "ご来店予定として承りました。お待ちしております。".to_string()
        }
        ReplyDecision::AlreadySatisfied => {
            "ご来店予定として承っております。お待ちしております。".to_string()
        }
        ReplyDecision::PortalOnly => portal_guidance(contact.store_phone.as_deref()),
        ReplyDecision::NotAllowed => {
            "この予約は現在この操作を受け付けていません。店舗までお問い合わせください。".to_string()
        }
    };

    if let Err(e) = state.line.reply(reply_token, &[Message::Text { text }]).await {
        warn!("webhook reply failed: {:#}", e);
    }
}

/// Change and cancel requests are never applied from the messaging channel.
fn portal_guidance(store_phone: Option<&str>) -> String {
    match store_phone {
        Some(phone) => format!(
            "ご変更・キャンセルはマイページからお手続きください。お急ぎの場合は店舗（{phone}）までお電話ください。"
        ),
        None => "ご変更・キャンセルはマイページからお手続きください。".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        B64.encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn missing_or_wrong_signature_is_rejected() {
        let state = test_state();
        let body = Bytes::from_static(br#"{"events":[]}"#);

        let err = receive(State(state.clone()), HeaderMap::new(), body.clone())
            .await
            .err()
            .unwrap();
        assert_eq!(err, StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert("x-line-signature", sign("wrong-secret", &body).parse().unwrap());
        let err = receive(State(state), headers, body).await.err().unwrap();
        assert_eq!(err, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_empty_event_list_is_accepted() {
        let state = test_state();
        let body = Bytes::from_static(br#"{"events":[]}"#);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-line-signature",
            sign(&state.config.channel_secret, &body).parse().unwrap(),
        );

        assert!(receive(State(state), headers, body).await.is_ok());
    }

    #[tokio::test]
    async fn signed_garbage_is_a_bad_request() {
        let state = test_state();
        let body = Bytes::from_static(b"not json");
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-line-signature",
            sign(&state.config.channel_secret, &body).parse().unwrap(),
        );

        let err = receive(State(state), headers, body).await.err().unwrap();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn postback_identity_gate_blocks_anonymous_and_mismatched_senders() {
        let state = test_state();
        let now = yoyaku_db::ts(Utc::now());
        state.db.create_store("store-1", "Salon A", None, None, None, &now).unwrap();
        // Reservation with no customer at all.
        state
            .db
            .create_reservation("r1", "store-1", None, "2099-11-08T01:00:00Z", "2099-11-08T02:00:00Z", 60, None, &now)
            .unwrap();
        // Reservation linked to U_alpha.
        state.db.create_customer("c1", "山田", None, Some("U_alpha"), &now).unwrap();
        state
            .db
            .create_reservation("r2", "store-1", Some("c1"), "2099-11-09T01:00:00Z", "2099-11-09T02:00:00Z", 60, None, &now)
            .unwrap();

        // An event without a userId must not match the unlinked reservation.
        handle_postback(&state, None, "rt-1", "remind=visit&rid=r1").await;
        assert_eq!(state.db.get_reservation("r1").unwrap().unwrap().status, "scheduled");

        // A different account must not act on someone else's reservation.
        handle_postback(&state, Some("U_imposter"), "rt-2", "remind=visit&rid=r2").await;
        assert_eq!(state.db.get_reservation("r2").unwrap().unwrap().status, "scheduled");
    }

    #[test]
    fn guidance_mentions_the_store_phone_when_known() {
        assert!(portal_guidance(Some("03-1234-5678")).contains("03-1234-5678"));
        assert!(portal_guidance(None).contains("マイページ"));
    }
}
