//! LINE message payloads. Typed shapes only — the outbox stores these as
//! JSON and deserializes them back before a retry push.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Text {
        text: String,
    },
    Template {
        #[serde(rename = "altText")]
        alt_text: String,
        template: Template,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Template {
    Buttons {
        text: String,
        actions: Vec<Action>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Postback { label: String, data: String },
}

/// 7-day reminder: actionable, with postback response buttons. Replies for
/// change/cancel are answered with portal guidance by the webhook; the
/// buttons still exist so the customer has a one-tap entry point.
pub fn week_before_reminder(start_text: &str, store_name: &str, reservation_id: &str) -> Message {
    let text = format!(
        "【1週間前リマインド】\n{start_text} に {store_name} のご予約があります。"
    );
    Message::Template {
        alt_text: text.clone(),
        template: Template::Buttons {
            text,
            actions: vec![
                Action::Postback {
                    label: "来店します".into(),
                    data: format!("remind=visit&rid={reservation_id}"),
                },
                Action::Postback {
                    label: "時間を変更したい".into(),
                    data: format!("remind=change&rid={reservation_id}"),
                },
                Action::Postback {
                    label: "キャンセルしたい".into(),
                    data: format!("remind=cancel&rid={reservation_id}"),
                },
            ],
        },
    }
}

/// 1-day reminder: informational only.
pub fn day_before_reminder(start_text: &str, store_name: &str) -> Message {
    Message::Text {
        text: format!(
            "【前日リマインド】\n明日 {start_text} に {store_name} のご予約があります。\n変更・キャンセルはマイページ、またはお電話でお願いします。"
        ),
    }
}

/// Creation-time confirmation. This is the message class that lands in the
/// outbox when the customer has not added the bot as a friend yet.
pub fn reservation_confirmed(
    start_text: &str,
    store_name: &str,
    duration_min: u32,
    note: Option<&str>,
) -> Message {
    let note_line = note.map(|n| format!("\n・備考: {n}")).unwrap_or_default();
    Message::Text {
        text: format!(
            "【予約確定】\n{start_text} に {store_name} のご予約を承りました。\n\n予約内容:\n・時間: {start_text}〜\n・所要時間: {duration_min}分{note_line}\n\nご来店をお待ちしております。"
        ),
    }
}
