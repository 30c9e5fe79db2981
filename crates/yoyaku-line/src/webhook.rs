//! Inbound webhook event shapes. Only the event types this service reacts
//! to are modeled; everything else deserializes to `Other` and is skipped.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookEvent {
    /// Button reply from a reminder template.
    Postback {
        source: EventSource,
        #[serde(rename = "replyToken")]
        reply_token: String,
        postback: Postback,
    },
    /// The user added the bot as a friend — pending outbox messages for
    /// this identity become deliverable.
    Follow { source: EventSource },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct EventSource {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Postback {
    pub data: String,
}

/// Parses `remind=<reply>&rid=<reservation id>` postback data.
pub fn parse_postback_data(data: &str) -> Option<(String, String)> {
    let mut reply = None;
    let mut rid = None;
    for pair in data.split('&') {
        match pair.split_once('=') {
            Some(("remind", v)) => reply = Some(v.to_string()),
            Some(("rid", v)) => rid = Some(v.to_string()),
            _ => {}
        }
    }
    Some((reply?, rid?))
}
