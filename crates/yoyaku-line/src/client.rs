use anyhow::{anyhow, Result};
use serde_json::json;
use tracing::debug;

use crate::messages::Message;

const API_BASE: &str = "https://api.line.me/v2/bot";

/// The push seam. The dispatcher, outbox, and webhook logic are generic over
/// this so tests can inject a recording fake instead of the real API.
pub trait PushSender: Send + Sync {
    /// Delivers messages to one recipient. Only "delivered" vs. an error is
    /// distinguished; the raw error text is persisted for diagnosis.
    fn push(
        &self,
        to: &str,
        messages: &[Message],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub struct LineClient {
    http: reqwest::Client,
    access_token: String,
}

impl LineClient {
    pub fn new(access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let res = self
            .http
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(anyhow!("LINE API {path} failed: {status} {detail}"));
        }
        Ok(())
    }

    /// Replies to a webhook event with its single-use reply token.
    pub async fn reply(&self, reply_token: &str, messages: &[Message]) -> Result<()> {
        debug!("LINE reply via token");
        self.post("/message/reply", json!({ "replyToken": reply_token, "messages": messages }))
            .await
    }
}

impl PushSender for LineClient {
    fn push(
        &self,
        to: &str,
        messages: &[Message],
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            debug!("LINE push to {}", to);
            self.post("/message/push", json!({ "to": to, "messages": messages }))
                .await
        }
    }
}
