//! Shared test helpers: a recording fake push sender and timestamp parsing.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use yoyaku_line::{Message, PushSender};

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Records every push; fails deliveries to the identities in `fail_for`.
#[derive(Default)]
pub struct FakeSender {
    pushes: Mutex<Vec<(String, Vec<Message>)>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeSender {
    pub fn fail_for(&self, line_user_id: &str) {
        self.failing.lock().unwrap().insert(line_user_id.to_string());
    }

    pub fn recover(&self, line_user_id: &str) {
        self.failing.lock().unwrap().remove(line_user_id);
    }

    pub fn pushes(&self) -> Vec<(String, Vec<Message>)> {
        self.pushes.lock().unwrap().clone()
    }
}

impl PushSender for FakeSender {
    fn push(
        &self,
        to: &str,
        messages: &[Message],
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        let result = if self.failing.lock().unwrap().contains(to) {
            Err(anyhow!("user {} has not added this bot as a friend", to))
        } else {
            self.pushes.lock().unwrap().push((to.to_string(), messages.to_vec()));
            Ok(())
        };
        async move { result }
    }
}
