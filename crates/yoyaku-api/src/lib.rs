pub mod auth;
pub mod cron;
pub mod customers;
pub mod liff;
pub mod link;
pub mod middleware;
pub mod reminders;
pub mod reservations;
pub mod stores;
pub mod webhook;

use std::sync::Arc;

use axum::http::StatusCode;
use yoyaku_db::Database;
use yoyaku_line::LineClient;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub line: LineClient,
    pub config: ApiConfig,
}

#[derive(Clone)]
pub struct ApiConfig {
    pub jwt_secret: String,
    pub channel_secret: String,
    pub liff_id: String,
    /// Shared secret for the external cron trigger endpoints. When unset,
    /// those endpoints refuse all callers; the in-process interval sweeps
    /// keep running either way.
    pub cron_secret: Option<String>,
}

/// Runs a blocking DB closure off the async runtime.
pub(crate) async fn block<T, F>(state: &AppState, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}

pub(crate) fn internal(err: anyhow::Error) -> StatusCode {
    tracing::error!("internal error: {:#}", err);
    StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        line: LineClient::new("test-access-token".into()),
        config: ApiConfig {
            jwt_secret: "test-jwt-secret".into(),
            channel_secret: "test-channel-secret".into(),
            liff_id: "liff-test".into(),
            cron_secret: Some("test-cron-secret".into()),
        },
    })
}
