pub mod dispatch;
pub mod eligibility;
pub mod outbox;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::Result;
use yoyaku_db::Database;

/// Runs a blocking DB closure off the async runtime.
pub(crate) async fn block<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
