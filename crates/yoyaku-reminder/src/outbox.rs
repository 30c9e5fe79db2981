//! Durable holding queue for messages that could not be pushed when they
//! were created — typically a confirmation for a customer who has not added
//! the bot as a friend yet. Drained by a periodic sweep and by the `follow`
//! webhook event.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use yoyaku_db::models::OutboxRow;
use yoyaku_db::{ts, Database};
use yoyaku_line::{Message, PushSender};
use yoyaku_types::api::SweepReport;

pub const BATCH_SIZE: u32 = 50;
/// Entries stay pending (and visible to the sweep) until this many failed
/// attempts, then flip to terminal failed.
pub const MAX_ATTEMPTS: i64 = 8;

/// Parks a message for later delivery.
pub fn enqueue(
    db: &Database,
    line_user_id: &str,
    customer_id: Option<&str>,
    reservation_id: Option<&str>,
    message: &Message,
    now: DateTime<Utc>,
) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    db.enqueue_outbox(
        &Uuid::new_v4().to_string(),
        line_user_id,
        customer_id,
        reservation_id,
        &payload,
        &ts(now),
    )
}

/// Periodic sweep: oldest-first batch of pending entries across all
/// identities. Interleaved enqueues are picked up by the next sweep.
pub async fn sweep<S: PushSender>(
    db: &Arc<Database>,
    sender: &S,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let rows = crate::block(db, |db| db.pending_outbox(BATCH_SIZE)).await?;
    Ok(drain(db, sender, rows, now).await)
}

/// Event-driven drain: the identity became reachable, deliver everything
/// pending for exactly that identity, oldest first.
pub async fn drain_for_user<S: PushSender>(
    db: &Arc<Database>,
    sender: &S,
    line_user_id: &str,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let uid = line_user_id.to_string();
    let rows = crate::block(db, move |db| db.pending_outbox_for_user(&uid)).await?;
    Ok(drain(db, sender, rows, now).await)
}

async fn drain<S: PushSender>(
    db: &Arc<Database>,
    sender: &S,
    rows: Vec<OutboxRow>,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport::default();

    for row in rows {
        match attempt(db, sender, &row, now).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                warn!("outbox {} delivery failed: {}", row.id, e);
                report.failed += 1;
            }
        }
    }

    if report.sent > 0 || report.failed > 0 {
        info!("outbox drain: {} sent, {} failed", report.sent, report.failed);
    }
    report
}

async fn attempt<S: PushSender>(
    db: &Arc<Database>,
    sender: &S,
    row: &OutboxRow,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = row.id.clone();

    let message: Message = match serde_json::from_str(&row.message) {
        Ok(m) => m,
        Err(e) => {
            let error_text = format!("unreadable payload: {e}");
            record_failure(db, id, error_text.clone(), now).await?;
            return Err(anyhow::anyhow!(error_text));
        }
    };

    match sender.push(&row.line_user_id, &[message]).await {
        Ok(()) => {
            crate::block(db, move |db| db.mark_outbox_sent(&id, &ts(now))).await?;
            Ok(())
        }
        Err(push_err) => {
            record_failure(db, id, push_err.to_string(), now).await?;
            Err(push_err)
        }
    }
}

async fn record_failure(
    db: &Arc<Database>,
    id: String,
    error: String,
    now: DateTime<Utc>,
) -> Result<()> {
    crate::block(db, move |db| {
        db.record_outbox_failure(&id, &error, &ts(now), MAX_ATTEMPTS)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{utc, FakeSender};
    use yoyaku_line::messages;

    const NOW: &str = "2025-11-01T00:00:00Z";

    fn setup() -> Arc<Database> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_store("store-1", "Salon A", None, None, None, &ts(utc(NOW))).unwrap();
        db
    }

    fn confirmation() -> Message {
        messages::reservation_confirmed("2025/11/08(土) 10:00", "Salon A", 60, None)
    }

    #[tokio::test]
    async fn sweep_delivers_pending_and_marks_sent() {
        let db = setup();
        enqueue(&db, "U_alpha", None, None, &confirmation(), utc(NOW)).unwrap();
        let sender = FakeSender::default();

        let report = sweep(&db, &sender, utc(NOW)).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 0));
        assert_eq!(sender.pushes().len(), 1);
        assert!(db.pending_outbox(50).unwrap().is_empty());

        // Nothing left for the next sweep.
        let report = sweep(&db, &sender, utc(NOW)).await.unwrap();
        assert_eq!((report.sent, report.failed), (0, 0));
    }

    #[tokio::test]
    async fn failed_delivery_stays_pending_for_the_next_sweep() {
        let db = setup();
        enqueue(&db, "U_alpha", None, None, &confirmation(), utc(NOW)).unwrap();
        let sender = FakeSender::default();
        sender.fail_for("U_alpha");

        let report = sweep(&db, &sender, utc(NOW)).await.unwrap();
        assert_eq!((report.sent, report.failed), (0, 1));

        let rows = db.pending_outbox(50).unwrap();
        assert_eq!(rows.len(), 1, "failure must not hide the entry from the sweep");
        assert_eq!(rows[0].attempts, 1);
        assert!(rows[0].last_error.is_some());

        sender.recover("U_alpha");
        let report = sweep(&db, &sender, utc(NOW)).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 0));
    }

    #[tokio::test]
    async fn follow_drain_is_scoped_to_one_identity_and_fifo() {
        let db = setup();
        enqueue(&db, "U_alpha", None, None, &confirmation(), utc("2025-11-01T00:00:01Z")).unwrap();
        enqueue(&db, "U_beta", None, None, &confirmation(), utc("2025-11-01T00:00:02Z")).unwrap();
        enqueue(&db, "U_alpha", None, None, &confirmation(), utc("2025-11-01T00:00:03Z")).unwrap();
        let sender = FakeSender::default();

        let report = drain_for_user(&db, &sender, "U_alpha", utc(NOW)).await.unwrap();
        assert_eq!((report.sent, report.failed), (2, 0));

        let targets: Vec<String> = sender.pushes().into_iter().map(|(to, _)| to).collect();
        assert_eq!(targets, vec!["U_alpha", "U_alpha"]);

        // U_beta's entry is untouched until its own trigger.
        let remaining = db.pending_outbox(50).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].line_user_id, "U_beta");
    }

    #[tokio::test]
    async fn exhausted_entries_leave_the_sweep() {
        let db = setup();
        enqueue(&db, "U_alpha", None, None, &confirmation(), utc(NOW)).unwrap();
        let sender = FakeSender::default();
        sender.fail_for("U_alpha");

        for _ in 0..MAX_ATTEMPTS {
            sweep(&db, &sender, utc(NOW)).await.unwrap();
        }

        assert!(db.pending_outbox(50).unwrap().is_empty());
        // Even the targeted drain skips terminal entries.
        let report = drain_for_user(&db, &sender, "U_alpha", utc(NOW)).await.unwrap();
        assert_eq!((report.sent, report.failed), (0, 0));
    }

    #[tokio::test]
    async fn unreadable_payload_counts_as_a_failed_attempt() {
        let db = setup();
        db.enqueue_outbox("o1", "U_alpha", None, None, "not json", &ts(utc(NOW))).unwrap();
        let sender = FakeSender::default();

        let report = sweep(&db, &sender, utc(NOW)).await.unwrap();
        assert_eq!((report.sent, report.failed), (0, 1));
        assert!(sender.pushes().is_empty());

        let row = db.get_outbox("o1").unwrap().unwrap();
        assert_eq!(row.attempts, 1);
        assert!(row.last_error.as_deref().unwrap_or_default().contains("unreadable payload"));
    }
}
