//! Per-item reminder delivery. One failing recipient never aborts the
//! batch; the aggregate report is the only batch-level result.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use yoyaku_db::{ts, Database};
use yoyaku_line::messages;
use yoyaku_line::PushSender;
use yoyaku_types::api::SweepReport;
use yoyaku_types::models::{ReminderChannel, ReminderKind};

use crate::eligibility::{self, DueReminder};
use crate::{block, time};

/// One full sweep: read the due list (fatal on failure, nothing has been
/// mutated yet), then dispatch each item fail-soft.
pub async fn run_reminder_sweep<S: PushSender>(
    db: &Arc<Database>,
    sender: &S,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let items = block(db, move |db| eligibility::due_reminders(db, now)).await?;
    Ok(dispatch_all(db, sender, items, now).await)
}

pub async fn dispatch_all<S: PushSender>(
    db: &Arc<Database>,
    sender: &S,
    items: Vec<DueReminder>,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport::default();

    for item in items {
        match dispatch_one(db, sender, &item, now).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                warn!(
                    "reminder {} for reservation {} failed: {}",
                    item.kind.as_str(),
                    item.reservation_id,
                    e
                );
                report.failed += 1;
            }
        }
    }

    info!("reminder sweep done: {} sent, {} failed", report.sent, report.failed);
    report
}

async fn dispatch_one<S: PushSender>(
    db: &Arc<Database>,
    sender: &S,
    item: &DueReminder,
    now: DateTime<Utc>,
) -> Result<()> {
    let start_text = time::format_jst(item.start_at);
    let message = match item.kind {
        ReminderKind::SevenDaysBefore => {
            messages::week_before_reminder(&start_text, &item.store_name, &item.reservation_id)
        }
        ReminderKind::OneDayBefore => messages::day_before_reminder(&start_text, &item.store_name),
    };

    let channel = ReminderChannel::Line;
    let reservation_id = item.reservation_id.clone();
    let kind = item.kind;

    match sender.push(&item.line_user_id, &[message]).await {
        Ok(()) => {
            block(db, move |db| {
                db.record_reminder_sent(
                    &Uuid::new_v4().to_string(),
                    &reservation_id,
                    kind.as_str(),
                    channel.as_str(),
                    &ts(now),
                )
            })
            .await?;
            Ok(())
        }
        Err(push_err) => {
            let error_text = push_err.to_string();
            if let Err(log_err) = block(db, move |db| {
                db.record_reminder_failure(
                    &Uuid::new_v4().to_string(),
                    &reservation_id,
                    kind.as_str(),
                    channel.as_str(),
                    &error_text,
                    &ts(now),
                )
            })
            .await
            {
                warn!("could not record reminder failure: {}", log_err);
            }
            Err(push_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{utc, FakeSender};
    use yoyaku_db::Database;

    // Fixture: reservation starting 2025-11-08T10:00 JST.
    const START_JST_UTC: &str = "2025-11-07T15:30:00Z"; // 00:30 JST on Nov 8
    const SEVEN_DAYS_OUT: &str = "2025-11-01T00:00:00Z"; // 09:00 JST on Nov 1
    const ONE_DAY_OUT: &str = "2025-11-07T00:00:00Z"; // 09:00 JST on Nov 7

    fn setup() -> Arc<Database> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let now = ts(utc(SEVEN_DAYS_OUT));
        db.create_store("store-1", "Salon A", None, None, None, &now).unwrap();
        db
    }

    fn add_linked_reservation(db: &Database, id: &str, customer: &str, line_id: &str, start: &str) {
        let now = ts(utc(SEVEN_DAYS_OUT));
        db.create_customer(customer, "客", None, Some(line_id), &now).unwrap();
        db.create_reservation(id, "store-1", Some(customer), start, start, 60, None, &now).unwrap();
    }

    #[tokio::test]
    async fn sweep_sends_once_and_is_idempotent_across_runs() {
        let db = setup();
        add_linked_reservation(&db, "r1", "c1", "U_alpha", START_JST_UTC);
        let sender = FakeSender::default();

        let first = run_reminder_sweep(&db, &sender, utc(SEVEN_DAYS_OUT)).await.unwrap();
        assert_eq!((first.sent, first.failed), (1, 0));

        let second = run_reminder_sweep(&db, &sender, utc(SEVEN_DAYS_OUT)).await.unwrap();
        assert_eq!((second.sent, second.failed), (0, 0), "second run must exclude the sent item");

        assert_eq!(sender.pushes().len(), 1);
        let logs = db.reminder_logs_for_reservation("r1").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "sent");
        assert_eq!(logs[0].kind, "7d_before");
    }

    #[tokio::test]
    async fn kinds_fire_only_inside_their_own_civil_day() {
        let db = setup();
        add_linked_reservation(&db, "r1", "c1", "U_alpha", START_JST_UTC);
        let sender = FakeSender::default();

        // D-8, D-6, D-2 and D itself: nothing is due.
        for now in ["2025-10-31T00:00:00Z", "2025-11-02T00:00:00Z", "2025-11-06T00:00:00Z", "2025-11-08T00:00:00Z"] {
            let report = run_reminder_sweep(&db, &sender, utc(now)).await.unwrap();
            assert_eq!((report.sent, report.failed), (0, 0), "unexpected send at {now}");
        }

        // D-7 fires the 7-day reminder, D-1 the 1-day one; both may fire
        // for the same reservation on their respective days.
        let report = run_reminder_sweep(&db, &sender, utc(SEVEN_DAYS_OUT)).await.unwrap();
        assert_eq!(report.sent, 1);
        let report = run_reminder_sweep(&db, &sender, utc(ONE_DAY_OUT)).await.unwrap();
        assert_eq!(report.sent, 1);

        let logs = db.reminder_logs_for_reservation("r1").unwrap();
        let mut kinds: Vec<&str> = logs.iter().map(|l| l.kind.as_str()).collect();
        kinds.sort();
        assert_eq!(kinds, vec!["1d_before", "7d_before"]);
    }

    #[tokio::test]
    async fn boundary_minute_before_the_window_does_not_fire() {
        let db = setup();
        add_linked_reservation(&db, "r1", "c1", "U_alpha", START_JST_UTC);
        let sender = FakeSender::default();

        // 2025-10-31T23:59 JST is still civil day Oct 31; Nov 8 is 8 days out.
        let report = run_reminder_sweep(&db, &sender, utc("2025-10-31T14:59:00Z")).await.unwrap();
        assert_eq!(report.sent, 0);

        // One minute later it is Nov 1 in JST and the 7-day reminder fires.
        let report = run_reminder_sweep(&db, &sender, utc("2025-10-31T15:00:00Z")).await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_abort_the_batch() {
        let db = setup();
        add_linked_reservation(&db, "r1", "c1", "U_alpha", "2025-11-07T15:00:00Z");
        add_linked_reservation(&db, "r2", "c2", "U_broken", "2025-11-07T16:00:00Z");
        add_linked_reservation(&db, "r3", "c3", "U_gamma", "2025-11-07T17:00:00Z");
        let sender = FakeSender::default();
        sender.fail_for("U_broken");

        let report = run_reminder_sweep(&db, &sender, utc(SEVEN_DAYS_OUT)).await.unwrap();
        assert_eq!((report.sent, report.failed), (2, 1));

        let logs = db.reminder_logs_for_reservation("r2").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "failed");
        assert!(logs[0].error.is_some());
    }

    #[tokio::test]
    async fn failed_item_is_retried_and_history_is_kept() {
        let db = setup();
        add_linked_reservation(&db, "r1", "c1", "U_alpha", START_JST_UTC);
        let sender = FakeSender::default();
        sender.fail_for("U_alpha");

        let report = run_reminder_sweep(&db, &sender, utc(SEVEN_DAYS_OUT)).await.unwrap();
        assert_eq!((report.sent, report.failed), (0, 1));

        // The failure does not gate eligibility; the next sweep retries and
        // succeeds, leaving one sent row next to the failure history.
        sender.recover("U_alpha");
        let report = run_reminder_sweep(&db, &sender, utc(SEVEN_DAYS_OUT)).await.unwrap();
        assert_eq!((report.sent, report.failed), (1, 0));

        let logs = db.reminder_logs_for_reservation("r1").unwrap();
        let statuses: Vec<&str> = logs.iter().map(|l| l.status.as_str()).collect();
        assert_eq!(logs.len(), 2);
        assert!(statuses.contains(&"sent") && statuses.contains(&"failed"));
    }

    #[tokio::test]
    async fn unlinked_and_inactive_reservations_are_skipped() {
        let db = setup();
        let now = ts(utc(SEVEN_DAYS_OUT));
        // Customer with no LINE identity.
        db.create_customer("c1", "客", None, None, &now).unwrap();
        db.create_reservation("r1", "store-1", Some("c1"), START_JST_UTC, START_JST_UTC, 60, None, &now)
            .unwrap();
        // Cancelled reservation with a linked customer.
        db.create_customer("c2", "客", None, Some("U_alpha"), &now).unwrap();
        db.create_reservation("r2", "store-1", Some("c2"), "2025-11-07T16:00:00Z", "2025-11-07T17:00:00Z", 60, None, &now)
            .unwrap();
        db.update_reservation_status("r2", "cancelled").unwrap();

        let sender = FakeSender::default();
        let report = run_reminder_sweep(&db, &sender, utc(SEVEN_DAYS_OUT)).await.unwrap();
        assert_eq!((report.sent, report.failed), (0, 0));
        assert!(sender.pushes().is_empty());
    }
}
