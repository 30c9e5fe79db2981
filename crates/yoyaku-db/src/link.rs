//! Link confirmation: binds a LINE identity to a reservation's customer,
//! merging duplicate customer records when the same identity resurfaces.
//! Runs as one SQLite transaction; the UNIQUE index on
//! `customers.line_user_id` is the cross-process guard.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use thiserror::Error;
use uuid::Uuid;

use crate::queries::{query_reservation, OptionalExt};
use crate::{parse_ts, ts, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// The reservation was already linked. Confirming again is a no-op
    /// success, absorbing double-submits from flaky clients.
    AlreadyLinked,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("reservation not found")]
    ReservationNotFound,
    #[error("invalid link token")]
    InvalidToken,
    #[error("link token expired")]
    TokenExpired,
    /// The identity is already bound to a different customer than the one
    /// this reservation points at, or a concurrent confirmation won the
    /// uniqueness race. Reported to the caller, never silently resolved.
    #[error("LINE account already linked to a different customer")]
    IdentityConflict,
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for LinkError {
    fn from(e: rusqlite::Error) -> Self {
        // The only UNIQUE column touched in this path is
        // customers.line_user_id, so a constraint violation here is always
        // an identity conflict.
        if let rusqlite::Error::SqliteFailure(f, _) = &e {
            if f.code == rusqlite::ErrorCode::ConstraintViolation {
                return LinkError::IdentityConflict;
            }
        }
        LinkError::Db(e.into())
    }
}

impl Database {
    pub fn confirm_link(
        &self,
        reservation_id: &str,
        token: &str,
        line_user_id: &str,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome, LinkError> {
        let res = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let out = run_confirm(&tx, reservation_id, token, line_user_id, display_name, now);
            if out.is_ok() {
                tx.commit()?;
            }
            // On error the transaction rolls back on drop; preconditions
            // never mutate state.
            Ok(out)
        });
        match res {
            Ok(out) => out,
            Err(e) => Err(LinkError::Db(e)),
        }
    }
}

fn run_confirm(
    tx: &Transaction<'_>,
    reservation_id: &str,
    token: &str,
    line_user_id: &str,
    display_name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<LinkOutcome, LinkError> {
    let reservation =
        query_reservation(tx, reservation_id)?.ok_or(LinkError::ReservationNotFound)?;

    if reservation.link_status.as_deref() == Some("linked") {
        return Ok(LinkOutcome::AlreadyLinked);
    }

    if reservation.link_token.as_deref() != Some(token) {
        return Err(LinkError::InvalidToken);
    }
    let expires_at = reservation
        .link_expires_at
        .as_deref()
        .map(parse_ts)
        .transpose()?
        .ok_or(LinkError::TokenExpired)?;
    if expires_at <= now {
        return Err(LinkError::TokenExpired);
    }

    let bound_customer: Option<String> = tx
        .query_row(
            "SELECT id FROM customers WHERE line_user_id = ?1",
            [line_user_id],
            |row| row.get(0),
        )
        .optional()?;

    match bound_customer {
        // The identity already has a customer record; it is authoritative.
        Some(existing_id) => {
            if reservation.customer_id.as_deref() != Some(existing_id.as_str()) {
                tx.execute(
                    "UPDATE reservations SET customer_id = ?2 WHERE id = ?1",
                    (reservation_id, &existing_id),
                )?;
                if let Some(previous_id) = &reservation.customer_id {
                    delete_if_orphan(tx, previous_id)?;
                }
            }
        }
        None => match &reservation.customer_id {
            Some(customer_id) => {
                let current_identity: Option<String> = tx
                    .query_row(
                        "SELECT line_user_id FROM customers WHERE id = ?1",
                        [customer_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| {
                        LinkError::Db(anyhow::anyhow!("customer {} missing", customer_id))
                    })?;

                match current_identity.as_deref() {
                    None => {
                        // UNIQUE index turns a concurrent claim of the same
                        // identity into IdentityConflict via From.
                        tx.execute(
                            "UPDATE customers SET line_user_id = ?2 WHERE id = ?1",
                            (customer_id, line_user_id),
                        )?;
                    }
                    Some(existing) if existing != line_user_id => {
                        return Err(LinkError::IdentityConflict);
                    }
                    Some(_) => {}
                }
            }
            None => {
                let customer_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO customers (id, display_name, line_user_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    (
                        &customer_id,
                        display_name.unwrap_or("LINEのお客様"),
                        line_user_id,
                        ts(now),
                    ),
                )?;
                tx.execute(
                    "UPDATE reservations SET customer_id = ?2 WHERE id = ?1",
                    (reservation_id, &customer_id),
                )?;
            }
        },
    }

    // Single-use token: cleared on the terminal transition to linked.
    tx.execute(
        "UPDATE reservations SET link_status = 'linked', link_token = NULL WHERE id = ?1",
        [reservation_id],
    )?;

    Ok(LinkOutcome::Linked)
}

/// Deletes the customer left behind by a reassignment, but only when no
/// other reservation references it and it has no identity of its own.
fn delete_if_orphan(tx: &Transaction<'_>, customer_id: &str) -> Result<(), LinkError> {
    let identity: Option<Option<String>> = tx
        .query_row(
            "SELECT line_user_id FROM customers WHERE id = ?1",
            [customer_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(identity) = identity else {
        return Ok(());
    };
    if identity.is_some() {
        return Ok(());
    }

    let remaining: i64 = tx.query_row(
        "SELECT COUNT(*) FROM reservations WHERE customer_id = ?1",
        [customer_id],
        |row| row.get(0),
    )?;
    if remaining == 0 {
        tx.execute("DELETE FROM customers WHERE id = ?1", [customer_id])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> (Database, DateTime<Utc>) {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.create_store("store-1", "Salon A", Some("03-0000-0000"), None, None, &ts(now))
            .unwrap();
        (db, now)
    }

    fn add_reservation(db: &Database, id: &str, customer_id: Option<&str>, start: &str, now: DateTime<Utc>) {
        db.create_reservation(id, "store-1", customer_id, start, start, 60, None, &ts(now))
            .unwrap();
    }

    fn issue_token(db: &Database, reservation_id: &str, token: &str, now: DateTime<Utc>) {
        db.set_link_token(reservation_id, token, "https://liff.example/link", &ts(now + Duration::hours(24)))
            .unwrap();
    }

    #[test]
    fn confirm_attaches_identity_to_unbound_customer() {
        let (db, now) = setup();
        db.create_customer("c1", "山田", None, None, &ts(now)).unwrap();
        add_reservation(&db, "r1", Some("c1"), "2025-11-08T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        let out = db.confirm_link("r1", "tok-1", "U_alpha", None, now).unwrap();
        assert_eq!(out, LinkOutcome::Linked);

        let customer = db.get_customer("c1").unwrap().unwrap();
        assert_eq!(customer.line_user_id.as_deref(), Some("U_alpha"));
        let reservation = db.get_reservation("r1").unwrap().unwrap();
        assert_eq!(reservation.link_status.as_deref(), Some("linked"));
        assert!(reservation.link_token.is_none(), "token must be single-use");
    }

    #[test]
    fn confirm_is_idempotent_after_linking() {
        let (db, now) = setup();
        db.create_customer("c1", "山田", None, None, &ts(now)).unwrap();
        add_reservation(&db, "r1", Some("c1"), "2025-11-08T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        assert_eq!(db.confirm_link("r1", "tok-1", "U_alpha", None, now).unwrap(), LinkOutcome::Linked);
        // The token is gone, but a repeat confirm still succeeds.
        assert_eq!(
            db.confirm_link("r1", "tok-1", "U_alpha", None, now).unwrap(),
            LinkOutcome::AlreadyLinked
        );
    }

    #[test]
    fn invalid_and_expired_tokens_do_not_mutate() {
        let (db, now) = setup();
        db.create_customer("c1", "山田", None, None, &ts(now)).unwrap();
        add_reservation(&db, "r1", Some("c1"), "2025-11-08T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        assert!(matches!(
            db.confirm_link("r1", "wrong", "U_alpha", None, now),
            Err(LinkError::InvalidToken)
        ));
        assert!(matches!(
            db.confirm_link("r1", "tok-1", "U_alpha", None, now + Duration::hours(25)),
            Err(LinkError::TokenExpired)
        ));

        let reservation = db.get_reservation("r1").unwrap().unwrap();
        assert_eq!(reservation.link_status.as_deref(), Some("pending"));
        assert_eq!(reservation.link_token.as_deref(), Some("tok-1"));
        let customer = db.get_customer("c1").unwrap().unwrap();
        assert!(customer.line_user_id.is_none());
    }

    #[test]
    fn known_identity_wins_and_orphan_is_merged_away() {
        let (db, now) = setup();
        // C1 is the real customer, already bound to the identity.
        db.create_customer("c1", "佐藤", None, Some("U_alpha"), &ts(now)).unwrap();
        // C2 is a walk-in duplicate with no identity and only this reservation.
        db.create_customer("c2", "サトウ様", None, None, &ts(now)).unwrap();
        add_reservation(&db, "r1", Some("c2"), "2025-11-08T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        db.confirm_link("r1", "tok-1", "U_alpha", None, now).unwrap();

        let reservation = db.get_reservation("r1").unwrap().unwrap();
        assert_eq!(reservation.customer_id.as_deref(), Some("c1"));
        assert!(db.get_customer("c2").unwrap().is_none(), "orphan duplicate should be deleted");
    }

    #[test]
    fn previous_customer_survives_when_still_referenced() {
        let (db, now) = setup();
        db.create_customer("c1", "佐藤", None, Some("U_alpha"), &ts(now)).unwrap();
        db.create_customer("c2", "サトウ様", None, None, &ts(now)).unwrap();
        add_reservation(&db, "r1", Some("c2"), "2025-11-08T01:00:00Z", now);
        add_reservation(&db, "r2", Some("c2"), "2025-11-09T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        db.confirm_link("r1", "tok-1", "U_alpha", None, now).unwrap();

        assert_eq!(db.get_reservation("r1").unwrap().unwrap().customer_id.as_deref(), Some("c1"));
        // r2 still points at c2, so c2 must survive.
        assert!(db.get_customer("c2").unwrap().is_some());
        assert_eq!(db.get_reservation("r2").unwrap().unwrap().customer_id.as_deref(), Some("c2"));
    }

    #[test]
    fn previous_customer_with_own_identity_is_never_deleted() {
        let (db, now) = setup();
        db.create_customer("c1", "佐藤", None, Some("U_alpha"), &ts(now)).unwrap();
        db.create_customer("c2", "鈴木", None, Some("U_beta"), &ts(now)).unwrap();
        add_reservation(&db, "r1", Some("c2"), "2025-11-08T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        db.confirm_link("r1", "tok-1", "U_alpha", None, now).unwrap();

        assert_eq!(db.get_reservation("r1").unwrap().unwrap().customer_id.as_deref(), Some("c1"));
        assert!(db.get_customer("c2").unwrap().is_some());
    }

    #[test]
    fn conflicting_identity_on_existing_customer_is_rejected() {
        let (db, now) = setup();
        db.create_customer("c1", "佐藤", None, Some("U_beta"), &ts(now)).unwrap();
        add_reservation(&db, "r1", Some("c1"), "2025-11-08T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        // No customer holds U_alpha, but c1 is already bound to U_beta.
        assert!(matches!(
            db.confirm_link("r1", "tok-1", "U_alpha", None, now),
            Err(LinkError::IdentityConflict)
        ));
        // Nothing moved.
        let customer = db.get_customer("c1").unwrap().unwrap();
        assert_eq!(customer.line_user_id.as_deref(), Some("U_beta"));
        assert_eq!(db.get_reservation("r1").unwrap().unwrap().link_status.as_deref(), Some("pending"));
    }

    #[test]
    fn creates_customer_when_reservation_has_none() {
        let (db, now) = setup();
        add_reservation(&db, "r1", None, "2025-11-08T01:00:00Z", now);
        issue_token(&db, "r1", "tok-1", now);

        db.confirm_link("r1", "tok-1", "U_alpha", Some("田中"), now).unwrap();

        let reservation = db.get_reservation("r1").unwrap().unwrap();
        let customer_id = reservation.customer_id.expect("customer should be created");
        let customer = db.get_customer(&customer_id).unwrap().unwrap();
        assert_eq!(customer.display_name, "田中");
        assert_eq!(customer.line_user_id.as_deref(), Some("U_alpha"));
    }
}
