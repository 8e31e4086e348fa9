use chrono::NaiveDateTime;
use sqlx::{Executor, Sqlite};
use tracing::warn;

use crate::database;
use crate::error::BookingError;

pub const USER_CONFLICT: &str = "user already has an appointment at this time";
pub const SLOT_TAKEN: &str = "time slot is no longer available";

/// True if `user_id` holds a non-cancelled appointment at exactly
/// `instant` (already in canonical time). Read-only.
///
/// Booking runs this inside its transaction; the unique index on
/// `(user_id, appointment_at)` is what makes the check race-free.
pub async fn user_conflict<'e, E>(
    executor: E,
    user_id: &str,
    instant: NaiveDateTime,
) -> Result<bool, BookingError>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(database::user_has_appointment_at(executor, user_id, instant).await?)
}

/// True if another active appointment already holds this center slot.
pub async fn center_conflict<'e, E>(
    executor: E,
    center_id: &str,
    instant: NaiveDateTime,
) -> Result<bool, BookingError>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(database::center_slot_taken(executor, center_id, instant).await?)
}

/// Maps a failed appointment write to the error the caller sees. Unique
/// index hits mean a concurrent booking won the race.
pub fn classify_write_error(err: sqlx::Error) -> BookingError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            warn!(error = %db, "appointment write lost a uniqueness race");
            if db.message().contains("user_id") {
                BookingError::Conflict(USER_CONFLICT.into())
            } else {
                BookingError::Conflict(SLOT_TAKEN.into())
            }
        }
        _ => BookingError::Storage(err),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::database::NewAppointment;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[tokio::test]
    async fn reports_conflict_only_for_active_bookings_of_that_user() {
        let scheduler = scheduler().await;
        let pool = scheduler.pool();
        let when = at("2030-01-01 10:00");
        assert!(!user_conflict(pool, "u1", when).await.unwrap());

        scheduler.book("u1", &request("2030-01-01T10:00", None)).await.unwrap();

        assert!(user_conflict(pool, "u1", when).await.unwrap());
        assert!(!user_conflict(pool, "u2", when).await.unwrap());
        assert!(!user_conflict(pool, "u1", at("2030-01-01 10:30")).await.unwrap());
        assert!(center_conflict(pool, "c1", when).await.unwrap());
        assert!(!center_conflict(pool, "c1", at("2030-01-01 10:30")).await.unwrap());
    }

    #[tokio::test]
    async fn unique_violations_become_conflicts() {
        let scheduler = scheduler().await;
        let row = |id| NewAppointment {
            id,
            user_id: "u1",
            vaccine_id: "v1",
            center_id: None,
            appointment_at: at("2030-01-01 10:00"),
            notes: None,
            created_at: at("2026-01-01 00:00"),
        };

        database::insert_appointment(scheduler.pool(), &row("a1")).await.unwrap();
        let err = database::insert_appointment(scheduler.pool(), &row("a2"))
            .await
            .unwrap_err();

        match classify_write_error(err) {
            BookingError::Conflict(message) => assert_eq!(message, USER_CONFLICT),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn other_failures_stay_storage_errors() {
        assert!(matches!(
            classify_write_error(sqlx::Error::PoolTimedOut),
            BookingError::Storage(_)
        ));
    }
}
