use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::conflict::{
    center_conflict, classify_write_error, user_conflict, SLOT_TAKEN, USER_CONFLICT,
};
use super::{not_found, Scheduler};
use crate::database::{self, NewAppointment};
use crate::error::BookingError;
use crate::models::AppointmentDetails;

/// Booking payload. The caller's identity comes from the session, never
/// from the body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub vaccine_id: Option<String>,
    pub center_id: Option<String>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub notes: Option<String>,
}

fn present<'a>(value: Option<&'a str>) -> Option<&'a str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Scheduler {
    /// Books `request` for `user_id` and returns the stored appointment
    /// joined with vaccine and user names.
    ///
    /// Checks run in this order and the first failure wins: required
    /// fields, instant strictly in the future, vaccine exists, center (if
    /// any) exists, no active booking for the user at that instant, center
    /// slot still free. Everything after the future check runs in one
    /// write transaction with the insert, so overlapping bookings are
    /// serialised by SQLite.
    pub async fn book(
        &self,
        user_id: &str,
        request: &BookingRequest,
    ) -> Result<AppointmentDetails, BookingError> {
        let vaccine_id = present(request.vaccine_id.as_deref())
            .ok_or_else(|| BookingError::validation("vaccineId", "Vaccine is required"))?;
        let date = present(request.appointment_date.as_deref()).ok_or_else(|| {
            BookingError::validation("appointmentDate", "Appointment date is required")
        })?;

        let instant = self
            .time()
            .resolve_instant(date, request.appointment_time.as_deref())?;
        if !self.time().is_future(instant) {
            return Err(BookingError::validation(
                "appointmentDate",
                "appointment date must be in the future",
            ));
        }

        let center_id = present(request.center_id.as_deref());
        let notes = present(request.notes.as_deref());

        // Take the write lock up front so concurrent bookings queue on the
        // busy timeout instead of failing a read-to-write upgrade.
        let mut tx = self.pool().begin_with("BEGIN IMMEDIATE").await?;

        if database::find_vaccine(&mut *tx, vaccine_id).await?.is_none() {
            return Err(BookingError::NotFound(format!(
                "Vaccine '{vaccine_id}' not found"
            )));
        }
        if let Some(center_id) = center_id {
            if database::find_center(&mut *tx, center_id).await?.is_none() {
                return Err(BookingError::NotFound(format!(
                    "Center '{center_id}' not found"
                )));
            }
        }
        if database::find_user(&mut *tx, user_id).await?.is_none() {
            return Err(BookingError::NotFound(format!("User '{user_id}' not found")));
        }

        if user_conflict(&mut *tx, user_id, instant).await? {
            info!(user_id, %instant, "rejected double booking");
            return Err(BookingError::Conflict(USER_CONFLICT.into()));
        }
        if let Some(center_id) = center_id {
            if center_conflict(&mut *tx, center_id, instant).await? {
                info!(center_id, %instant, "rejected booking for a taken slot");
                return Err(BookingError::Conflict(SLOT_TAKEN.into()));
            }
        }

        let id = Uuid::new_v4().to_string();
        database::insert_appointment(
            &mut *tx,
            &NewAppointment {
                id: &id,
                user_id,
                vaccine_id,
                center_id,
                appointment_at: instant,
                notes,
                created_at: self.time().now_local(),
            },
        )
        .await
        .map_err(classify_write_error)?;
        tx.commit().await.map_err(classify_write_error)?;

        info!(appointment_id = %id, user_id, %instant, "appointment booked");

        database::appointment_details(self.pool(), &id)
            .await?
            .ok_or_else(|| not_found(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::AppointmentStatus;

    async fn row_count(scheduler: &Scheduler) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM appointments")
            .fetch_one(scheduler.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn booking_returns_scheduled_joined_record() {
        let scheduler = scheduler().await;
        let mut req = request("2030-01-01T10:00", None);
        req.notes = Some("  first dose ".into());

        let booked = scheduler.book("u1", &req).await.unwrap();

        assert_eq!(booked.status, AppointmentStatus::Scheduled);
        assert_eq!(booked.user_id, "u1");
        assert_eq!(booked.vaccine_name, "Covax");
        assert_eq!(booked.vaccine_manufacturer, "Acme Biologics");
        assert_eq!(booked.user_name, "User u1");
        assert_eq!(booked.user_email, "u1@example.com");
        assert_eq!(booked.center_id.as_deref(), Some("c1"));
        assert_eq!(booked.notes.as_deref(), Some("first dose"));
        assert_eq!(
            booked.appointment_instant.format("%Y-%m-%d %H:%M").to_string(),
            "2030-01-01 10:00"
        );
    }

    #[tokio::test]
    async fn same_user_same_instant_conflicts() {
        let scheduler = scheduler().await;
        scheduler.book("u1", &request("2030-01-01T10:00", None)).await.unwrap();

        let mut again = request("2030-01-01", Some("10:00"));
        again.center_id = None;
        let err = scheduler.book("u1", &again).await.unwrap_err();

        match err {
            BookingError::Conflict(message) => assert_eq!(message, USER_CONFLICT),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(row_count(&scheduler).await, 1);
    }

    #[tokio::test]
    async fn taken_center_slot_conflicts_for_other_users() {
        let scheduler = scheduler().await;
        scheduler.book("u1", &request("2030-01-01T10:00", None)).await.unwrap();

        let err = scheduler
            .book("u2", &request("2030-01-01T10:00", None))
            .await
            .unwrap_err();
        match err {
            BookingError::Conflict(message) => assert_eq!(message, SLOT_TAKEN),
            other => panic!("expected conflict, got {other:?}"),
        }

        // Without a center the user is free to book the same instant.
        let mut walk_in = request("2030-01-01T10:00", None);
        walk_in.center_id = None;
        scheduler.book("u2", &walk_in).await.unwrap();
    }

    #[tokio::test]
    async fn past_dates_fail_validation_without_writing() {
        let scheduler = scheduler().await;

        for date in ["2000-01-01", "2026-01-01T08:00", "2026-01-01T07:59"] {
            let err = scheduler.book("u1", &request(date, None)).await.unwrap_err();
            match err {
                BookingError::Validation { message, .. } => {
                    assert_eq!(message, "appointment date must be in the future")
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }
        assert_eq!(row_count(&scheduler).await, 0);
    }

    #[tokio::test]
    async fn missing_fields_fail_before_anything_else() {
        let scheduler = scheduler().await;

        let mut no_vaccine = request("2000-01-01", None);
        no_vaccine.vaccine_id = Some("   ".into());
        let err = scheduler.book("u1", &no_vaccine).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation { field: Some("vaccineId"), .. }));

        let mut no_date = request("2030-01-01", None);
        no_date.appointment_date = None;
        let err = scheduler.book("u1", &no_date).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Validation { field: Some("appointmentDate"), .. }
        ));
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let scheduler = scheduler().await;

        let mut unknown_vaccine = request("2030-01-01T10:00", None);
        unknown_vaccine.vaccine_id = Some("missing".into());
        let err = scheduler.book("u1", &unknown_vaccine).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(ref m) if m.contains("Vaccine")));

        let mut unknown_center = request("2030-01-01T10:00", None);
        unknown_center.center_id = Some("missing".into());
        let err = scheduler.book("u1", &unknown_center).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(ref m) if m.contains("Center")));

        let err = scheduler
            .book("ghost", &request("2030-01-01T10:00", None))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound(ref m) if m.contains("User")));

        assert_eq!(row_count(&scheduler).await, 0);
    }

    #[tokio::test]
    async fn past_date_wins_over_unknown_vaccine() {
        let scheduler = scheduler().await;
        let mut req = request("2000-01-01", None);
        req.vaccine_id = Some("missing".into());

        let err = scheduler.book("u1", &req).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation { .. }));
    }

    async fn book_concurrently(
        scheduler: &Scheduler,
        dates: Vec<String>,
    ) -> Vec<Result<AppointmentDetails, BookingError>> {
        let handles: Vec<_> = dates
            .into_iter()
            .map(|date| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.book("u1", &request(&date, None)).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_bookings_for_one_instant_yield_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = file_scheduler(dir.path()).await;

        for hour in 10..15 {
            let date = format!("2030-01-01T{hour}:00");
            let results = book_concurrently(&scheduler, vec![date; 5]).await;

            let booked = results.iter().filter(|r| r.is_ok()).count();
            let conflicts = results
                .iter()
                .filter(|r| matches!(r, Err(BookingError::Conflict(_))))
                .count();
            assert_eq!(booked, 1, "{results:?}");
            assert_eq!(conflicts, 4, "{results:?}");
        }

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM appointments WHERE status <> 'cancelled' \
             GROUP BY user_id, appointment_at ORDER BY COUNT(*) DESC LIMIT 1",
        )
        .fetch_one(scheduler.pool())
        .await
        .unwrap();
        assert_eq!(active, 1);
        assert_eq!(row_count(&scheduler).await, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_bookings_for_distinct_instants_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = file_scheduler(dir.path()).await;

        let dates = (10..15).map(|hour| format!("2030-01-02T{hour}:00")).collect();
        let results = book_concurrently(&scheduler, dates).await;

        assert!(results.iter().all(|r| r.is_ok()), "{results:?}");
        assert_eq!(row_count(&scheduler).await, 5);
    }

    #[tokio::test]
    async fn rebooking_after_cancellation_succeeds() {
        let scheduler = scheduler().await;
        let first = scheduler.book("u1", &request("2030-01-01T10:00", None)).await.unwrap();
        scheduler
            .transition(
                &identity("u1", crate::models::Role::User),
                &first.id,
                AppointmentStatus::Cancelled,
            )
            .await
            .unwrap();

        let second = scheduler.book("u1", &request("2030-01-01T10:00", None)).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(row_count(&scheduler).await, 2);
    }
}
