pub mod booking;
pub mod conflict;
pub mod slot_utils;
pub mod status;

use chrono::NaiveTime;
use sqlx::SqlitePool;
use tracing::debug;

use crate::auth::Identity;
use crate::clock::{parse_date, ServiceTime};
use crate::database;
use crate::error::BookingError;
use crate::models::{AppointmentDetails, AppointmentStatus, Center};

pub use booking::BookingRequest;
pub use slot_utils::{available_slots, generate_slots, slot_label};

/// Entry point for every scheduling operation. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    pool: SqlitePool,
    time: ServiceTime,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, time: ServiceTime) -> Self {
        Self { pool, time }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn time(&self) -> &ServiceTime {
        &self.time
    }

    /// Open slot start times for `center_id` on `date` (`YYYY-MM-DD`).
    ///
    /// Advisory only: a slot listed here can still be lost to a concurrent
    /// booking, which then fails with a conflict. On today's date, slots
    /// that have already started are left out.
    pub async fn open_slots(
        &self,
        center_id: &str,
        date: &str,
    ) -> Result<(Center, Vec<NaiveTime>), BookingError> {
        let center_id = center_id.trim();
        if center_id.is_empty() {
            return Err(BookingError::validation("centerId", "Center is required"));
        }
        let day = parse_date(date)?;

        let center = database::find_center(&self.pool, center_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("Center '{center_id}' not found")))?;

        let booked = database::booked_times(&self.pool, center_id, day).await?;
        let mut open = available_slots(
            generate_slots(center.opening_time, center.closing_time),
            &booked,
        );

        if day <= self.time.today() {
            open.retain(|slot| self.time.is_future(day.and_time(*slot)));
        }

        debug!(center_id, %day, booked = booked.len(), open = open.len(), "computed open slots");
        Ok((center, open))
    }

    pub async fn appointment(
        &self,
        actor: &Identity,
        appointment_id: &str,
    ) -> Result<AppointmentDetails, BookingError> {
        let details = database::appointment_details(&self.pool, appointment_id)
            .await?
            .ok_or_else(|| not_found(appointment_id))?;

        if !actor.role.is_privileged() && details.user_id != actor.user_id {
            return Err(BookingError::Forbidden(
                "You can only view your own appointments".into(),
            ));
        }
        Ok(details)
    }

    pub async fn appointments_for(
        &self,
        actor: &Identity,
    ) -> Result<Vec<AppointmentDetails>, BookingError> {
        Ok(database::list_appointments(&self.pool, Some(&actor.user_id), None).await?)
    }

    pub async fn all_appointments(
        &self,
        actor: &Identity,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<AppointmentDetails>, BookingError> {
        if !actor.role.is_privileged() {
            return Err(BookingError::Forbidden(
                "Only staff can list all appointments".into(),
            ));
        }
        Ok(database::list_appointments(&self.pool, None, status).await?)
    }
}

pub(crate) fn not_found(appointment_id: &str) -> BookingError {
    BookingError::NotFound(format!("Appointment '{appointment_id}' not found"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::*;
    use crate::clock::{parse_utc_offset, FixedClock};
    use crate::database::test_support::seeded_pool;
    use crate::models::Role;

    pub const NOW: &str = "2026-01-01T08:00:00Z";

    pub async fn scheduler_at(now: &str) -> Scheduler {
        let time = ServiceTime::new(
            parse_utc_offset("+00:00").unwrap(),
            Arc::new(FixedClock::from_rfc3339(now)),
        );
        Scheduler::new(seeded_pool().await, time)
    }

    pub async fn scheduler() -> Scheduler {
        scheduler_at(NOW).await
    }

    /// Seeded scheduler on a multi-connection file database inside `dir`,
    /// for tests that need bookings to overlap.
    pub async fn file_scheduler(dir: &std::path::Path) -> Scheduler {
        let url = format!("sqlite://{}", dir.join("booking.db").display());
        let pool = database::connect(&url).await.unwrap();
        crate::database::test_support::seed(&pool).await;
        let time = ServiceTime::new(
            parse_utc_offset("+00:00").unwrap(),
            Arc::new(FixedClock::from_rfc3339(NOW)),
        );
        Scheduler::new(pool, time)
    }

    pub fn identity(user_id: &str, role: Role) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            role,
        }
    }

    pub fn request(date: &str, time: Option<&str>) -> BookingRequest {
        BookingRequest {
            vaccine_id: Some("v1".into()),
            center_id: Some("c1".into()),
            appointment_date: Some(date.into()),
            appointment_time: time.map(str::to_string),
            notes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn open_slots_exclude_booked_times() {
        let scheduler = scheduler().await;
        scheduler
            .book("u1", &request("2030-01-01", Some("10:00")))
            .await
            .unwrap();

        let (_, open) = scheduler.open_slots("c1", "2030-01-01").await.unwrap();
        let labels: Vec<String> = open.into_iter().map(slot_label).collect();

        assert_eq!(labels.len(), 15);
        assert!(!labels.contains(&"10:00".to_string()));
        assert_eq!(labels.first().map(String::as_str), Some("09:00"));
    }

    #[tokio::test]
    async fn cancelled_bookings_free_their_slot() {
        let scheduler = scheduler().await;
        let booked = scheduler
            .book("u1", &request("2030-01-01", Some("10:00")))
            .await
            .unwrap();
        scheduler
            .transition(&identity("u1", Role::User), &booked.id, AppointmentStatus::Cancelled)
            .await
            .unwrap();

        let (_, open) = scheduler.open_slots("c1", "2030-01-01").await.unwrap();
        assert_eq!(open.len(), 16);
    }

    #[tokio::test]
    async fn started_slots_are_hidden_today() {
        // 12:10 local: 09:00 .. 12:00 have started.
        let scheduler = scheduler_at("2030-01-01T12:10:00Z").await;
        let (_, open) = scheduler.open_slots("c1", "2030-01-01").await.unwrap();

        assert_eq!(open.first().copied().map(slot_label).as_deref(), Some("12:30"));
        assert_eq!(open.len(), 9);

        let (_, past) = scheduler.open_slots("c1", "2029-12-31").await.unwrap();
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn unknown_center_and_bad_date_are_reported() {
        let scheduler = scheduler().await;

        let err = scheduler.open_slots("nope", "2030-01-01").await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));

        let err = scheduler.open_slots("c1", "01/01/2030").await.unwrap_err();
        assert!(matches!(err, BookingError::Validation { .. }));

        let err = scheduler.open_slots(" ", "2030-01-01").await.unwrap_err();
        assert!(matches!(err, BookingError::Validation { .. }));
    }

    #[tokio::test]
    async fn users_only_see_their_own_appointments() {
        let scheduler = scheduler().await;
        let booked = scheduler
            .book("u1", &request("2030-01-01", Some("10:00")))
            .await
            .unwrap();

        let err = scheduler
            .appointment(&identity("u2", Role::User), &booked.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));

        let seen = scheduler
            .appointment(&identity("s1", Role::Staff), &booked.id)
            .await
            .unwrap();
        assert_eq!(seen.user_id, "u1");

        assert_eq!(scheduler.appointments_for(&identity("u1", Role::User)).await.unwrap().len(), 1);
        assert!(scheduler.appointments_for(&identity("u2", Role::User)).await.unwrap().is_empty());

        let err = scheduler
            .all_appointments(&identity("u1", Role::User), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));

        let scheduled = scheduler
            .all_appointments(&identity("s1", Role::Staff), Some(AppointmentStatus::Scheduled))
            .await
            .unwrap();
        assert_eq!(scheduled.len(), 1);
    }
}
