//! # SQLite store
//!
//! Users, vaccines, centers and appointments live in one SQLite database
//! accessed through a `sqlx` pool. Queries here are plain functions over any
//! executor so the booking path can run them inside a single transaction.
//!
//! ## Constraints carried by the schema
//!
//! - one active (non-cancelled) appointment per `(user_id, appointment_at)`
//! - one active appointment per `(center_id, appointment_at)` when a center is set
//! - appointment status restricted to `scheduled | completed | cancelled`
//!
//! Instants are stored as canonical wall-clock text (`YYYY-MM-DD HH:MM:SS`),
//! so equality and range checks are plain text comparisons.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::info;

use crate::models::{Appointment, AppointmentDetails, AppointmentStatus, Center, User, Vaccine};

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!("Connected to {database_url}");

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const DETAILS_SELECT: &str = r#"
    SELECT a.id, a.user_id, a.vaccine_id, a.center_id, a.appointment_at, a.status,
           a.notes, a.created_at,
           v.name AS vaccine_name, v.manufacturer AS vaccine_manufacturer,
           u.name AS user_name, u.email AS user_email,
           c.name AS center_name
    FROM appointments a
    JOIN vaccines v ON v.id = a.vaccine_id
    JOIN users u ON u.id = a.user_id
    LEFT JOIN centers c ON c.id = a.center_id
"#;

pub async fn find_vaccine<'e, E>(executor: E, id: &str) -> Result<Option<Vaccine>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Vaccine>(
        "SELECT id, name, manufacturer, description, doses_required, days_between_doses, \
         age_group, side_effects, price, stock FROM vaccines WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn find_center<'e, E>(executor: E, id: &str) -> Result<Option<Center>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Center>(
        "SELECT id, name, address, city, state, phone, email, opening_time, closing_time \
         FROM centers WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn find_user<'e, E>(executor: E, id: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, User>(
        "SELECT id, name, email, password_hash, role, created_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn find_appointment<'e, E>(
    executor: E,
    id: &str,
) -> Result<Option<Appointment>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Appointment>(
        "SELECT id, user_id, vaccine_id, center_id, appointment_at, status, notes, created_at \
         FROM appointments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn appointment_details<'e, E>(
    executor: E,
    id: &str,
) -> Result<Option<AppointmentDetails>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{DETAILS_SELECT} WHERE a.id = ?");
    sqlx::query_as::<_, AppointmentDetails>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Joined appointments, newest instant first, optionally narrowed to one
/// user and/or one status.
pub async fn list_appointments<'e, E>(
    executor: E,
    user_id: Option<&str>,
    status: Option<AppointmentStatus>,
) -> Result<Vec<AppointmentDetails>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "{DETAILS_SELECT} WHERE (?1 IS NULL OR a.user_id = ?1) AND (?2 IS NULL OR a.status = ?2) \
         ORDER BY a.appointment_at DESC, a.created_at DESC"
    );
    sqlx::query_as::<_, AppointmentDetails>(&sql)
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(executor)
        .await
}

/// True when the user already holds a non-cancelled appointment at exactly
/// `instant`.
pub async fn user_has_appointment_at<'e, E>(
    executor: E,
    user_id: &str,
    instant: NaiveDateTime,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let hits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM appointments \
         WHERE user_id = ? AND appointment_at = ? AND status <> 'cancelled'",
    )
    .bind(user_id)
    .bind(instant)
    .fetch_one(executor)
    .await?;

    Ok(hits > 0)
}

pub async fn center_slot_taken<'e, E>(
    executor: E,
    center_id: &str,
    instant: NaiveDateTime,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let hits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM appointments \
         WHERE center_id = ? AND appointment_at = ? AND status <> 'cancelled'",
    )
    .bind(center_id)
    .bind(instant)
    .fetch_one(executor)
    .await?;

    Ok(hits > 0)
}

/// Times of day already held by active appointments at a center on `day`.
pub async fn booked_times<'e, E>(
    executor: E,
    center_id: &str,
    day: NaiveDate,
) -> Result<HashSet<NaiveTime>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let Some(start) = day.and_hms_opt(0, 0, 0) else {
        return Ok(HashSet::new());
    };
    let end = start + chrono::TimeDelta::days(1);

    let instants: Vec<NaiveDateTime> = sqlx::query_scalar(
        "SELECT appointment_at FROM appointments \
         WHERE center_id = ? AND status <> 'cancelled' \
         AND appointment_at >= ? AND appointment_at < ?",
    )
    .bind(center_id)
    .bind(start)
    .bind(end)
    .fetch_all(executor)
    .await?;

    Ok(instants.into_iter().map(|at| at.time()).collect())
}

pub struct NewAppointment<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub vaccine_id: &'a str,
    pub center_id: Option<&'a str>,
    pub appointment_at: NaiveDateTime,
    pub notes: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

pub async fn insert_appointment<'e, E>(
    executor: E,
    appointment: &NewAppointment<'_>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO appointments \
         (id, user_id, vaccine_id, center_id, appointment_at, status, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, 'scheduled', ?, ?)",
    )
    .bind(appointment.id)
    .bind(appointment.user_id)
    .bind(appointment.vaccine_id)
    .bind(appointment.center_id)
    .bind(appointment.appointment_at)
    .bind(appointment.notes)
    .bind(appointment.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Moves a `scheduled` appointment to `target`. Returns whether a row
/// changed; terminal rows are left untouched.
pub async fn advance_status<'e, E>(
    executor: E,
    id: &str,
    target: AppointmentStatus,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE appointments SET status = ? WHERE id = ? AND status = 'scheduled'",
    )
    .bind(target.as_str())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn upsert_vaccine<'e, E>(executor: E, vaccine: &Vaccine) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO vaccines \
         (id, name, manufacturer, description, doses_required, days_between_doses, \
          age_group, side_effects, price, stock) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET \
          name = excluded.name, manufacturer = excluded.manufacturer, \
          description = excluded.description, doses_required = excluded.doses_required, \
          days_between_doses = excluded.days_between_doses, age_group = excluded.age_group, \
          side_effects = excluded.side_effects, price = excluded.price, stock = excluded.stock",
    )
    .bind(&vaccine.id)
    .bind(&vaccine.name)
    .bind(&vaccine.manufacturer)
    .bind(&vaccine.description)
    .bind(vaccine.doses_required)
    .bind(vaccine.days_between_doses)
    .bind(&vaccine.age_group)
    .bind(&vaccine.side_effects)
    .bind(vaccine.price)
    .bind(vaccine.stock)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn upsert_center<'e, E>(executor: E, center: &Center) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO centers \
         (id, name, address, city, state, phone, email, opening_time, closing_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET \
          name = excluded.name, address = excluded.address, city = excluded.city, \
          state = excluded.state, phone = excluded.phone, email = excluded.email, \
          opening_time = excluded.opening_time, closing_time = excluded.closing_time",
    )
    .bind(&center.id)
    .bind(&center.name)
    .bind(&center.address)
    .bind(&center.city)
    .bind(&center.state)
    .bind(&center.phone)
    .bind(&center.email)
    .bind(center.opening_time)
    .bind(center.closing_time)
    .execute(executor)
    .await?;

    Ok(())
}

/// Inserts or refreshes a user. The role of an existing user is never
/// changed here.
pub async fn upsert_user<'e, E>(executor: E, user: &User) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET \
          name = excluded.name, email = excluded.email, password_hash = excluded.password_hash",
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(user.created_at)
    .execute(executor)
    .await?;

    Ok(())
}
