//! CSV import of the reference data the scheduler reads: vaccines, centers
//! and users. Rows are keyed by `id`; a later row with the same id replaces
//! an earlier one. Rows without an id get a fresh UUID.

use std::collections::HashMap;
use std::path::Path;

use chrono::{NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::clock::parse_time;
use crate::database;
use crate::models::{Center, Role, User, Vaccine};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Deserialize)]
struct VaccineRow {
    id: Option<String>,
    name: String,
    manufacturer: String,
    description: Option<String>,
    doses_required: Option<String>,
    days_between_doses: Option<String>,
    age_group: Option<String>,
    side_effects: Option<String>,
    price: Option<String>,
    stock: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CenterRow {
    id: Option<String>,
    name: String,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    opening_time: String,
    closing_time: String,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: Option<String>,
    name: String,
    email: String,
    role: Option<String>,
    password_hash: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub vaccines: usize,
    pub centers: usize,
    pub users: usize,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn id_or_new(id: Option<String>) -> String {
    blank_to_none(id).unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Parses an optional number, treating an empty cell as absent
fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    row: usize,
    column: &str,
) -> Result<Option<T>, SeedError> {
    match blank_to_none(value) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| SeedError::InvalidRow {
            row,
            reason: format!("'{raw}' is not a valid {column}"),
        }),
    }
}

fn parse_opening_time(raw: &str, row: usize) -> Result<NaiveTime, SeedError> {
    parse_time(raw).map_err(|_| SeedError::InvalidRow {
        row,
        reason: format!("'{raw}' is not a valid HH:MM time"),
    })
}

fn read_rows<T, P>(path: P) -> Result<Vec<T>, SeedError>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

/// Loads vaccines from a CSV file
pub fn load_vaccines<P: AsRef<Path>>(path: P) -> Result<Vec<Vaccine>, SeedError> {
    let mut by_id: HashMap<String, Vaccine> = HashMap::new();

    for (index, row) in read_rows::<VaccineRow, _>(path)?.into_iter().enumerate() {
        let line = index + 2;
        let vaccine = Vaccine {
            id: id_or_new(row.id),
            name: row.name,
            manufacturer: row.manufacturer,
            description: blank_to_none(row.description),
            doses_required: parse_number(row.doses_required, line, "dose count")?.unwrap_or(1),
            days_between_doses: parse_number(row.days_between_doses, line, "day count")?,
            age_group: blank_to_none(row.age_group),
            side_effects: blank_to_none(row.side_effects),
            price: parse_number(row.price, line, "price")?,
            stock: parse_number(row.stock, line, "stock count")?.unwrap_or(0),
        };
        by_id.insert(vaccine.id.clone(), vaccine);
    }

    Ok(by_id.into_values().collect())
}

/// Loads vaccination centers from a CSV file
pub fn load_centers<P: AsRef<Path>>(path: P) -> Result<Vec<Center>, SeedError> {
    let mut by_id: HashMap<String, Center> = HashMap::new();

    for (index, row) in read_rows::<CenterRow, _>(path)?.into_iter().enumerate() {
        let line = index + 2;
        let center = Center {
            id: id_or_new(row.id),
            name: row.name,
            address: blank_to_none(row.address),
            city: blank_to_none(row.city),
            state: blank_to_none(row.state),
            phone: blank_to_none(row.phone),
            email: blank_to_none(row.email),
            opening_time: parse_opening_time(&row.opening_time, line)?,
            closing_time: parse_opening_time(&row.closing_time, line)?,
        };
        by_id.insert(center.id.clone(), center);
    }

    Ok(by_id.into_values().collect())
}

/// Loads users from a CSV file. Missing roles default to `User`; rows
/// without a password hash get an unusable one.
pub fn load_users<P: AsRef<Path>>(
    path: P,
    created_at: NaiveDateTime,
) -> Result<Vec<User>, SeedError> {
    let mut by_id: HashMap<String, User> = HashMap::new();

    for (index, row) in read_rows::<UserRow, _>(path)?.into_iter().enumerate() {
        let line = index + 2;
        let role = match blank_to_none(row.role) {
            None => Role::User,
            Some(raw) => raw.parse().map_err(|e: crate::models::UnknownVariant| {
                SeedError::InvalidRow {
                    row: line,
                    reason: e.to_string(),
                }
            })?,
        };
        let user = User {
            id: id_or_new(row.id),
            name: row.name,
            email: row.email,
            password_hash: blank_to_none(row.password_hash).unwrap_or_else(|| "!".to_string()),
            role,
            created_at,
        };
        by_id.insert(user.id.clone(), user);
    }

    Ok(by_id.into_values().collect())
}

/// Writes everything in one transaction.
pub async fn import(
    pool: &SqlitePool,
    vaccines: &[Vaccine],
    centers: &[Center],
    users: &[User],
) -> Result<SeedSummary, SeedError> {
    let mut tx = pool.begin().await?;

    for vaccine in vaccines {
        database::upsert_vaccine(&mut *tx, vaccine).await?;
    }
    for center in centers {
        database::upsert_center(&mut *tx, center).await?;
    }
    for user in users {
        database::upsert_user(&mut *tx, user).await?;
    }
    tx.commit().await?;

    let summary = SeedSummary {
        vaccines: vaccines.len(),
        centers: centers.len(),
        users: users.len(),
    };
    info!(?summary, "seed data imported");
    Ok(summary)
}
