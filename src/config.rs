use std::{env, fmt::Display, str::FromStr};

use chrono::FixedOffset;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::parse_utc_offset;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} is required but not set")]
    Missing { key: &'static str },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub session_secret: String,
    pub utc_offset: FixedOffset,
    pub dev_mode: bool,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let offset_raw = try_load(&lookup, "BOOKING_UTC_OFFSET", "+00:00");
        let utc_offset = parse_utc_offset(&offset_raw).ok_or_else(|| ConfigError::Invalid {
            key: "BOOKING_UTC_OFFSET",
            reason: format!("expected +HH:MM, got '{offset_raw}'"),
        })?;

        Ok(Self {
            port: parse(&lookup, "BOOKING_PORT", "8080")?,
            database_url: try_load(&lookup, "DATABASE_URL", "sqlite://booking.db"),
            session_secret: read_secret(&lookup, "SESSION_SECRET")?,
            utc_offset,
            dev_mode: parse(&lookup, "BOOKING_DEV_MODE", "false")?,
        })
    }
}

fn try_load<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn parse<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    try_load(lookup, key, default).trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}

fn read_secret<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|s| s.trim().to_string()) {
        Some(secret) if !secret.is_empty() => Ok(secret),
        _ => {
            warn!("{key} is not set, refusing to start");
            Err(ConfigError::Missing { key })
        }
    }
}
