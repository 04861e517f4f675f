use std::env;
use std::net::SocketAddr;

use dotenvy::dotenv;

use crate::error::{ClinicError, ClinicResult};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_LOGIN_URL: &str = "/accounts/login/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

/// Which patient-resolution strategy the booking flow runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientMode {
    /// Bookings belong to the logged-in account's patient profile.
    Account,
    /// Anonymous bookings; the patient is upserted by email.
    Email,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub store: StoreKind,
    pub patient_mode: PatientMode,
    pub login_url: String,
    pub staff_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            store: StoreKind::Postgres,
            patient_mode: PatientMode::Account,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            staff_username: None,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> ClinicResult<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ClinicResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match non_empty("CLINIC_BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ClinicError::Config(format!("CLINIC_BIND_ADDR {raw:?}: {e}")))?,
            None => defaults.bind_addr,
        };

        let store = match non_empty("CLINIC_STORE").as_deref() {
            None | Some("postgres") => StoreKind::Postgres,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                return Err(ClinicError::Config(format!(
                    "CLINIC_STORE must be postgres or memory, got {other:?}"
                )))
            }
        };

        let patient_mode = match non_empty("CLINIC_PATIENT_MODE").as_deref() {
            None | Some("account") => PatientMode::Account,
            Some("email") => PatientMode::Email,
            Some(other) => {
                return Err(ClinicError::Config(format!(
                    "CLINIC_PATIENT_MODE must be account or email, got {other:?}"
                )))
            }
        };

        let database_url = non_empty("DATABASE_URL");
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err(ClinicError::Config("DATABASE_URL not set".into()));
        }

        Ok(Config {
            database_url,
            bind_addr,
            store,
            patient_mode,
            login_url: non_empty("CLINIC_LOGIN_URL").unwrap_or(defaults.login_url),
            staff_username: non_empty("CLINIC_STAFF_USERNAME"),
        })
    }
}
