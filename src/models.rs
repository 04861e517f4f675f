use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Specialization {
    pub id: i64,
    pub name: String,
}

/// A doctor record. Working days and slots are stored comma-encoded and read
/// through [`Doctor::available_days`] and [`Doctor::time_slots`].
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Doctor {
    pub id: i64,
    pub name: String,
    pub specialization_id: Option<i64>,
    pub experience: i32,
    pub fees: i32,
    #[sqlx(rename = "available_days")]
    pub(crate) available_days_raw: String,
    #[sqlx(rename = "time_slots")]
    pub(crate) time_slots_raw: String,
    pub biography: String,
    pub created_at: OffsetDateTime,
}

impl Doctor {
    pub fn available_days(&self) -> Vec<&str> {
        split_tokens(&self.available_days_raw)
    }

    pub fn time_slots(&self) -> Vec<&str> {
        split_tokens(&self.time_slots_raw)
    }

    pub fn available_days_raw(&self) -> &str {
        &self.available_days_raw
    }

    pub fn time_slots_raw(&self) -> &str {
        &self.time_slots_raw
    }
}

/// Splits a comma-encoded list, trimming tokens and dropping empty ones.
pub fn split_tokens(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Doctor row joined with the specialization name, for listings.
#[derive(Debug, Clone, FromRow)]
pub struct DoctorListing {
    #[sqlx(flatten)]
    pub doctor: Doctor,
    pub specialization_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Patient {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_staff: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Completed,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Approved,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pending",
            AppointmentStatus::Approved => "Approved",
            AppointmentStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown appointment status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Pending" => Ok(AppointmentStatus::Pending),
            "Approved" => Ok(AppointmentStatus::Approved),
            "Completed" => Ok(AppointmentStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for AppointmentStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Appointment {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub date: Date,
    /// Free-text slot label. It is not checked against the doctor's
    /// declared slots, so any label can be booked.
    pub time: String,
    #[sqlx(try_from = "String")]
    pub status: AppointmentStatus,
    pub notes: String,
    pub created_at: OffsetDateTime,
}

/// Appointment joined with the doctor and patient names.
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentListing {
    #[sqlx(flatten)]
    pub appointment: Appointment,
    pub doctor_name: String,
    pub patient_name: String,
}

/// Fields of a new appointment; the status always starts at Pending and the
/// patient is supplied separately.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub doctor_id: i64,
    pub date: Date,
    pub time: String,
    pub notes: String,
}

/// Validated doctor fields, used for both create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct DoctorInput {
    pub name: String,
    pub specialization_id: Option<i64>,
    pub experience: i32,
    pub fees: i32,
    pub available_days: String,
    pub time_slots: String,
    pub biography: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientContact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// AND-combined appointment filter; `None` fields pass everything through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub doctor_id: Option<i64>,
    pub status: Option<AppointmentStatus>,
    pub patient_id: Option<i64>,
    pub limit: Option<i64>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.status.map_or(true, |s| appointment.status == s)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
    }
}
