use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use log::error;
use serde::Serialize;
use serde_json::json;

/// Field key for errors that belong to the form as a whole.
pub const NON_FIELD: &str = "__all__";

pub const SLOT_TAKEN: &str = "This slot has already been booked for the chosen doctor.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Field-level validation messages collected from one form submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormErrors {
    errors: Vec<FieldError>,
}

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    pub fn for_field(&self, field: &str) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    /// `Ok(())` when nothing was collected, otherwise the errors.
    pub fn into_result(self) -> ClinicResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ClinicError::Invalid(self))
        }
    }
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        f.write_str(&messages.join("; "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("{0}")]
    Invalid(FormErrors),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("login required")]
    LoginRequired { login_url: String, next: String },
    #[error("Patient profile not found.")]
    MissingPatientProfile,
    #[error("Invalid method")]
    InvalidMethod,
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type ClinicResult<T> = Result<T, ClinicError>;

impl ClinicError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ClinicError::Invalid(FormErrors::single(field, message))
    }

    pub fn slot_taken() -> Self {
        ClinicError::invalid(NON_FIELD, SLOT_TAKEN)
    }

    pub fn form_errors(&self) -> Option<&FormErrors> {
        match self {
            ClinicError::Invalid(errors) => Some(errors),
            _ => None,
        }
    }
}

/// Builds the login challenge URL carrying the originally requested path.
pub fn login_redirect(login_url: &str, next: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    format!("{login_url}?{query}")
}

/// Redirect target for `path` with a user-visible notice attached.
pub fn with_notice(path: &str, notice: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("notice", notice)
        .finish();
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{path}{sep}{query}")
}

impl IntoResponse for ClinicError {
    fn into_response(self) -> Response {
        match self {
            ClinicError::Invalid(errors) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": errors.to_string() }))).into_response()
            }
            ClinicError::NotFound(what) => {
                (StatusCode::NOT_FOUND, format!("{what} not found")).into_response()
            }
            ClinicError::LoginRequired { login_url, next } => {
                Redirect::to(&login_redirect(&login_url, &next)).into_response()
            }
            ClinicError::MissingPatientProfile => {
                Redirect::to(&with_notice("/", "Patient profile not found.")).into_response()
            }
            ClinicError::InvalidMethod => {
                (StatusCode::BAD_REQUEST, "Invalid method").into_response()
            }
            err @ (ClinicError::Storage(_) | ClinicError::Migrate(_) | ClinicError::Config(_)) => {
                error!("request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
