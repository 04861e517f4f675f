//! Raw form payloads as submitted by the browser, and their validation into
//! typed inputs. Every field arrives as a string so a failed submission can
//! be echoed back unchanged next to its messages.

use serde::Deserialize;
use time::macros::format_description;
use time::Date;

use crate::error::FormErrors;
use crate::models::{AppointmentFilter, AppointmentStatus, DoctorInput, PatientContact};

pub const REQUIRED: &str = "This field is required.";

fn too_long(max: usize, len: usize) -> String {
    format!("Ensure this value has at most {max} characters (it has {len}).")
}

/// Trims `value`, checks presence and length, and records any failure.
fn required_text(
    errors: &mut FormErrors,
    field: &'static str,
    value: &str,
    max: usize,
) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        errors.add(field, REQUIRED);
        return None;
    }
    optional_text(errors, field, value, max)
}

fn optional_text(
    errors: &mut FormErrors,
    field: &'static str,
    value: &str,
    max: usize,
) -> Option<String> {
    let value = value.trim();
    let len = value.chars().count();
    if len > max {
        errors.add(field, too_long(max, len));
        return None;
    }
    Some(value.to_string())
}

fn required_int(errors: &mut FormErrors, field: &'static str, value: &str) -> Option<i32> {
    let value = value.trim();
    if value.is_empty() {
        errors.add(field, REQUIRED);
        return None;
    }
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            errors.add(field, "Enter a whole number.");
            None
        }
    }
}

pub fn parse_date(value: &str) -> Option<Date> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).ok()
}

pub fn valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
        && domain.contains('.')
}

fn required_email(errors: &mut FormErrors, field: &'static str, value: &str) -> Option<String> {
    let email = required_text(errors, field, value, 254)?;
    if !valid_email(&email) {
        errors.add(field, "Enter a valid email address.");
        return None;
    }
    Some(email)
}

fn contact_fields(
    errors: &mut FormErrors,
    name: &str,
    phone: &str,
    email: &str,
) -> Option<PatientContact> {
    let name = required_text(errors, "name", name, 200);
    let phone = required_text(errors, "phone", phone, 20);
    let email = required_email(errors, "email", email);
    Some(PatientContact {
        name: name?,
        phone: phone?,
        email: email?,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BookingForm {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub doctor: String,
    pub date: String,
    pub time: String,
    pub notes: String,
}

/// A booking whose fields parsed; doctor existence and slot availability
/// are checked against the store afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub doctor_id: i64,
    pub date: Date,
    pub time: String,
    pub notes: String,
    pub contact: Option<PatientContact>,
}

impl BookingForm {
    pub fn validate(&self, with_contact: bool) -> Result<BookingRequest, FormErrors> {
        let mut errors = FormErrors::new();
        let contact = if with_contact {
            contact_fields(&mut errors, &self.name, &self.phone, &self.email)
        } else {
            None
        };

        let doctor_id = match self.doctor.trim() {
            "" => {
                errors.add("doctor", REQUIRED);
                None
            }
            raw => match raw.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    errors.add("doctor", crate::store::INVALID_CHOICE);
                    None
                }
            },
        };

        let date = match self.date.trim() {
            "" => {
                errors.add("date", REQUIRED);
                None
            }
            raw => {
                let parsed = parse_date(raw);
                if parsed.is_none() {
                    errors.add("date", "Enter a valid date.");
                }
                parsed
            }
        };

        let time = required_text(&mut errors, "time", &self.time, 50);
        let notes = optional_text(&mut errors, "notes", &self.notes, usize::MAX);

        match (doctor_id, date, time, notes) {
            (Some(doctor_id), Some(date), Some(time), Some(notes)) if errors.is_empty() => {
                Ok(BookingRequest {
                    doctor_id,
                    date,
                    time,
                    notes,
                    contact,
                })
            }
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DoctorForm {
    pub name: String,
    pub specialization: String,
    pub experience: String,
    pub fees: String,
    pub available_days: String,
    pub time_slots: String,
    pub biography: String,
}

impl DoctorForm {
    pub fn validate(&self) -> Result<DoctorInput, FormErrors> {
        let mut errors = FormErrors::new();
        let name = required_text(&mut errors, "name", &self.name, 200);
        let specialization_id = match self.specialization.trim() {
            "" => Some(None),
            raw => match raw.parse::<i64>() {
                Ok(id) => Some(Some(id)),
                Err(_) => {
                    errors.add("specialization", crate::store::INVALID_CHOICE);
                    None
                }
            },
        };
        let experience = required_int(&mut errors, "experience", &self.experience);
        let fees = required_int(&mut errors, "fees", &self.fees);
        let available_days = required_text(&mut errors, "available_days", &self.available_days, 200);
        let time_slots = required_text(&mut errors, "time_slots", &self.time_slots, 300);
        let biography = optional_text(&mut errors, "biography", &self.biography, usize::MAX);

        match (name, specialization_id, experience, fees, available_days, time_slots, biography) {
            (
                Some(name),
                Some(specialization_id),
                Some(experience),
                Some(fees),
                Some(available_days),
                Some(time_slots),
                Some(biography),
            ) => Ok(DoctorInput {
                name,
                specialization_id,
                experience,
                fees,
                available_days,
                time_slots,
                biography,
            }),
            _ => Err(errors),
        }
    }

    pub fn from_doctor(doctor: &crate::models::Doctor) -> Self {
        DoctorForm {
            name: doctor.name.clone(),
            specialization: doctor
                .specialization_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            experience: doctor.experience.to_string(),
            fees: doctor.fees.to_string(),
            available_days: doctor.available_days_raw().to_string(),
            time_slots: doctor.time_slots_raw().to_string(),
            biography: doctor.biography.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpecializationForm {
    pub name: String,
}

impl SpecializationForm {
    pub fn validate(&self) -> Result<String, FormErrors> {
        let mut errors = FormErrors::new();
        match required_text(&mut errors, "name", &self.name, 100) {
            Some(name) => Ok(name),
            None => Err(errors),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusForm {
    pub id: String,
    pub status: String,
}

impl StatusForm {
    pub fn appointment_id(&self) -> Option<i64> {
        self.id.trim().parse().ok()
    }

    pub fn status(&self) -> Result<AppointmentStatus, FormErrors> {
        match self.status.trim() {
            "" => Err(FormErrors::single("status", REQUIRED)),
            raw => raw.parse().map_err(|_| {
                FormErrors::single(
                    "status",
                    format!("Select a valid choice. {raw} is not one of the available choices."),
                )
            }),
        }
    }
}

/// Query string of the panel appointment list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppointmentFilterQuery {
    pub doctor: String,
    pub status: String,
    pub notice: Option<String>,
}

impl AppointmentFilterQuery {
    /// The filter to apply. A value that does not parse invalidates the whole
    /// filter, so the listing falls back to showing everything.
    pub fn to_filter(&self) -> AppointmentFilter {
        let doctor_id = match self.doctor.trim() {
            "" => None,
            raw => match raw.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => return AppointmentFilter::default(),
            },
        };
        let status = match self.status.trim() {
            "" => None,
            raw => match raw.parse::<AppointmentStatus>() {
                Ok(status) => Some(status),
                Err(_) => return AppointmentFilter::default(),
            },
        };
        AppointmentFilter {
            doctor_id,
            status,
            ..Default::default()
        }
    }

    /// The filter part of the query string, without the notice.
    pub fn encoded(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if !self.doctor.is_empty() {
            query.append_pair("doctor", &self.doctor);
        }
        if !self.status.is_empty() {
            query.append_pair("status", &self.status);
        }
        query.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignupForm {
    pub username: String,
    pub name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signup {
    pub username: String,
    pub contact: PatientContact,
}

impl SignupForm {
    pub fn validate(&self) -> Result<Signup, FormErrors> {
        let mut errors = FormErrors::new();
        let username = required_text(&mut errors, "username", &self.username, 150);
        if let Some(username) = &username {
            let allowed = |c: char| c.is_alphanumeric() || "@.+-_".contains(c);
            if !username.chars().all(allowed) {
                errors.add(
                    "username",
                    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
                );
            }
        }
        let contact = contact_fields(&mut errors, &self.name, &self.phone, &self.email);
        match (username, contact) {
            (Some(username), Some(contact)) if errors.is_empty() => Ok(Signup { username, contact }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryLookupForm {
    pub email: String,
}

impl HistoryLookupForm {
    pub fn validate(&self) -> Result<String, FormErrors> {
        let mut errors = FormErrors::new();
        required_email(&mut errors, "email", &self.email).ok_or(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn booking(doctor: &str, date: &str, time: &str) -> BookingForm {
        BookingForm {
            name: "Ana Lima".into(),
            phone: "555-0100".into(),
            email: "ana@example.com".into(),
            doctor: doctor.into(),
            date: date.into(),
            time: time.into(),
            notes: String::new(),
        }
    }

    #[test]
    fn booking_form_parses_fields() {
        let request = booking("3", "2024-01-10", " 10:00 AM ").validate(true).unwrap();
        assert_eq!(request.doctor_id, 3);
        assert_eq!(request.date, date!(2024 - 01 - 10));
        assert_eq!(request.time, "10:00 AM");
        assert_eq!(request.contact.unwrap().email, "ana@example.com");
    }

    #[test]
    fn booking_form_reports_each_bad_field() {
        let errors = booking("", "2024-13-40", "  ").validate(false).unwrap_err();
        assert_eq!(errors.for_field("doctor"), vec![REQUIRED]);
        assert_eq!(errors.for_field("date"), vec!["Enter a valid date."]);
        assert_eq!(errors.for_field("time"), vec![REQUIRED]);
    }

    #[test]
    fn account_bookings_ignore_contact_fields() {
        let mut form = booking("1", "2024-01-10", "9:00 AM");
        form.email = "not-an-email".into();
        assert!(form.validate(false).unwrap().contact.is_none());
        let errors = form.validate(true).unwrap_err();
        assert_eq!(errors.for_field("email"), vec!["Enter a valid email address."]);
    }

    #[test]
    fn doctor_form_requires_numbers_and_lists() {
        let form = DoctorForm {
            name: "Dr Who".into(),
            specialization: String::new(),
            experience: "ten".into(),
            fees: "".into(),
            available_days: "Mon,Tue".into(),
            time_slots: "x".repeat(301),
            biography: String::new(),
        };
        let errors = form.validate().unwrap_err();
        assert_eq!(errors.for_field("experience"), vec!["Enter a whole number."]);
        assert_eq!(errors.for_field("fees"), vec![REQUIRED]);
        assert_eq!(
            errors.for_field("time_slots"),
            vec!["Ensure this value has at most 300 characters (it has 301)."]
        );
    }

    #[test]
    fn doctor_form_allows_missing_specialization() {
        let form = DoctorForm {
            name: "Dr Who".into(),
            experience: "10".into(),
            fees: "250".into(),
            available_days: "Mon".into(),
            time_slots: "9:00 AM".into(),
            ..Default::default()
        };
        let input = form.validate().unwrap();
        assert_eq!(input.specialization_id, None);
        assert_eq!(input.experience, 10);
    }

    #[test]
    fn specialization_name_is_trimmed_and_required() {
        let ok = SpecializationForm { name: "  Cardiology ".into() };
        assert_eq!(ok.validate().unwrap(), "Cardiology");
        let blank = SpecializationForm { name: "   ".into() };
        assert_eq!(blank.validate().unwrap_err().for_field("name"), vec![REQUIRED]);
    }

    #[test]
    fn status_form_accepts_only_known_statuses() {
        let form = StatusForm { id: "4".into(), status: "Approved".into() };
        assert_eq!(form.appointment_id(), Some(4));
        assert_eq!(form.status().unwrap(), AppointmentStatus::Approved);
        let bad = StatusForm { id: "x".into(), status: "Cancelled".into() };
        assert_eq!(bad.appointment_id(), None);
        assert!(bad.status().is_err());
    }

    #[test]
    fn invalid_filter_disables_filtering() {
        let query = AppointmentFilterQuery {
            doctor: "2".into(),
            status: "Pending".into(),
            notice: None,
        };
        let filter = query.to_filter();
        assert_eq!(filter.doctor_id, Some(2));
        assert_eq!(filter.status, Some(AppointmentStatus::Pending));
        assert_eq!(query.encoded(), "doctor=2&status=Pending");

        let bad = AppointmentFilterQuery {
            doctor: "2".into(),
            status: "Lost".into(),
            notice: None,
        };
        assert_eq!(bad.to_filter(), AppointmentFilter::default());
    }

    #[test]
    fn email_check_is_structural() {
        assert!(valid_email("a.b@clinic.example"));
        assert!(!valid_email("a@b"));
        assert!(!valid_email("@clinic.org"));
        assert!(!valid_email("a b@clinic.org"));
        assert!(!valid_email("a@@clinic.org"));
    }

    #[test]
    fn signup_checks_username_characters() {
        let form = SignupForm {
            username: "ana lima".into(),
            name: "Ana".into(),
            phone: "1".into(),
            email: "ana@example.com".into(),
        };
        assert!(!form.validate().unwrap_err().for_field("username").is_empty());
    }
}
