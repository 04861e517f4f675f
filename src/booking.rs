//! Appointment booking: form checks, patient resolution and the
//! one-booking-per-slot rule.

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::access::Identity;
use crate::config::{Config, PatientMode, DEFAULT_LOGIN_URL};
use crate::error::{ClinicError, ClinicResult, FormErrors};
use crate::forms::{BookingForm, REQUIRED};
use crate::models::{Appointment, NewAppointment, Patient, PatientContact};
use crate::store::{Store, INVALID_CHOICE};

/// Decides which patient a booking or history lookup belongs to.
#[async_trait]
pub trait PatientResolver: Send + Sync {
    /// Whether booking and history sit behind the login gate.
    fn requires_login(&self) -> bool;

    /// Books `new` for the patient this strategy picks. A patient record it
    /// creates or refreshes on the way is kept only if the booking succeeds.
    async fn book(
        &self,
        store: &dyn Store,
        identity: &Identity,
        contact: Option<&PatientContact>,
        new: &NewAppointment,
    ) -> ClinicResult<(Patient, Appointment)>;

    /// The patient whose history to show, without side effects.
    async fn find(
        &self,
        store: &dyn Store,
        identity: &Identity,
        email: Option<&str>,
    ) -> ClinicResult<Option<Patient>>;
}

/// Bookings belong to the signed-in account's patient profile.
#[derive(Debug, Clone)]
pub struct AccountPatients {
    login_url: String,
}

impl AccountPatients {
    pub fn new(login_url: impl Into<String>) -> Self {
        AccountPatients {
            login_url: login_url.into(),
        }
    }
}

impl Default for AccountPatients {
    fn default() -> Self {
        AccountPatients::new(DEFAULT_LOGIN_URL)
    }
}

#[async_trait]
impl PatientResolver for AccountPatients {
    fn requires_login(&self) -> bool {
        true
    }

    async fn book(
        &self,
        store: &dyn Store,
        identity: &Identity,
        _contact: Option<&PatientContact>,
        new: &NewAppointment,
    ) -> ClinicResult<(Patient, Appointment)> {
        let patient = self
            .find(store, identity, None)
            .await?
            .ok_or(ClinicError::MissingPatientProfile)?;
        let appointment = store.insert_appointment(patient.id, new).await?;
        Ok((patient, appointment))
    }

    async fn find(
        &self,
        store: &dyn Store,
        identity: &Identity,
        _email: Option<&str>,
    ) -> ClinicResult<Option<Patient>> {
        match identity.user() {
            Some(user) => store.patient_for_user(user.id).await,
            None => Err(ClinicError::LoginRequired {
                login_url: self.login_url.clone(),
                next: "/".to_string(),
            }),
        }
    }
}

/// Anonymous bookings: the patient record is keyed by email and upserted.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailPatients;

#[async_trait]
impl PatientResolver for EmailPatients {
    fn requires_login(&self) -> bool {
        false
    }

    async fn book(
        &self,
        store: &dyn Store,
        _identity: &Identity,
        contact: Option<&PatientContact>,
        new: &NewAppointment,
    ) -> ClinicResult<(Patient, Appointment)> {
        let contact = contact.ok_or_else(|| ClinicError::invalid("email", REQUIRED))?;
        store.book_for_contact(contact, new).await
    }

    async fn find(
        &self,
        store: &dyn Store,
        _identity: &Identity,
        email: Option<&str>,
    ) -> ClinicResult<Option<Patient>> {
        match email {
            Some(email) => store.find_patient_by_email(email).await,
            None => Ok(None),
        }
    }
}

pub fn resolver_for(config: &Config) -> Arc<dyn PatientResolver> {
    match config.patient_mode {
        PatientMode::Account => Arc::new(AccountPatients::new(config.login_url.clone())),
        PatientMode::Email => Arc::new(EmailPatients),
    }
}

/// Validates the form and books the slot with status Pending.
///
/// The availability check here only gives early feedback: two concurrent
/// bookings can both pass it, and the store's unique key on
/// (doctor, date, time) then rejects the second one with the same message.
pub async fn book_appointment(
    store: &dyn Store,
    patients: &dyn PatientResolver,
    identity: &Identity,
    form: &BookingForm,
) -> ClinicResult<Appointment> {
    let request = form
        .validate(!patients.requires_login())
        .map_err(ClinicError::Invalid)?;

    let mut errors = FormErrors::new();
    if store.get_doctor(request.doctor_id).await?.is_none() {
        errors.add("doctor", INVALID_CHOICE);
    } else if store
        .slot_taken(request.doctor_id, request.date, &request.time)
        .await?
    {
        warn!(
            "slot {} {} of doctor {} already booked",
            request.date, request.time, request.doctor_id
        );
        return Err(ClinicError::slot_taken());
    }
    errors.into_result()?;

    let new = NewAppointment {
        doctor_id: request.doctor_id,
        date: request.date,
        time: request.time,
        notes: request.notes,
    };
    let (patient, appointment) = patients
        .book(store, identity, request.contact.as_ref(), &new)
        .await?;
    info!(
        "appointment {} booked: patient {} with doctor {} on {} at {}",
        appointment.id, patient.id, appointment.doctor_id, appointment.date, appointment.time
    );
    Ok(appointment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SLOT_TAKEN;
    use crate::models::{AppointmentStatus, DoctorInput, User};
    use crate::store::MemoryStore;
    use time::macros::date;
    use time::OffsetDateTime;

    async fn doctor(store: &MemoryStore) -> i64 {
        store
            .insert_doctor(&DoctorInput {
                name: "Dr A".into(),
                specialization_id: None,
                experience: 3,
                fees: 50,
                available_days: "Mon".into(),
                time_slots: "10:00 AM".into(),
                biography: String::new(),
            })
            .await
            .unwrap()
            .id
    }

    fn form(doctor_id: i64, email: &str) -> BookingForm {
        BookingForm {
            name: "Ana".into(),
            phone: "555".into(),
            email: email.into(),
            doctor: doctor_id.to_string(),
            date: "2024-01-10".into(),
            time: "10:00 AM".into(),
            notes: "first visit".into(),
        }
    }

    #[tokio::test]
    async fn second_booking_of_a_slot_fails() {
        let store = MemoryStore::new();
        let doctor_id = doctor(&store).await;

        let first = book_appointment(&store, &EmailPatients, &Identity::Anonymous, &form(doctor_id, "a@x.org"))
            .await
            .unwrap();
        assert_eq!(first.status, AppointmentStatus::Pending);
        assert_eq!(first.date, date!(2024 - 01 - 10));

        let err = book_appointment(&store, &EmailPatients, &Identity::Anonymous, &form(doctor_id, "b@x.org"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), SLOT_TAKEN);
        assert_eq!(store.count_appointments(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_doctor_is_a_field_error() {
        let store = MemoryStore::new();
        let err = book_appointment(&store, &EmailPatients, &Identity::Anonymous, &form(99, "a@x.org"))
            .await
            .unwrap_err();
        let errors = err.form_errors().unwrap();
        assert_eq!(errors.for_field("doctor"), vec![INVALID_CHOICE]);
    }

    #[tokio::test]
    async fn slot_labels_are_not_checked_against_the_doctor() {
        let store = MemoryStore::new();
        let doctor_id = doctor(&store).await;
        let mut unusual = form(doctor_id, "a@x.org");
        unusual.time = "3:15 AM".into();
        let booked = book_appointment(&store, &EmailPatients, &Identity::Anonymous, &unusual)
            .await
            .unwrap();
        assert_eq!(booked.time, "3:15 AM");
    }

    #[tokio::test]
    async fn email_strategy_reuses_patient_by_email() {
        let store = MemoryStore::new();
        let doctor_id = doctor(&store).await;
        let mut second = form(doctor_id, "a@x.org");
        second.time = "11:00 AM".into();

        let a = book_appointment(&store, &EmailPatients, &Identity::Anonymous, &form(doctor_id, "a@x.org"))
            .await
            .unwrap();
        let b = book_appointment(&store, &EmailPatients, &Identity::Anonymous, &second)
            .await
            .unwrap();
        assert_eq!(a.patient_id, b.patient_id);
        assert_eq!(store.count_patients().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn account_strategy_needs_a_profile() {
        let store = MemoryStore::new();
        let doctor_id = doctor(&store).await;
        let (bare, _) = store.create_account("bare", false, None).await.unwrap();

        let err = book_appointment(&store, &AccountPatients::default(), &Identity::User(bare), &form(doctor_id, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::MissingPatientProfile));
        assert_eq!(store.count_appointments(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn account_strategy_books_for_linked_patient() {
        let store = MemoryStore::new();
        let doctor_id = doctor(&store).await;
        let contact = PatientContact {
            name: "Ana".into(),
            phone: "555".into(),
            email: "ana@x.org".into(),
        };
        let (user, patient) = store.create_account("ana", false, Some(&contact)).await.unwrap();

        // contact fields are not part of the account flow
        let booked = book_appointment(&store, &AccountPatients::default(), &Identity::User(user), &form(doctor_id, ""))
            .await
            .unwrap();
        assert_eq!(booked.patient_id, patient.unwrap().id);
    }

    #[tokio::test]
    async fn account_strategy_rejects_anonymous() {
        let store = MemoryStore::new();
        let found = AccountPatients::new("/sign-in/")
            .find(&store, &Identity::Anonymous, None)
            .await;
        match found {
            Err(ClinicError::LoginRequired { login_url, .. }) => assert_eq!(login_url, "/sign-in/"),
            other => panic!("expected a login challenge, got {other:?}"),
        }

        let stranger = Identity::User(User {
            id: 404,
            username: "ghost".into(),
            is_staff: false,
            created_at: OffsetDateTime::UNIX_EPOCH,
        });
        assert!(AccountPatients::default().find(&store, &stranger, None).await.unwrap().is_none());
    }
}
