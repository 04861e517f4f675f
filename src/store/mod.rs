//! Entity store: persistent records for specializations, doctors, patients,
//! accounts and appointments.
//!
//! Both backends enforce the same uniqueness rules at the storage level:
//! one appointment per (doctor, date, time), unique specialization names,
//! unique patient emails and usernames. Violations come back as
//! [`ClinicError::Invalid`] so callers never see a raw constraint failure.

use async_trait::async_trait;
use time::{Date, Duration};
use uuid::Uuid;

use crate::error::ClinicResult;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentListing, AppointmentStatus, Doctor, DoctorInput,
    DoctorListing, NewAppointment, Patient, PatientContact, Specialization, User,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub(crate) const DUPLICATE_SPECIALIZATION: &str = "Specialization with this Name already exists.";
pub(crate) const DUPLICATE_EMAIL: &str = "Patient with this Email already exists.";
pub(crate) const DUPLICATE_USERNAME: &str = "A user with that username already exists.";
pub(crate) const DUPLICATE_PROFILE: &str = "This account already has a patient profile.";
pub(crate) const INVALID_CHOICE: &str =
    "Select a valid choice. That choice is not one of the available choices.";

/// Lifetime of a session token from the moment it is issued.
pub const SESSION_TTL: Duration = Duration::weeks(2);

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_specializations(&self) -> ClinicResult<Vec<Specialization>>;
    async fn get_specialization(&self, id: i64) -> ClinicResult<Option<Specialization>>;
    async fn insert_specialization(&self, name: &str) -> ClinicResult<Specialization>;
    async fn update_specialization(&self, id: i64, name: &str) -> ClinicResult<Specialization>;
    /// Clears the reference on every doctor pointing at `id`, then deletes the
    /// specialization, atomically. Returns how many doctors were cleared.
    async fn delete_specialization(&self, id: i64) -> ClinicResult<u64>;
    async fn count_doctors_with_specialization(&self, id: i64) -> ClinicResult<i64>;

    /// Doctors ordered by name, optionally restricted to one specialization.
    async fn list_doctors(
        &self,
        specialization_id: Option<i64>,
        limit: Option<i64>,
    ) -> ClinicResult<Vec<DoctorListing>>;
    async fn get_doctor(&self, id: i64) -> ClinicResult<Option<DoctorListing>>;
    async fn insert_doctor(&self, input: &DoctorInput) -> ClinicResult<Doctor>;
    async fn update_doctor(&self, id: i64, input: &DoctorInput) -> ClinicResult<Doctor>;
    /// Deletes the doctor and its appointments. Returns the appointment count removed.
    async fn delete_doctor(&self, id: i64) -> ClinicResult<u64>;
    async fn count_doctors(&self) -> ClinicResult<i64>;

    async fn patient_for_user(&self, user_id: i64) -> ClinicResult<Option<Patient>>;
    async fn find_patient_by_email(&self, email: &str) -> ClinicResult<Option<Patient>>;
    async fn count_patients(&self) -> ClinicResult<i64>;

    /// Creates a user and, when `contact` is given, its one-to-one patient profile.
    async fn create_account(
        &self,
        username: &str,
        is_staff: bool,
        contact: Option<&PatientContact>,
    ) -> ClinicResult<(User, Option<Patient>)>;
    async fn find_user(&self, username: &str) -> ClinicResult<Option<User>>;
    /// Issues a token valid for [`SESSION_TTL`].
    async fn open_session(&self, user_id: i64) -> ClinicResult<Uuid>;
    /// The user behind an unexpired token.
    async fn user_for_session(&self, token: Uuid) -> ClinicResult<Option<User>>;
    async fn close_session(&self, token: Uuid) -> ClinicResult<()>;
    /// Revokes every token of the user. Returns how many were removed.
    async fn close_user_sessions(&self, user_id: i64) -> ClinicResult<u64>;

    async fn slot_taken(&self, doctor_id: i64, date: Date, time: &str) -> ClinicResult<bool>;
    async fn insert_appointment(
        &self,
        patient_id: i64,
        new: &NewAppointment,
    ) -> ClinicResult<Appointment>;
    /// Creates the patient owning `contact.email`, or refreshes its name and
    /// phone, and books `new` for it. Nothing is kept when the booking fails.
    async fn book_for_contact(
        &self,
        contact: &PatientContact,
        new: &NewAppointment,
    ) -> ClinicResult<(Patient, Appointment)>;
    async fn get_appointment(&self, id: i64) -> ClinicResult<Option<Appointment>>;
    async fn set_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> ClinicResult<Appointment>;
    /// Appointments matching `filter`, newest date first, then time label descending.
    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
    ) -> ClinicResult<Vec<AppointmentListing>>;
    async fn count_appointments(&self, status: Option<AppointmentStatus>) -> ClinicResult<i64>;
    async fn appointments_by_status(&self) -> ClinicResult<Vec<(AppointmentStatus, i64)>>;
}
