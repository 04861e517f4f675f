use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex as TokioMutex;
use uuid::Uuid;

use super::{
    Store, DUPLICATE_EMAIL, DUPLICATE_PROFILE, DUPLICATE_SPECIALIZATION, DUPLICATE_USERNAME,
    INVALID_CHOICE, SESSION_TTL,
};
use crate::error::{ClinicError, ClinicResult, NON_FIELD};
use crate::forms::REQUIRED;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentListing, AppointmentStatus, Doctor, DoctorInput,
    DoctorListing, NewAppointment, Patient, PatientContact, Specialization, User,
};

#[derive(Debug, Clone, Copy)]
struct Session {
    user_id: i64,
    expires_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    specializations: BTreeMap<i64, Specialization>,
    doctors: BTreeMap<i64, Doctor>,
    patients: BTreeMap<i64, Patient>,
    users: BTreeMap<i64, User>,
    sessions: HashMap<Uuid, Session>,
    appointments: BTreeMap<i64, Appointment>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_name(&self, name: &str, except: Option<i64>) -> ClinicResult<()> {
        if name.trim().is_empty() {
            return Err(ClinicError::invalid("name", REQUIRED));
        }
        let taken = self
            .specializations
            .values()
            .any(|s| s.name == name && Some(s.id) != except);
        if taken {
            return Err(ClinicError::invalid("name", DUPLICATE_SPECIALIZATION));
        }
        Ok(())
    }

    fn check_specialization(&self, id: Option<i64>) -> ClinicResult<()> {
        match id {
            Some(id) if !self.specializations.contains_key(&id) => {
                Err(ClinicError::invalid("specialization", INVALID_CHOICE))
            }
            _ => Ok(()),
        }
    }

    fn listing(&self, doctor: &Doctor) -> DoctorListing {
        DoctorListing {
            specialization_name: doctor
                .specialization_id
                .and_then(|id| self.specializations.get(&id))
                .map(|s| s.name.clone()),
            doctor: doctor.clone(),
        }
    }

    fn insert_patient(&mut self, user_id: Option<i64>, contact: &PatientContact) -> ClinicResult<Patient> {
        if self.patients.values().any(|p| p.email == contact.email) {
            return Err(ClinicError::invalid("email", DUPLICATE_EMAIL));
        }
        if user_id.is_some() && self.patients.values().any(|p| p.user_id == user_id) {
            return Err(ClinicError::invalid(NON_FIELD, DUPLICATE_PROFILE));
        }
        let patient = Patient {
            id: self.next_id(),
            user_id,
            name: contact.name.clone(),
            phone: contact.phone.clone(),
            email: contact.email.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    fn upsert_patient(&mut self, contact: &PatientContact) -> ClinicResult<Patient> {
        if let Some(patient) = self.patients.values_mut().find(|p| p.email == contact.email) {
            patient.name = contact.name.clone();
            patient.phone = contact.phone.clone();
            return Ok(patient.clone());
        }
        self.insert_patient(None, contact)
    }

    /// Doctor must exist and the (doctor, date, time) key must be free.
    fn check_slot(&self, new: &NewAppointment) -> ClinicResult<()> {
        if !self.doctors.contains_key(&new.doctor_id) {
            return Err(ClinicError::invalid("doctor", INVALID_CHOICE));
        }
        let taken = self.appointments.values().any(|a| {
            a.doctor_id == new.doctor_id && a.date == new.date && a.time == new.time
        });
        if taken {
            return Err(ClinicError::slot_taken());
        }
        Ok(())
    }

    fn push_appointment(&mut self, patient_id: i64, new: &NewAppointment) -> Appointment {
        let appointment = Appointment {
            id: self.next_id(),
            patient_id,
            doctor_id: new.doctor_id,
            date: new.date,
            time: new.time.clone(),
            status: AppointmentStatus::Pending,
            notes: new.notes.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.appointments.insert(appointment.id, appointment.clone());
        appointment
    }
}

/// Process-local store behind a single lock, so every operation is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: TokioMutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_doctor(doctor: &mut Doctor, input: &DoctorInput) {
    doctor.name = input.name.clone();
    doctor.specialization_id = input.specialization_id;
    doctor.experience = input.experience;
    doctor.fees = input.fees;
    doctor.available_days_raw = input.available_days.clone();
    doctor.time_slots_raw = input.time_slots.clone();
    doctor.biography = input.biography.clone();
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_specializations(&self) -> ClinicResult<Vec<Specialization>> {
        let tables = self.tables.lock().await;
        let mut all: Vec<Specialization> = tables.specializations.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn get_specialization(&self, id: i64) -> ClinicResult<Option<Specialization>> {
        Ok(self.tables.lock().await.specializations.get(&id).cloned())
    }

    async fn insert_specialization(&self, name: &str) -> ClinicResult<Specialization> {
        let mut tables = self.tables.lock().await;
        tables.check_name(name, None)?;
        let specialization = Specialization {
            id: tables.next_id(),
            name: name.to_string(),
        };
        tables
            .specializations
            .insert(specialization.id, specialization.clone());
        Ok(specialization)
    }

    async fn update_specialization(&self, id: i64, name: &str) -> ClinicResult<Specialization> {
        let mut tables = self.tables.lock().await;
        tables.check_name(name, Some(id))?;
        let specialization = tables
            .specializations
            .get_mut(&id)
            .ok_or(ClinicError::NotFound("Specialization"))?;
        specialization.name = name.to_string();
        Ok(specialization.clone())
    }

    async fn delete_specialization(&self, id: i64) -> ClinicResult<u64> {
        let mut tables = self.tables.lock().await;
        if tables.specializations.remove(&id).is_none() {
            return Err(ClinicError::NotFound("Specialization"));
        }
        let mut cleared = 0;
        for doctor in tables.doctors.values_mut() {
            if doctor.specialization_id == Some(id) {
                doctor.specialization_id = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn count_doctors_with_specialization(&self, id: i64) -> ClinicResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .doctors
            .values()
            .filter(|d| d.specialization_id == Some(id))
            .count() as i64)
    }

    async fn list_doctors(
        &self,
        specialization_id: Option<i64>,
        limit: Option<i64>,
    ) -> ClinicResult<Vec<DoctorListing>> {
        let tables = self.tables.lock().await;
        let mut doctors: Vec<&Doctor> = tables
            .doctors
            .values()
            .filter(|d| specialization_id.map_or(true, |id| d.specialization_id == Some(id)))
            .collect();
        doctors.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        let limit = limit.map_or(usize::MAX, |n| n.max(0) as usize);
        Ok(doctors
            .into_iter()
            .take(limit)
            .map(|d| tables.listing(d))
            .collect())
    }

    async fn get_doctor(&self, id: i64) -> ClinicResult<Option<DoctorListing>> {
        let tables = self.tables.lock().await;
        Ok(tables.doctors.get(&id).map(|d| tables.listing(d)))
    }

    async fn insert_doctor(&self, input: &DoctorInput) -> ClinicResult<Doctor> {
        let mut tables = self.tables.lock().await;
        tables.check_specialization(input.specialization_id)?;
        let mut doctor = Doctor {
            id: tables.next_id(),
            name: String::new(),
            specialization_id: None,
            experience: 0,
            fees: 0,
            available_days_raw: String::new(),
            time_slots_raw: String::new(),
            biography: String::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        apply_doctor(&mut doctor, input);
        tables.doctors.insert(doctor.id, doctor.clone());
        Ok(doctor)
    }

    async fn update_doctor(&self, id: i64, input: &DoctorInput) -> ClinicResult<Doctor> {
        let mut tables = self.tables.lock().await;
        tables.check_specialization(input.specialization_id)?;
        let doctor = tables
            .doctors
            .get_mut(&id)
            .ok_or(ClinicError::NotFound("Doctor"))?;
        apply_doctor(doctor, input);
        Ok(doctor.clone())
    }

    async fn delete_doctor(&self, id: i64) -> ClinicResult<u64> {
        let mut tables = self.tables.lock().await;
        if tables.doctors.remove(&id).is_none() {
            return Err(ClinicError::NotFound("Doctor"));
        }
        let before = tables.appointments.len();
        tables.appointments.retain(|_, a| a.doctor_id != id);
        Ok((before - tables.appointments.len()) as u64)
    }

    async fn count_doctors(&self) -> ClinicResult<i64> {
        Ok(self.tables.lock().await.doctors.len() as i64)
    }

    async fn patient_for_user(&self, user_id: i64) -> ClinicResult<Option<Patient>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .patients
            .values()
            .find(|p| p.user_id == Some(user_id))
            .cloned())
    }

    async fn find_patient_by_email(&self, email: &str) -> ClinicResult<Option<Patient>> {
        let tables = self.tables.lock().await;
        Ok(tables.patients.values().find(|p| p.email == email).cloned())
    }

    async fn count_patients(&self) -> ClinicResult<i64> {
        Ok(self.tables.lock().await.patients.len() as i64)
    }

    async fn create_account(
        &self,
        username: &str,
        is_staff: bool,
        contact: Option<&PatientContact>,
    ) -> ClinicResult<(User, Option<Patient>)> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.username == username) {
            return Err(ClinicError::invalid("username", DUPLICATE_USERNAME));
        }
        if let Some(contact) = contact {
            if tables.patients.values().any(|p| p.email == contact.email) {
                return Err(ClinicError::invalid("email", DUPLICATE_EMAIL));
            }
        }
        let user = User {
            id: tables.next_id(),
            username: username.to_string(),
            is_staff,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.users.insert(user.id, user.clone());
        let patient = match contact {
            Some(contact) => Some(tables.insert_patient(Some(user.id), contact)?),
            None => None,
        };
        Ok((user, patient))
    }

    async fn find_user(&self, username: &str) -> ClinicResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn open_session(&self, user_id: i64) -> ClinicResult<Uuid> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            return Err(ClinicError::NotFound("User"));
        }
        let token = Uuid::new_v4();
        let session = Session {
            user_id,
            expires_at: OffsetDateTime::now_utc() + SESSION_TTL,
        };
        tables.sessions.insert(token, session);
        Ok(token)
    }

    async fn user_for_session(&self, token: Uuid) -> ClinicResult<Option<User>> {
        let tables = self.tables.lock().await;
        let now = OffsetDateTime::now_utc();
        Ok(tables
            .sessions
            .get(&token)
            .filter(|session| session.expires_at > now)
            .and_then(|session| tables.users.get(&session.user_id))
            .cloned())
    }

    async fn close_session(&self, token: Uuid) -> ClinicResult<()> {
        self.tables.lock().await.sessions.remove(&token);
        Ok(())
    }

    async fn close_user_sessions(&self, user_id: i64) -> ClinicResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.user_id != user_id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn slot_taken(&self, doctor_id: i64, date: Date, time: &str) -> ClinicResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .appointments
            .values()
            .any(|a| a.doctor_id == doctor_id && a.date == date && a.time == time))
    }

    async fn insert_appointment(
        &self,
        patient_id: i64,
        new: &NewAppointment,
    ) -> ClinicResult<Appointment> {
        let mut tables = self.tables.lock().await;
        tables.check_slot(new)?;
        if !tables.patients.contains_key(&patient_id) {
            return Err(ClinicError::NotFound("Patient"));
        }
        Ok(tables.push_appointment(patient_id, new))
    }

    async fn book_for_contact(
        &self,
        contact: &PatientContact,
        new: &NewAppointment,
    ) -> ClinicResult<(Patient, Appointment)> {
        let mut tables = self.tables.lock().await;
        tables.check_slot(new)?;
        let patient = tables.upsert_patient(contact)?;
        let appointment = tables.push_appointment(patient.id, new);
        Ok((patient, appointment))
    }

    async fn get_appointment(&self, id: i64) -> ClinicResult<Option<Appointment>> {
        Ok(self.tables.lock().await.appointments.get(&id).cloned())
    }

    async fn set_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> ClinicResult<Appointment> {
        let mut tables = self.tables.lock().await;
        let appointment = tables
            .appointments
            .get_mut(&id)
            .ok_or(ClinicError::NotFound("Appointment"))?;
        appointment.status = status;
        Ok(appointment.clone())
    }

    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
    ) -> ClinicResult<Vec<AppointmentListing>> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<&Appointment> = tables
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .collect();
        matching.sort_by_key(|a| (Reverse(a.date), Reverse(a.time.clone()), Reverse(a.id)));
        let limit = filter.limit.map_or(usize::MAX, |n| n.max(0) as usize);

        let mut listings = Vec::new();
        for appointment in matching.into_iter().take(limit) {
            let doctor = tables.doctors.get(&appointment.doctor_id);
            let patient = tables.patients.get(&appointment.patient_id);
            if let (Some(doctor), Some(patient)) = (doctor, patient) {
                listings.push(AppointmentListing {
                    appointment: appointment.clone(),
                    doctor_name: doctor.name.clone(),
                    patient_name: patient.name.clone(),
                });
            }
        }
        Ok(listings)
    }

    async fn count_appointments(&self, status: Option<AppointmentStatus>) -> ClinicResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .appointments
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .count() as i64)
    }

    async fn appointments_by_status(&self) -> ClinicResult<Vec<(AppointmentStatus, i64)>> {
        let tables = self.tables.lock().await;
        let mut totals: BTreeMap<AppointmentStatus, i64> = BTreeMap::new();
        for appointment in tables.appointments.values() {
            *totals.entry(appointment.status).or_default() += 1;
        }
        Ok(totals.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SLOT_TAKEN;
    use time::macros::date;

    fn doctor_input(name: &str, specialization_id: Option<i64>) -> DoctorInput {
        DoctorInput {
            name: name.to_string(),
            specialization_id,
            experience: 5,
            fees: 100,
            available_days: "Mon,Tue".into(),
            time_slots: "9:00 AM,10:00 AM".into(),
            biography: String::new(),
        }
    }

    fn slot(doctor_id: i64, date: Date, time: &str) -> NewAppointment {
        NewAppointment {
            doctor_id,
            date,
            time: time.into(),
            notes: String::new(),
        }
    }

    fn contact(email: &str) -> PatientContact {
        PatientContact {
            name: "Ana".into(),
            phone: "555-0100".into(),
            email: email.into(),
        }
    }

    #[tokio::test]
    async fn specialization_names_are_unique() {
        let store = MemoryStore::new();
        let cardio = store.insert_specialization("Cardiology").await.unwrap();
        let err = store.insert_specialization("Cardiology").await.unwrap_err();
        assert_eq!(err.to_string(), DUPLICATE_SPECIALIZATION);

        // renaming to its own name is fine, to another's is not
        store.update_specialization(cardio.id, "Cardiology").await.unwrap();
        store.insert_specialization("Neurology").await.unwrap();
        assert!(store.update_specialization(cardio.id, "Neurology").await.is_err());
    }

    #[tokio::test]
    async fn deleting_specialization_clears_doctors() {
        let store = MemoryStore::new();
        let spec = store.insert_specialization("Dermatology").await.unwrap();
        let a = store.insert_doctor(&doctor_input("A", Some(spec.id))).await.unwrap();
        let b = store.insert_doctor(&doctor_input("B", Some(spec.id))).await.unwrap();
        store.insert_doctor(&doctor_input("C", None)).await.unwrap();

        assert_eq!(store.delete_specialization(spec.id).await.unwrap(), 2);
        assert_eq!(store.count_doctors().await.unwrap(), 3);
        for id in [a.id, b.id] {
            let doctor = store.get_doctor(id).await.unwrap().unwrap();
            assert_eq!(doctor.doctor.specialization_id, None);
        }
        assert!(store.get_specialization(spec.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_specialization(spec.id).await,
            Err(ClinicError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_doctor_cascades_appointments() {
        let store = MemoryStore::new();
        let doctor = store.insert_doctor(&doctor_input("A", None)).await.unwrap();
        store
            .book_for_contact(&contact("a@example.com"), &slot(doctor.id, date!(2024 - 01 - 10), "9:00 AM"))
            .await
            .unwrap();

        assert_eq!(store.delete_doctor(doctor.id).await.unwrap(), 1);
        assert_eq!(store.count_appointments(None).await.unwrap(), 0);
        assert_eq!(store.count_patients().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn booking_by_contact_refreshes_existing_patient() {
        let store = MemoryStore::new();
        let doctor = store.insert_doctor(&doctor_input("A", None)).await.unwrap();
        let (first, _) = store
            .book_for_contact(&contact("b@example.com"), &slot(doctor.id, date!(2024 - 01 - 10), "9:00 AM"))
            .await
            .unwrap();
        let mut changed = contact("b@example.com");
        changed.phone = "555-0199".into();
        let (second, _) = store
            .book_for_contact(&changed, &slot(doctor.id, date!(2024 - 01 - 10), "10:00 AM"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.phone, "555-0199");
        assert_eq!(store.count_patients().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lost_slot_leaves_patients_untouched() {
        let store = MemoryStore::new();
        let doctor = store.insert_doctor(&doctor_input("A", None)).await.unwrap();
        let taken = slot(doctor.id, date!(2024 - 01 - 10), "9:00 AM");
        store.book_for_contact(&contact("first@example.com"), &taken).await.unwrap();

        let mut renamed = contact("first@example.com");
        renamed.name = "Someone Else".into();
        for who in [contact("new@example.com"), renamed] {
            let err = store.book_for_contact(&who, &taken).await.unwrap_err();
            assert_eq!(err.to_string(), SLOT_TAKEN);
        }
        assert_eq!(store.count_patients().await.unwrap(), 1);
        let kept = store.find_patient_by_email("first@example.com").await.unwrap().unwrap();
        assert_eq!(kept.name, "Ana");
    }

    #[tokio::test]
    async fn slot_key_is_enforced_without_the_precheck() {
        let store = MemoryStore::new();
        let doctor = store.insert_doctor(&doctor_input("A", None)).await.unwrap();
        let (_, patient) = store
            .create_account("ana", false, Some(&contact("ana@example.com")))
            .await
            .unwrap();
        let patient = patient.unwrap();
        let key = slot(doctor.id, date!(2024 - 01 - 10), "10:00 AM");

        store.insert_appointment(patient.id, &key).await.unwrap();
        let err = store.insert_appointment(patient.id, &key).await.unwrap_err();
        assert!(matches!(err, ClinicError::Invalid(_)));
        assert_eq!(err.form_errors().unwrap().for_field(NON_FIELD), vec![SLOT_TAKEN]);
        assert_eq!(store.count_appointments(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blank_specialization_names_are_rejected() {
        let store = MemoryStore::new();
        let err = store.insert_specialization("   ").await.unwrap_err();
        assert_eq!(err.form_errors().unwrap().for_field("name"), vec![REQUIRED]);
        let spec = store.insert_specialization("Cardiology").await.unwrap();
        assert!(store.update_specialization(spec.id, "").await.is_err());
        assert_eq!(store.list_specializations().await.unwrap(), vec![spec]);
    }

    #[tokio::test]
    async fn expired_and_revoked_sessions_resolve_to_nobody() {
        let store = MemoryStore::new();
        let (user, _) = store.create_account("staff", true, None).await.unwrap();
        let old = store.open_session(user.id).await.unwrap();
        let other = store.open_session(user.id).await.unwrap();

        store.tables.lock().await.sessions.insert(
            old,
            Session {
                user_id: user.id,
                expires_at: OffsetDateTime::now_utc() - time::Duration::seconds(1),
            },
        );
        assert!(store.user_for_session(old).await.unwrap().is_none());
        assert_eq!(store.user_for_session(other).await.unwrap(), Some(user.clone()));

        assert_eq!(store.close_user_sessions(user.id).await.unwrap(), 2);
        assert!(store.user_for_session(other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accounts_and_sessions() {
        let store = MemoryStore::new();
        let (user, patient) = store
            .create_account("ana", false, Some(&contact("ana@example.com")))
            .await
            .unwrap();
        assert_eq!(patient.unwrap().user_id, Some(user.id));
        assert!(store.create_account("ana", false, None).await.is_err());

        let token = store.open_session(user.id).await.unwrap();
        assert_eq!(store.user_for_session(token).await.unwrap(), Some(user));
        store.close_session(token).await.unwrap();
        assert!(store.user_for_session(token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_orders_by_date_then_time_label() {
        let store = MemoryStore::new();
        let doctor = store.insert_doctor(&doctor_input("A", None)).await.unwrap();
        for (day, label) in [
            (date!(2024 - 01 - 09), "9:00 AM"),
            (date!(2024 - 01 - 10), "10:00 AM"),
            (date!(2024 - 01 - 10), "9:00 AM"),
        ] {
            store
                .book_for_contact(&contact("c@example.com"), &slot(doctor.id, day, label))
                .await
                .unwrap();
        }

        let listed = store.list_appointments(&AppointmentFilter::default()).await.unwrap();
        let keys: Vec<(Date, &str)> = listed
            .iter()
            .map(|l| (l.appointment.date, l.appointment.time.as_str()))
            .collect();
        // "9:00 AM" sorts after "10:00 AM" lexically
        assert_eq!(
            keys,
            vec![
                (date!(2024 - 01 - 10), "9:00 AM"),
                (date!(2024 - 01 - 10), "10:00 AM"),
                (date!(2024 - 01 - 09), "9:00 AM"),
            ]
        );
        assert_eq!(listed[0].doctor_name, "A");
        assert_eq!(listed[0].patient_name, "Ana");
    }
}
