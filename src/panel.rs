//! Staff-only mutations. Callers are expected to have passed the staff guard.

use log::info;
use serde::Serialize;

use crate::error::{ClinicError, ClinicResult};
use crate::forms::{DoctorForm, SpecializationForm, StatusForm};
use crate::models::{Appointment, AppointmentStatus, Doctor, Specialization};
use crate::store::Store;

/// Creates the doctor, or updates doctor `id` when given.
pub async fn upsert_doctor(
    store: &dyn Store,
    id: Option<i64>,
    form: &DoctorForm,
) -> ClinicResult<Doctor> {
    let input = form.validate().map_err(ClinicError::Invalid)?;
    let doctor = match id {
        Some(id) => store.update_doctor(id, &input).await?,
        None => store.insert_doctor(&input).await?,
    };
    info!("doctor {} ({}) saved", doctor.id, doctor.name);
    Ok(doctor)
}

pub async fn delete_doctor(store: &dyn Store, id: i64) -> ClinicResult<()> {
    let removed = store.delete_doctor(id).await?;
    info!("doctor {} deleted with {} appointments", id, removed);
    Ok(())
}

/// Creates the specialization, or renames specialization `id` when given.
pub async fn upsert_specialization(
    store: &dyn Store,
    id: Option<i64>,
    form: &SpecializationForm,
) -> ClinicResult<Specialization> {
    let name = form.validate().map_err(ClinicError::Invalid)?;
    let specialization = match id {
        Some(id) => store.update_specialization(id, &name).await?,
        None => store.insert_specialization(&name).await?,
    };
    info!("specialization {} saved as {:?}", specialization.id, specialization.name);
    Ok(specialization)
}

/// Detaches every doctor from the specialization, then removes it.
pub async fn delete_specialization(store: &dyn Store, id: i64) -> ClinicResult<u64> {
    let cleared = store.delete_specialization(id).await?;
    info!("specialization {} deleted, {} doctors cleared", id, cleared);
    Ok(cleared)
}

/// Any status may follow any other.
pub async fn update_appointment_status(
    store: &dyn Store,
    id: i64,
    status: AppointmentStatus,
) -> ClinicResult<Appointment> {
    let appointment = store.set_appointment_status(id, status).await?;
    info!("appointment {} set to {}", id, status);
    Ok(appointment)
}

/// Status change as posted from the appointment list.
pub async fn apply_status_form(store: &dyn Store, form: &StatusForm) -> ClinicResult<Appointment> {
    let id = form
        .appointment_id()
        .ok_or(ClinicError::NotFound("Appointment"))?;
    if store.get_appointment(id).await?.is_none() {
        return Err(ClinicError::NotFound("Appointment"));
    }
    let status = form.status().map_err(ClinicError::Invalid)?;
    update_appointment_status(store, id, status).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecializationDetail {
    pub id: i64,
    pub name: String,
    pub doctor_count: i64,
}

pub async fn specialization_detail(store: &dyn Store, id: i64) -> ClinicResult<SpecializationDetail> {
    let specialization = store
        .get_specialization(id)
        .await?
        .ok_or(ClinicError::NotFound("Specialization"))?;
    let doctor_count = store.count_doctors_with_specialization(id).await?;
    Ok(SpecializationDetail {
        id: specialization.id,
        name: specialization.name,
        doctor_count,
    })
}
