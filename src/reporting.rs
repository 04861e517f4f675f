use serde::Serialize;

use crate::access::Identity;
use crate::booking::PatientResolver;
use crate::error::ClinicResult;
use crate::models::{AppointmentFilter, AppointmentListing, AppointmentStatus, DoctorListing};
use crate::store::Store;

const FEATURED_DOCTORS: i64 = 6;
const RECENT_APPOINTMENTS: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub doctors: i64,
    pub patients: i64,
    pub appointments: i64,
    pub pending: i64,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub counts: Counts,
    pub by_status: Vec<(AppointmentStatus, i64)>,
    pub recent: Vec<AppointmentListing>,
}

#[derive(Debug, Clone)]
pub struct HomePage {
    pub counts: Counts,
    pub featured: Vec<DoctorListing>,
}

pub async fn counts(store: &dyn Store) -> ClinicResult<Counts> {
    Ok(Counts {
        doctors: store.count_doctors().await?,
        patients: store.count_patients().await?,
        appointments: store.count_appointments(None).await?,
        pending: store.count_appointments(Some(AppointmentStatus::Pending)).await?,
    })
}

pub async fn home(store: &dyn Store) -> ClinicResult<HomePage> {
    Ok(HomePage {
        counts: counts(store).await?,
        featured: store.list_doctors(None, Some(FEATURED_DOCTORS)).await?,
    })
}

pub async fn dashboard(store: &dyn Store) -> ClinicResult<Dashboard> {
    Ok(Dashboard {
        counts: counts(store).await?,
        by_status: store.appointments_by_status().await?,
        recent: store
            .list_appointments(&AppointmentFilter {
                limit: Some(RECENT_APPOINTMENTS),
                ..Default::default()
            })
            .await?,
    })
}

pub async fn appointments(
    store: &dyn Store,
    filter: &AppointmentFilter,
) -> ClinicResult<Vec<AppointmentListing>> {
    store.list_appointments(filter).await
}

pub async fn doctors(
    store: &dyn Store,
    specialization_id: Option<i64>,
) -> ClinicResult<Vec<DoctorListing>> {
    store.list_doctors(specialization_id, None).await
}

/// Appointments of the patient the resolver picks; none when there is no
/// such patient yet.
pub async fn history(
    store: &dyn Store,
    patients: &dyn PatientResolver,
    identity: &Identity,
    email: Option<&str>,
) -> ClinicResult<Vec<AppointmentListing>> {
    match patients.find(store, identity, email).await? {
        Some(patient) => {
            store
                .list_appointments(&AppointmentFilter {
                    patient_id: Some(patient.id),
                    ..Default::default()
                })
                .await
        }
        None => Ok(Vec::new()),
    }
}
