use async_trait::async_trait;
use log::error;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use time::{Date, OffsetDateTime};
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

const DOCTOR_COLUMNS: &str = "d.id, d.name, d.specialization_id, d.experience, d.fees, \
     d.available_days, d.time_slots, d.biography, d.created_at";

const APPOINTMENT_COLUMNS: &str = "a.id, a.patient_id, a.doctor_id, a.\"date\", a.\"time\", \
     a.status, a.notes, a.created_at";

/// Turns constraint violations into form errors; anything else stays a storage error.
fn map_db_err(err: sqlx::Error) -> ClinicError {
    let constraint = err
        .as_database_error()
        .and_then(|db| db.constraint())
        .map(str::to_owned);
    match constraint.as_deref() {
        Some("appointments_doctor_date_time_key") => ClinicError::slot_taken(),
        Some("specializations_name_key") => ClinicError::invalid("name", DUPLICATE_SPECIALIZATION),
        Some("specializations_name_check") => ClinicError::invalid("name", REQUIRED),
        Some("patients_email_key") => ClinicError::invalid("email", DUPLICATE_EMAIL),
        Some("patients_user_id_key") => ClinicError::invalid(NON_FIELD, DUPLICATE_PROFILE),
        Some("users_username_key") => ClinicError::invalid("username", DUPLICATE_USERNAME),
        Some("doctors_specialization_id_fkey") => {
            ClinicError::invalid("specialization", INVALID_CHOICE)
        }
        Some("appointments_doctor_id_fkey") => ClinicError::invalid("doctor", INVALID_CHOICE),
        Some("appointments_patient_id_fkey") => ClinicError::NotFound("Patient"),
        _ => {
            error!("database error: {}", err);
            ClinicError::Storage(err)
        }
    }
}

async fn insert_appointment_row(
    conn: &mut PgConnection,
    patient_id: i64,
    new: &NewAppointment,
) -> ClinicResult<Appointment> {
    sqlx::query_as::<_, Appointment>(&format!(
        "INSERT INTO appointments AS a (patient_id, doctor_id, \"date\", \"time\", status, notes) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {APPOINTMENT_COLUMNS}"
    ))
    .bind(patient_id)
    .bind(new.doctor_id)
    .bind(new.date)
    .bind(&new.time)
    .bind(AppointmentStatus::Pending.as_str())
    .bind(&new.notes)
    .fetch_one(conn)
    .await
    .map_err(map_db_err)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    fn doctor_query(tail: &str) -> String {
        format!(
            "SELECT {DOCTOR_COLUMNS}, s.name AS specialization_name \
             FROM doctors d LEFT JOIN specializations s ON s.id = d.specialization_id {tail}"
        )
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_specializations(&self) -> ClinicResult<Vec<Specialization>> {
        sqlx::query_as::<_, Specialization>("SELECT id, name FROM specializations ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn get_specialization(&self, id: i64) -> ClinicResult<Option<Specialization>> {
        sqlx::query_as::<_, Specialization>("SELECT id, name FROM specializations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn insert_specialization(&self, name: &str) -> ClinicResult<Specialization> {
        sqlx::query_as::<_, Specialization>(
            "INSERT INTO specializations (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn update_specialization(&self, id: i64, name: &str) -> ClinicResult<Specialization> {
        sqlx::query_as::<_, Specialization>(
            "UPDATE specializations SET name = $2 WHERE id = $1 RETURNING id, name",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or(ClinicError::NotFound("Specialization"))
    }

    async fn delete_specialization(&self, id: i64) -> ClinicResult<u64> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let cleared = sqlx::query(
            "UPDATE doctors SET specialization_id = NULL WHERE specialization_id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?
        .rows_affected();
        let deleted = sqlx::query("DELETE FROM specializations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?
            .rows_affected();
        if deleted == 0 {
            // dropping the transaction rolls the update back
            return Err(ClinicError::NotFound("Specialization"));
        }
        tx.commit().await.map_err(map_db_err)?;
        Ok(cleared)
    }

    async fn count_doctors_with_specialization(&self, id: i64) -> ClinicResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM doctors WHERE specialization_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn list_doctors(
        &self,
        specialization_id: Option<i64>,
        limit: Option<i64>,
    ) -> ClinicResult<Vec<DoctorListing>> {
        let mut query = QueryBuilder::<Postgres>::new(Self::doctor_query("WHERE TRUE"));
        if let Some(id) = specialization_id {
            query.push(" AND d.specialization_id = ").push_bind(id);
        }
        query.push(" ORDER BY d.name, d.id");
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        query
            .build_query_as::<DoctorListing>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn get_doctor(&self, id: i64) -> ClinicResult<Option<DoctorListing>> {
        sqlx::query_as::<_, DoctorListing>(&Self::doctor_query("WHERE d.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn insert_doctor(&self, input: &DoctorInput) -> ClinicResult<Doctor> {
        sqlx::query_as::<_, Doctor>(
            "INSERT INTO doctors AS d \
             (name, specialization_id, experience, fees, available_days, time_slots, biography) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING d.id, d.name, d.specialization_id, d.experience, d.fees, \
             d.available_days, d.time_slots, d.biography, d.created_at",
        )
        .bind(&input.name)
        .bind(input.specialization_id)
        .bind(input.experience)
        .bind(input.fees)
        .bind(&input.available_days)
        .bind(&input.time_slots)
        .bind(&input.biography)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn update_doctor(&self, id: i64, input: &DoctorInput) -> ClinicResult<Doctor> {
        sqlx::query_as::<_, Doctor>(
            "UPDATE doctors AS d SET name = $2, specialization_id = $3, experience = $4, \
             fees = $5, available_days = $6, time_slots = $7, biography = $8 \
             WHERE d.id = $1 \
             RETURNING d.id, d.name, d.specialization_id, d.experience, d.fees, \
             d.available_days, d.time_slots, d.biography, d.created_at",
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.specialization_id)
        .bind(input.experience)
        .bind(input.fees)
        .bind(&input.available_days)
        .bind(&input.time_slots)
        .bind(&input.biography)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or(ClinicError::NotFound("Doctor"))
    }

    async fn delete_doctor(&self, id: i64) -> ClinicResult<u64> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let removed = sqlx::query("DELETE FROM appointments WHERE doctor_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM doctors WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?
            .rows_affected();
        if deleted == 0 {
            return Err(ClinicError::NotFound("Doctor"));
        }
        tx.commit().await.map_err(map_db_err)?;
        Ok(removed)
    }

    async fn count_doctors(&self) -> ClinicResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM doctors")
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn patient_for_user(&self, user_id: i64) -> ClinicResult<Option<Patient>> {
        sqlx::query_as::<_, Patient>(
            "SELECT id, user_id, name, phone, email, created_at FROM patients WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn find_patient_by_email(&self, email: &str) -> ClinicResult<Option<Patient>> {
        sqlx::query_as::<_, Patient>(
            "SELECT id, user_id, name, phone, email, created_at FROM patients WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn count_patients(&self) -> ClinicResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn create_account(
        &self,
        username: &str,
        is_staff: bool,
        contact: Option<&PatientContact>,
    ) -> ClinicResult<(User, Option<Patient>)> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, is_staff) VALUES ($1, $2) \
             RETURNING id, username, is_staff, created_at",
        )
        .bind(username)
        .bind(is_staff)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        let patient = match contact {
            Some(contact) => Some(
                sqlx::query_as::<_, Patient>(
                    "INSERT INTO patients (user_id, name, phone, email) VALUES ($1, $2, $3, $4) \
                     RETURNING id, user_id, name, phone, email, created_at",
                )
                .bind(user.id)
                .bind(&contact.name)
                .bind(&contact.phone)
                .bind(&contact.email)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_db_err)?,
            ),
            None => None,
        };
        tx.commit().await.map_err(map_db_err)?;
        Ok((user, patient))
    }

    async fn find_user(&self, username: &str) -> ClinicResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, is_staff, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn open_session(&self, user_id: i64) -> ClinicResult<Uuid> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(OffsetDateTime::now_utc() + SESSION_TTL)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(token)
    }

    async fn user_for_session(&self, token: Uuid) -> ClinicResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT u.id, u.username, u.is_staff, u.created_at \
             FROM sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn close_session(&self, token: Uuid) -> ClinicResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn close_user_sessions(&self, user_id: i64) -> ClinicResult<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(done.rows_affected())
    }

    async fn slot_taken(&self, doctor_id: i64, date: Date, time: &str) -> ClinicResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM appointments \
             WHERE doctor_id = $1 AND \"date\" = $2 AND \"time\" = $3)",
        )
        .bind(doctor_id)
        .bind(date)
        .bind(time)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn insert_appointment(
        &self,
        patient_id: i64,
        new: &NewAppointment,
    ) -> ClinicResult<Appointment> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        insert_appointment_row(&mut *conn, patient_id, new).await
    }

    async fn book_for_contact(
        &self,
        contact: &PatientContact,
        new: &NewAppointment,
    ) -> ClinicResult<(Patient, Appointment)> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let patient = sqlx::query_as::<_, Patient>(
            "INSERT INTO patients (name, phone, email) VALUES ($1, $2, $3) \
             ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name, phone = EXCLUDED.phone \
             RETURNING id, user_id, name, phone, email, created_at",
        )
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.email)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let appointment = insert_appointment_row(&mut *tx, patient.id, new).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok((patient, appointment))
    }

    async fn get_appointment(&self, id: i64) -> ClinicResult<Option<Appointment>> {
        sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments a WHERE a.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn set_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> ClinicResult<Appointment> {
        sqlx::query_as::<_, Appointment>(&format!(
            "UPDATE appointments AS a SET status = $2 WHERE a.id = $1 RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or(ClinicError::NotFound("Appointment"))
    }

    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
    ) -> ClinicResult<Vec<AppointmentListing>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {APPOINTMENT_COLUMNS}, d.name AS doctor_name, p.name AS patient_name \
             FROM appointments a \
             JOIN doctors d ON d.id = a.doctor_id \
             JOIN patients p ON p.id = a.patient_id \
             WHERE TRUE"
        ));
        if let Some(doctor_id) = filter.doctor_id {
            query.push(" AND a.doctor_id = ").push_bind(doctor_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND a.status = ").push_bind(status.as_str());
        }
        if let Some(patient_id) = filter.patient_id {
            query.push(" AND a.patient_id = ").push_bind(patient_id);
        }
        // time labels compare bytewise, like the in-memory store
        query.push(" ORDER BY a.\"date\" DESC, a.\"time\" COLLATE \"C\" DESC, a.id DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        query
            .build_query_as::<AppointmentListing>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn count_appointments(&self, status: Option<AppointmentStatus>) -> ClinicResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM appointments WHERE $1::text IS NULL OR status = $1",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)
    }

    async fn appointments_by_status(&self) -> ClinicResult<Vec<(AppointmentStatus, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM appointments GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        let mut totals = Vec::with_capacity(rows.len());
        for (status, total) in rows {
            let status = status
                .parse::<AppointmentStatus>()
                .map_err(|e| ClinicError::Storage(sqlx::Error::Decode(Box::new(e))))?;
            totals.push((status, total));
        }
        totals.sort();
        Ok(totals)
    }
}
