use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{any, get, post};
use axum::Router;
use log::info;

use crate::access;
use crate::booking::{resolver_for, PatientResolver};
use crate::config::{Config, StoreKind};
use crate::db::get_db_pool;
use crate::error::{ClinicError, ClinicResult};
use crate::handlers;
use crate::store::{MemoryStore, PgStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub patients: Arc<dyn PatientResolver>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        AppState {
            patients: resolver_for(&config),
            store,
            config: Arc::new(config),
        }
    }

    /// Opens the configured store and wraps it with `config`.
    pub async fn connect(config: Config) -> ClinicResult<Self> {
        let store: Arc<dyn Store> = match config.store {
            StoreKind::Memory => {
                info!("using in-memory store");
                Arc::new(MemoryStore::new())
            }
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| ClinicError::Config("DATABASE_URL not set".into()))?;
                Arc::new(PgStore::new(get_db_pool(url).await?))
            }
        };
        Ok(AppState::new(store, config))
    }
}

/// Makes sure the configured staff account exists and returns a fresh
/// session token for it. Tokens issued by earlier runs stop working.
pub async fn bootstrap_staff(state: &AppState, username: &str) -> ClinicResult<uuid::Uuid> {
    let user = match state.store.find_user(username).await? {
        Some(user) if user.is_staff => user,
        Some(_) => {
            return Err(ClinicError::Config(format!(
                "{username:?} exists but is not a staff account"
            )))
        }
        None => state.store.create_account(username, true, None).await?.0,
    };
    let revoked = state.store.close_user_sessions(user.id).await?;
    if revoked > 0 {
        info!("revoked {} earlier sessions of {}", revoked, username);
    }
    state.store.open_session(user.id).await
}

pub fn router(state: AppState) -> Router {
    let mut patient_routes = Router::new()
        .route(
            "/book/",
            get(handlers::booking_page).post(handlers::booking_submit),
        )
        .route(
            "/appointments/history/",
            get(handlers::history_page).post(handlers::history_lookup),
        );
    if state.patients.requires_login() {
        patient_routes = patient_routes
            .route_layer(from_fn_with_state(state.clone(), access::require_patient));
    }

    let staff_routes = Router::new()
        .route("/admin-dashboard/", get(handlers::dashboard))
        .route(
            "/panel/doctors/",
            get(handlers::panel_doctors).post(handlers::panel_doctor_create),
        )
        .route(
            "/panel/doctors/:id/edit/",
            get(handlers::panel_doctor_edit).post(handlers::panel_doctor_update),
        )
        .route("/panel/doctors/:id/delete/", post(handlers::panel_doctor_delete))
        .route(
            "/panel/specializations/",
            get(handlers::panel_specializations).post(handlers::panel_specialization_create),
        )
        .route(
            "/panel/specializations/:id/edit/",
            get(handlers::panel_specialization_edit).post(handlers::panel_specialization_update),
        )
        .route(
            "/panel/specializations/:id/delete/",
            any(handlers::panel_specialization_delete),
        )
        .route(
            "/panel/appointments/",
            get(handlers::panel_appointments).post(handlers::panel_appointment_status),
        )
        .route("/api/specializations/:id/", get(handlers::api_specialization_detail))
        .route_layer(from_fn_with_state(state.clone(), access::require_staff));

    Router::new()
        .route("/", get(handlers::home))
        .route("/doctors/", get(handlers::doctor_list))
        .route("/doctors/:id/", get(handlers::doctor_detail))
        .route("/book/success/", get(handlers::booking_success))
        .route(
            "/accounts/signup/",
            get(handlers::signup_page).post(handlers::signup_submit),
        )
        .route(
            "/accounts/login/",
            get(handlers::login_page).post(handlers::login_submit),
        )
        .route("/accounts/logout/", post(handlers::logout))
        .merge(patient_routes)
        .merge(staff_routes)
        .layer(from_fn_with_state(state.clone(), access::resolve_identity))
        .with_state(state)
}
