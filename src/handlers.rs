use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use url::{Position, Url};
use uuid::Uuid;

use crate::access::{session_token, Identity, SESSION_COOKIE};
use crate::app::AppState;
use crate::booking;
use crate::error::{with_notice, ClinicError, ClinicResult, FormErrors};
use crate::forms::{
    AppointmentFilterQuery, BookingForm, DoctorForm, HistoryLookupForm, SignupForm,
    SpecializationForm, StatusForm,
};
use crate::models::DoctorListing;
use crate::panel;
use crate::reporting;
use crate::store::SESSION_TTL;
use crate::views::{self, Chrome};

const BOOKED: &str = "Your appointment request has been submitted. Our team will confirm soon.";

#[derive(Debug, Default, Deserialize)]
pub struct NoticeQuery {
    pub notice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DoctorListQuery {
    pub specialization: Option<String>,
    pub notice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub token: String,
    pub next: String,
}

#[derive(Debug, Deserialize)]
pub struct SpecializationPayload {
    #[serde(default)]
    pub name: String,
}

fn chrome<'a>(identity: &'a Identity, notice: &'a Option<String>) -> Chrome<'a> {
    Chrome {
        identity,
        notice: notice.as_deref(),
    }
}

const LOCAL_ORIGIN: &str = "http://clinic.invalid/";

/// Only same-site paths are followed after login; anything that resolves to
/// another origin falls back to the home page.
fn safe_next(next: Option<&str>) -> String {
    let Some(path) = next.filter(|p| p.starts_with('/') && !p.contains('\\')) else {
        return "/".to_string();
    };
    let Ok(base) = Url::parse(LOCAL_ORIGIN) else {
        return "/".to_string();
    };
    match Url::options().base_url(Some(&base)).parse(path) {
        Ok(joined) if joined.origin() == base.origin() => joined[Position::BeforePath..].to_string(),
        _ => "/".to_string(),
    }
}

fn session_cookie(token: Uuid) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(SESSION_TTL)
        .build()
}

async fn load_doctor(state: &AppState, id: i64) -> ClinicResult<DoctorListing> {
    state
        .store
        .get_doctor(id)
        .await?
        .ok_or(ClinicError::NotFound("Doctor"))
}

pub async fn home(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<NoticeQuery>,
) -> ClinicResult<Html<String>> {
    let page = reporting::home(state.store.as_ref()).await?;
    Ok(views::home(&chrome(&identity, &query.notice), &page))
}

pub async fn doctor_list(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<DoctorListQuery>,
) -> ClinicResult<Html<String>> {
    let selected = query
        .specialization
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok());
    let doctors = reporting::doctors(state.store.as_ref(), selected).await?;
    let specializations = state.store.list_specializations().await?;
    Ok(views::doctor_list(
        &chrome(&identity, &query.notice),
        &doctors,
        &specializations,
        selected,
    ))
}

pub async fn doctor_detail(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
) -> ClinicResult<Html<String>> {
    let doctor = load_doctor(&state, id).await?;
    Ok(views::doctor_detail(&chrome(&identity, &None), &doctor))
}

pub async fn booking_page(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<NoticeQuery>,
) -> ClinicResult<Html<String>> {
    let doctors = reporting::doctors(state.store.as_ref(), None).await?;
    Ok(views::booking_form(
        &chrome(&identity, &query.notice),
        &doctors,
        &BookingForm::default(),
        &FormErrors::new(),
        !state.patients.requires_login(),
    ))
}

pub async fn booking_submit(
    State(state): State<AppState>,
    identity: Identity,
    Form(form): Form<BookingForm>,
) -> ClinicResult<Response> {
    let outcome = booking::book_appointment(
        state.store.as_ref(),
        state.patients.as_ref(),
        &identity,
        &form,
    )
    .await;
    match outcome {
        Ok(_) => Ok(Redirect::to(&with_notice("/book/success/", BOOKED)).into_response()),
        Err(ClinicError::Invalid(errors)) => {
            let doctors = reporting::doctors(state.store.as_ref(), None).await?;
            Ok(views::booking_form(
                &chrome(&identity, &None),
                &doctors,
                &form,
                &errors,
                !state.patients.requires_login(),
            )
            .into_response())
        }
        Err(err) => Err(err),
    }
}

pub async fn booking_success(
    identity: Identity,
    Query(query): Query<NoticeQuery>,
) -> Html<String> {
    views::booking_success(&chrome(&identity, &query.notice))
}

pub async fn history_page(
    State(state): State<AppState>,
    identity: Identity,
) -> ClinicResult<Html<String>> {
    let chrome_notice = None;
    let chrome = chrome(&identity, &chrome_notice);
    if !state.patients.requires_login() {
        return Ok(views::history(&chrome, &[], Some(("", &FormErrors::new()))));
    }
    let appointments = reporting::history(
        state.store.as_ref(),
        state.patients.as_ref(),
        &identity,
        None,
    )
    .await?;
    Ok(views::history(&chrome, &appointments, None))
}

pub async fn history_lookup(
    State(state): State<AppState>,
    identity: Identity,
    Form(form): Form<HistoryLookupForm>,
) -> ClinicResult<Html<String>> {
    if state.patients.requires_login() {
        return history_page(State(state), identity).await;
    }
    let no_notice = None;
    let chrome = chrome(&identity, &no_notice);
    match form.validate() {
        Ok(email) => {
            let appointments = reporting::history(
                state.store.as_ref(),
                state.patients.as_ref(),
                &identity,
                Some(&email),
            )
            .await?;
            Ok(views::history(
                &chrome,
                &appointments,
                Some((email.as_str(), &FormErrors::new())),
            ))
        }
        Err(errors) => Ok(views::history(&chrome, &[], Some((form.email.as_str(), &errors)))),
    }
}

pub async fn dashboard(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<NoticeQuery>,
) -> ClinicResult<Html<String>> {
    let dashboard = reporting::dashboard(state.store.as_ref()).await?;
    Ok(views::dashboard(&chrome(&identity, &query.notice), &dashboard))
}

async fn render_panel_doctors(
    state: &AppState,
    chrome: &Chrome<'_>,
    form: &DoctorForm,
    errors: &FormErrors,
) -> ClinicResult<Html<String>> {
    let doctors = reporting::doctors(state.store.as_ref(), None).await?;
    let specializations = state.store.list_specializations().await?;
    Ok(views::panel_doctors(chrome, &doctors, &specializations, form, errors))
}

pub async fn panel_doctors(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<NoticeQuery>,
) -> ClinicResult<Html<String>> {
    render_panel_doctors(
        &state,
        &chrome(&identity, &query.notice),
        &DoctorForm::default(),
        &FormErrors::new(),
    )
    .await
}

pub async fn panel_doctor_create(
    State(state): State<AppState>,
    identity: Identity,
    Form(form): Form<DoctorForm>,
) -> ClinicResult<Response> {
    match panel::upsert_doctor(state.store.as_ref(), None, &form).await {
        Ok(_) => Ok(Redirect::to(&with_notice("/panel/doctors/", "Doctor saved successfully.")).into_response()),
        Err(ClinicError::Invalid(errors)) => {
            let html = render_panel_doctors(&state, &chrome(&identity, &None), &form, &errors).await?;
            Ok(html.into_response())
        }
        Err(err) => Err(err),
    }
}

pub async fn panel_doctor_edit(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
) -> ClinicResult<Html<String>> {
    let doctor = load_doctor(&state, id).await?;
    let specializations = state.store.list_specializations().await?;
    Ok(views::doctor_form(
        &chrome(&identity, &None),
        id,
        &specializations,
        &DoctorForm::from_doctor(&doctor.doctor),
        &FormErrors::new(),
    ))
}

pub async fn panel_doctor_update(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
    Form(form): Form<DoctorForm>,
) -> ClinicResult<Response> {
    load_doctor(&state, id).await?;
    match panel::upsert_doctor(state.store.as_ref(), Some(id), &form).await {
        Ok(_) => Ok(Redirect::to(&with_notice("/panel/doctors/", "Doctor updated successfully.")).into_response()),
        Err(ClinicError::Invalid(errors)) => {
            let specializations = state.store.list_specializations().await?;
            Ok(views::doctor_form(&chrome(&identity, &None), id, &specializations, &form, &errors)
                .into_response())
        }
        Err(err) => Err(err),
    }
}

pub async fn panel_doctor_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ClinicResult<Redirect> {
    panel::delete_doctor(state.store.as_ref(), id).await?;
    Ok(Redirect::to(&with_notice("/panel/doctors/", "Doctor removed.")))
}

pub async fn panel_specializations(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<NoticeQuery>,
) -> ClinicResult<Html<String>> {
    let specializations = state.store.list_specializations().await?;
    Ok(views::panel_specializations(
        &chrome(&identity, &query.notice),
        &specializations,
        "",
        &FormErrors::new(),
    ))
}

pub async fn panel_specialization_create(
    State(state): State<AppState>,
    identity: Identity,
    Form(form): Form<SpecializationForm>,
) -> ClinicResult<Response> {
    match panel::upsert_specialization(state.store.as_ref(), None, &form).await {
        Ok(_) => Ok(Redirect::to(&with_notice("/panel/specializations/", "Specialization saved.")).into_response()),
        Err(ClinicError::Invalid(errors)) => {
            let specializations = state.store.list_specializations().await?;
            Ok(views::panel_specializations(
                &chrome(&identity, &None),
                &specializations,
                &form.name,
                &errors,
            )
            .into_response())
        }
        Err(err) => Err(err),
    }
}

pub async fn panel_specialization_edit(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
) -> ClinicResult<Html<String>> {
    let specialization = state
        .store
        .get_specialization(id)
        .await?
        .ok_or(ClinicError::NotFound("Specialization"))?;
    Ok(views::specialization_form(
        &chrome(&identity, &None),
        id,
        &specialization.name,
        &FormErrors::new(),
    ))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.trim_start().starts_with("application/json"))
}

fn json_error(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

/// Form edit, or the inline JSON edit when the body is `application/json`.
pub async fn panel_specialization_update(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> ClinicResult<Response> {
    if state.store.get_specialization(id).await?.is_none() {
        return Err(ClinicError::NotFound("Specialization"));
    }

    if is_json(&headers) {
        let payload: SpecializationPayload = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(err) => return Ok(json_error(err.to_string())),
        };
        if payload.name.trim().is_empty() {
            return Ok(json_error("Name is required."));
        }
        let form = SpecializationForm { name: payload.name };
        return match panel::upsert_specialization(state.store.as_ref(), Some(id), &form).await {
            Ok(saved) => Ok(Json(json!({ "id": saved.id, "name": saved.name })).into_response()),
            Err(ClinicError::Invalid(errors)) => Ok(json_error(errors.to_string())),
            Err(err) => Err(err),
        };
    }

    let name = url::form_urlencoded::parse(&body)
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    let form = SpecializationForm { name };
    match panel::upsert_specialization(state.store.as_ref(), Some(id), &form).await {
        Ok(_) => Ok(Redirect::to(&with_notice("/panel/specializations/", "Specialization updated.")).into_response()),
        Err(ClinicError::Invalid(errors)) => Ok(views::specialization_form(
            &chrome(&identity, &None),
            id,
            &form.name,
            &errors,
        )
        .into_response()),
        Err(err) => Err(err),
    }
}

/// Only POST deletes; any other verb is refused before touching the record.
pub async fn panel_specialization_delete(
    State(state): State<AppState>,
    method: Method,
    Path(id): Path<i64>,
) -> ClinicResult<Redirect> {
    if method != Method::POST {
        return Err(ClinicError::InvalidMethod);
    }
    panel::delete_specialization(state.store.as_ref(), id).await?;
    Ok(Redirect::to(&with_notice(
        "/panel/specializations/",
        "Specialization removed and assigned doctors cleared.",
    )))
}

pub async fn api_specialization_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ClinicResult<Json<panel::SpecializationDetail>> {
    Ok(Json(panel::specialization_detail(state.store.as_ref(), id).await?))
}

async fn render_panel_appointments(
    state: &AppState,
    chrome: &Chrome<'_>,
    query: &AppointmentFilterQuery,
    errors: &FormErrors,
) -> ClinicResult<Html<String>> {
    let appointments = reporting::appointments(state.store.as_ref(), &query.to_filter()).await?;
    let doctors = reporting::doctors(state.store.as_ref(), None).await?;
    Ok(views::panel_appointments(chrome, &appointments, &doctors, query, errors))
}

pub async fn panel_appointments(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<AppointmentFilterQuery>,
) -> ClinicResult<Html<String>> {
    render_panel_appointments(
        &state,
        &chrome(&identity, &query.notice),
        &query,
        &FormErrors::new(),
    )
    .await
}

/// Status change; the redirect keeps the current filter.
pub async fn panel_appointment_status(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<AppointmentFilterQuery>,
    Form(form): Form<StatusForm>,
) -> ClinicResult<Response> {
    match panel::apply_status_form(state.store.as_ref(), &form).await {
        Ok(_) => {
            let encoded = query.encoded();
            let target = if encoded.is_empty() {
                "/panel/appointments/".to_string()
            } else {
                format!("/panel/appointments/?{encoded}")
            };
            Ok(Redirect::to(&with_notice(&target, "Appointment status updated.")).into_response())
        }
        Err(ClinicError::Invalid(_)) => {
            let errors = FormErrors::single("status", "Invalid status update.");
            let html = render_panel_appointments(&state, &chrome(&identity, &None), &query, &errors).await?;
            Ok(html.into_response())
        }
        Err(err) => Err(err),
    }
}

pub async fn signup_page(identity: Identity) -> Html<String> {
    views::signup_form(&chrome(&identity, &None), &SignupForm::default(), &FormErrors::new())
}

pub async fn signup_submit(
    State(state): State<AppState>,
    identity: Identity,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> ClinicResult<Response> {
    let created = match form.validate() {
        Ok(signup) => {
            state
                .store
                .create_account(&signup.username, false, Some(&signup.contact))
                .await
        }
        Err(errors) => Err(ClinicError::Invalid(errors)),
    };
    match created {
        Ok((user, _)) => {
            let token = state.store.open_session(user.id).await?;
            info!("account {} ({}) created", user.id, user.username);
            let jar = jar.add(session_cookie(token));
            Ok((jar, Redirect::to(&with_notice("/", "Account created successfully."))).into_response())
        }
        Err(ClinicError::Invalid(errors)) => {
            Ok(views::signup_form(&chrome(&identity, &None), &form, &errors).into_response())
        }
        Err(err) => Err(err),
    }
}

pub async fn login_page(identity: Identity, Query(query): Query<LoginQuery>) -> Html<String> {
    let next = safe_next(query.next.as_deref());
    views::login_form(&chrome(&identity, &None), &next, &FormErrors::new())
}

pub async fn login_submit(
    State(state): State<AppState>,
    identity: Identity,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> ClinicResult<Response> {
    let next = safe_next(Some(&form.next));
    let user = match Uuid::parse_str(form.token.trim()) {
        Ok(token) => state.store.user_for_session(token).await?.map(|user| (token, user)),
        Err(_) => None,
    };
    match user {
        Some((token, user)) => {
            info!("user {} logged in", user.username);
            Ok((jar.add(session_cookie(token)), Redirect::to(&next)).into_response())
        }
        None => {
            let errors = FormErrors::single("token", "Invalid session token.");
            Ok(views::login_form(&chrome(&identity, &None), &next, &errors).into_response())
        }
    }
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    if let Some(token) = session_token(&headers) {
        if let Err(err) = state.store.close_session(token).await {
            error!("failed to close session: {}", err);
        }
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_stays_on_this_site() {
        assert_eq!(safe_next(Some("/panel/doctors/?status=Pending")), "/panel/doctors/?status=Pending");
        assert_eq!(safe_next(Some("/book/")), "/book/");
        for hostile in [
            "//evil.example/",
            "/\\evil.example/phish",
            "/\t/evil.example",
            "https://evil.example/",
            "javascript:alert(1)",
            "panel/doctors/",
            "",
        ] {
            assert_eq!(safe_next(Some(hostile)), "/", "{hostile:?}");
        }
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn session_cookie_is_scoped() {
        let cookie = session_cookie(Uuid::nil());
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(SESSION_TTL));
    }
}
