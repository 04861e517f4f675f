use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use clinic::app::{bootstrap_staff, router, AppState};
use clinic::config::{Config, PatientMode, StoreKind};
use clinic::models::{AppointmentFilter, DoctorInput};
use clinic::store::{MemoryStore, Store};

const FORM: &str = "application/x-www-form-urlencoded";

async fn state(mode: PatientMode) -> AppState {
    let config = Config {
        store: StoreKind::Memory,
        patient_mode: mode,
        ..Default::default()
    };
    AppState::new(Arc::new(MemoryStore::new()), config)
}

async fn send(state: &AppState, req: Request<Body>) -> Response {
    router(state.clone()).oneshot(req).await.unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("x-session-token", token);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, content_type: &str, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(token) = token {
        builder = builder.header("x-session-token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_text(res: Response) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location(res: &Response) -> String {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn doctor(state: &AppState, name: &str, specialization_id: Option<i64>) -> i64 {
    state
        .store
        .insert_doctor(&DoctorInput {
            name: name.into(),
            specialization_id,
            experience: 3,
            fees: 50,
            available_days: "Mon, Wed".into(),
            time_slots: "9:00 AM, 10:00 AM".into(),
            biography: String::new(),
        })
        .await
        .unwrap()
        .id
}

async fn staff_token(state: &AppState) -> String {
    bootstrap_staff(state, "admin").await.unwrap().to_string()
}

#[tokio::test]
async fn panel_redirects_anonymous_and_patients_to_login() {
    let state = state(PatientMode::Account).await;
    let res = send(&state, get("/panel/doctors/", None)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(location(&res).starts_with("/accounts/login/?next="));

    let res = send(
        &state,
        post("/accounts/signup/", None, FORM, "username=ana&name=Ana&phone=555&email=ana%40x.org"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let user = state.store.find_user("ana").await.unwrap().unwrap();
    let token = state.store.open_session(user.id).await.unwrap().to_string();

    let res = send(&state, get("/admin-dashboard/", Some(&token))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(location(&res).starts_with("/accounts/login/"));

    let staff = staff_token(&state).await;
    let res = send(&state, get("/admin-dashboard/", Some(&staff))).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn specialization_json_detail_and_edit() {
    let state = state(PatientMode::Account).await;
    let staff = staff_token(&state).await;
    let spec = state.store.insert_specialization("Cardiology").await.unwrap();
    doctor(&state, "Dr Heart", Some(spec.id)).await;

    let res = send(&state, get(&format!("/api/specializations/{}/", spec.id), Some(&staff))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let detail: serde_json::Value = serde_json::from_str(&body_text(res).await).unwrap();
    assert_eq!(detail["name"], "Cardiology");
    assert_eq!(detail["doctor_count"], 1);

    let edit = format!("/panel/specializations/{}/edit/", spec.id);
    let res = send(&state, post(&edit, Some(&staff), "application/json", r#"{"name":"  "}"#)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: serde_json::Value = serde_json::from_str(&body_text(res).await).unwrap();
    assert_eq!(err["error"], "Name is required.");
    let kept = state.store.get_specialization(spec.id).await.unwrap().unwrap();
    assert_eq!(kept.name, "Cardiology");

    let res = send(&state, post(&edit, Some(&staff), "application/json", r#"{"name":"Heart"}"#)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let saved: serde_json::Value = serde_json::from_str(&body_text(res).await).unwrap();
    assert_eq!(saved["id"], spec.id);
    assert_eq!(saved["name"], "Heart");

    let res = send(&state, get("/api/specializations/999/", Some(&staff))).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn specialization_delete_needs_post() {
    let state = state(PatientMode::Account).await;
    let staff = staff_token(&state).await;
    let spec = state.store.insert_specialization("Cardiology").await.unwrap();
    let doctor_id = doctor(&state, "Dr Heart", Some(spec.id)).await;
    let uri = format!("/panel/specializations/{}/delete/", spec.id);

    let res = send(&state, get(&uri, Some(&staff))).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(state.store.get_specialization(spec.id).await.unwrap().is_some());

    let res = send(&state, post(&uri, Some(&staff), FORM, "")).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(location(&res).starts_with("/panel/specializations/?notice="));
    assert!(state.store.get_specialization(spec.id).await.unwrap().is_none());
    let listing = state.store.get_doctor(doctor_id).await.unwrap().unwrap();
    assert_eq!(listing.doctor.specialization_id, None);
    assert_eq!(listing.specialization_name, None);
}

#[tokio::test]
async fn double_booking_is_reported_on_the_form() {
    let state = state(PatientMode::Email).await;
    let doctor_id = doctor(&state, "Dr Heart", None).await;
    let form = format!(
        "name=Ana&phone=555&email=ana%40x.org&doctor={doctor_id}&date=2024-05-01&time=9%3A00+AM"
    );

    let res = send(&state, post("/book/", None, FORM, &form)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(location(&res).starts_with("/book/success/"));

    let res = send(&state, post("/book/", None, FORM, &form)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_text(res).await.contains("already been booked"));

    let all = state
        .store
        .list_appointments(&AppointmentFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn account_booking_requires_login_and_profile() {
    let state = state(PatientMode::Account).await;
    let doctor_id = doctor(&state, "Dr Heart", None).await;
    let form = format!("doctor={doctor_id}&date=2024-05-01&time=9%3A00+AM");

    let res = send(&state, post("/book/", None, FORM, &form)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(location(&res).starts_with("/accounts/login/"));

    let staff = staff_token(&state).await;
    let res = send(&state, post("/book/", Some(&staff), FORM, &form)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(location(&res).starts_with("/?notice="));
    assert_eq!(state.store.count_appointments(None).await.unwrap(), 0);
}

#[tokio::test]
async fn new_patient_sees_empty_history() {
    let state = state(PatientMode::Account).await;
    let res = send(
        &state,
        post("/accounts/signup/", None, FORM, "username=ana&name=Ana&phone=555&email=ana%40x.org"),
    )
    .await;
    let cookie = res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("sessionid="));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("HttpOnly"));
    let pair = cookie.split(';').next().unwrap().to_string();

    let req = Request::builder()
        .uri("/appointments/history/")
        .header(header::COOKIE, pair)
        .body(Body::empty())
        .unwrap();
    let res = send(&state, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_text(res).await.contains("No appointments"));
}

#[tokio::test]
async fn status_update_keeps_filter() {
    let state = state(PatientMode::Email).await;
    let staff = staff_token(&state).await;
    let doctor_id = doctor(&state, "Dr Heart", None).await;
    let form = format!(
        "name=Ana&phone=555&email=ana%40x.org&doctor={doctor_id}&date=2024-05-01&time=9%3A00+AM"
    );
    send(&state, post("/book/", None, FORM, &form)).await;
    let booked = state
        .store
        .list_appointments(&AppointmentFilter::default())
        .await
        .unwrap()
        .remove(0);
    let id = booked.appointment.id;

    let uri = format!("/panel/appointments/?doctor={doctor_id}&status=Pending");
    let res = send(&state, post(&uri, Some(&staff), FORM, &format!("id={id}&status=Approved"))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let target = location(&res);
    assert!(target.starts_with(&format!("/panel/appointments/?doctor={doctor_id}&status=Pending&notice=")));

    let res = send(&state, post(&uri, Some(&staff), FORM, &format!("id={id}&status=Lost"))).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_text(res).await.contains("Invalid status update."));
    let stored = state.store.get_appointment(id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_str(), "Approved");
}

#[tokio::test]
async fn unknown_doctor_is_not_found() {
    let state = state(PatientMode::Account).await;
    let res = send(&state, get("/doctors/404/", None)).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = send(&state, get("/doctors/?specialization=abc", None)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

async fn patient_token(state: &AppState) -> String {
    send(
        state,
        post("/accounts/signup/", None, FORM, "username=pat&name=Pat&phone=555&email=pat%40x.org"),
    )
    .await;
    let user = state.store.find_user("pat").await.unwrap().unwrap();
    state.store.open_session(user.id).await.unwrap().to_string()
}

#[tokio::test]
async fn patients_cannot_run_panel_mutations() {
    let state = state(PatientMode::Email).await;
    let patient = patient_token(&state).await;
    let spec = state.store.insert_specialization("Cardiology").await.unwrap();
    let doctor_id = doctor(&state, "Dr Heart", Some(spec.id)).await;
    let form = format!(
        "name=Ana&phone=555&email=ana%40x.org&doctor={doctor_id}&date=2024-05-01&time=9%3A00+AM"
    );
    send(&state, post("/book/", None, FORM, &form)).await;
    let booked = state
        .store
        .list_appointments(&AppointmentFilter::default())
        .await
        .unwrap()
        .remove(0)
        .appointment;

    let attempts = [
        (format!("/panel/specializations/{}/delete/", spec.id), String::new()),
        ("/panel/specializations/".to_string(), "name=Neurology".to_string()),
        (format!("/panel/specializations/{}/edit/", spec.id), "name=Renamed".to_string()),
        (format!("/panel/doctors/{doctor_id}/delete/"), String::new()),
        ("/panel/doctors/".to_string(), "name=Dr+New&experience=1&fees=1".to_string()),
        ("/panel/appointments/".to_string(), format!("id={}&status=Completed", booked.id)),
    ];
    for (uri, body) in &attempts {
        let res = send(&state, post(uri, Some(&patient), FORM, body)).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER, "{uri}");
        assert!(location(&res).starts_with("/accounts/login/?next="), "{uri}");
    }

    let specs = state.store.list_specializations().await.unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].name, "Cardiology");
    assert_eq!(state.store.count_doctors().await.unwrap(), 1);
    let listing = state.store.get_doctor(doctor_id).await.unwrap().unwrap();
    assert_eq!(listing.doctor.specialization_id, Some(spec.id));
    let stored = state.store.get_appointment(booked.id).await.unwrap().unwrap();
    assert_eq!(stored.status, booked.status);
}

#[tokio::test]
async fn login_only_follows_local_paths() {
    let state = state(PatientMode::Account).await;
    let staff = staff_token(&state).await;

    let body = format!("token={staff}&next=%2F%5Cevil.example%2Fphish");
    let res = send(&state, post("/accounts/login/", None, FORM, &body)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/");

    let body = format!("token={staff}&next=%2Fpanel%2Fdoctors%2F");
    let res = send(&state, post("/accounts/login/", None, FORM, &body)).await;
    assert_eq!(location(&res), "/panel/doctors/");
}

#[tokio::test]
async fn login_challenge_uses_configured_url() {
    let config = Config {
        store: StoreKind::Memory,
        login_url: "/sign-in/".into(),
        ..Default::default()
    };
    let state = AppState::new(Arc::new(MemoryStore::new()), config);
    let res = send(&state, get("/appointments/history/", None)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/sign-in/?next=%2Fappointments%2Fhistory%2F");
}

#[tokio::test]
async fn staff_bootstrap_revokes_older_tokens() {
    let state = state(PatientMode::Account).await;
    let first = staff_token(&state).await;
    let second = staff_token(&state).await;

    let res = send(&state, get("/admin-dashboard/", Some(&first))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    let res = send(&state, get("/admin-dashboard/", Some(&second))).await;
    assert_eq!(res.status(), StatusCode::OK);
}
