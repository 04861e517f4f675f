//! Plain server-rendered pages. Every interpolated value goes through
//! [`escape`].

use std::fmt::Write;

use axum::response::Html;

use crate::access::{Identity, Role};
use crate::error::{FormErrors, NON_FIELD};
use crate::forms::{AppointmentFilterQuery, BookingForm, DoctorForm, SignupForm};
use crate::models::{AppointmentListing, AppointmentStatus, DoctorListing, Specialization};
use crate::reporting::{Counts, Dashboard, HomePage};

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// What every page shows around its body.
pub struct Chrome<'a> {
    pub identity: &'a Identity,
    pub notice: Option<&'a str>,
}

fn layout(chrome: &Chrome<'_>, title: &str, body: &str) -> Html<String> {
    let mut nav = String::from(
        r#"<a href="/">Home</a> <a href="/doctors/">Doctors</a> <a href="/book/">Book</a> <a href="/appointments/history/">My appointments</a>"#,
    );
    match chrome.identity {
        Identity::Anonymous => nav.push_str(
            r#" <a href="/accounts/login/">Log in</a> <a href="/accounts/signup/">Sign up</a>"#,
        ),
        Identity::User(user) => {
            if chrome.identity.role() == Role::Staff {
                nav.push_str(r#" <a href="/admin-dashboard/">Dashboard</a>"#);
            }
            let _ = write!(
                nav,
                r#" <form method="post" action="/accounts/logout/" style="display:inline"><button>Log out {}</button></form>"#,
                escape(&user.username)
            );
        }
    }
    let notice = chrome
        .notice
        .map(|n| format!(r#"<p class="notice">{}</p>"#, escape(n)))
        .unwrap_or_default();
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title} | Clinic</title></head>\
         <body><nav>{nav}</nav>{notice}<main><h1>{title}</h1>{body}</main></body></html>",
        title = escape(title),
    ))
}

fn errors_for(errors: &FormErrors, field: &str) -> String {
    let messages = errors.for_field(field);
    if messages.is_empty() {
        return String::new();
    }
    let items: String = messages
        .iter()
        .map(|m| format!("<li>{}</li>", escape(m)))
        .collect();
    format!(r#"<ul class="errorlist">{items}</ul>"#)
}

fn input(errors: &FormErrors, label: &str, name: &str, kind: &str, value: &str) -> String {
    format!(
        r#"<p><label>{label} <input type="{kind}" name="{name}" value="{value}"></label>{errs}</p>"#,
        label = escape(label),
        value = escape(value),
        errs = errors_for(errors, name),
    )
}

fn textarea(errors: &FormErrors, label: &str, name: &str, value: &str) -> String {
    format!(
        r#"<p><label>{label} <textarea name="{name}" rows="4">{value}</textarea></label>{errs}</p>"#,
        label = escape(label),
        value = escape(value),
        errs = errors_for(errors, name),
    )
}

fn select(
    errors: &FormErrors,
    label: &str,
    name: &str,
    empty_label: &str,
    options: &[(String, String)],
    selected: &str,
) -> String {
    let mut html = format!(
        r#"<p><label>{} <select name="{name}"><option value="">{}</option>"#,
        escape(label),
        escape(empty_label)
    );
    for (value, text) in options {
        let mark = if value == selected { " selected" } else { "" };
        let _ = write!(
            html,
            r#"<option value="{}"{mark}>{}</option>"#,
            escape(value),
            escape(text)
        );
    }
    let _ = write!(html, "</select></label>{}</p>", errors_for(errors, name));
    html
}

fn doctor_options(doctors: &[DoctorListing]) -> Vec<(String, String)> {
    doctors
        .iter()
        .map(|d| (d.doctor.id.to_string(), d.doctor.name.clone()))
        .collect()
}

fn specialization_options(specializations: &[Specialization]) -> Vec<(String, String)> {
    specializations
        .iter()
        .map(|s| (s.id.to_string(), s.name.clone()))
        .collect()
}

fn counts_table(counts: &Counts) -> String {
    format!(
        "<table><tr><th>Doctors</th><td>{}</td></tr><tr><th>Patients</th><td>{}</td></tr>\
         <tr><th>Appointments</th><td>{}</td></tr><tr><th>Pending</th><td>{}</td></tr></table>",
        counts.doctors, counts.patients, counts.appointments, counts.pending
    )
}

fn doctor_cards(doctors: &[DoctorListing]) -> String {
    if doctors.is_empty() {
        return "<p>No doctors found.</p>".to_string();
    }
    let mut html = String::from("<ul>");
    for listing in doctors {
        let doctor = &listing.doctor;
        let _ = write!(
            html,
            r#"<li><a href="/doctors/{}/">{}</a> ({}) &middot; {} yrs &middot; fee {}</li>"#,
            doctor.id,
            escape(&doctor.name),
            escape(listing.specialization_name.as_deref().unwrap_or("General")),
            doctor.experience,
            doctor.fees
        );
    }
    html.push_str("</ul>");
    html
}

fn appointment_rows(appointments: &[AppointmentListing], with_status_form: Option<&str>) -> String {
    if appointments.is_empty() {
        return "<p>No appointments yet.</p>".to_string();
    }
    let mut html = String::from(
        "<table><tr><th>Date</th><th>Time</th><th>Doctor</th><th>Patient</th><th>Status</th><th>Notes</th></tr>",
    );
    for listing in appointments {
        let a = &listing.appointment;
        let status = match with_status_form {
            Some(action) => {
                let mut options = String::new();
                for status in AppointmentStatus::ALL {
                    let mark = if status == a.status { " selected" } else { "" };
                    let _ = write!(options, r#"<option{mark}>{status}</option>"#);
                }
                format!(
                    r#"<form method="post" action="{}"><input type="hidden" name="id" value="{}"><select name="status">{options}</select><button>Update</button></form>"#,
                    escape(action),
                    a.id
                )
            }
            None => a.status.to_string(),
        };
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{status}</td><td>{}</td></tr>",
            a.date,
            escape(&a.time),
            escape(&listing.doctor_name),
            escape(&listing.patient_name),
            escape(&a.notes)
        );
    }
    html.push_str("</table>");
    html
}

pub fn home(chrome: &Chrome<'_>, page: &HomePage) -> Html<String> {
    let body = format!(
        "{}<h2>Our doctors</h2>{}<p><a href=\"/book/\">Book an appointment</a></p>",
        counts_table(&page.counts),
        doctor_cards(&page.featured)
    );
    layout(chrome, "Welcome", &body)
}

pub fn doctor_list(
    chrome: &Chrome<'_>,
    doctors: &[DoctorListing],
    specializations: &[Specialization],
    selected: Option<i64>,
) -> Html<String> {
    let selected = selected.map(|id| id.to_string()).unwrap_or_default();
    let filter = format!(
        r#"<form method="get">{}<button>Filter</button></form>"#,
        select(
            &FormErrors::new(),
            "Specialization",
            "specialization",
            "All specializations",
            &specialization_options(specializations),
            &selected
        )
    );
    layout(chrome, "Doctors", &(filter + &doctor_cards(doctors)))
}

pub fn doctor_detail(chrome: &Chrome<'_>, listing: &DoctorListing) -> Html<String> {
    let doctor = &listing.doctor;
    let list = |items: Vec<&str>| -> String {
        items.iter().map(|i| format!("<li>{}</li>", escape(i))).collect()
    };
    let body = format!(
        "<p>Specialization: {}</p><p>Experience: {} years</p><p>Fees: {}</p>\
         <h2>Available days</h2><ul>{}</ul><h2>Time slots</h2><ul>{}</ul><p>{}</p>\
         <p><a href=\"/book/\">Book an appointment</a></p>",
        escape(listing.specialization_name.as_deref().unwrap_or("General")),
        doctor.experience,
        doctor.fees,
        list(doctor.available_days()),
        list(doctor.time_slots()),
        escape(&doctor.biography)
    );
    layout(chrome, &doctor.name, &body)
}

pub fn booking_form(
    chrome: &Chrome<'_>,
    doctors: &[DoctorListing],
    form: &BookingForm,
    errors: &FormErrors,
    with_contact: bool,
) -> Html<String> {
    let mut body = String::from(r#"<form method="post" action="/book/">"#);
    body.push_str(&errors_for(errors, NON_FIELD));
    if with_contact {
        body.push_str(&input(errors, "Name", "name", "text", &form.name));
        body.push_str(&input(errors, "Phone", "phone", "text", &form.phone));
        body.push_str(&input(errors, "Email", "email", "email", &form.email));
    }
    body.push_str(&select(
        errors,
        "Doctor",
        "doctor",
        "---------",
        &doctor_options(doctors),
        &form.doctor,
    ));
    body.push_str(&input(errors, "Date", "date", "date", &form.date));
    body.push_str(&input(errors, "Time", "time", "text", &form.time));
    body.push_str(&textarea(errors, "Notes", "notes", &form.notes));
    body.push_str("<button>Book</button></form>");
    layout(chrome, "Book an appointment", &body)
}

pub fn booking_success(chrome: &Chrome<'_>) -> Html<String> {
    layout(
        chrome,
        "Request received",
        r#"<p>We will confirm your appointment soon.</p><p><a href="/appointments/history/">View your appointments</a></p>"#,
    )
}

pub fn history(
    chrome: &Chrome<'_>,
    appointments: &[AppointmentListing],
    lookup: Option<(&str, &FormErrors)>,
) -> Html<String> {
    let mut body = String::new();
    if let Some((email, errors)) = lookup {
        let _ = write!(
            body,
            r#"<form method="post">{}<button>Look up</button></form>"#,
            input(errors, "Email", "email", "email", email)
        );
    }
    body.push_str(&appointment_rows(appointments, None));
    layout(chrome, "Appointment history", &body)
}

pub fn dashboard(chrome: &Chrome<'_>, dashboard: &Dashboard) -> Html<String> {
    let mut by_status = String::from("<ul>");
    for (status, total) in &dashboard.by_status {
        let _ = write!(by_status, "<li>{status}: {total}</li>");
    }
    by_status.push_str("</ul>");
    let body = format!(
        "{}<p><a href=\"/panel/doctors/\">Doctors</a> <a href=\"/panel/specializations/\">Specializations</a> \
         <a href=\"/panel/appointments/\">Appointments</a></p><h2>By status</h2>{by_status}\
         <h2>Recent appointments</h2>{}",
        counts_table(&dashboard.counts),
        appointment_rows(&dashboard.recent, None)
    );
    layout(chrome, "Dashboard", &body)
}

fn doctor_fields(
    errors: &FormErrors,
    form: &DoctorForm,
    specializations: &[Specialization],
) -> String {
    [
        input(errors, "Name", "name", "text", &form.name),
        select(
            errors,
            "Specialization",
            "specialization",
            "---------",
            &specialization_options(specializations),
            &form.specialization,
        ),
        input(errors, "Experience (years)", "experience", "number", &form.experience),
        input(errors, "Fees", "fees", "number", &form.fees),
        input(errors, "Available days (e.g. Mon,Tue,Fri)", "available_days", "text", &form.available_days),
        input(errors, "Time slots (e.g. 10:00 AM,11:30 AM)", "time_slots", "text", &form.time_slots),
        textarea(errors, "Biography", "biography", &form.biography),
    ]
    .concat()
}

pub fn panel_doctors(
    chrome: &Chrome<'_>,
    doctors: &[DoctorListing],
    specializations: &[Specialization],
    form: &DoctorForm,
    errors: &FormErrors,
) -> Html<String> {
    let mut rows = String::from("<table><tr><th>Name</th><th>Specialization</th><th>Fees</th><th></th></tr>");
    for listing in doctors {
        let d = &listing.doctor;
        let _ = write!(
            rows,
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td><a href="/panel/doctors/{id}/edit/">Edit</a> <form method="post" action="/panel/doctors/{id}/delete/" style="display:inline"><button>Delete</button></form></td></tr>"#,
            escape(&d.name),
            escape(listing.specialization_name.as_deref().unwrap_or("")),
            d.fees,
            id = d.id
        );
    }
    rows.push_str("</table>");
    let body = format!(
        r#"{rows}<h2>Add doctor</h2><form method="post" action="/panel/doctors/">{}{}<button>Save</button></form>"#,
        errors_for(errors, NON_FIELD),
        doctor_fields(errors, form, specializations)
    );
    layout(chrome, "Doctors", &body)
}

pub fn doctor_form(
    chrome: &Chrome<'_>,
    id: i64,
    specializations: &[Specialization],
    form: &DoctorForm,
    errors: &FormErrors,
) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="/panel/doctors/{id}/edit/">{}{}<button>Save</button></form>"#,
        errors_for(errors, NON_FIELD),
        doctor_fields(errors, form, specializations)
    );
    layout(chrome, "Edit doctor", &body)
}

pub fn panel_specializations(
    chrome: &Chrome<'_>,
    specializations: &[Specialization],
    name: &str,
    errors: &FormErrors,
) -> Html<String> {
    let mut rows = String::from("<ul>");
    for s in specializations {
        let _ = write!(
            rows,
            r#"<li>{} <a href="/panel/specializations/{id}/edit/">Edit</a> <form method="post" action="/panel/specializations/{id}/delete/" style="display:inline"><button>Delete</button></form></li>"#,
            escape(&s.name),
            id = s.id
        );
    }
    rows.push_str("</ul>");
    let body = format!(
        r#"{rows}<h2>Add specialization</h2><form method="post" action="/panel/specializations/">{}<button>Save</button></form>"#,
        input(errors, "Name", "name", "text", name)
    );
    layout(chrome, "Specializations", &body)
}

pub fn specialization_form(
    chrome: &Chrome<'_>,
    id: i64,
    name: &str,
    errors: &FormErrors,
) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="/panel/specializations/{id}/edit/">{}<button>Save</button></form>"#,
        input(errors, "Name", "name", "text", name)
    );
    layout(chrome, "Edit specialization", &body)
}

pub fn panel_appointments(
    chrome: &Chrome<'_>,
    appointments: &[AppointmentListing],
    doctors: &[DoctorListing],
    query: &AppointmentFilterQuery,
    errors: &FormErrors,
) -> Html<String> {
    let statuses: Vec<(String, String)> = AppointmentStatus::ALL
        .iter()
        .map(|s| (s.to_string(), s.to_string()))
        .collect();
    let none = FormErrors::new();
    let filter = format!(
        r#"<form method="get">{}{}<button>Filter</button></form>"#,
        select(&none, "Doctor", "doctor", "All doctors", &doctor_options(doctors), &query.doctor),
        select(&none, "Status", "status", "All statuses", &statuses, &query.status),
    );
    let encoded = query.encoded();
    let action = if encoded.is_empty() {
        "/panel/appointments/".to_string()
    } else {
        format!("/panel/appointments/?{encoded}")
    };
    let problems: String = errors
        .iter()
        .map(|e| format!(r#"<p class="error">{}</p>"#, escape(&e.message)))
        .collect();
    let body = format!("{filter}{problems}{}", appointment_rows(appointments, Some(&action)));
    layout(chrome, "Appointments", &body)
}

pub fn signup_form(chrome: &Chrome<'_>, form: &SignupForm, errors: &FormErrors) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="/accounts/signup/">{}{}{}{}{}<button>Create account</button></form>"#,
        errors_for(errors, NON_FIELD),
        input(errors, "Username", "username", "text", &form.username),
        input(errors, "Full name", "name", "text", &form.name),
        input(errors, "Phone", "phone", "text", &form.phone),
        input(errors, "Email", "email", "email", &form.email),
    );
    layout(chrome, "Sign up", &body)
}

pub fn login_form(chrome: &Chrome<'_>, next: &str, errors: &FormErrors) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="/accounts/login/">{}<input type="hidden" name="next" value="{}"><button>Log in</button></form>"#,
        input(errors, "Session token", "token", "password", ""),
        escape(next)
    );
    layout(chrome, "Log in", &body)
}
