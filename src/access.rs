//! Per-request identity and role guards.
//!
//! `resolve_identity` runs for every request and attaches an [`Identity`].
//! Guards built from [`Role`] run before a handler body and send callers
//! that lack the role to the login challenge instead.

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use log::warn;
use std::convert::Infallible;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::login_redirect;
use crate::models::User;

pub const SESSION_COOKIE: &str = "sessionid";
pub const SESSION_HEADER: &str = "x-session-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Anonymous,
    Patient,
    Staff,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    User(User),
}

impl Identity {
    pub fn role(&self) -> Role {
        match self {
            Identity::Anonymous => Role::Anonymous,
            Identity::User(user) if user.is_staff => Role::Staff,
            Identity::User(_) => Role::Patient,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }

    /// Staff pass the patient gate too: it only asks for a signed-in account.
    pub fn satisfies(&self, required: Role) -> bool {
        match required {
            Role::Anonymous => true,
            Role::Patient => self.user().is_some(),
            Role::Staff => self.role() == Role::Staff,
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Identity>().cloned().unwrap_or_default())
    }
}

/// Session token from the `X-Session-Token` header, else the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<Uuid> {
    if let Some(token) = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
    {
        return Some(token);
    }
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

pub async fn resolve_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = match session_token(req.headers()) {
        Some(token) => match state.store.user_for_session(token).await {
            Ok(Some(user)) => Identity::User(user),
            Ok(None) => Identity::Anonymous,
            Err(err) => return err.into_response(),
        },
        None => Identity::Anonymous,
    };
    req.extensions_mut().insert(identity);
    next.run(req).await
}

pub async fn require_staff(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(Role::Staff, &state.config.login_url, req, next).await
}

pub async fn require_patient(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(Role::Patient, &state.config.login_url, req, next).await
}

async fn enforce(required: Role, login_url: &str, req: Request, next: Next) -> Response {
    let identity = req.extensions().get::<Identity>().cloned().unwrap_or_default();
    if identity.satisfies(required) {
        return next.run(req).await;
    }
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    warn!(
        "{:?} denied {} {} (needs {:?})",
        identity.role(),
        req.method(),
        path,
        required
    );
    Redirect::to(&login_redirect(login_url, &path)).into_response()
}
