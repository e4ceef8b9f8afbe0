//! Shared-secret admin login backed by an opaque session cookie.
//!
//! The ticket routes never consult this gate; it only tells the dashboard
//! front end whether the caller has logged in.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;

pub const SESSION_COOKIE: &str = "admin_session";
const SESSION_TTL_SECS: i64 = 60 * 60 * 24;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("ADMIN_PASSWORD is not configured on the server")]
    NotConfigured,
    #[error("wrong password")]
    WrongPassword,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::WrongPassword => StatusCode::UNAUTHORIZED,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Issues and checks admin sessions.
#[derive(Clone)]
pub struct AdminGate {
    password: Option<Arc<str>>,
    secure_cookies: bool,
    sessions: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl AdminGate {
    pub fn new(password: Option<String>, secure_cookies: bool) -> Self {
        Self {
            password: password.map(Arc::from),
            secure_cookies,
            sessions: Arc::default(),
        }
    }

    /// Check `candidate` and open a session, returning its token.
    pub async fn login(&self, candidate: &str) -> Result<String, AuthError> {
        let expected = self.password.as_deref().ok_or(AuthError::NotConfigured)?;
        if candidate != expected {
            tracing::warn!("admin login rejected");
            return Err(AuthError::WrongPassword);
        }
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let expires = Utc::now() + Duration::seconds(SESSION_TTL_SECS);
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, exp| *exp > Utc::now());
        sessions.insert(token.clone(), expires);
        tracing::info!("admin session opened");
        Ok(token)
    }

    pub async fn logout(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    pub async fn is_authenticated(&self, token: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(token)
            .map_or(false, |exp| *exp > Utc::now())
    }

    /// `Set-Cookie` value for `token`; an empty token with `max_age` 0
    /// clears the cookie.
    fn cookie(&self, token: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age}"
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Extract the session token from the `Cookie` headers.
fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_string)
        })
        .filter(|t| !t.is_empty())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct SessionStatus {
    pub authenticated: bool,
}

fn with_cookie(cookie: String, body: Json<serde_json::Value>) -> Response {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => ([(header::SET_COOKIE, value)], body).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// `POST /auth`
pub async fn login(
    State(gate): State<AdminGate>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let token = gate.login(&req.password).await?;
    let cookie = gate.cookie(&token, SESSION_TTL_SECS);
    Ok(with_cookie(cookie, Json(json!({ "success": true }))))
}

/// `DELETE /auth`
pub async fn logout(State(gate): State<AdminGate>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        gate.logout(&token).await;
    }
    with_cookie(gate.cookie("", 0), Json(json!({ "success": true })))
}

/// `GET /auth`
pub async fn session(State(gate): State<AdminGate>, headers: HeaderMap) -> Json<SessionStatus> {
    let authenticated = match session_token(&headers) {
        Some(token) => gate.is_authenticated(&token).await,
        None => false,
    };
    Json(SessionStatus { authenticated })
}
