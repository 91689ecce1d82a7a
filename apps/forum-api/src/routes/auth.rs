//! Auth routes: login and logout via a session cookie.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::SESSION_COOKIE;
use crate::auth::password;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::AppState;

/// Longest accepted username or email at login.
const MAX_IDENTIFIER_LEN: usize = 30;
/// Longest accepted password at login.
const MAX_PASSWORD_LEN: usize = 20;

const INVALID_CREDENTIALS: &str = "Invalid Username or Password.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout).get(logout))
}

// ---------------------------------------------------------------------------
// POST /api/login
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
}

#[utoipa::path(
    post,
    path = "/api/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; session cookie set", body = LoginResponse),
        (status = 400, description = "Input too long", body = ApiErrorBody),
        (status = 401, description = "Invalid credentials", body = ApiErrorBody),
    ),
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    validate_login(&body)?;

    let user = state
        .users
        .find_by_login(&body.username)
        .await?
        .ok_or_else(|| ApiError::unauthorized(INVALID_CREDENTIALS))?;

    password::verify_password(&body.password, &user.password_hash)?;

    // Any earlier session for this user stops resolving here.
    let token = state.sessions.create_session(user.id);

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.config.session_cookie_secure)
        .same_site(SameSite::Strict);

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            user_id: user.id,
            username: user.username,
        }),
    ))
}

fn validate_login(body: &LoginRequest) -> Result<(), ApiError> {
    let mut errors = Vec::new();
    if body.username.chars().count() > MAX_IDENTIFIER_LEN {
        errors.push(FieldError {
            field: "username".to_string(),
            message: format!("Username or Email cannot exceed {MAX_IDENTIFIER_LEN} characters."),
        });
    }
    if body.password.chars().count() > MAX_PASSWORD_LEN {
        errors.push(FieldError {
            field: "password".to_string(),
            message: format!("Password cannot exceed {MAX_PASSWORD_LEN} characters."),
        });
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(errors))
    }
}

// ---------------------------------------------------------------------------
// POST /api/logout
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/logout",
    tag = "Auth",
    responses((status = 200, description = "Session destroyed and cookie cleared")),
)]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(cookie.value());
    }
    (jar.remove(Cookie::build(SESSION_COOKIE).path("/")), StatusCode::OK)
}
