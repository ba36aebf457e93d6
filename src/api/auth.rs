//! Authentication: signed session tokens, the `protect`/`restrict_to` guards,
//! and the account credential endpoints.
//!
//! A token is accepted from `Authorization: Bearer <token>` or from the `jwt`
//! cookie, in that order. Rendered pages use [`optional_auth`], which never
//! fails and only looks at the cookie.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::error::AppError;
use super::extract::AppJson;
use crate::config::Config;
use crate::crypto::{self, ResetToken};
use crate::db::models::common::format_timestamp;
use crate::db::{repository, CreateUserRequest, Role, User, UserResponse};
use crate::notifications::{send_template, Template};
use crate::AppState;

pub const JWT_COOKIE: &str = "jwt";
const LOGGED_OUT: &str = "loggedout";
const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";
const EMAIL_FAILED: &str = "There was an error sending the email. Try again later!";

/// The authenticated user, placed in request extensions by [`protect`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::internal("Route requires the protect middleware"))
    }
}

/// The logged-in user on rendered pages, if any.
#[derive(Debug, Clone, Default)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<CurrentUser>().map(|c| c.0.clone()),
        ))
    }
}

/// Bearer header first, then the session cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(JWT_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Verify a token and load the user it names.
pub async fn resolve_user(state: &AppState, token: &str) -> Result<User, AppError> {
    let claims = state.tokens.verify(token)?;

    let user = User::find_active(&state.db, &claims.sub)
        .await?
        .ok_or_else(AppError::identity_gone)?;

    if user.changed_password_after(claims.iat) {
        return Err(AppError::stale_credential());
    }
    Ok(user)
}

/// Middleware that rejects requests without a valid session
pub async fn protect(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token =
        extract_token(request.headers()).ok_or_else(|| AppError::unauthenticated(NOT_LOGGED_IN))?;
    let user = resolve_user(&state, &token).await?;

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Middleware for rendered pages: attach the user when the cookie is valid,
/// carry on anonymously otherwise.
pub async fn optional_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(JWT_COOKIE) {
        match resolve_user(&state, cookie.value()).await {
            Ok(user) => {
                request.extensions_mut().insert(CurrentUser(user));
            }
            Err(err) => tracing::trace!(error = %err, "Ignoring session cookie"),
        }
    }
    next.run(request).await
}

/// Role check for a user already resolved by [`protect`].
pub fn authorize(user: Option<&User>, roles: &[Role]) -> Result<(), AppError> {
    let user = user.ok_or_else(|| AppError::internal("Role check ran before authentication"))?;
    if roles.contains(&user.role()) {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "You do not have permission to perform this action",
        ))
    }
}

/// Middleware admitting only the given roles. Layer it inside [`protect`].
pub async fn restrict_to(
    State(roles): State<&'static [Role]>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(
        request.extensions().get::<CurrentUser>().map(|c| &c.0),
        roles,
    )?;
    Ok(next.run(request).await)
}

/// Externally visible origin for links in emails and redirects
pub fn base_url(config: &Config, headers: &HeaderMap) -> String {
    if let Some(url) = &config.server.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}", host)
}

pub(crate) fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((JWT_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(config.environment.is_production())
        .max_age(time::Duration::days(config.auth.cookie_expires_in_days))
        .build()
}

/// Issue a token, set the cookie and return the standard auth envelope.
pub(crate) fn send_token(
    state: &AppState,
    jar: CookieJar,
    user: &User,
    status: StatusCode,
) -> Result<Response, AppError> {
    let token = state
        .tokens
        .issue(&user.id)
        .map_err(|e| AppError::internal("Could not issue session token").with_source(e))?;
    let jar = jar.add(session_cookie(&state.config, token.clone()));

    Ok((
        status,
        jar,
        Json(json!({
            "status": "success",
            "token": token,
            "data": { "user": UserResponse::from(user) },
        })),
    )
        .into_response())
}

async fn send_email(
    state: &AppState,
    user: &User,
    url: &str,
    template: Template,
) -> Result<(), AppError> {
    send_template(
        state.mailer.as_ref(),
        &user.email,
        user.first_name(),
        url,
        template,
        state.config.email.timeout(),
    )
    .await
    .map_err(|e| AppError::upstream(EMAIL_FAILED).with_source(e))
}

// DTOs

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub password_current: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

// Handlers

/// Create an account with the `user` role and log it in
pub async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    AppJson(request): AppJson<CreateUserRequest>,
) -> Result<Response, AppError> {
    let user: User = repository::create(&state.db, request).await?;
    tracing::info!(user_id = %user.id, "User signed up");

    let url = format!("{}/me", base_url(&state.config, &headers));
    send_email(&state, &user, &url, Template::Welcome).await?;

    send_token(&state, jar, &user, StatusCode::CREATED)
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<Response, AppError> {
    let user = check_credentials(&state, request).await?;
    send_token(&state, jar, &user, StatusCode::OK)
}

/// Look up the account for a login attempt and verify its password.
pub(crate) async fn check_credentials(
    state: &AppState,
    request: LoginRequest,
) -> Result<User, AppError> {
    let (email, password) = match (request.email, request.password) {
        (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
            (email, password)
        }
        _ => return Err(AppError::validation("Please provide email and password!")),
    };

    let user = User::find_by_email(&state.db, &email).await?;
    let user = match user {
        Some(user) if crypto::verify_password(&password, &user.password_hash) => user,
        _ => return Err(AppError::unauthenticated("Incorrect email or password")),
    };
    Ok(user)
}

/// Replace the session cookie with a short-lived placeholder
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let cookie = Cookie::build((JWT_COOKIE, LOGGED_OUT))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(10))
        .build();
    (jar.add(cookie), Json(json!({ "status": "success" })))
}

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(request): AppJson<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = request.email.unwrap_or_default();
    let mut user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::not_found("There is no user with that email address."))?;

    let reset = ResetToken::generate(chrono::Duration::minutes(
        state.config.auth.reset_token_minutes,
    ));
    user.password_reset_token = Some(reset.hashed.clone());
    user.password_reset_expires = Some(format_timestamp(reset.expires_at));
    user.save_credentials(&state.db).await?;

    let url = format!(
        "{}/api/v1/users/resetPassword/{}",
        base_url(&state.config, &headers),
        reset.plain
    );
    if let Err(err) = send_email(&state, &user, &url, Template::PasswordReset).await {
        user.password_reset_token = None;
        user.password_reset_expires = None;
        user.save_credentials(&state.db).await?;
        return Err(err);
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    })))
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(token): Path<String>,
    AppJson(request): AppJson<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    let hashed = crypto::hash_token(&token);
    let mut user = User::find_by_reset_token(&state.db, &hashed)
        .await?
        .filter(|u| u.reset_token_valid_at(Utc::now()))
        .ok_or_else(|| AppError::validation("Token is invalid or has expired"))?;

    user.set_password(
        request.password.as_deref().unwrap_or_default(),
        request.password_confirm.as_deref().unwrap_or_default(),
    )?;
    user.save_credentials(&state.db).await?;
    tracing::info!(user_id = %user.id, "Password reset");

    send_token(&state, jar, &user, StatusCode::OK)
}

pub async fn update_my_password(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    CurrentUser(mut user): CurrentUser,
    AppJson(request): AppJson<UpdatePasswordRequest>,
) -> Result<Response, AppError> {
    let current = request.password_current.unwrap_or_default();
    if !crypto::verify_password(&current, &user.password_hash) {
        return Err(AppError::unauthenticated("Your current password is wrong"));
    }

    user.set_password(
        request.password.as_deref().unwrap_or_default(),
        request.password_confirm.as_deref().unwrap_or_default(),
    )?;
    user.save_credentials(&state.db).await?;

    send_token(&state, jar, &user, StatusCode::OK)
}
