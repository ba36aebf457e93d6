//! Unified error handling for the API and the rendered pages.
//!
//! Handlers return [`AppError`]. Its `IntoResponse` impl attaches an
//! [`ErrorReport`] to the response, and [`normalize_errors`] rewrites every
//! failed response into one shape: JSON under `/api`, an HTML page elsewhere.
//! How much detail is shown depends on the configured [`Environment`].

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
        OriginalUri, Request, State,
    },
    http::{header, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Environment;
use crate::ui::templates;
use crate::AppState;

/// Classification of failures. Decides the status code and whether the
/// message is safe to show to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    InvalidToken,
    StaleCredential,
    IdentityGone,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    /// An outside service (mail, payments) failed; the message is still safe to show
    Upstream,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated
            | ErrorKind::InvalidToken
            | ErrorKind::StaleCredential
            | ErrorKind::IdentityGone => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Upstream | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::StaleCredential => "stale_credential",
            ErrorKind::IdentityGone => "identity_gone",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::Upstream => "upstream_error",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Operational errors are expected and carry a client-facing message.
    pub fn is_operational(&self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }
}

/// Field name -> messages
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Error type returned by every handler and storage operation.
#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    status: StatusCode,
    message: String,
    details: Option<FieldErrors>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: kind.status_code(),
            kind,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Override the HTTP status while keeping the kind
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Attach the underlying cause; it shows up in the development stack.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&FieldErrors> {
        self.details.as_ref()
    }

    /// `fail` for client errors, `error` for server errors.
    pub fn status_text(&self) -> &'static str {
        status_text(self.status)
    }

    // -------------------------------------------------------------------------
    // Convenience constructors
    // -------------------------------------------------------------------------

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Validation error with field-level details
    pub fn validation_errors(errors: FieldErrors) -> Self {
        let all: Vec<&str> = errors.values().flatten().map(String::as_str).collect();
        let message = if all.is_empty() {
            "Validation failed".to_string()
        } else {
            format!("Invalid input data. {}", all.join(". "))
        };

        let mut err = Self::new(ErrorKind::Validation, message);
        err.details = Some(errors);
        err
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::validation_errors(errors)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidToken, message)
    }

    pub fn stale_credential() -> Self {
        Self::new(
            ErrorKind::StaleCredential,
            "User recently changed password! Please log in again.",
        )
    }

    pub fn identity_gone() -> Self {
        Self::new(
            ErrorKind::IdentityGone,
            "The user belonging to this token no longer exists.",
        )
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TooManyRequests, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Collect this error's message and every cause below it.
    fn chain(&self) -> Vec<String> {
        let mut chain = vec![format!("{}: {}", self.kind.as_str(), self.message)];
        let mut current: Option<&(dyn std::error::Error + 'static)> = match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        };
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

fn status_text(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

/// Everything the normalizer needs to render a failed response.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
    pub details: Option<FieldErrors>,
    pub chain: Vec<String>,
}

impl ErrorReport {
    fn json_body(&self, environment: Environment) -> serde_json::Value {
        let status = status_text(self.status);
        match environment {
            Environment::Development => json!({
                "status": status,
                "error": {
                    "kind": self.kind,
                    "statusCode": self.status.as_u16(),
                    "details": self.details,
                },
                "message": self.message,
                "stack": self.chain,
            }),
            Environment::Production if self.kind.is_operational() => match &self.details {
                Some(details) => json!({
                    "status": status,
                    "message": self.message,
                    "errors": details,
                }),
                None => json!({ "status": status, "message": self.message }),
            },
            Environment::Production => json!({
                "status": "error",
                "message": "Something went very wrong!",
            }),
        }
    }

    fn page_message(&self, environment: Environment) -> &str {
        if environment.is_production() && !self.kind.is_operational() {
            "Please try again later."
        } else {
            &self.message
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = ErrorReport {
            kind: self.kind,
            status: self.status,
            message: self.message.clone(),
            details: self.details.clone(),
            chain: self.chain(),
        };

        // Production-safe body; the normalizer replaces it when mounted.
        let mut response = (
            self.status,
            Json(report.json_body(Environment::Production)),
        )
            .into_response();
        response.extensions_mut().insert(report);
        response
    }
}

/// Middleware that renders every failed response the same way.
pub async fn normalize_errors(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let is_api = path.starts_with("/api");
    let response = next.run(request).await;

    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let report = match response.extensions().get::<ErrorReport>() {
        Some(report) => report.clone(),
        None if response.headers().contains_key(header::CONTENT_TYPE) && !is_api => {
            return response;
        }
        // Framework-level failures such as 405 or 413 without an AppError
        None => ErrorReport {
            kind: if status.is_server_error() {
                ErrorKind::Internal
            } else {
                ErrorKind::Validation
            },
            status,
            message: status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
            details: None,
            chain: Vec::new(),
        },
    };

    let environment = state.config.environment;
    if report.kind.is_operational() {
        tracing::debug!(
            path = %path,
            status = report.status.as_u16(),
            kind = report.kind.as_str(),
            "{}",
            report.message
        );
    } else {
        tracing::error!(
            path = %path,
            status = report.status.as_u16(),
            chain = ?report.chain,
            "Unhandled error"
        );
    }

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::CONTENT_TYPE);

    let rendered = if is_api {
        Json(report.json_body(environment)).into_response()
    } else {
        Html(templates::error_page(
            "Something went wrong!",
            report.page_message(environment),
        ))
        .into_response()
    };

    let (rendered_parts, body) = rendered.into_parts();
    parts.headers.extend(rendered_parts.headers);
    Response::from_parts(parts, body)
}

/// Fallback for unmatched routes.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::not_found(format!("Can't find {} on this server!", uri))
}

// -------------------------------------------------------------------------
// Conversions
// -------------------------------------------------------------------------

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::not_found("No document found with that ID"),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                if let Some(fields) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    let fields: Vec<&str> = fields
                        .split(", ")
                        .map(|f| f.rsplit('.').next().unwrap_or(f))
                        .collect();
                    AppError::conflict(format!(
                        "Duplicate field value for {}. Please use another value!",
                        fields.join(", ")
                    ))
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    AppError::validation("Referenced resource does not exist")
                } else {
                    AppError::internal("A database error occurred").with_source(err)
                }
            }
            _ => AppError::internal("A database error occurred").with_source(err),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        AppError::validation(format!("Invalid request body: {}", rejection.body_text()))
            .with_status(status)
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::validation(format!("Invalid path: {}", rejection.body_text()))
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        let status = rejection.status();
        AppError::validation(format!("Invalid form data: {}", rejection.body_text()))
            .with_status(status)
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        let status = rejection.status();
        AppError::validation(format!("Invalid upload: {}", rejection.body_text())).with_status(status)
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        AppError::validation(format!("Invalid upload: {}", err.body_text())).with_status(status)
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::invalid_token("Your token has expired! Please log in again.")
            }
            _ => AppError::invalid_token("Invalid token. Please log in again!"),
        }
    }
}

impl From<crate::query::QueryError> for AppError {
    fn from(err: crate::query::QueryError) -> Self {
        AppError::validation(err.to_string())
    }
}

impl From<crate::images::ImageError> for AppError {
    fn from(err: crate::images::ImageError) -> Self {
        match err {
            crate::images::ImageError::NotAnImage => AppError::validation(err.to_string()),
            crate::images::ImageError::Decode(_) => {
                AppError::validation("Could not read the uploaded image").with_source(err)
            }
            _ => AppError::internal("Failed to store image").with_source(err),
        }
    }
}

impl From<crate::geo::GeoError> for AppError {
    fn from(err: crate::geo::GeoError) -> Self {
        AppError::validation(err.to_string())
    }
}

impl From<crate::payments::PaymentError> for AppError {
    fn from(err: crate::payments::PaymentError) -> Self {
        AppError::upstream("Could not create a checkout session. Try again later!").with_source(err)
    }
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AppError::internal(format!("Failed to hash password: {}", err))
    }
}

// -------------------------------------------------------------------------
// Builder for validation errors
// -------------------------------------------------------------------------

/// Collects field errors before persisting a record.
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: FieldErrors,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a `Result<(), String>` validator, if any
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn build(self) -> Option<AppError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(AppError::validation_errors(self.errors))
        }
    }

    pub fn finish(self) -> Result<(), AppError> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_codes() {
        assert_eq!(ErrorKind::Validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflict.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::StaleCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::IdentityGone.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_status_text() {
        assert_eq!(AppError::not_found("x").status_text(), "fail");
        assert_eq!(AppError::forbidden("x").status_text(), "fail");
        assert_eq!(AppError::internal("x").status_text(), "error");
    }

    #[test]
    fn test_validation_error_builder() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("name", "A tour must have a name");
        builder.add("price", "A tour must have a price");
        builder.check("name", Err("too short".to_string()));
        builder.check("summary", Ok(()));

        assert!(!builder.is_empty());

        let err = builder.build().unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let details = err.details().unwrap();
        assert_eq!(details.get("name").unwrap().len(), 2);
        assert!(details.get("summary").is_none());
        assert!(err.message().starts_with("Invalid input data."));
    }

    #[test]
    fn test_empty_builder_finishes_ok() {
        assert!(ValidationErrorBuilder::new().finish().is_ok());
    }

    #[test]
    fn test_chain_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = AppError::internal("Could not save").with_source(io);
        let chain = err.chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].contains("Could not save"));
        assert_eq!(chain[1], "disk on fire");
    }

    #[test]
    fn test_production_hides_internal_details() {
        let report = ErrorReport {
            kind: ErrorKind::Internal,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "connection reset".to_string(),
            details: None,
            chain: vec!["internal_error: connection reset".to_string()],
        };

        let body = report.json_body(Environment::Production);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Something went very wrong!");
        assert!(body.get("stack").is_none());

        let body = report.json_body(Environment::Development);
        assert_eq!(body["message"], "connection reset");
        assert_eq!(body["stack"][0], "internal_error: connection reset");
        assert_eq!(body["error"]["statusCode"], 500);

        assert_eq!(report.page_message(Environment::Production), "Please try again later.");
    }

    #[test]
    fn test_production_shows_operational_message() {
        let report = ErrorReport {
            kind: ErrorKind::NotFound,
            status: StatusCode::NOT_FOUND,
            message: "No tour found with that ID".to_string(),
            details: None,
            chain: Vec::new(),
        };

        let body = report.json_body(Environment::Production);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "No tour found with that ID");
        assert_eq!(
            report.page_message(Environment::Production),
            "No tour found with that ID"
        );
    }

    #[test]
    fn test_into_response_attaches_report() {
        let response = AppError::forbidden("nope").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.kind, ErrorKind::Forbidden);
        assert_eq!(report.message, "nope");
    }

    #[test]
    fn test_jwt_errors_map_to_invalid_token() {
        let expired: jsonwebtoken::errors::Error =
            jsonwebtoken::errors::ErrorKind::ExpiredSignature.into();
        let err = AppError::from(expired);
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
        assert!(err.message().contains("expired"));

        let malformed: jsonwebtoken::errors::Error =
            jsonwebtoken::errors::ErrorKind::InvalidToken.into();
        assert_eq!(AppError::from(malformed).kind(), ErrorKind::InvalidToken);
    }
}
