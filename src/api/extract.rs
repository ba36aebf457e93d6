//! Extractors whose rejections go through [`AppError`], so malformed bodies and
//! query strings get the same error shape as everything else.

use axum::extract::{FromRequest, FromRequestParts};

use super::error::AppError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// URL-encoded form bodies posted by the rendered pages
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Form), rejection(AppError))]
pub struct AppForm<T>(pub T);

/// Raw query pairs in request order. Repeated keys are kept.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Query parameters as the query builder consumes them
pub type QueryPairs = AppQuery<Vec<(String, String)>>;
