pub mod auth;
pub mod bookings;
pub mod error;
pub mod extract;
pub mod factory;
pub mod rate_limit;
pub mod reviews;
pub mod tours;
pub mod uploads;
pub mod users;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    middleware, Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::ui;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .nest("/tours", tours::routes(state.clone()))
        .nest("/users", users::routes(state.clone()))
        .nest("/reviews", reviews::routes(state.clone()))
        .nest("/bookings", bookings::routes(state.clone()));

    let api_routes = Router::new()
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(state.config.server.json_limit_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    // Static assets under public/
    let public_dir = &state.config.server.public_dir;
    let assets = Router::new()
        .nest_service("/css", ServeDir::new(public_dir.join("css")))
        .nest_service("/js", ServeDir::new(public_dir.join("js")))
        .nest_service("/img", ServeDir::new(public_dir.join("img")));

    Router::new()
        .nest("/api", api_routes)
        .merge(ui::create_router(state.clone()))
        .merge(assets)
        .fallback(error::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::normalize_errors,
        ))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=15552000; includeSubDomains"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_DNS_PREFETCH_CONTROL,
            HeaderValue::from_static("off"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
