//! Booking routes and the checkout flow.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::{self, CurrentUser};
use super::error::AppError;
use super::factory;
use crate::db::{repository, Booking, CreateBookingRequest, Role, Tour, User};
use crate::payments::{CheckoutRequest, LineItem};
use crate::AppState;

const MANAGERS: &[Role] = &[Role::Admin, Role::LeadGuide];

/// Router mounted at `/api/v1/bookings`
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let managed = Router::new()
        .route(
            "/",
            get(factory::get_all::<Booking>).post(factory::create_one::<Booking>),
        )
        .route(
            "/:id",
            get(factory::get_one::<Booking>)
                .patch(factory::update_one::<Booking>)
                .delete(factory::delete_one::<Booking>),
        )
        .route_layer(middleware::from_fn_with_state(MANAGERS, auth::restrict_to));

    Router::new()
        .route("/checkout-session/:tourId", get(get_checkout_session))
        .merge(managed)
        .route_layer(middleware::from_fn_with_state(state, auth::protect))
}

/// What the payment processor is asked to charge for `tour`.
pub fn checkout_request(base: &str, tour: &Tour, user: &User) -> CheckoutRequest {
    CheckoutRequest {
        success_url: format!(
            "{}/?tour={}&user={}&price={}",
            base, tour.id, user.id, tour.price
        ),
        cancel_url: format!("{}/tour/{}", base, tour.slug),
        customer_email: user.email.clone(),
        client_reference_id: tour.id.clone(),
        line_item: LineItem {
            name: format!("{} Tour", tour.name),
            description: tour.summary.clone(),
            images: vec![format!("{}/img/tours/{}", base, tour.image_cover)],
            amount: tour.price,
            quantity: 1,
        },
    }
}

/// Create a hosted checkout session for one tour
pub async fn get_checkout_session(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Path(tour_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let tour: Tour = repository::find_by_id(&state.db, &tour_id).await?;
    let base = auth::base_url(&state.config, &headers);

    let session = state
        .payments
        .create_checkout_session(&checkout_request(&base, &tour, &user))
        .await?;

    Ok(Json(json!({
        "status": "success",
        "session": session,
    })))
}

/// Record a paid booking after a successful checkout redirect.
pub async fn record_checkout(
    state: &AppState,
    tour_id: &str,
    user_id: &str,
    price: f64,
) -> Result<Booking, AppError> {
    let booking: Booking = repository::create(
        &state.db,
        CreateBookingRequest {
            tour: Some(tour_id.to_string()),
            user: Some(user_id.to_string()),
            price: Some(price),
            paid: None,
        },
    )
    .await?;
    tracing::info!(booking_id = %booking.id, tour_id, user_id, "Booking created from checkout");
    Ok(booking)
}
