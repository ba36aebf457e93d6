//! Server-rendered pages. Public pages resolve the session softly, account
//! pages require it.

pub mod templates;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::auth::{self, CurrentUser, LoginRequest, MaybeUser};
use crate::api::bookings;
use crate::api::error::AppError;
use crate::api::extract::{AppForm, AppQuery};
use crate::db::models::tour::users_by_ids;
use crate::db::{repository, Review, Tour, UpdateUserRequest, User};
use crate::AppState;

use templates::ReviewCard;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/", get(overview))
        .route("/tour/:slug", get(tour_detail))
        .route("/login", get(login_form).post(login_submit))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::optional_auth));

    let account = Router::new()
        .route("/me", get(account))
        .route("/my-tours", get(my_tours))
        .route("/submit-user-data", post(submit_user_data))
        .route_layer(middleware::from_fn_with_state(state, auth::protect));

    public.merge(account)
}

/// Query parameters the payment processor sends the visitor back with
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutReturn {
    pub tour: Option<String>,
    pub user: Option<String>,
    pub price: Option<String>,
}

async fn overview(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    AppQuery(checkout): AppQuery<CheckoutReturn>,
) -> Result<Response, AppError> {
    if let (Some(tour_id), Some(user_id), Some(price)) =
        (&checkout.tour, &checkout.user, &checkout.price)
    {
        match (&user, price.parse::<f64>()) {
            (Some(visitor), Ok(price)) if &visitor.id == user_id => {
                bookings::record_checkout(&state, tour_id, user_id, price).await?;
            }
            _ => tracing::warn!(tour_id = %tour_id, "Ignoring checkout return for another visitor"),
        }
        return Ok(Redirect::to("/").into_response());
    }

    let tours = Tour::find_visible(&state.db).await?;
    Ok(Html(templates::overview("All Tours", &tours, user.as_ref())).into_response())
}

async fn tour_detail(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(slug): Path<String>,
) -> Result<Html<String>, AppError> {
    let tour = Tour::find_by_slug(&state.db, &slug)
        .await?
        .ok_or_else(|| AppError::not_found("There is no tour with that name."))?;

    let guide_ids = tour.get_guides();
    let mut guide_map = users_by_ids(&state.db, &guide_ids).await?;
    let guides: Vec<User> = guide_ids.iter().filter_map(|id| guide_map.remove(id)).collect();

    let reviews = Review::list_for_tour(&state.db, &tour.id).await?;
    let author_ids: Vec<String> = reviews.iter().map(|r| r.user_id.clone()).collect();
    let authors = users_by_ids(&state.db, &author_ids).await?;
    let cards: Vec<ReviewCard<'_>> = reviews
        .iter()
        .map(|review| ReviewCard {
            review,
            author: authors.get(&review.user_id),
        })
        .collect();

    Ok(Html(templates::tour_page(&tour, &guides, &cards, user.as_ref())))
}

async fn login_form(MaybeUser(user): MaybeUser) -> Response {
    if user.is_some() {
        return Redirect::to("/").into_response();
    }
    Html(templates::login_page(None)).into_response()
}

async fn login_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppForm(form): AppForm<LoginRequest>,
) -> Result<Response, AppError> {
    match auth::check_credentials(&state, form).await {
        Ok(user) => {
            let token = state
                .tokens
                .issue(&user.id)
                .map_err(|e| AppError::internal("Could not issue session token").with_source(e))?;
            let jar = jar.add(auth::session_cookie(&state.config, token));
            tracing::info!(user_id = %user.id, "User logged in from the login page");
            Ok((jar, Redirect::to("/")).into_response())
        }
        Err(err) if err.kind().is_operational() => Ok((
            err.status(),
            Html(templates::login_page(Some(err.message()))),
        )
            .into_response()),
        Err(err) => Err(err),
    }
}

async fn account(CurrentUser(user): CurrentUser) -> Html<String> {
    Html(templates::account_page(&user, None))
}

async fn my_tours(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Html<String>, AppError> {
    let tours = Tour::booked_by(&state.db, &user.id).await?;
    Ok(Html(templates::overview("My Tours", &tours, Some(&user))))
}

#[derive(Debug, Default, Deserialize)]
pub struct UserDataForm {
    pub name: Option<String>,
    pub email: Option<String>,
}

async fn submit_user_data(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    AppForm(form): AppForm<UserDataForm>,
) -> Result<Response, AppError> {
    let patch = UpdateUserRequest {
        name: form.name,
        email: form.email,
        ..Default::default()
    };
    let updated: User = repository::update_by_id(&state.db, &user.id, patch).await?;
    Ok((
        StatusCode::OK,
        Html(templates::account_page(&updated, Some("Your settings were saved."))),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Booking, CreateTourRequest, CreateUserRequest};
    use crate::testing::{context, TestContext};
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn seed(ctx: &TestContext) -> (Tour, User) {
        let tour: Tour = repository::create(
            &ctx.state.db,
            CreateTourRequest {
                name: Some("The Forest Hiker".to_string()),
                duration: Some(5),
                max_group_size: Some(25),
                difficulty: Some("easy".to_string()),
                price: Some(397.0),
                summary: Some("Breathtaking hike through the Canadian Banff National Park".to_string()),
                image_cover: Some("tour-1-cover.jpg".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let user: User = repository::create(
            &ctx.state.db,
            CreateUserRequest {
                name: Some("Laura Wilson".to_string()),
                email: Some("laura@example.com".to_string()),
                password: Some("pass1234".to_string()),
                password_confirm: Some("pass1234".to_string()),
                photo: None,
            },
        )
        .await
        .unwrap();
        (tour, user)
    }

    fn session(ctx: &TestContext, user: &User) -> String {
        format!("jwt={}", ctx.state.tokens.issue(&user.id).unwrap())
    }

    async fn send(ctx: &TestContext, request: Request<Body>) -> (StatusCode, Response) {
        let app = create_router(ctx.state.clone()).with_state(ctx.state.clone());
        let response = app.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_overview_is_public() {
        let ctx = context().await;
        seed(&ctx).await;

        let (status, response) = send(&ctx, get("/", None)).await;
        assert_eq!(status, StatusCode::OK);
        let html = text(response).await;
        assert!(html.contains("The Forest Hiker"));
        assert!(html.contains("Log in"));
    }

    #[tokio::test]
    async fn test_overview_ignores_bad_cookie() {
        let ctx = context().await;
        seed(&ctx).await;

        let (status, _) = send(&ctx, get("/", Some("jwt=loggedout"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_checkout_return_records_booking() {
        let ctx = context().await;
        let (tour, user) = seed(&ctx).await;
        let cookie = session(&ctx, &user);

        let uri = format!("/?tour={}&user={}&price=397", tour.id, user.id);
        let (status, response) = send(&ctx, get(&uri, Some(&cookie))).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let bookings = Booking::list_for_user(&ctx.state.db, &user.id).await.unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].tour_id, tour.id);
    }

    #[tokio::test]
    async fn test_checkout_return_for_other_visitor() {
        let ctx = context().await;
        let (tour, user) = seed(&ctx).await;

        let uri = format!("/?tour={}&user={}&price=397", tour.id, user.id);
        let (status, _) = send(&ctx, get(&uri, None)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);

        let bookings = Booking::list_for_user(&ctx.state.db, &user.id).await.unwrap();
        assert!(bookings.is_empty());
    }

    #[tokio::test]
    async fn test_tour_page() {
        let ctx = context().await;
        seed(&ctx).await;

        let (status, response) = send(&ctx, get("/tour/the-forest-hiker", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text(response).await.contains("The Forest Hiker tour"));

        let (status, _) = send(&ctx, get("/tour/no-such-tour", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_form_login() {
        let ctx = context().await;
        seed(&ctx).await;

        let (status, response) = send(
            &ctx,
            post_form("/login", None, "email=laura%40example.com&password=wrongpass"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(text(response).await.contains("Incorrect email or password"));

        let (status, response) = send(
            &ctx,
            post_form("/login", None, "email=laura%40example.com&password=pass1234"),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("jwt="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_account_pages_require_session() {
        let ctx = context().await;
        let (tour, user) = seed(&ctx).await;

        let (status, _) = send(&ctx, get("/me", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let cookie = session(&ctx, &user);
        let (status, response) = send(&ctx, get("/me", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text(response).await.contains("laura@example.com"));

        bookings::record_checkout(&ctx.state, &tour.id, &user.id, 397.0)
            .await
            .unwrap();
        let (_, response) = send(&ctx, get("/my-tours", Some(&cookie))).await;
        assert!(text(response).await.contains("The Forest Hiker"));
    }

    #[tokio::test]
    async fn test_submit_user_data() {
        let ctx = context().await;
        let (_, user) = seed(&ctx).await;
        let cookie = session(&ctx, &user);

        let (status, response) = send(
            &ctx,
            post_form("/submit-user-data", Some(&cookie), "name=Laura+Smith&email=laura%40example.com"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(text(response).await.contains("Laura Smith"));

        let stored = User::find_active(&ctx.state.db, &user.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Laura Smith");
    }
}
