//! Review routes. Every write recomputes the rating statistics of the
//! tours it touched.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;

use super::auth::{self, CurrentUser};
use super::error::{AppError, ErrorKind};
use super::extract::{AppJson, AppQuery, QueryPairs};
use super::factory;
use crate::db::ratings::recalculate_tour_ratings;
use crate::db::resource::Resource;
use crate::db::{repository, CreateReviewRequest, Review, Role, UpdateReviewRequest, User};
use crate::query::Predicate;
use crate::AppState;

/// Roles allowed to write reviews
pub const AUTHORS: &[Role] = &[Role::User];
const EDITORS: &[Role] = &[Role::User, Role::Admin];

/// Router mounted at `/api/v1/reviews`
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let authors = middleware::from_fn_with_state(AUTHORS, auth::restrict_to);
    let editors = middleware::from_fn_with_state(EDITORS, auth::restrict_to);

    Router::new()
        .route(
            "/",
            get(factory::get_all::<Review>).merge(post(create_review).route_layer(authors)),
        )
        .route(
            "/:id",
            get(factory::get_one::<Review>).merge(
                patch(update_review)
                    .delete(delete_review)
                    .route_layer(editors),
            ),
        )
        .route_layer(middleware::from_fn_with_state(state, auth::protect))
}

async fn refresh_ratings(state: &AppState, tour_id: &str) -> Result<(), AppError> {
    let stats = recalculate_tour_ratings(&state.db, tour_id, state.config.ratings.baseline).await?;
    tracing::debug!(
        tour_id,
        quantity = stats.quantity,
        average = stats.average,
        "Tour ratings updated"
    );
    Ok(())
}

fn duplicate_review(err: AppError) -> AppError {
    if err.kind() == ErrorKind::Conflict {
        AppError::conflict("You have already reviewed this tour")
    } else {
        err
    }
}

/// Only the author or an admin may change a review
fn check_owner(review: &Review, user: &User) -> Result<(), AppError> {
    if user.role() == Role::Admin || review.user_id == user.id {
        Ok(())
    } else {
        Err(AppError::forbidden("You can only change your own reviews"))
    }
}

async fn store_review(
    state: &AppState,
    user: &User,
    mut input: CreateReviewRequest,
) -> Result<Review, AppError> {
    input.user = Some(user.id.clone());
    let review: Review = repository::create(&state.db, input)
        .await
        .map_err(duplicate_review)?;
    refresh_ratings(state, &review.tour_id).await?;
    Ok(review)
}

/// Reviews of one tour, `GET /tours/:id/reviews`
pub async fn get_tour_reviews(
    State(state): State<Arc<AppState>>,
    Path(tour_id): Path<String>,
    AppQuery(params): QueryPairs,
) -> Result<Json<Value>, AppError> {
    factory::list::<Review>(&state, &params, Some(Predicate::eq("tour", tour_id))).await
}

/// `POST /tours/:id/reviews`; the tour comes from the path
pub async fn create_tour_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(tour_id): Path<String>,
    AppJson(mut input): AppJson<CreateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    input.tour = Some(tour_id);
    let review = store_review(&state, &user, input).await?;
    Ok((StatusCode::CREATED, factory::envelope(review.to_document())))
}

pub async fn create_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    AppJson(input): AppJson<CreateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let review = store_review(&state, &user, input).await?;
    Ok((StatusCode::CREATED, factory::envelope(review.to_document())))
}

pub async fn update_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    AppJson(patch): AppJson<UpdateReviewRequest>,
) -> Result<Json<Value>, AppError> {
    let existing: Review = repository::find_by_id(&state.db, &id).await?;
    check_owner(&existing, &user)?;

    let review: Review = repository::update_by_id(&state.db, &id, patch)
        .await
        .map_err(duplicate_review)?;

    refresh_ratings(&state, &review.tour_id).await?;
    if existing.tour_id != review.tour_id {
        refresh_ratings(&state, &existing.tour_id).await?;
    }
    Ok(factory::envelope(review.to_document()))
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let existing: Review = repository::find_by_id(&state.db, &id).await?;
    check_owner(&existing, &user)?;

    let review: Review = repository::delete_by_id(&state.db, &id).await?;
    refresh_ratings(&state, &review.tour_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateTourRequest, CreateUserRequest, Tour};
    use crate::testing::context;

    async fn user(state: &AppState, email: &str, role: Role) -> User {
        let mut user: User = repository::create(
            &state.db,
            CreateUserRequest {
                name: Some("Test Person".to_string()),
                email: Some(email.to_string()),
                password: Some("pass1234".to_string()),
                password_confirm: Some("pass1234".to_string()),
                photo: None,
            },
        )
        .await
        .unwrap();
        user.role = role.to_string();
        user.update(&state.db).await.unwrap();
        user
    }

    async fn tour(state: &AppState, name: &str) -> Tour {
        repository::create(
            &state.db,
            CreateTourRequest {
                name: Some(name.to_string()),
                duration: Some(3),
                max_group_size: Some(8),
                difficulty: Some("easy".to_string()),
                price: Some(297.0),
                summary: Some("Short trip".to_string()),
                image_cover: Some("cover.jpg".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    fn review(rating: i64) -> CreateReviewRequest {
        CreateReviewRequest {
            review: Some("Great tour".to_string()),
            rating: Some(rating),
            ..Default::default()
        }
    }

    async fn stored_tour(state: &AppState, id: &str) -> Tour {
        repository::find_by_id(&state.db, id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_forces_author_and_updates_ratings() {
        let ctx = context().await;
        let author = user(&ctx.state, "author@example.com", Role::User).await;
        let other = user(&ctx.state, "other@example.com", Role::User).await;
        let hiker = tour(&ctx.state, "The Forest Hiker").await;

        let mut input = review(4);
        input.user = Some(other.id.clone());
        let created = store_review(
            &ctx.state,
            &author,
            CreateReviewRequest {
                tour: Some(hiker.id.clone()),
                ..input
            },
        )
        .await
        .unwrap();
        assert_eq!(created.user_id, author.id);

        let stored = stored_tour(&ctx.state, &hiker.id).await;
        assert_eq!(stored.ratings_quantity, 1);
        assert_eq!(stored.ratings_average, 4.0);

        let err = create_tour_review(
            State(ctx.state.clone()),
            CurrentUser(author),
            Path(hiker.id.clone()),
            AppJson(review(5)),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.message(), "You have already reviewed this tour");
    }

    #[tokio::test]
    async fn test_only_owner_or_admin_may_edit() {
        let ctx = context().await;
        let author = user(&ctx.state, "author@example.com", Role::User).await;
        let other = user(&ctx.state, "other@example.com", Role::User).await;
        let admin = user(&ctx.state, "admin@example.com", Role::Admin).await;
        let hiker = tour(&ctx.state, "The Forest Hiker").await;

        let mut input = review(3);
        input.tour = Some(hiker.id.clone());
        let created = store_review(&ctx.state, &author, input).await.unwrap();

        let err = update_review(
            State(ctx.state.clone()),
            CurrentUser(other),
            Path(created.id.clone()),
            AppJson(UpdateReviewRequest {
                rating: Some(1),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        update_review(
            State(ctx.state.clone()),
            CurrentUser(admin),
            Path(created.id.clone()),
            AppJson(UpdateReviewRequest {
                rating: Some(5),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(stored_tour(&ctx.state, &hiker.id).await.ratings_average, 5.0);
    }

    #[tokio::test]
    async fn test_moving_review_recomputes_both_tours() {
        let ctx = context().await;
        let author = user(&ctx.state, "author@example.com", Role::User).await;
        let helper = user(&ctx.state, "helper@example.com", Role::User).await;
        let hiker = tour(&ctx.state, "The Forest Hiker").await;
        let explorer = tour(&ctx.state, "The Sea Explorer").await;

        let created = store_review(
            &ctx.state,
            &author,
            CreateReviewRequest {
                tour: Some(hiker.id.clone()),
                ..review(2)
            },
        )
        .await
        .unwrap();
        store_review(
            &ctx.state,
            &helper,
            CreateReviewRequest {
                tour: Some(hiker.id.clone()),
                ..review(4)
            },
        )
        .await
        .unwrap();
        assert_eq!(stored_tour(&ctx.state, &hiker.id).await.ratings_average, 3.0);

        update_review(
            State(ctx.state.clone()),
            CurrentUser(author.clone()),
            Path(created.id.clone()),
            AppJson(UpdateReviewRequest {
                tour: Some(explorer.id.clone()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let hiker_now = stored_tour(&ctx.state, &hiker.id).await;
        assert_eq!((hiker_now.ratings_quantity, hiker_now.ratings_average), (1, 4.0));
        let explorer_now = stored_tour(&ctx.state, &explorer.id).await;
        assert_eq!((explorer_now.ratings_quantity, explorer_now.ratings_average), (1, 2.0));

        let status = delete_review(State(ctx.state.clone()), CurrentUser(author), Path(created.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let explorer_now = stored_tour(&ctx.state, &explorer.id).await;
        assert_eq!((explorer_now.ratings_quantity, explorer_now.ratings_average), (0, 4.5));
    }

    #[tokio::test]
    async fn test_tour_reviews_are_scoped() {
        let ctx = context().await;
        let author = user(&ctx.state, "author@example.com", Role::User).await;
        let hiker = tour(&ctx.state, "The Forest Hiker").await;
        let explorer = tour(&ctx.state, "The Sea Explorer").await;
        for t in [&hiker, &explorer] {
            store_review(
                &ctx.state,
                &author,
                CreateReviewRequest {
                    tour: Some(t.id.clone()),
                    ..review(5)
                },
            )
            .await
            .unwrap();
        }

        let Json(body) = get_tour_reviews(State(ctx.state.clone()), Path(hiker.id.clone()), AppQuery(vec![]))
            .await
            .unwrap();
        assert_eq!(body["results"], 1);
        assert_eq!(body["data"]["data"][0]["tour"], hiker.id.as_str());
        assert_eq!(body["data"]["data"][0]["user"]["name"], "Test Person");
    }
}
