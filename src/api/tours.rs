//! Tour routes: CRUD, aliases, aggregates, proximity search and image upload.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::FromRow;
use std::sync::Arc;

use super::auth;
use super::error::AppError;
use super::extract::{AppQuery, QueryPairs};
use super::factory;
use super::reviews;
use super::uploads::UploadForm;
use crate::db::models::common::parse_json;
use crate::db::resource::{Expand, Resource};
use crate::db::{repository, Role, Tour, UpdateTourRequest};
use crate::geo::{self, Unit};
use crate::images::{self, TOUR_IMAGE};
use crate::query::{with_overrides, Projection};
use crate::AppState;

const EDITORS: &[Role] = &[Role::Admin, Role::LeadGuide];
const PLANNERS: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];
const MAX_TOUR_IMAGES: usize = 3;

/// Router mounted at `/api/v1/tours`
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let upload_limit = DefaultBodyLimit::max(state.config.server.upload_limit_bytes);
    let protect = middleware::from_fn_with_state(state, auth::protect);
    let editors = middleware::from_fn_with_state(EDITORS, auth::restrict_to);
    let planners = middleware::from_fn_with_state(PLANNERS, auth::restrict_to);

    Router::new()
        .route("/top-5-cheap", get(top_five_cheap))
        .route("/tour-stats", get(tour_stats))
        .route(
            "/monthly-plan/:year",
            get(monthly_plan)
                .route_layer(planners)
                .route_layer(protect.clone()),
        )
        .route(
            "/tours-within/:distance/center/:latlng/unit/:unit",
            get(tours_within),
        )
        .route("/distances/:latlng/:unit", get(distances))
        .route(
            "/",
            get(factory::get_all::<Tour>).merge(
                post(factory::create_one::<Tour>)
                    .route_layer(editors.clone())
                    .route_layer(protect.clone()),
            ),
        )
        .route(
            "/:id",
            get(factory::get_one::<Tour>).merge(
                patch(factory::update_one::<Tour>)
                    .delete(factory::delete_one::<Tour>)
                    .route_layer(editors.clone())
                    .route_layer(protect.clone()),
            ),
        )
        .route(
            "/:id/images",
            patch(upload_tour_images)
                .route_layer(editors)
                .route_layer(protect.clone())
                .layer(upload_limit),
        )
        .route(
            "/:id/reviews",
            get(reviews::get_tour_reviews)
                .merge(post(reviews::create_tour_review).route_layer(
                    middleware::from_fn_with_state(reviews::AUTHORS, auth::restrict_to),
                ))
                .route_layer(protect),
        )
}

/// The five best rated, cheapest tours
pub async fn top_five_cheap(
    State(state): State<Arc<AppState>>,
    AppQuery(params): QueryPairs,
) -> Result<Json<Value>, AppError> {
    let params = with_overrides(
        params,
        &[
            ("limit", "5"),
            ("sort", "-ratingsAverage,price"),
            ("fields", "name,price,ratingsAverage,summary,difficulty"),
        ],
    );
    factory::list::<Tour>(&state, &params, None).await
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyStats {
    pub difficulty: String,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Statistics per difficulty for well rated tours, cheapest first
pub async fn tour_stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let stats: Vec<DifficultyStats> = sqlx::query_as(
        r#"
        SELECT UPPER(difficulty) AS difficulty,
               COUNT(*) AS num_tours,
               COALESCE(SUM(ratings_quantity), 0) AS num_ratings,
               AVG(ratings_average) AS avg_rating,
               AVG(price) AS avg_price,
               MIN(price) AS min_price,
               MAX(price) AS max_price
        FROM tours
        WHERE ratings_average >= 4.5 AND secret_tour = 0
        GROUP BY UPPER(difficulty)
        ORDER BY avg_price ASC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(factory::envelope(json!(stats)))
}

#[derive(Debug, FromRow)]
struct MonthRow {
    month: i64,
    num_tour_starts: i64,
    tours: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthPlan {
    pub month: i64,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

/// Tour starts per month of `year`, busiest month first
pub async fn monthly_plan(
    State(state): State<Arc<AppState>>,
    Path(year): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let rows: Vec<MonthRow> = sqlx::query_as(
        r#"
        SELECT CAST(substr(d.value, 6, 2) AS INTEGER) AS month,
               COUNT(*) AS num_tour_starts,
               json_group_array(t.name) AS tours
        FROM tours t, json_each(t.start_dates) d
        WHERE t.secret_tour = 0 AND d.value >= ? AND d.value < ?
        GROUP BY month
        ORDER BY num_tour_starts DESC, month ASC
        LIMIT 12
        "#,
    )
    .bind(format!("{:04}-01-01", year))
    .bind(format!("{:04}-01-01", year + 1))
    .fetch_all(&state.db)
    .await?;

    let plan: Vec<MonthPlan> = rows
        .into_iter()
        .map(|row| MonthPlan {
            month: row.month,
            num_tour_starts: row.num_tour_starts,
            tours: parse_json(Some(row.tours.as_str())),
        })
        .collect();

    Ok(factory::envelope(json!(plan)))
}

/// Tours starting within `distance` of a point
pub async fn tours_within(
    State(state): State<Arc<AppState>>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    let center = geo::parse_lat_lng(&latlng)?;
    let distance = geo::parse_distance(&distance)?;
    let unit = Unit::parse(&unit);

    let tours: Vec<Tour> = Tour::find_visible(&state.db)
        .await?
        .into_iter()
        .filter(|tour| {
            tour.get_start_location()
                .map(|start| {
                    let point = geo::Point {
                        lat: start.lat(),
                        lng: start.lng(),
                    };
                    geo::within(center, point, distance, unit)
                })
                .unwrap_or(false)
        })
        .collect();

    let docs = factory::documents(&state, &tours, Expand::List, &Projection::Default).await?;
    Ok(Json(json!({
        "status": "success",
        "results": docs.len(),
        "data": { "data": docs },
    })))
}

#[derive(Debug, Serialize)]
pub struct TourDistance {
    pub id: String,
    pub name: String,
    pub distance: f64,
}

/// Distance from a point to every tour's start, nearest first
pub async fn distances(
    State(state): State<Arc<AppState>>,
    Path((latlng, unit)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let origin = geo::parse_lat_lng(&latlng)?;
    let unit = Unit::parse(&unit);

    let mut results: Vec<TourDistance> = Tour::find_visible(&state.db)
        .await?
        .into_iter()
        .filter_map(|tour| {
            let start = tour.get_start_location()?;
            let point = geo::Point {
                lat: start.lat(),
                lng: start.lng(),
            };
            Some(TourDistance {
                distance: geo::distance(origin, point, unit),
                id: tour.id,
                name: tour.name,
            })
        })
        .collect();
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    Ok(factory::envelope(json!(results)))
}

/// Replace a tour's cover and gallery with uploaded images
pub async fn upload_tour_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let _: Tour = repository::find_by_id(&state.db, &id).await?;
    let form = UploadForm::read(multipart).await?;

    let gallery: Vec<_> = form.files_named("images").collect();
    if gallery.len() > MAX_TOUR_IMAGES {
        return Err(AppError::validation_field(
            "images",
            format!("A tour can have at most {} images", MAX_TOUR_IMAGES),
        ));
    }

    let dir = state.config.server.public_dir.join("img").join("tours");
    let stamp = Utc::now().timestamp_millis();
    let cover = form.file("imageCover");
    let cover_name = cover.map(|_| format!("tour-{}-{}-cover.jpeg", id, stamp));
    let gallery_names: Vec<String> = (1..=gallery.len())
        .map(|i| format!("tour-{}-{}-{}.jpeg", id, stamp, i))
        .collect();

    let stored = async {
        let mut patch = UpdateTourRequest::default();
        if let (Some(cover), Some(name)) = (cover, &cover_name) {
            images::save_resized(cover.bytes.to_vec(), TOUR_IMAGE, &dir, name).await?;
            patch.image_cover = Some(name.clone());
        }
        if !gallery.is_empty() {
            let saves = gallery
                .iter()
                .zip(&gallery_names)
                .map(|(file, name)| images::save_resized(file.bytes.to_vec(), TOUR_IMAGE, &dir, name));
            futures::future::try_join_all(saves).await?;
            patch.images = Some(gallery_names.clone());
        }
        Ok::<Tour, AppError>(repository::update_by_id(&state.db, &id, patch).await?)
    }
    .await;

    match stored {
        Ok(tour) => {
            tracing::info!(tour_id = %tour.id, "Tour images updated");
            Ok(factory::envelope(tour.to_document()))
        }
        Err(err) => {
            let written: Vec<String> = cover_name.into_iter().chain(gallery_names).collect();
            images::remove_files(&dir, &written).await;
            Err(err)
        }
    }
}
