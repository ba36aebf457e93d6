//! Tours and their derived rating statistics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::HashMap;

use super::common::{new_id, normalize_timestamp, now_timestamp, parse_json, slugify, to_json, Location};
use super::review::Review;
use super::user::{User, UserResponse};
use crate::api::error::{AppError, ValidationErrorBuilder};
use crate::api::validation;
use crate::db::resource::{Expand, Field, FieldKind, Resource};
use crate::db::DbPool;

/// Used when a tour is created without an explicit average.
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

#[derive(Debug, Clone, FromRow)]
pub struct Tour {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub duration: i64,
    pub max_group_size: i64,
    pub difficulty: String,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    /// JSON array of image file names
    pub images: String,
    /// JSON array of RFC 3339 timestamps
    pub start_dates: String,
    pub secret_tour: bool,
    /// JSON GeoJSON point
    pub start_location: Option<String>,
    /// JSON array of GeoJSON points
    pub locations: String,
    /// JSON array of user ids
    pub guides: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourResponse {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub duration: i64,
    pub duration_weeks: f64,
    pub max_group_size: i64,
    pub difficulty: String,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<Location>,
    pub locations: Vec<Location>,
    pub guides: Vec<String>,
    pub created_at: String,
}

impl From<&Tour> for TourResponse {
    fn from(tour: &Tour) -> Self {
        Self {
            id: tour.id.clone(),
            name: tour.name.clone(),
            slug: tour.slug.clone(),
            duration: tour.duration,
            duration_weeks: tour.duration_weeks(),
            max_group_size: tour.max_group_size,
            difficulty: tour.difficulty.clone(),
            ratings_average: tour.ratings_average,
            ratings_quantity: tour.ratings_quantity,
            price: tour.price,
            price_discount: tour.price_discount,
            summary: tour.summary.clone(),
            description: tour.description.clone(),
            image_cover: tour.image_cover.clone(),
            images: tour.get_images(),
            start_dates: tour.get_start_dates(),
            start_location: tour.get_start_location(),
            locations: tour.get_locations(),
            guides: tour.get_guides(),
            created_at: tour.created_at.clone(),
        }
    }
}

impl Tour {
    pub fn duration_weeks(&self) -> f64 {
        (self.duration as f64 / 7.0 * 10.0).round() / 10.0
    }

    pub fn get_images(&self) -> Vec<String> {
        parse_json(Some(&self.images))
    }

    pub fn get_start_dates(&self) -> Vec<String> {
        parse_json(Some(&self.start_dates))
    }

    pub fn get_start_location(&self) -> Option<Location> {
        self.start_location
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn get_locations(&self) -> Vec<Location> {
        parse_json(Some(&self.locations))
    }

    pub fn get_guides(&self) -> Vec<String> {
        parse_json(Some(&self.guides))
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.trim().to_string();
        self.slug = slugify(&self.name);
    }

    fn set_start_dates(&mut self, dates: &[String]) -> Result<(), AppError> {
        let normalized = dates
            .iter()
            .map(|d| normalize_timestamp(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::validation_field("startDates", e))?;
        self.start_dates = to_json(&normalized);
        Ok(())
    }

    /// Visible (non-secret) tour by slug
    pub async fn find_by_slug(pool: &DbPool, slug: &str) -> Result<Option<Tour>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM tours WHERE slug = ? AND secret_tour = 0")
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    /// Every visible tour, for geospatial queries computed in process
    pub async fn find_visible(pool: &DbPool) -> Result<Vec<Tour>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM tours WHERE secret_tour = 0 ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
    }

    /// Tours the user holds bookings for, in booking order
    pub async fn booked_by(pool: &DbPool, user_id: &str) -> Result<Vec<Tour>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT t.* FROM tours t
            JOIN bookings b ON b.tour_id = t.id
            WHERE b.user_id = ?
            GROUP BY t.id
            ORDER BY MAX(b.created_at) DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// DTOs for API

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTourRequest {
    pub name: Option<String>,
    pub duration: Option<i64>,
    pub max_group_size: Option<i64>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i64>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<String>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<Location>,
    pub locations: Option<Vec<Location>>,
    pub guides: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTourRequest {
    pub name: Option<String>,
    pub duration: Option<i64>,
    pub max_group_size: Option<i64>,
    pub difficulty: Option<String>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<String>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<Location>,
    pub locations: Option<Vec<Location>>,
    pub guides: Option<Vec<String>>,
}

const TOUR_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Text),
    Field::new("name", "name", FieldKind::Text),
    Field::new("slug", "slug", FieldKind::Text),
    Field::new("duration", "duration", FieldKind::Integer),
    Field::new("maxGroupSize", "max_group_size", FieldKind::Integer),
    Field::new("difficulty", "difficulty", FieldKind::Text),
    Field::new("ratingsAverage", "ratings_average", FieldKind::Number),
    Field::new("ratingsQuantity", "ratings_quantity", FieldKind::Integer),
    Field::new("price", "price", FieldKind::Number),
    Field::new("priceDiscount", "price_discount", FieldKind::Number),
    Field::new("summary", "summary", FieldKind::Text),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
];

#[async_trait]
impl Resource for Tour {
    type Create = CreateTourRequest;
    type Patch = UpdateTourRequest;

    const TABLE: &'static str = "tours";
    const LABEL: &'static str = "tour";
    const FIELDS: &'static [Field] = TOUR_FIELDS;
    const SCOPE: Option<&'static str> = Some("secret_tour = 0");

    fn id(&self) -> &str {
        &self.id
    }

    fn build(input: CreateTourRequest) -> Result<Self, AppError> {
        let mut errors = ValidationErrorBuilder::new();
        if input.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            errors.add("name", "The tour must have a name");
        }
        if input.duration.is_none() {
            errors.add("duration", "A tour must have a duration");
        }
        if input.max_group_size.is_none() {
            errors.add("maxGroupSize", "A tour must have a group size");
        }
        if input.difficulty.is_none() {
            errors.add("difficulty", "A tour must have a difficulty");
        }
        if input.price.is_none() {
            errors.add("price", "A tour must have a price");
        }
        if input.summary.as_deref().map_or(true, |s| s.trim().is_empty()) {
            errors.add("summary", "A tour must have a summary");
        }
        if input.image_cover.as_deref().map_or(true, |s| s.trim().is_empty()) {
            errors.add("imageCover", "A tour must have a cover image");
        }
        errors.finish()?;

        let now = now_timestamp();
        let mut tour = Tour {
            id: new_id(),
            name: String::new(),
            slug: String::new(),
            duration: input.duration.unwrap_or_default(),
            max_group_size: input.max_group_size.unwrap_or_default(),
            difficulty: input.difficulty.unwrap_or_default(),
            ratings_average: round_rating(input.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE)),
            ratings_quantity: input.ratings_quantity.unwrap_or(0),
            price: input.price.unwrap_or_default(),
            price_discount: input.price_discount,
            summary: input.summary.unwrap_or_default().trim().to_string(),
            description: input.description.map(|d| d.trim().to_string()),
            image_cover: input.image_cover.unwrap_or_default(),
            images: to_json(&input.images.unwrap_or_default()),
            start_dates: "[]".to_string(),
            secret_tour: input.secret_tour.unwrap_or(false),
            start_location: input.start_location.as_ref().map(to_json),
            locations: to_json(&input.locations.unwrap_or_default()),
            guides: to_json(&input.guides.unwrap_or_default()),
            created_at: now.clone(),
            updated_at: now,
        };
        tour.set_name(input.name.as_deref().unwrap_or_default());
        tour.set_start_dates(&input.start_dates.unwrap_or_default())?;
        Ok(tour)
    }

    fn apply(&mut self, patch: UpdateTourRequest) -> Result<(), AppError> {
        if let Some(name) = patch.name {
            self.set_name(&name);
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
        }
        if let Some(size) = patch.max_group_size {
            self.max_group_size = size;
        }
        if let Some(difficulty) = patch.difficulty {
            self.difficulty = difficulty;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(discount) = patch.price_discount {
            self.price_discount = Some(discount);
        }
        if let Some(summary) = patch.summary {
            self.summary = summary.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = Some(description.trim().to_string());
        }
        if let Some(cover) = patch.image_cover {
            self.image_cover = cover;
        }
        if let Some(images) = patch.images {
            self.images = to_json(&images);
        }
        if let Some(dates) = patch.start_dates {
            self.set_start_dates(&dates)?;
        }
        if let Some(secret) = patch.secret_tour {
            self.secret_tour = secret;
        }
        if let Some(start) = patch.start_location {
            self.start_location = Some(to_json(&start));
        }
        if let Some(locations) = patch.locations {
            self.locations = to_json(&locations);
        }
        if let Some(guides) = patch.guides {
            self.guides = to_json(&guides);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut errors = ValidationErrorBuilder::new();
        errors.check("name", validation::validate_tour_name(&self.name));
        if self.duration <= 0 {
            errors.add("duration", "Duration must be a positive number of days");
        }
        if self.max_group_size <= 0 {
            errors.add("maxGroupSize", "Group size must be positive");
        }
        errors.check("difficulty", validation::validate_difficulty(&self.difficulty));
        errors.check(
            "ratingsAverage",
            validation::validate_ratings_average(self.ratings_average),
        );
        if self.ratings_quantity < 0 {
            errors.add("ratingsQuantity", "Ratings quantity must not be negative");
        }
        if self.price < 0.0 {
            errors.add("price", "Price must not be negative");
        }
        if let Some(discount) = self.price_discount {
            errors.check(
                "priceDiscount",
                validation::validate_price_discount(discount, self.price),
            );
        }
        if self.summary.is_empty() {
            errors.add("summary", "A tour must have a summary");
        }
        if self.image_cover.is_empty() {
            errors.add("imageCover", "A tour must have a cover image");
        }
        if let Some(start) = self.get_start_location() {
            errors.check("startLocation", start.validate());
        }
        for location in self.get_locations() {
            errors.check("locations", location.validate());
        }
        errors.finish()
    }

    fn touch(&mut self, timestamp: &str) {
        self.updated_at = timestamp.to_string();
    }

    async fn insert(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tours (id, name, slug, duration, max_group_size, difficulty, ratings_average,
                               ratings_quantity, price, price_discount, summary, description, image_cover,
                               images, start_dates, secret_tour, start_location, locations, guides,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.slug)
        .bind(self.duration)
        .bind(self.max_group_size)
        .bind(&self.difficulty)
        .bind(self.ratings_average)
        .bind(self.ratings_quantity)
        .bind(self.price)
        .bind(self.price_discount)
        .bind(&self.summary)
        .bind(&self.description)
        .bind(&self.image_cover)
        .bind(&self.images)
        .bind(&self.start_dates)
        .bind(self.secret_tour)
        .bind(&self.start_location)
        .bind(&self.locations)
        .bind(&self.guides)
        .bind(&self.created_at)
        .bind(&self.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn update(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        // Rating statistics are owned by the review trigger and not written here
        sqlx::query(
            r#"
            UPDATE tours
            SET name = ?, slug = ?, duration = ?, max_group_size = ?, difficulty = ?, price = ?,
                price_discount = ?, summary = ?, description = ?, image_cover = ?, images = ?,
                start_dates = ?, secret_tour = ?, start_location = ?, locations = ?, guides = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&self.name)
        .bind(&self.slug)
        .bind(self.duration)
        .bind(self.max_group_size)
        .bind(&self.difficulty)
        .bind(self.price)
        .bind(self.price_discount)
        .bind(&self.summary)
        .bind(&self.description)
        .bind(&self.image_cover)
        .bind(&self.images)
        .bind(&self.start_dates)
        .bind(self.secret_tour)
        .bind(&self.start_location)
        .bind(&self.locations)
        .bind(&self.guides)
        .bind(&self.updated_at)
        .bind(&self.id)
        .execute(pool)
        .await?;
        Ok(())
    }

    fn to_document(&self) -> Value {
        serde_json::to_value(TourResponse::from(self)).unwrap_or(Value::Null)
    }

    async fn expand(pool: &DbPool, docs: &mut [Value], depth: Expand) -> Result<(), AppError> {
        let guide_ids: Vec<String> = docs
            .iter()
            .filter_map(|doc| doc.get("guides").and_then(Value::as_array))
            .flatten()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect();
        let guides = users_by_ids(pool, &guide_ids).await?;

        for doc in docs.iter_mut() {
            if let Some(ids) = doc.get("guides").and_then(Value::as_array).cloned() {
                let expanded: Vec<Value> = ids
                    .iter()
                    .filter_map(|id| id.as_str().and_then(|id| guides.get(id)))
                    .filter_map(|user| serde_json::to_value(UserResponse::from(user)).ok())
                    .collect();
                doc["guides"] = Value::Array(expanded);
            }
        }

        if depth == Expand::Detail {
            for doc in docs.iter_mut() {
                let Some(tour_id) = doc.get("id").and_then(Value::as_str).map(str::to_string) else {
                    continue;
                };
                let reviews = Review::list_for_tour(pool, &tour_id).await?;
                let mut review_docs: Vec<Value> = reviews.iter().map(Review::to_document).collect();
                Review::expand(pool, &mut review_docs, Expand::List).await?;
                doc["reviews"] = Value::Array(review_docs);
            }
        }
        Ok(())
    }
}

/// Active users keyed by id, for embedding into other documents.
pub(crate) async fn users_by_ids(
    pool: &DbPool,
    ids: &[String],
) -> Result<HashMap<String, User>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT * FROM users WHERE active = 1 AND id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");

    let users: Vec<User> = query.build_query_as().fetch_all(pool).await?;
    Ok(users.into_iter().map(|u| (u.id.clone(), u)).collect())
}
