//! Tour reviews. One review per user per tour.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::common::{new_id, now_timestamp};
use super::tour::users_by_ids;
use super::user::UserSummary;
use crate::api::error::{AppError, ValidationErrorBuilder};
use crate::api::validation;
use crate::db::resource::{Expand, Field, FieldKind, Resource};
use crate::db::DbPool;

#[derive(Debug, Clone, FromRow)]
pub struct Review {
    pub id: String,
    pub review: String,
    pub rating: i64,
    pub tour_id: String,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub id: String,
    pub review: String,
    pub rating: i64,
    pub tour: String,
    pub user: String,
    pub created_at: String,
}

impl From<&Review> for ReviewResponse {
    fn from(review: &Review) -> Self {
        Self {
            id: review.id.clone(),
            review: review.review.clone(),
            rating: review.rating,
            tour: review.tour_id.clone(),
            user: review.user_id.clone(),
            created_at: review.created_at.clone(),
        }
    }
}

impl Review {
    pub async fn list_for_tour(pool: &DbPool, tour_id: &str) -> Result<Vec<Review>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM reviews WHERE tour_id = ? ORDER BY created_at DESC")
            .bind(tour_id)
            .fetch_all(pool)
            .await
    }
}

// DTOs for API

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub review: Option<String>,
    pub rating: Option<i64>,
    pub tour: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReviewRequest {
    pub review: Option<String>,
    pub rating: Option<i64>,
    pub tour: Option<String>,
}

const REVIEW_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Text),
    Field::new("review", "review", FieldKind::Text),
    Field::new("rating", "rating", FieldKind::Integer),
    Field::new("tour", "tour_id", FieldKind::Text),
    Field::new("user", "user_id", FieldKind::Text),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
];

#[async_trait]
impl Resource for Review {
    type Create = CreateReviewRequest;
    type Patch = UpdateReviewRequest;

    const TABLE: &'static str = "reviews";
    const LABEL: &'static str = "review";
    const FIELDS: &'static [Field] = REVIEW_FIELDS;

    fn id(&self) -> &str {
        &self.id
    }

    fn build(input: CreateReviewRequest) -> Result<Self, AppError> {
        let mut errors = ValidationErrorBuilder::new();
        if input.rating.is_none() {
            errors.add("rating", "A review must have a rating");
        }
        if input.tour.as_deref().map_or(true, str::is_empty) {
            errors.add("tour", "Review must belong to a tour.");
        }
        if input.user.as_deref().map_or(true, str::is_empty) {
            errors.add("user", "Review must belong to a user");
        }
        errors.finish()?;

        let now = now_timestamp();
        Ok(Review {
            id: new_id(),
            review: input.review.unwrap_or_default().trim().to_string(),
            rating: input.rating.unwrap_or_default(),
            tour_id: input.tour.unwrap_or_default(),
            user_id: input.user.unwrap_or_default(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn apply(&mut self, patch: UpdateReviewRequest) -> Result<(), AppError> {
        if let Some(review) = patch.review {
            self.review = review.trim().to_string();
        }
        if let Some(rating) = patch.rating {
            self.rating = rating;
        }
        if let Some(tour) = patch.tour {
            self.tour_id = tour;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut errors = ValidationErrorBuilder::new();
        errors.check("review", validation::validate_review_text(&self.review));
        errors.check("rating", validation::validate_review_rating(self.rating));
        errors.finish()
    }

    fn touch(&mut self, timestamp: &str) {
        self.updated_at = timestamp.to_string();
    }

    async fn insert(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO reviews (id, review, rating, tour_id, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.review)
        .bind(self.rating)
        .bind(&self.tour_id)
        .bind(&self.user_id)
        .bind(&self.created_at)
        .bind(&self.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn update(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE reviews SET review = ?, rating = ?, tour_id = ?, updated_at = ? WHERE id = ?")
            .bind(&self.review)
            .bind(self.rating)
            .bind(&self.tour_id)
            .bind(&self.updated_at)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    fn to_document(&self) -> Value {
        serde_json::to_value(ReviewResponse::from(self)).unwrap_or(Value::Null)
    }

    /// Replace the author id with `{id, name, photo}`.
    async fn expand(pool: &DbPool, docs: &mut [Value], _depth: Expand) -> Result<(), AppError> {
        let ids: Vec<String> = docs
            .iter()
            .filter_map(|doc| doc.get("user").and_then(Value::as_str).map(str::to_string))
            .collect();
        let users = users_by_ids(pool, &ids).await?;

        for doc in docs.iter_mut() {
            let author = doc
                .get("user")
                .and_then(Value::as_str)
                .and_then(|id| users.get(id))
                .map(UserSummary::from);
            doc["user"] = match author {
                Some(summary) => serde_json::to_value(summary).unwrap_or(Value::Null),
                None => Value::Null,
            };
        }
        Ok(())
    }
}
