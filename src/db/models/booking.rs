//! Paid tour bookings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;

use super::common::{new_id, now_timestamp};
use super::tour::users_by_ids;
use super::user::UserResponse;
use crate::api::error::{AppError, ValidationErrorBuilder};
use crate::db::resource::{Expand, Field, FieldKind, Resource};
use crate::db::DbPool;

#[derive(Debug, Clone, FromRow)]
pub struct Booking {
    pub id: String,
    pub tour_id: String,
    pub user_id: String,
    pub price: f64,
    pub paid: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: String,
    pub tour: String,
    pub user: String,
    pub price: f64,
    pub paid: bool,
    pub created_at: String,
}

impl From<&Booking> for BookingResponse {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id.clone(),
            tour: booking.tour_id.clone(),
            user: booking.user_id.clone(),
            price: booking.price,
            paid: booking.paid,
            created_at: booking.created_at.clone(),
        }
    }
}

impl Booking {
    /// Bookings of one user, newest first
    pub async fn list_for_user(pool: &DbPool, user_id: &str) -> Result<Vec<Booking>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM bookings WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(pool)
            .await
    }
}

// DTOs for API

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub tour: Option<String>,
    pub user: Option<String>,
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

const BOOKING_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Text),
    Field::new("tour", "tour_id", FieldKind::Text),
    Field::new("user", "user_id", FieldKind::Text),
    Field::new("price", "price", FieldKind::Number),
    Field::new("paid", "paid", FieldKind::Bool),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
];

#[async_trait]
impl Resource for Booking {
    type Create = CreateBookingRequest;
    type Patch = UpdateBookingRequest;

    const TABLE: &'static str = "bookings";
    const LABEL: &'static str = "booking";
    const FIELDS: &'static [Field] = BOOKING_FIELDS;

    fn id(&self) -> &str {
        &self.id
    }

    fn build(input: CreateBookingRequest) -> Result<Self, AppError> {
        let mut errors = ValidationErrorBuilder::new();
        if input.tour.as_deref().map_or(true, str::is_empty) {
            errors.add("tour", "Booking must belong to a Tour!");
        }
        if input.user.as_deref().map_or(true, str::is_empty) {
            errors.add("user", "Booking must belong to a User!");
        }
        if input.price.is_none() {
            errors.add("price", "Booking must have a price.");
        }
        errors.finish()?;

        let now = now_timestamp();
        Ok(Booking {
            id: new_id(),
            tour_id: input.tour.unwrap_or_default(),
            user_id: input.user.unwrap_or_default(),
            price: input.price.unwrap_or_default(),
            paid: input.paid.unwrap_or(true),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn apply(&mut self, patch: UpdateBookingRequest) -> Result<(), AppError> {
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(paid) = patch.paid {
            self.paid = paid;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut errors = ValidationErrorBuilder::new();
        if self.price < 0.0 {
            errors.add("price", "Price must not be negative");
        }
        errors.finish()
    }

    fn touch(&mut self, timestamp: &str) {
        self.updated_at = timestamp.to_string();
    }

    async fn insert(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, tour_id, user_id, price, paid, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.tour_id)
        .bind(&self.user_id)
        .bind(self.price)
        .bind(self.paid)
        .bind(&self.created_at)
        .bind(&self.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn update(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE bookings SET price = ?, paid = ?, updated_at = ? WHERE id = ?")
            .bind(self.price)
            .bind(self.paid)
            .bind(&self.updated_at)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    fn to_document(&self) -> Value {
        serde_json::to_value(BookingResponse::from(self)).unwrap_or(Value::Null)
    }

    /// Embed the booking user and `{id, name}` of the tour.
    async fn expand(pool: &DbPool, docs: &mut [Value], _depth: Expand) -> Result<(), AppError> {
        let user_ids: Vec<String> = docs
            .iter()
            .filter_map(|doc| doc.get("user").and_then(Value::as_str).map(str::to_string))
            .collect();
        let users = users_by_ids(pool, &user_ids).await?;

        for doc in docs.iter_mut() {
            if let Some(user) = doc.get("user").and_then(Value::as_str).and_then(|id| users.get(id)) {
                doc["user"] = serde_json::to_value(UserResponse::from(user)).unwrap_or(Value::Null);
            }

            let Some(tour_id) = doc.get("tour").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let name: Option<(String,)> = sqlx::query_as("SELECT name FROM tours WHERE id = ?")
                .bind(&tour_id)
                .fetch_optional(pool)
                .await?;
            if let Some((name,)) = name {
                doc["tour"] = json!({ "id": tour_id, "name": name });
            }
        }
        Ok(())
    }
}
