//! Keeps a tour's rating statistics in step with its reviews.

use tracing::debug;

use super::DbPool;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingStats {
    pub quantity: i64,
    pub average: f64,
}

/// Recompute `ratings_quantity` and `ratings_average` for a tour from all of
/// its current reviews and write them back. With no reviews the average is
/// reset to `baseline`.
///
/// Always aggregates the full review set; never applies a delta.
pub async fn recalculate_tour_ratings(
    pool: &DbPool,
    tour_id: &str,
    baseline: f64,
) -> Result<RatingStats, sqlx::Error> {
    let (quantity, average): (i64, Option<f64>) =
        sqlx::query_as("SELECT COUNT(*), AVG(rating) FROM reviews WHERE tour_id = ?")
            .bind(tour_id)
            .fetch_one(pool)
            .await?;

    let stats = match average {
        Some(avg) if quantity > 0 => RatingStats {
            quantity,
            average: (avg * 10.0).round() / 10.0,
        },
        _ => RatingStats {
            quantity: 0,
            average: baseline,
        },
    };

    sqlx::query("UPDATE tours SET ratings_quantity = ?, ratings_average = ? WHERE id = ?")
        .bind(stats.quantity)
        .bind(stats.average)
        .bind(tour_id)
        .execute(pool)
        .await?;

    debug!(tour_id, quantity = stats.quantity, average = stats.average, "Recalculated tour ratings");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CreateReviewRequest, CreateTourRequest, CreateUserRequest, Review, Tour, User};
    use crate::db::repository::{create, delete_by_id, find_by_id};
    use crate::db::test_pool;

    async fn fixture(pool: &DbPool) -> (Tour, Vec<User>) {
        let tour = create::<Tour>(
            pool,
            CreateTourRequest {
                name: Some("The Sea Explorer".to_string()),
                duration: Some(7),
                max_group_size: Some(15),
                difficulty: Some("medium".to_string()),
                price: Some(497.0),
                summary: Some("Exploring the jaw-dropping US east coast".to_string()),
                image_cover: Some("tour-2-cover.jpg".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut users = Vec::new();
        for i in 0..3 {
            users.push(
                create::<User>(
                    pool,
                    CreateUserRequest {
                        name: Some(format!("Reviewer {}", i)),
                        email: Some(format!("reviewer{}@example.com", i)),
                        password: Some("pass1234".to_string()),
                        password_confirm: Some("pass1234".to_string()),
                        photo: None,
                    },
                )
                .await
                .unwrap(),
            );
        }
        (tour, users)
    }

    async fn review(pool: &DbPool, tour: &Tour, user: &User, rating: i64) -> Review {
        create::<Review>(
            pool,
            CreateReviewRequest {
                review: Some("Lovely".to_string()),
                rating: Some(rating),
                tour: Some(tour.id.clone()),
                user: Some(user.id.clone()),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_average_is_rounded_and_written() {
        let pool = test_pool().await;
        let (tour, users) = fixture(&pool).await;
        for (user, rating) in users.iter().zip([5, 4, 4]) {
            review(&pool, &tour, user, rating).await;
        }

        let stats = recalculate_tour_ratings(&pool, &tour.id, 4.5).await.unwrap();
        assert_eq!(stats, RatingStats { quantity: 3, average: 4.3 });

        let stored: Tour = find_by_id(&pool, &tour.id).await.unwrap();
        assert_eq!(stored.ratings_quantity, 3);
        assert_eq!(stored.ratings_average, 4.3);
    }

    #[tokio::test]
    async fn test_recalculation_is_idempotent() {
        let pool = test_pool().await;
        let (tour, users) = fixture(&pool).await;
        review(&pool, &tour, &users[0], 3).await;
        review(&pool, &tour, &users[1], 5).await;

        let first = recalculate_tour_ratings(&pool, &tour.id, 4.5).await.unwrap();
        let second = recalculate_tour_ratings(&pool, &tour.id, 4.5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.average, 4.0);
    }

    #[tokio::test]
    async fn test_last_review_deleted_resets_to_baseline() {
        let pool = test_pool().await;
        let (tour, users) = fixture(&pool).await;
        let only = review(&pool, &tour, &users[0], 2).await;
        recalculate_tour_ratings(&pool, &tour.id, 4.5).await.unwrap();

        delete_by_id::<Review>(&pool, &only.id).await.unwrap();
        let stats = recalculate_tour_ratings(&pool, &tour.id, 4.5).await.unwrap();
        assert_eq!(stats, RatingStats { quantity: 0, average: 4.5 });

        let stored: Tour = find_by_id(&pool, &tour.id).await.unwrap();
        assert_eq!(stored.ratings_quantity, 0);
        assert_eq!(stored.ratings_average, 4.5);
    }
}
