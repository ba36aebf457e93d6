//! Development fixtures
//!
//! Loads `tours.json`, `users.json` and `reviews.json` from a fixture
//! directory, or purges the managed tables. Used by the `import-dev-data` binary.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::models::{CreateReviewRequest, CreateTourRequest, CreateUserRequest, Review, Role, Tour, User};
use super::ratings::recalculate_tour_ratings;
use super::resource::Resource;
use super::DbPool;

/// A fixture record: a create payload with a stable id so records can reference each other.
#[derive(Debug, Deserialize)]
struct Fixture<T> {
    id: String,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Deserialize)]
struct UserFixture {
    #[serde(default)]
    role: Role,
    #[serde(default)]
    active: Option<bool>,
    #[serde(flatten)]
    body: CreateUserRequest,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub tours: usize,
    pub users: usize,
    pub reviews: usize,
}

async fn read_fixtures<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>> {
    let path = dir.join(file);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Validate a built fixture through the model and insert it.
async fn insert_fixture<R: Resource>(pool: &DbPool, record: R) -> Result<()> {
    record.validate().map_err(|e| anyhow::anyhow!("Invalid {}: {:?}", R::LABEL, e.details()))?;
    record.insert(pool).await?;
    Ok(())
}

/// Load every fixture file. Users keep their fixture role; passwords are hashed
/// on the way in. Tour rating statistics are recomputed once reviews are loaded.
pub async fn import_dev_data(pool: &DbPool, dir: &Path, baseline: f64) -> Result<ImportSummary> {
    let tours: Vec<Fixture<CreateTourRequest>> = read_fixtures(dir, "tours.json").await?;
    let users: Vec<Fixture<UserFixture>> = read_fixtures(dir, "users.json").await?;
    let reviews: Vec<Fixture<CreateReviewRequest>> = read_fixtures(dir, "reviews.json").await?;

    let mut summary = ImportSummary::default();

    for fixture in users {
        let mut user = User::build(fixture.body.body)?;
        user.role = fixture.body.role.to_string();
        user.active = fixture.body.active.unwrap_or(true);
        user.id = fixture.id;
        insert_fixture(pool, user).await?;
        summary.users += 1;
    }

    for fixture in tours {
        let mut tour = Tour::build(fixture.body)?;
        tour.id = fixture.id;
        insert_fixture(pool, tour).await?;
        summary.tours += 1;
    }

    let mut touched: HashSet<String> = HashSet::new();
    for fixture in reviews {
        let mut review = Review::build(fixture.body)?;
        review.id = fixture.id;
        touched.insert(review.tour_id.clone());
        insert_fixture(pool, review).await?;
        summary.reviews += 1;
    }

    for tour_id in &touched {
        recalculate_tour_ratings(pool, tour_id, baseline).await?;
    }

    info!(
        tours = summary.tours,
        users = summary.users,
        reviews = summary.reviews,
        "Dev data imported"
    );
    Ok(summary)
}

/// Delete every review, booking, tour and user. Returns the number of rows removed.
pub async fn delete_dev_data(pool: &DbPool) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut removed = 0;
    // Children first so foreign keys hold at every step
    for table in ["reviews", "bookings", "tours", "users"] {
        let result = sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await?;
        removed += result.rows_affected();
    }
    tx.commit().await?;

    info!(removed, "Dev data deleted");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::find_by_id;
    use crate::db::test_pool;

    fn write_fixtures(dir: &Path) {
        std::fs::write(
            dir.join("users.json"),
            r#"[
                {"id": "u1", "name": "Jonas Admin", "email": "admin@example.com", "role": "admin",
                 "password": "test1234", "passwordConfirm": "test1234"},
                {"id": "u2", "name": "Leo Gillespie", "email": "leo@example.com",
                 "password": "test1234", "passwordConfirm": "test1234"}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("tours.json"),
            r#"[
                {"id": "t1", "name": "The Forest Hiker", "duration": 5, "maxGroupSize": 25,
                 "difficulty": "easy", "price": 397, "summary": "Forest", "imageCover": "tour-1-cover.jpg",
                 "guides": ["u1"], "startDates": ["2021-04-25,10:00"]}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("reviews.json"),
            r#"[
                {"id": "r1", "review": "Wonderful", "rating": 5, "tour": "t1", "user": "u1"},
                {"id": "r2", "review": "Good", "rating": 4, "tour": "t1", "user": "u2"}
            ]"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_import_then_delete() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());

        let summary = import_dev_data(&pool, dir.path(), 4.5).await.unwrap();
        assert_eq!(summary, ImportSummary { tours: 1, users: 2, reviews: 2 });

        let admin: User = find_by_id(&pool, "u1").await.unwrap();
        assert_eq!(admin.role(), Role::Admin);
        assert!(crate::crypto::verify_password("test1234", &admin.password_hash));

        let tour: Tour = find_by_id(&pool, "t1").await.unwrap();
        assert_eq!(tour.ratings_quantity, 2);
        assert_eq!(tour.ratings_average, 4.5);

        let removed = delete_dev_data(&pool).await.unwrap();
        assert_eq!(removed, 5);
        assert!(find_by_id::<Tour>(&pool, "t1").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_fixture_file_fails() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let err = import_dev_data(&pool, dir.path(), 4.5).await.unwrap_err();
        assert!(err.to_string().contains("tours.json"));
    }
}
