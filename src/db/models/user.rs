//! User accounts.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::common::{format_timestamp, new_id, now_timestamp, parse_timestamp};
use crate::api::error::{AppError, ValidationErrorBuilder};
use crate::api::validation;
use crate::crypto;
use crate::db::resource::{Field, FieldKind, Resource};
use crate::db::DbPool;

/// User role for access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "guide" => Ok(Role::Guide),
            "lead-guide" => Ok(Role::LeadGuide),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: String,
    pub password_hash: String,
    pub password_changed_at: Option<String>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Public view of a user. Never includes credentials or the active flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            photo: user.photo.clone(),
            role: user.role.clone(),
        }
    }
}

/// Smaller embedded form used on reviews
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub photo: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            photo: user.photo.clone(),
        }
    }
}

impl User {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_default()
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    /// True if the password changed after a token issued at `issued_at` (Unix seconds).
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .as_deref()
            .and_then(parse_timestamp)
            .map(|changed| changed.timestamp() > issued_at)
            .unwrap_or(false)
    }

    /// Validate and hash a new password, invalidating older tokens and reset tokens.
    pub fn set_password(&mut self, password: &str, confirm: &str) -> Result<(), AppError> {
        let mut errors = ValidationErrorBuilder::new();
        errors.check("password", validation::validate_password(password));
        errors.check(
            "passwordConfirm",
            validation::validate_password_confirm(password, confirm),
        );
        errors.finish()?;

        self.password_hash = crypto::hash_password(password)?;
        // One second back so a token issued right after the save stays valid
        self.password_changed_at = Some(format_timestamp(Utc::now() - Duration::seconds(1)));
        self.password_reset_token = None;
        self.password_reset_expires = None;
        Ok(())
    }

    pub fn reset_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.password_reset_expires
            .as_deref()
            .and_then(parse_timestamp)
            .map(|expires| expires > now)
            .unwrap_or(false)
    }

    /// Look up an active user by id
    pub async fn find_active(pool: &DbPool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ? AND active = 1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_email(pool: &DbPool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ? AND active = 1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_reset_token(
        pool: &DbPool,
        hashed_token: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE password_reset_token = ? AND active = 1")
            .bind(hashed_token)
            .fetch_optional(pool)
            .await
    }

    /// Persist credential fields only
    pub async fn save_credentials(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?, password_changed_at = ?, password_reset_token = ?,
                password_reset_expires = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&self.password_hash)
        .bind(&self.password_changed_at)
        .bind(&self.password_reset_token)
        .bind(&self.password_reset_expires)
        .bind(now_timestamp())
        .bind(&self.id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

// DTOs for API

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
    pub photo: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role: Option<Role>,
}

const USER_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Text),
    Field::new("name", "name", FieldKind::Text),
    Field::new("email", "email", FieldKind::Text),
    Field::new("role", "role", FieldKind::Text),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
];

#[async_trait]
impl Resource for User {
    type Create = CreateUserRequest;
    type Patch = UpdateUserRequest;

    const TABLE: &'static str = "users";
    const LABEL: &'static str = "user";
    const FIELDS: &'static [Field] = USER_FIELDS;
    const SCOPE: Option<&'static str> = Some("active = 1");
    const SOFT_DELETE: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn build(input: CreateUserRequest) -> Result<Self, AppError> {
        let name = input.name.unwrap_or_default();
        let email = input.email.unwrap_or_default().trim().to_lowercase();
        let password = input.password.unwrap_or_default();
        let confirm = input.password_confirm.unwrap_or_default();

        let mut errors = ValidationErrorBuilder::new();
        errors.check("name", validation::validate_user_name(&name));
        errors.check("email", validation::validate_email(&email));
        errors.check("password", validation::validate_password(&password));
        errors.check(
            "passwordConfirm",
            validation::validate_password_confirm(&password, &confirm),
        );
        errors.finish()?;

        let now = now_timestamp();
        Ok(User {
            id: new_id(),
            name: name.trim().to_string(),
            email,
            photo: input.photo.unwrap_or_else(|| "default.jpg".to_string()),
            role: Role::User.to_string(),
            password_hash: crypto::hash_password(&password)?,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn apply(&mut self, patch: UpdateUserRequest) -> Result<(), AppError> {
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = patch.email {
            self.email = email.trim().to_lowercase();
        }
        if let Some(photo) = patch.photo {
            self.photo = photo;
        }
        if let Some(role) = patch.role {
            self.role = role.to_string();
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AppError> {
        let mut errors = ValidationErrorBuilder::new();
        errors.check("name", validation::validate_user_name(&self.name));
        errors.check("email", validation::validate_email(&self.email));
        if self.role.parse::<Role>().is_err() {
            errors.add("role", "Role is either: user, guide, lead-guide, admin");
        }
        errors.finish()
    }

    fn touch(&mut self, timestamp: &str) {
        self.updated_at = timestamp.to_string();
    }

    async fn insert(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, photo, role, password_hash, password_changed_at,
                               password_reset_token, password_reset_expires, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.email)
        .bind(&self.photo)
        .bind(&self.role)
        .bind(&self.password_hash)
        .bind(&self.password_changed_at)
        .bind(&self.password_reset_token)
        .bind(&self.password_reset_expires)
        .bind(self.active)
        .bind(&self.created_at)
        .bind(&self.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn update(&self, pool: &DbPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET name = ?, email = ?, photo = ?, role = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&self.name)
        .bind(&self.email)
        .bind(&self.photo)
        .bind(&self.role)
        .bind(&self.updated_at)
        .bind(&self.id)
        .execute(pool)
        .await?;
        Ok(())
    }

    fn to_document(&self) -> Value {
        serde_json::to_value(UserResponse::from(self)).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(password: &str, confirm: &str) -> CreateUserRequest {
        CreateUserRequest {
            name: Some("Laura Wilson".to_string()),
            email: Some("  Laura@Example.com ".to_string()),
            password: Some(password.to_string()),
            password_confirm: Some(confirm.to_string()),
            photo: None,
        }
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::User, Role::Guide, Role::LeadGuide, Role::Admin] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert_eq!(
            serde_json::to_string(&Role::LeadGuide).unwrap(),
            "\"lead-guide\""
        );
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_build_applies_defaults() {
        let user = User::build(request("pass1234", "pass1234")).unwrap();
        assert_eq!(user.email, "laura@example.com");
        assert_eq!(user.photo, "default.jpg");
        assert_eq!(user.role(), Role::User);
        assert!(user.active);
        assert!(crypto::verify_password("pass1234", &user.password_hash));
        assert!(user.password_changed_at.is_none());
    }

    #[test]
    fn test_build_rejects_mismatched_confirmation() {
        let err = User::build(request("pass1234", "pass4321")).unwrap_err();
        let details = err.details().unwrap();
        assert_eq!(details["passwordConfirm"], vec!["Passwords are not the same!"]);
    }

    #[test]
    fn test_build_reports_every_missing_field() {
        let err = User::build(CreateUserRequest::default()).unwrap_err();
        let details = err.details().unwrap();
        assert!(details.contains_key("name"));
        assert!(details.contains_key("email"));
        assert!(details.contains_key("password"));
        assert!(details.contains_key("passwordConfirm"));
    }

    #[test]
    fn test_document_hides_credentials() {
        let user = User::build(request("pass1234", "pass1234")).unwrap();
        let doc = user.to_document();
        assert!(doc.get("passwordHash").is_none());
        assert!(doc.get("active").is_none());
        assert_eq!(doc["email"], "laura@example.com");
    }

    #[test]
    fn test_changed_password_after() {
        let mut user = User::build(request("pass1234", "pass1234")).unwrap();
        let issued = Utc::now().timestamp();
        assert!(!user.changed_password_after(issued));

        user.password_changed_at = Some(format_timestamp(Utc::now() + Duration::seconds(5)));
        assert!(user.changed_password_after(issued));

        user.password_changed_at = Some(format_timestamp(Utc::now() - Duration::seconds(30)));
        assert!(!user.changed_password_after(issued));
    }

    #[test]
    fn test_set_password_clears_reset_token() {
        let mut user = User::build(request("pass1234", "pass1234")).unwrap();
        user.password_reset_token = Some("abc".to_string());
        user.password_reset_expires = Some(now_timestamp());

        user.set_password("newpass123", "newpass123").unwrap();
        assert!(crypto::verify_password("newpass123", &user.password_hash));
        assert!(user.password_reset_token.is_none());
        assert!(user.password_changed_at.is_some());

        assert!(user.set_password("short", "short").is_err());
    }
}
