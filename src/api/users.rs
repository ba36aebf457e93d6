//! User routes: authentication endpoints, self-service for the signed-in
//! user, and admin management.

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    middleware,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::{self, CurrentUser};
use super::error::AppError;
use super::extract::AppJson;
use super::factory;
use super::uploads::UploadForm;
use crate::db::resource::Resource;
use crate::db::{repository, Role, UpdateUserRequest, User};
use crate::images::{self, USER_PHOTO};
use crate::AppState;

const ADMINS: &[Role] = &[Role::Admin];
const PASSWORD_FIELDS: [&str; 3] = ["password", "passwordConfirm", "passwordCurrent"];

/// Router mounted at `/api/v1/users`
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let upload_limit = DefaultBodyLimit::max(state.config.server.upload_limit_bytes);
    let protect = middleware::from_fn_with_state(state, auth::protect);

    let public = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/forgotPassword", post(auth::forgot_password))
        .route("/resetPassword/:token", patch(auth::reset_password));

    let account = Router::new()
        .route("/updateMyPassword", patch(auth::update_my_password))
        .route("/me", get(get_me))
        .route("/updateMe", patch(update_me).layer(upload_limit))
        .route("/deleteMe", delete(delete_me))
        .route_layer(protect.clone());

    let admin = Router::new()
        .route("/", get(factory::get_all::<User>).post(create_user))
        .route(
            "/:id",
            get(factory::get_one::<User>)
                .patch(factory::update_one::<User>)
                .delete(factory::delete_one::<User>),
        )
        .route_layer(middleware::from_fn_with_state(ADMINS, auth::restrict_to))
        .route_layer(protect);

    public.merge(account).merge(admin)
}

pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<Value> {
    factory::envelope(user.to_document())
}

fn reject_password_fields<'a>(mut keys: impl Iterator<Item = &'a str>) -> Result<(), AppError> {
    if keys.any(|key| PASSWORD_FIELDS.contains(&key)) {
        return Err(AppError::validation(
            "This route is not for password updates. Please use /updateMyPassword.",
        ));
    }
    Ok(())
}

fn text_field(body: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Accounts are only created through `/signup`.
pub async fn create_user() -> AppError {
    AppError::validation("This route is not yet defined! Please use /signup instead")
        .with_status(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Update name, email and photo of the signed-in user.
/// Accepts JSON, or multipart with an optional `photo` image.
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    request: Request,
) -> Result<Json<Value>, AppError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.starts_with("multipart/form-data"));

    let dir = state.config.server.public_dir.join("img").join("users");
    let mut written = Vec::new();
    let mut patch = UpdateUserRequest::default();
    if is_multipart {
        let multipart = Multipart::from_request(request, &state).await?;
        let form = UploadForm::read(multipart).await?;
        reject_password_fields(form.fields.keys().map(String::as_str))?;

        patch.name = form.text("name").map(str::to_string);
        patch.email = form.text("email").map(str::to_string);
        if let Some(photo) = form.file("photo") {
            let file_name = format!("user-{}-{}.jpeg", user.id, Utc::now().timestamp_millis());
            images::save_resized(photo.bytes.to_vec(), USER_PHOTO, &dir, &file_name).await?;
            written.push(file_name.clone());
            patch.photo = Some(file_name);
        }
    } else {
        let AppJson(body) =
            AppJson::<serde_json::Map<String, Value>>::from_request(request, &state).await?;
        reject_password_fields(body.keys().map(String::as_str))?;

        patch.name = text_field(&body, "name");
        patch.email = text_field(&body, "email");
    }

    let updated: User = match repository::update_by_id(&state.db, &user.id, patch).await {
        Ok(updated) => updated,
        Err(err) => {
            images::remove_files(&dir, &written).await;
            return Err(err);
        }
    };
    Ok(Json(json!({
        "status": "success",
        "data": { "user": updated.to_document() },
    })))
}

/// Deactivate the signed-in user's account
pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    let _: User = repository::delete_by_id(&state.db, &user.id).await?;
    tracing::info!(user_id = %user.id, "User deactivated their account");
    Ok(StatusCode::NO_CONTENT)
}
