//! Generic CRUD handlers, shared by every [`Resource`].
//!
//! Routers mount them with the resource as a type argument, e.g.
//! `get(factory::get_all::<Tour>)`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::AppError;
use super::extract::{AppJson, AppQuery, QueryPairs};
use crate::db::repository;
use crate::db::resource::{Expand, Resource};
use crate::query::{Predicate, Projection, QuerySpec};
use crate::AppState;

/// `{status: "success", data: {data: ...}}`
pub fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "data": data },
    }))
}

/// Public documents for `records`, with relations embedded and the projection applied last.
pub async fn documents<R: Resource>(
    state: &AppState,
    records: &[R],
    depth: Expand,
    projection: &Projection,
) -> Result<Vec<Value>, AppError> {
    let mut docs: Vec<Value> = records.iter().map(R::to_document).collect();
    R::expand(&state.db, &mut docs, depth).await?;
    Ok(docs.into_iter().map(|doc| projection.apply(doc)).collect())
}

/// List records for raw query pairs, optionally narrowed by a fixed predicate.
pub async fn list<R: Resource>(
    state: &AppState,
    params: &[(String, String)],
    scope: Option<Predicate>,
) -> Result<Json<Value>, AppError> {
    let mut spec = QuerySpec::from_params(params, state.config.query.limits())?;
    if let Some(predicate) = scope {
        spec = spec.and(predicate);
    }

    let (records, total) = repository::find_many::<R>(&state.db, &spec).await?;
    let docs = documents(state, &records, Expand::List, &spec.projection).await?;

    Ok(Json(json!({
        "status": "success",
        "results": docs.len(),
        "total": total,
        "data": { "data": docs },
    })))
}

pub async fn get_all<R: Resource>(
    State(state): State<Arc<AppState>>,
    AppQuery(params): QueryPairs,
) -> Result<Json<Value>, AppError> {
    list::<R>(&state, &params, None).await
}

pub async fn get_one<R: Resource>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let record: R = repository::find_by_id(&state.db, &id).await?;
    let mut docs = documents(&state, &[record], Expand::Detail, &Projection::Default).await?;
    Ok(envelope(docs.pop().unwrap_or(Value::Null)))
}

pub async fn create_one<R: Resource>(
    State(state): State<Arc<AppState>>,
    AppJson(input): AppJson<R::Create>,
) -> Result<impl IntoResponse, AppError> {
    let record: R = repository::create(&state.db, input).await?;
    Ok((StatusCode::CREATED, envelope(record.to_document())))
}

pub async fn update_one<R: Resource>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(patch): AppJson<R::Patch>,
) -> Result<Json<Value>, AppError> {
    let record: R = repository::update_by_id(&state.db, &id, patch).await?;
    Ok(envelope(record.to_document()))
}

pub async fn delete_one<R: Resource>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let _: R = repository::delete_by_id(&state.db, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorKind;
    use crate::db::{Booking, CreateBookingRequest, CreateTourRequest, Tour, UpdateTourRequest};
    use crate::testing::context;

    fn tour(name: &str, price: f64) -> CreateTourRequest {
        CreateTourRequest {
            name: Some(name.to_string()),
            duration: Some(5),
            max_group_size: Some(12),
            difficulty: Some("easy".to_string()),
            price: Some(price),
            summary: Some("Hiking".to_string()),
            image_cover: Some("cover.jpg".to_string()),
            ..Default::default()
        }
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_list_envelope_and_projection() {
        let ctx = context().await;
        for (name, price) in [("The Forest Hiker", 397.0), ("The Sea Explorer", 497.0)] {
            let _: Tour = repository::create(&ctx.state.db, tour(name, price)).await.unwrap();
        }

        let Json(body) = list::<Tour>(&ctx.state, &pairs(&[("fields", "name,price"), ("sort", "price")]), None)
            .await
            .unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["results"], 2);
        assert_eq!(body["total"], 2);

        let first = &body["data"]["data"][0];
        assert_eq!(first["name"], "The Forest Hiker");
        assert!(first.get("id").is_some());
        assert!(first.get("summary").is_none());
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_operator() {
        let ctx = context().await;
        let err = list::<Tour>(&ctx.state, &pairs(&[("price[gtex]", "5")]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let ctx = context().await;
        let state = ctx.state.clone();

        let response = create_one::<Tour>(State(state.clone()), AppJson(tour("The Snow Adventurer", 997.0)))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let (records, _) = repository::find_many::<Tour>(&state.db, &QuerySpec::default())
            .await
            .unwrap();
        let id = records[0].id.clone();

        let Json(body) = get_one::<Tour>(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(body["data"]["data"]["slug"], "the-snow-adventurer");
        assert_eq!(body["data"]["data"]["reviews"], json!([]));

        let Json(body) = update_one::<Tour>(
            State(state.clone()),
            Path(id.clone()),
            AppJson(UpdateTourRequest {
                price: Some(899.0),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["data"]["data"]["price"], 899.0);

        let status = delete_one::<Tour>(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = get_one::<Tour>(State(state), Path(id)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "No tour found with that ID");
    }

    #[tokio::test]
    async fn test_update_returns_stored_ratings() {
        let ctx = context().await;
        let state = ctx.state.clone();
        let created: Tour = repository::create(&state.db, tour("The Park Camper", 1497.0)).await.unwrap();

        let patch: UpdateTourRequest =
            serde_json::from_value(json!({ "ratingsAverage": 1.2, "ratingsQuantity": 99, "price": 1297.0 }))
                .unwrap();
        let Json(body) = update_one::<Tour>(State(state.clone()), Path(created.id.clone()), AppJson(patch))
            .await
            .unwrap();

        let stored: Tour = repository::find_by_id(&state.db, &created.id).await.unwrap();
        assert_eq!(body["data"]["data"], stored.to_document());
        assert_eq!(body["data"]["data"]["ratingsAverage"], 4.5);
        assert_eq!(body["data"]["data"]["ratingsQuantity"], 0);
        assert_eq!(body["data"]["data"]["price"], 1297.0);
    }

    #[tokio::test]
    async fn test_create_validation_failure() {
        let ctx = context().await;
        let err = create_one::<Booking>(State(ctx.state.clone()), AppJson(CreateBookingRequest::default()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.details().unwrap().contains_key("price"));
    }
}
