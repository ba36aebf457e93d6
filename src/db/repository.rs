//! Generic reads and writes for any [`Resource`].
//!
//! Filters and sort keys arrive as API field names and are mapped onto
//! columns through `Resource::FIELDS`. Names outside that list never reach
//! the SQL text; values are always bound.

use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;

use super::models::common::{normalize_timestamp, now_timestamp};
use super::resource::{Field, FieldKind, Resource};
use super::DbPool;
use crate::api::error::AppError;
use crate::query::{Direction, Predicate, QuerySpec};

#[derive(Debug, Clone)]
enum SqlValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
}

impl SqlValue {
    fn convert(field: &Field, raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        let invalid = || AppError::validation(format!("Invalid {}: {}", field.name, raw));
        match field.kind {
            FieldKind::Text => Ok(SqlValue::Text(raw.to_string())),
            FieldKind::Integer => raw.parse().map(SqlValue::Integer).map_err(|_| invalid()),
            FieldKind::Number => raw
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(SqlValue::Number)
                .ok_or_else(invalid),
            FieldKind::Bool => match raw {
                "true" | "1" => Ok(SqlValue::Bool(true)),
                "false" | "0" => Ok(SqlValue::Bool(false)),
                _ => Err(invalid()),
            },
            FieldKind::Timestamp => normalize_timestamp(raw)
                .map(SqlValue::Text)
                .map_err(|_| invalid()),
        }
    }
}

fn push_value(query: &mut QueryBuilder<'_, Sqlite>, value: SqlValue) {
    match value {
        SqlValue::Text(v) => query.push_bind(v),
        SqlValue::Integer(v) => query.push_bind(v),
        SqlValue::Number(v) => query.push_bind(v),
        SqlValue::Bool(v) => query.push_bind(v),
    };
}

#[derive(Debug, Clone)]
enum Condition {
    Compare {
        column: &'static str,
        op: &'static str,
        value: SqlValue,
    },
    In {
        column: &'static str,
        values: Vec<SqlValue>,
    },
}

/// Resolve predicates against the resource's field whitelist.
fn conditions<R: Resource>(filter: &[Predicate]) -> Result<Vec<Condition>, AppError> {
    let mut out = Vec::with_capacity(filter.len());
    for predicate in filter {
        let Some(field) = R::field(predicate.field()) else {
            debug!(resource = R::LABEL, field = predicate.field(), "Ignoring unknown filter field");
            continue;
        };
        let condition = match predicate {
            Predicate::Compare { op, value, .. } => Condition::Compare {
                column: field.column,
                op: op.as_sql(),
                value: SqlValue::convert(field, value)?,
            },
            Predicate::In { values, .. } => Condition::In {
                column: field.column,
                values: values
                    .iter()
                    .map(|v| SqlValue::convert(field, v))
                    .collect::<Result<_, _>>()?,
            },
        };
        out.push(condition);
    }
    Ok(out)
}

fn push_where<R: Resource>(query: &mut QueryBuilder<'_, Sqlite>, conditions: &[Condition]) {
    query.push(" WHERE 1 = 1");
    if let Some(scope) = R::SCOPE {
        query.push(" AND ").push(scope);
    }
    for condition in conditions.iter().cloned() {
        match condition {
            Condition::Compare { column, op, value } => {
                query.push(format!(" AND {} {} ", column, op));
                push_value(query, value);
            }
            Condition::In { column, values } => {
                query.push(format!(" AND {} IN (", column));
                for (i, value) in values.into_iter().enumerate() {
                    if i > 0 {
                        query.push(", ");
                    }
                    push_value(query, value);
                }
                query.push(")");
            }
        }
    }
}

fn push_order<R: Resource>(query: &mut QueryBuilder<'_, Sqlite>, spec: &QuerySpec) {
    let mut clauses: Vec<String> = spec
        .sort
        .iter()
        .filter_map(|key| match R::field(&key.field) {
            Some(field) => Some(format!(
                "{} {}",
                field.column,
                match key.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                }
            )),
            None => {
                debug!(resource = R::LABEL, field = %key.field, "Ignoring unknown sort field");
                None
            }
        })
        .collect();
    if clauses.is_empty() {
        clauses.push("created_at DESC".to_string());
    }
    // Stable tie-break so pages never overlap
    clauses.push("id ASC".to_string());
    query.push(" ORDER BY ").push(clauses.join(", "));
}

/// One page of records matching the query, plus the total matching count.
pub async fn find_many<R: Resource>(pool: &DbPool, spec: &QuerySpec) -> Result<(Vec<R>, i64), AppError> {
    let conditions = conditions::<R>(&spec.filter)?;

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT * FROM {}", R::TABLE));
    push_where::<R>(&mut query, &conditions);
    push_order::<R>(&mut query, spec);
    query
        .push(" LIMIT ")
        .push_bind(i64::from(spec.limit))
        .push(" OFFSET ")
        .push_bind(spec.offset() as i64);
    let records: Vec<R> = query.build_query_as().fetch_all(pool).await?;

    let mut count: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", R::TABLE));
    push_where::<R>(&mut count, &conditions);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    Ok((records, total))
}

/// A record visible to default reads.
pub async fn find_by_id<R: Resource>(pool: &DbPool, id: &str) -> Result<R, AppError> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT * FROM {}", R::TABLE));
    push_where::<R>(&mut query, &[]);
    query.push(" AND id = ").push_bind(id.to_string());

    query
        .build_query_as::<R>()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found::<R>())
}

fn not_found<R: Resource>() -> AppError {
    AppError::not_found(format!("No {} found with that ID", R::LABEL))
}

/// Build, validate, then insert. Nothing is written when validation fails.
pub async fn create<R: Resource>(pool: &DbPool, input: R::Create) -> Result<R, AppError> {
    let record = R::build(input)?;
    record.validate()?;
    record.insert(pool).await?;
    debug!(resource = R::LABEL, id = record.id(), "Created");
    Ok(record)
}

/// Merge a patch into the stored record and persist it if the result is valid.
pub async fn update_by_id<R: Resource>(pool: &DbPool, id: &str, patch: R::Patch) -> Result<R, AppError> {
    let mut record: R = find_by_id(pool, id).await?;
    record.apply(patch)?;
    record.touch(&now_timestamp());
    record.validate()?;
    record.update(pool).await?;
    reload(pool, record.id()).await
}

/// Re-read a record after a write, regardless of the default read scope.
async fn reload<R: Resource>(pool: &DbPool, id: &str) -> Result<R, AppError> {
    sqlx::query_as::<_, R>(&format!("SELECT * FROM {} WHERE id = ?", R::TABLE))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found::<R>())
}

/// Remove a record, or mark it inactive for soft-deleted resources.
/// Returns the record as it was before deletion.
pub async fn delete_by_id<R: Resource>(pool: &DbPool, id: &str) -> Result<R, AppError> {
    let record: R = find_by_id(pool, id).await?;

    let result = if R::SOFT_DELETE {
        sqlx::query(&format!("UPDATE {} SET active = 0, updated_at = ? WHERE id = ?", R::TABLE))
            .bind(now_timestamp())
            .bind(id)
            .execute(pool)
            .await?
    } else {
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", R::TABLE))
            .bind(id)
            .execute(pool)
            .await?
    };

    if result.rows_affected() == 0 {
        return Err(not_found::<R>());
    }
    debug!(resource = R::LABEL, id, soft = R::SOFT_DELETE, "Deleted");
    Ok(record)
}
