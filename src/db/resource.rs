//! The contract a table must meet to be served by the generic CRUD handlers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, FromRow};

use crate::api::error::AppError;
use crate::db::DbPool;

/// Column type, used to convert query-string values before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Number,
    Bool,
    /// RFC 3339 text; compared lexically
    Timestamp,
}

/// A field clients may filter and sort on: API name and backing column.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self { name, column, kind }
    }
}

/// How much related data to embed in returned documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    List,
    Detail,
}

#[async_trait]
pub trait Resource: for<'r> FromRow<'r, SqliteRow> + Clone + Send + Sync + Unpin + 'static {
    /// Request body accepted on create
    type Create: DeserializeOwned + Send + 'static;
    /// Request body accepted on update; every field optional
    type Patch: DeserializeOwned + Send + 'static;

    const TABLE: &'static str;
    /// Singular noun used in messages ("No tour found with that ID")
    const LABEL: &'static str;
    /// Filterable and sortable fields. Anything else in a query is ignored.
    const FIELDS: &'static [Field];
    /// Condition every default read adds, hiding rows from clients
    const SCOPE: Option<&'static str> = None;
    /// Deleting flips `active` instead of removing the row
    const SOFT_DELETE: bool = false;

    fn id(&self) -> &str;

    /// Construct a new record with server defaults. Checks required fields.
    fn build(input: Self::Create) -> Result<Self, AppError>;

    /// Merge a partial update into the record.
    fn apply(&mut self, patch: Self::Patch) -> Result<(), AppError>;

    /// Check the complete record (ranges, enums, cross-field rules).
    fn validate(&self) -> Result<(), AppError>;

    fn touch(&mut self, timestamp: &str);

    async fn insert(&self, pool: &DbPool) -> Result<(), sqlx::Error>;

    async fn update(&self, pool: &DbPool) -> Result<(), sqlx::Error>;

    /// Public JSON representation
    fn to_document(&self) -> Value;

    /// Embed related records into documents produced by `to_document`.
    async fn expand(_pool: &DbPool, _docs: &mut [Value], _depth: Expand) -> Result<(), AppError> {
        Ok(())
    }

    fn field(name: &str) -> Option<&'static Field> {
        Self::FIELDS.iter().find(|f| f.name == name)
    }
}
