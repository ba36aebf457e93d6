//! Translation of request query strings into a [`QuerySpec`].
//!
//! The query string arrives as ordered `(key, value)` pairs. `page`, `sort`,
//! `limit` and `fields` are reserved; every other key is a filter:
//!
//! - `difficulty=easy` is equality
//! - `price[gte]=500` is a comparison (`gte`, `gt`, `lte`, `lt`)
//! - a plain key given more than once becomes a membership test
//!
//! Each builder step consumes the query and returns a new one, so partial
//! queries can be cloned and extended freely. Nothing here touches storage.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

/// Sort applied when the request does not give one.
pub const DEFAULT_SORT: &str = "-createdAt";

lazy_static! {
    /// `field[op]`, where both parts are plain words
    static ref OPERATOR_KEY: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\[([A-Za-z]+)\]$").unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unknown operator '{op}' for field '{field}'")]
    UnknownOperator { field: String, op: String },
    #[error("Malformed query parameter '{0}'")]
    MalformedKey(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    /// Whole-token match on the bracketed operator
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "gt" => Some(Op::Gt),
            "gte" => Some(Op::Gte),
            "lt" => Some(Op::Lt),
            "lte" => Some(Op::Lte),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
        }
    }
}

/// A single filter condition. A query's filter is the conjunction of its predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { field: String, op: Op, value: String },
    In { field: String, values: Vec<String> },
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op: Op::Eq,
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Predicate::Compare { field, .. } | Predicate::In { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let (field, direction) = match token.strip_prefix('-') {
            Some(rest) => (rest, Direction::Desc),
            None => (token.strip_prefix('+').unwrap_or(token), Direction::Asc),
        };
        if field.is_empty() {
            return None;
        }
        Some(SortKey {
            field: field.to_string(),
            direction,
        })
    }
}

/// Which fields of each document to return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Every public field
    #[default]
    Default,
    /// Only these fields, plus `id`
    Include(Vec<String>),
}

impl Projection {
    /// Reduce a JSON document to the projected fields.
    pub fn apply(&self, doc: Value) -> Value {
        match (self, doc) {
            (Projection::Include(fields), Value::Object(mut map)) => {
                map.retain(|key, _| key == "id" || fields.iter().any(|f| f == key));
                Value::Object(map)
            }
            (_, doc) => doc,
        }
    }
}

/// Page size bounds, from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 500,
        }
    }
}

/// Structured form of one request's filtering, ordering, projection and paging.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub filter: Vec<Predicate>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub page: u32,
    pub limit: u32,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            filter: Vec::new(),
            sort: default_sort(),
            projection: Projection::Default,
            page: 1,
            limit: PageLimits::default().default_limit,
        }
    }
}

fn default_sort() -> Vec<SortKey> {
    SortKey::parse(DEFAULT_SORT).into_iter().collect()
}

/// Last value for a reserved key; repeated reserved keys do not accumulate.
fn last_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn positive_or(value: Option<&str>, default: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

impl QuerySpec {
    /// Run every builder step over the same parameters.
    pub fn from_params(params: &[(String, String)], limits: PageLimits) -> Result<Self, QueryError> {
        Ok(QuerySpec::default()
            .filter(params)?
            .sort(params)
            .limit_fields(params)
            .paginate(params, limits))
    }

    /// Replace the filter with one built from the non-reserved parameters.
    pub fn filter(self, params: &[(String, String)]) -> Result<Self, QueryError> {
        let mut filter: Vec<Predicate> = Vec::new();

        for (key, value) in params {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }

            if key.contains('[') || key.contains(']') {
                let captures = OPERATOR_KEY
                    .captures(key)
                    .ok_or_else(|| QueryError::MalformedKey(key.clone()))?;
                let field = captures[1].to_string();
                let op = Op::parse(&captures[2]).ok_or_else(|| QueryError::UnknownOperator {
                    field: field.clone(),
                    op: captures[2].to_string(),
                })?;
                filter.push(Predicate::Compare {
                    field,
                    op,
                    value: value.clone(),
                });
                continue;
            }

            // Repeated plain keys collapse into one membership test
            let existing = filter.iter_mut().find(|p| match p {
                Predicate::Compare { field, op: Op::Eq, .. } | Predicate::In { field, .. } => {
                    field == key
                }
                _ => false,
            });
            match existing {
                Some(Predicate::In { values, .. }) => values.push(value.clone()),
                Some(pred) => {
                    if let Predicate::Compare { value: first, .. } = pred {
                        let values = vec![first.clone(), value.clone()];
                        *pred = Predicate::In {
                            field: key.clone(),
                            values,
                        };
                    }
                }
                None => filter.push(Predicate::eq(key.clone(), value.clone())),
            }
        }

        Ok(Self { filter, ..self })
    }

    /// `sort=a,-b`; defaults to newest first
    pub fn sort(self, params: &[(String, String)]) -> Self {
        let sort: Vec<SortKey> = match last_value(params, "sort") {
            Some(list) => list.split(',').filter_map(SortKey::parse).collect(),
            None => Vec::new(),
        };
        let sort = if sort.is_empty() { default_sort() } else { sort };
        Self { sort, ..self }
    }

    /// `fields=a,b`; absent means every public field
    pub fn limit_fields(self, params: &[(String, String)]) -> Self {
        let projection = match last_value(params, "fields") {
            Some(list) => {
                let fields: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty() && !f.starts_with('-'))
                    .map(str::to_string)
                    .collect();
                if fields.is_empty() {
                    Projection::Default
                } else {
                    Projection::Include(fields)
                }
            }
            None => Projection::Default,
        };
        Self { projection, ..self }
    }

    /// `page` and `limit`, falling back to defaults on bad input; limit is capped.
    pub fn paginate(self, params: &[(String, String)], limits: PageLimits) -> Self {
        let page = positive_or(last_value(params, "page"), 1);
        let limit = positive_or(last_value(params, "limit"), limits.default_limit)
            .min(limits.max_limit);
        Self { page, limit, ..self }
    }

    /// Add a predicate on top of whatever the request asked for.
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Overwrite (or add) parameters, as the alias routes do.
pub fn with_overrides(params: Vec<(String, String)>, overrides: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = params
        .into_iter()
        .filter(|(k, _)| !overrides.iter().any(|(o, _)| o == k))
        .collect();
    params.extend(
        overrides
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    );
    params
}
