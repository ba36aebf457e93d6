//! Common types and helpers shared across models.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

lazy_static! {
    static ref NON_SLUG_CHARS: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Current time as stored in the database (RFC 3339, millisecond precision, UTC).
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Accept `2021-06-19T09:00:00Z`, `2021-06-19,10:00` or `2021-06-19`.
pub fn normalize_timestamp(value: &str) -> Result<String, String> {
    let value = value.trim();
    if let Some(dt) = parse_timestamp(value) {
        return Ok(format_timestamp(dt));
    }
    for format in ["%Y-%m-%d,%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(format_timestamp(naive.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(format_timestamp(naive.and_utc()));
        }
    }
    Err(format!("Invalid date: {}", value))
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// URL-friendly form of a name: `The Forest Hiker` -> `the-forest-hiker`
pub fn slugify(name: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Helper to parse a JSON column, falling back to the empty value
pub fn parse_json<T: DeserializeOwned + Default>(json: Option<&str>) -> T {
    json.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn default_point() -> String {
    "Point".to_string()
}

/// GeoJSON point with optional description. `coordinates` is `[lng, lat]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    #[serde(rename = "type", default = "default_point")]
    pub kind: String,
    pub coordinates: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i64>,
}

impl Location {
    pub fn lng(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.kind != "Point" {
            return Err("Location type must be 'Point'".to_string());
        }
        if !(-180.0..=180.0).contains(&self.lng()) || !(-90.0..=90.0).contains(&self.lat()) {
            return Err("Coordinates must be [longitude, latitude]".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  The Sea  Explorer! "), "the-sea-explorer");
        assert_eq!(slugify("Tour #2: Snow"), "tour-2-snow");
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(
            normalize_timestamp("2021-06-19,10:00").unwrap(),
            "2021-06-19T10:00:00.000Z"
        );
        assert_eq!(
            normalize_timestamp("2021-07-20").unwrap(),
            "2021-07-20T00:00:00.000Z"
        );
        assert_eq!(
            normalize_timestamp("2021-08-18T09:00:00+02:00").unwrap(),
            "2021-08-18T07:00:00.000Z"
        );
        assert!(normalize_timestamp("next tuesday").is_err());
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = format_timestamp(parse_timestamp("2021-01-01T00:00:00Z").unwrap());
        let later = format_timestamp(parse_timestamp("2021-01-01T00:00:00.5Z").unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn test_location_defaults_and_validation() {
        let loc: Location =
            serde_json::from_str(r#"{"coordinates": [-80.185942, 25.774772], "address": "Miami"}"#)
                .unwrap();
        assert_eq!(loc.kind, "Point");
        assert_eq!(loc.lat(), 25.774772);
        assert!(loc.validate().is_ok());

        let swapped = Location {
            coordinates: [25.0, -200.0],
            ..loc
        };
        assert!(swapped.validate().is_err());
    }

    #[test]
    fn test_parse_json_falls_back() {
        let v: Vec<String> = parse_json(Some(r#"["a","b"]"#));
        assert_eq!(v, vec!["a", "b"]);
        let v: Vec<String> = parse_json(Some("not json"));
        assert!(v.is_empty());
        let v: Vec<String> = parse_json(None);
        assert!(v.is_empty());
    }
}
