//! Great-circle helpers for the tour proximity endpoints.

use thiserror::Error;

/// Earth radius in miles
pub const EARTH_RADIUS_MI: f64 = 3963.2;
/// Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6378.1;

const METERS_TO_MILES: f64 = 0.000621371;
const METERS_TO_KM: f64 = 0.001;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("Please provide latitude and longitude in the format lat,lng.")]
    BadLatLng,
    #[error("Distance must be a positive number")]
    BadDistance,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

/// Any unit other than `mi` is kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Miles,
    Kilometers,
}

impl Unit {
    pub fn parse(unit: &str) -> Self {
        if unit == "mi" {
            Unit::Miles
        } else {
            Unit::Kilometers
        }
    }

    pub fn earth_radius(&self) -> f64 {
        match self {
            Unit::Miles => EARTH_RADIUS_MI,
            Unit::Kilometers => EARTH_RADIUS_KM,
        }
    }

    /// Factor applied to a distance in meters
    pub fn meters_multiplier(&self) -> f64 {
        match self {
            Unit::Miles => METERS_TO_MILES,
            Unit::Kilometers => METERS_TO_KM,
        }
    }
}

/// Parse `"34.11,-118.11"` (latitude first).
pub fn parse_lat_lng(value: &str) -> Result<Point, GeoError> {
    let (lat, lng) = value.split_once(',').ok_or(GeoError::BadLatLng)?;
    let lat: f64 = lat.trim().parse().map_err(|_| GeoError::BadLatLng)?;
    let lng: f64 = lng.trim().parse().map_err(|_| GeoError::BadLatLng)?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(GeoError::BadLatLng);
    }
    Ok(Point { lat, lng })
}

pub fn parse_distance(value: &str) -> Result<f64, GeoError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or(GeoError::BadDistance)
}

/// Central angle between two points in radians (haversine).
pub fn central_angle(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// True if `point` lies within `distance` (in `unit`) of `center`.
pub fn within(center: Point, point: Point, distance: f64, unit: Unit) -> bool {
    central_angle(center, point) <= distance / unit.earth_radius()
}

/// Distance in `unit`, computed on a sphere with the mean radius in meters.
pub fn distance(a: Point, b: Point, unit: Unit) -> f64 {
    const MEAN_RADIUS_M: f64 = 6_378_100.0;
    central_angle(a, b) * MEAN_RADIUS_M * unit.meters_multiplier()
}
