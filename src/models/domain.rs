use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when building a coordinate
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    #[error("Invalid coordinate: latitude {latitude} must be in [-90, 90] and longitude {longitude} in [-180, 180]")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
}

/// A validated WGS84 position in degrees
///
/// Only constructible through [`Coordinate::new`] (or deserialization, which
/// goes through the same check), so every value in circulation is in range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CoordinateParts")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct CoordinateParts {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<CoordinateParts> for Coordinate {
    type Error = CoordinateError;

    fn try_from(parts: CoordinateParts) -> Result<Self, Self::Error> {
        Coordinate::new(parts.latitude, parts.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        if !valid {
            return Err(CoordinateError::InvalidCoordinate { latitude, longitude });
        }

        Ok(Self { latitude, longitude })
    }

    /// Paris, used whenever no reference location is known
    pub fn default_location() -> Self {
        Self {
            latitude: 48.8566,
            longitude: 2.3522,
        }
    }

    #[inline]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[inline]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Where the active reference location came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationSource {
    BrowserGeolocation,
    ManualClick,
    SearchedPlace,
    DefaultFallback,
}

/// The coordinate all distances are computed against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLocation {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    pub source: LocationSource,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl ReferenceLocation {
    pub fn new(coordinate: Coordinate, source: LocationSource) -> Self {
        Self {
            coordinate,
            source,
            updated_at: Utc::now(),
        }
    }
}

/// A creator returned by the search API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub coordinate: Coordinate,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(rename = "thumbnailUrl", default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    pub url: String,
}

/// An entity annotated with its distance to the reference location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntity {
    #[serde(flatten)]
    pub entity: Entity,
    /// Full precision, used for sorting and radius checks
    #[serde(rename = "distanceKm")]
    pub distance_km: f64,
    /// Rounded to one decimal for display
    #[serde(rename = "displayDistanceKm")]
    pub display_distance_km: f64,
}

impl RankedEntity {
    pub fn new(entity: Entity, distance_km: f64) -> Self {
        Self {
            entity,
            distance_km,
            display_distance_km: (distance_km * 10.0).round() / 10.0,
        }
    }
}

/// A geocoded place candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    /// True when answered from the built-in city table
    #[serde(rename = "isCommonCity", default)]
    pub is_common_city: bool,
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}
