use serde::{Deserialize, Serialize};

use crate::models::{Place, ReferenceLocation};
use crate::services::location::GeolocationError;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationResponse {
    pub location: ReferenceLocation,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacesResponse {
    pub query: String,
    pub places: Vec<Place>,
}

/// Geolocation result; on failure the stored (or default) location is
/// returned alongside the categorized error
#[derive(Debug, Clone, Serialize)]
pub struct GeolocationResponse {
    pub location: ReferenceLocation,
    pub error: Option<GeolocationError>,
}
