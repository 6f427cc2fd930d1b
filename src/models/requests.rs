use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::LocationSource;
use crate::services::location::Position;

/// Explicitly set the reference location
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetLocationRequest {
    #[validate(range(min = -90.0, max = 90.0))]
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
    #[serde(default)]
    pub source: Option<LocationSource>,
}

/// Platform failure as reported by the browser (`GeolocationPositionError`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationFailure {
    pub code: u16,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of a browser geolocation request; exactly one field is expected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationReport {
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub error: Option<GeolocationFailure>,
}

/// A click on the map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickRequest {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude", alias = "lon")]
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RadiusRequest {
    /// 0 disables distance filtering
    #[validate(range(min = 0.0, max = 20_000.0))]
    #[serde(alias = "radius", rename = "radiusKm")]
    pub radius_km: f64,
}

/// Free-text place lookup
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceQuery {
    #[validate(length(max = 200))]
    #[serde(default)]
    pub q: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_location_validation() {
        let ok: SetLocationRequest = serde_json::from_str(r#"{"lat": 45.75, "lng": 4.85}"#).unwrap();
        assert!(ok.validate().is_ok());

        let bad: SetLocationRequest = serde_json::from_str(r#"{"latitude": 95.0, "longitude": 0.0}"#).unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_radius_accepts_zero() {
        let req: RadiusRequest = serde_json::from_str(r#"{"radius": 0}"#).unwrap();
        assert!(req.validate().is_ok());

        let req: RadiusRequest = serde_json::from_str(r#"{"radiusKm": -5}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_geolocation_report_error_code() {
        let report: GeolocationReport =
            serde_json::from_str(r#"{"error": {"code": 1, "message": "User denied Geolocation"}}"#).unwrap();
        assert!(report.position.is_none());
        assert_eq!(report.error.unwrap().code, 1);
    }
}
