use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use validator::Validate;

use super::{error_response, AppState};
use crate::models::{
    GeolocationReport, GeolocationResponse, HealthResponse, LocationResponse, LocationSource, PlaceQuery,
    PlacesResponse, SetLocationRequest,
};
use crate::services::{GeolocationError, LocationUpdateError, ReportedPosition};

/// Configure location, geocoding and health routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/location", web::get().to(get_location))
        .route("/location", web::put().to(set_location))
        .route("/location/geolocation", web::post().to(report_geolocation))
        .route("/places/search", web::get().to(search_places));
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// GET /api/v1/location
async fn get_location(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(LocationResponse {
        location: state.locations.current_location(),
    })
}

/// Set the reference location explicitly
///
/// PUT /api/v1/location
///
/// Request body:
/// ```json
/// {
///   "latitude": 45.7578,
///   "longitude": 4.832,
///   "source": "searched-place"
/// }
/// ```
async fn set_location(state: web::Data<AppState>, req: web::Json<SetLocationRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        tracing::info!("Rejected location update: {}", errors);
        return error_response(StatusCode::BAD_REQUEST, "invalid_coordinate", errors.to_string());
    }

    let source = req.source.unwrap_or(LocationSource::SearchedPlace);
    match state.controller.update_location(req.latitude, req.longitude, source).await {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "location": state.locations.current_location(),
            "search": outcome,
        })),
        Err(LocationUpdateError::Invalid(e)) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_coordinate", e.to_string())
        }
        Err(LocationUpdateError::Storage(e)) => {
            tracing::error!("Failed to persist location: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
    }
}

/// Browser geolocation outcome
///
/// POST /api/v1/location/geolocation
///
/// Failures are not HTTP errors: the stored (or default) location is
/// returned with the categorized error so the page keeps working.
async fn report_geolocation(state: web::Data<AppState>, report: web::Json<GeolocationReport>) -> impl Responder {
    let report = report.into_inner();
    let provider = ReportedPosition(match (report.position, report.error) {
        (Some(position), _) => Ok(position),
        (None, Some(failure)) => Err(GeolocationError::from_code(failure.code)),
        (None, None) => Err(GeolocationError::Unsupported),
    });

    match state
        .locations
        .request_browser_location(&provider, state.position_options)
        .await
    {
        Ok(location) => {
            state.controller.apply_location(&location).await;
            HttpResponse::Ok().json(GeolocationResponse { location, error: None })
        }
        Err(e) => {
            tracing::warn!("Geolocation failed, keeping previous location: {}", e);
            HttpResponse::Ok().json(GeolocationResponse {
                location: state.locations.current_location(),
                error: Some(e),
            })
        }
    }
}

/// GET /api/v1/places/search?q=...
async fn search_places(state: web::Data<AppState>, query: web::Query<PlaceQuery>) -> impl Responder {
    if let Err(errors) = query.validate() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_query", errors.to_string());
    }

    let places = state.places.search(&query.q).await;
    tracing::debug!("Place search '{}' returned {} candidates", query.q, places.len());

    HttpResponse::Ok().json(PlacesResponse {
        query: query.into_inner().q,
        places,
    })
}
