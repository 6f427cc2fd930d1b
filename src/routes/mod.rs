// Route exports
pub mod location;
pub mod map;

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use std::time::Duration;

use crate::core::SearchController;
use crate::models::ErrorResponse;
use crate::services::{CreatorSearchClient, LocationStore, PlaceSearch, PositionOptions};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SearchController<CreatorSearchClient>>,
    pub places: Arc<PlaceSearch>,
    pub locations: Arc<LocationStore>,
    pub position_options: PositionOptions,
    /// Delay before radius edits reach the search API
    pub debounce: Duration,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(location::configure)
            .configure(map::configure),
    );
}

pub(crate) fn error_response(status: actix_web::http::StatusCode, error: &str, message: String) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
        message,
        status_code: status.as_u16(),
    })
}
