use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use validator::Validate;

use super::{error_response, AppState};
use crate::core::filters::{encode_pairs, parse_query_pairs};
use crate::core::{SearchOutcome, SearchSnapshot};
use crate::models::{ClickRequest, RadiusRequest};
use crate::services::LocationUpdateError;

/// Configure map and search routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/map/search", web::get().to(map_search))
        .route("/map/click", web::post().to(map_click))
        .route("/map/radius", web::put().to(set_radius))
        .route("/map/retry", web::post().to(retry_search))
        .route("/map/filters/{key}", web::delete().to(remove_filter))
        .route("/map/entities/{id}", web::get().to(focus_entity));
}

#[derive(Debug, serde::Serialize)]
struct MapSearchResponse {
    outcome: SearchOutcome,
    #[serde(flatten)]
    snapshot: SearchSnapshot,
}

async fn respond(state: &AppState, outcome: SearchOutcome) -> HttpResponse {
    HttpResponse::Ok().json(MapSearchResponse {
        outcome,
        snapshot: state.controller.snapshot().await,
    })
}

/// Search with the page URL parameters
///
/// GET /api/v1/map/search?lat=..&lng=..&radius=..&domains=..[&force=true]
///
/// Without parameters the current state is searched again (and skipped if
/// nothing changed, unless `force` is set).
async fn map_search(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let mut force = false;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (key, value) in parse_query_pairs(req.query_string()) {
        if key == "force" {
            force = matches!(value.as_str(), "true" | "1");
        } else {
            pairs.push((key, value));
        }
    }

    let outcome = if pairs.is_empty() {
        state.controller.search(force).await
    } else {
        let borrowed: Vec<(&str, String)> = pairs.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        match state.controller.apply_url(&encode_pairs(&borrowed)).await {
            SearchOutcome::Skipped if force => state.controller.search(true).await,
            outcome => outcome,
        }
    };

    respond(&state, outcome).await
}

/// POST /api/v1/map/click
async fn map_click(state: web::Data<AppState>, req: web::Json<ClickRequest>) -> impl Responder {
    match state.controller.handle_click(req.lat, req.lng).await {
        Ok(outcome) => respond(&state, outcome).await,
        Err(LocationUpdateError::Invalid(e)) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_coordinate", e.to_string())
        }
        Err(LocationUpdateError::Storage(e)) => {
            tracing::error!("Failed to persist clicked location: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
    }
}

/// PUT /api/v1/map/radius
///
/// The map is re-filtered at once; the remote search waits for the
/// debounce delay and is dropped if another radius edit arrives meanwhile.
async fn set_radius(state: web::Data<AppState>, req: web::Json<RadiusRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_radius", errors.to_string());
    }

    let outcome = state
        .controller
        .set_radius_debounced(req.radius_km, state.debounce)
        .await;
    respond(&state, outcome).await
}

/// POST /api/v1/map/retry
async fn retry_search(state: web::Data<AppState>) -> impl Responder {
    let outcome = state.controller.retry().await;
    respond(&state, outcome).await
}

#[derive(Debug, Deserialize)]
struct FilterValue {
    value: Option<String>,
}

/// DELETE /api/v1/map/filters/{key}[?value=..]
async fn remove_filter(
    state: web::Data<AppState>,
    key: web::Path<String>,
    query: web::Query<FilterValue>,
) -> impl Responder {
    let outcome = state
        .controller
        .remove_filter(&key, query.value.as_deref())
        .await;
    respond(&state, outcome).await
}

/// Open a creator's marker from the list
///
/// GET /api/v1/map/entities/{id}
async fn focus_entity(state: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    match state.controller.focus_entity(&id).await {
        Some(marker) => HttpResponse::Ok().json(marker),
        None => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Creator {} is not on the map", id.as_str()),
        ),
    }
}
