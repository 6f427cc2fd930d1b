use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use creator_map::config::Settings;
use creator_map::core::{MapView, SearchController};
use creator_map::routes::{self, AppState};
use creator_map::services::{
    CityTable, CreatorSearchClient, FileStorage, GeocodeCache, LocationStorage, LocationStore, MemoryStorage,
    PlaceSearch,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST)).json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(err: error::QueryPayloadError, _req: &actix_web::HttpRequest) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    // LOG_LEVEL / LOG_FORMAT override the configuration file
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| settings.logging.level.clone());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| settings.logging.format.clone());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_target(false)
        .with_level(true);

    if log_format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.init();
    }

    info!("Starting creator map service...");

    // Location persistence
    let storage: Box<dyn LocationStorage> = match &settings.location.storage_path {
        Some(path) => {
            info!("Persisting reference location to {}", path);
            Box::new(FileStorage::new(path))
        }
        None => Box::new(MemoryStorage::new()),
    };
    let locations = Arc::new(
        LocationStore::new(storage)
            .with_key(settings.location.storage_key.clone())
            .with_default_location(settings.location.default_location()),
    );

    // Geocoder with the common-city table and an answer cache
    let geocoding = &settings.geocoding;
    let mut places = PlaceSearch::new(geocoding.to_options())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?
        .with_cache(GeocodeCache::new(geocoding.cache_size, geocoding.cache_ttl_secs));
    if !geocoding.use_common_cities {
        places = places.with_cities(CityTable::empty());
    }
    let places = Arc::new(places);

    info!("Geocoder initialized ({})", geocoding.base_url);

    // Creator search client and controller
    let client = CreatorSearchClient::new(
        settings.search_api.base_url.clone(),
        settings.search_api.path.clone(),
        Duration::from_secs(settings.search_api.timeout_secs),
    )
    .map_err(|e| {
        error!("Failed to build search client: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    info!("Creator search endpoint: {}", client.endpoint());

    let initial = locations.current_location();
    let map = MapView::initialize(settings.map.to_config(), &initial);
    let controller = Arc::new(SearchController::new(client, Arc::clone(&locations), map));

    info!(
        "Map initialized at ({:.4}, {:.4}) from {:?}",
        initial.coordinate.latitude(),
        initial.coordinate.longitude(),
        initial.source
    );

    let app_state = AppState {
        controller,
        places,
        locations,
        position_options: settings.location.position_options(),
        debounce: Duration::from_millis(settings.search_api.debounce_ms),
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    if !settings.server.is_loopback() {
        warn!(
            "Listening on {}: every client shares the same saved location and map",
            host
        );
    }
    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
