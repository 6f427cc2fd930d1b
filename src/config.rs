use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::map_view::{ClusterOptions, MapConfig};
use crate::models::Coordinate;
use crate::services::geocoder::PlaceSearchOptions;
use crate::services::location::PositionOptions;

const ENV_PREFIX: &str = "CREATOR_MAP";

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub geocoding: GeocodingSettings,
    pub search_api: SearchApiSettings,
    pub location: LocationSettings,
    pub map: MapSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

impl ServerSettings {
    /// The service holds one visitor's state, so it should only listen locally
    pub fn is_loopback(&self) -> bool {
        self.host == "localhost"
            || self
                .host
                .parse::<std::net::IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodingSettings {
    pub base_url: String,
    pub user_agent: Option<String>,
    pub country_codes: Option<String>,
    pub accept_language: Option<String>,
    pub address_details: bool,
    pub timeout_secs: u64,
    /// Answer well-known cities from the built-in table
    pub use_common_cities: bool,
    pub cache_size: u64,
    pub cache_ttl_secs: u64,
}

impl Default for GeocodingSettings {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: None,
            country_codes: None,
            accept_language: None,
            address_details: true,
            timeout_secs: 10,
            use_common_cities: true,
            cache_size: 1000,
            cache_ttl_secs: 3600,
        }
    }
}

impl GeocodingSettings {
    pub fn to_options(&self) -> PlaceSearchOptions {
        let defaults = PlaceSearchOptions::default();
        PlaceSearchOptions {
            base_url: self.base_url.clone(),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            country_codes: self.country_codes.clone(),
            accept_language: self.accept_language.clone(),
            address_details: self.address_details,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchApiSettings {
    pub base_url: String,
    pub path: String,
    pub timeout_secs: u64,
    /// Delay applied to searches triggered by radius and filter edits
    pub debounce_ms: u64,
}

impl Default for SearchApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            path: crate::services::search_api::MAP_SEARCH_PATH.to_string(),
            timeout_secs: 15,
            debounce_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationSettings {
    /// JSON file for the saved location; in memory when unset
    pub storage_path: Option<String>,
    pub storage_key: String,
    pub default_latitude: f64,
    pub default_longitude: f64,
    pub high_accuracy: bool,
    pub timeout_secs: u64,
    pub max_age_secs: u64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        let paris = Coordinate::default_location();
        Self {
            storage_path: None,
            storage_key: crate::services::location::STORAGE_KEY.to_string(),
            default_latitude: paris.latitude(),
            default_longitude: paris.longitude(),
            high_accuracy: true,
            timeout_secs: 10,
            max_age_secs: 600,
        }
    }
}

impl LocationSettings {
    /// Configured fallback location; Paris if the configured pair is invalid
    pub fn default_location(&self) -> Coordinate {
        Coordinate::new(self.default_latitude, self.default_longitude).unwrap_or_else(|e| {
            tracing::warn!("Invalid default location in configuration, using Paris: {}", e);
            Coordinate::default_location()
        })
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.high_accuracy,
            timeout: Duration::from_secs(self.timeout_secs),
            max_age: Duration::from_secs(self.max_age_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    pub initial_zoom: u8,
    pub default_radius_km: f64,
    pub jitter_degrees: f64,
    pub jitter_seed: Option<u64>,
    pub disable_clustering_at_zoom: u8,
    pub max_cluster_radius_px: f64,
}

impl Default for MapSettings {
    fn default() -> Self {
        let config = MapConfig::default();
        Self {
            initial_zoom: config.initial_zoom,
            default_radius_km: config.default_radius_km,
            jitter_degrees: config.jitter_degrees,
            jitter_seed: config.jitter_seed,
            disable_clustering_at_zoom: config.cluster.disable_clustering_at_zoom,
            max_cluster_radius_px: config.cluster.max_cluster_radius_px,
        }
    }
}

impl MapSettings {
    pub fn to_config(&self) -> MapConfig {
        MapConfig {
            initial_zoom: self.initial_zoom,
            default_radius_km: self.default_radius_km,
            jitter_degrees: self.jitter_degrees,
            jitter_seed: self.jitter_seed,
            cluster: ClusterOptions {
                disable_clustering_at_zoom: self.disable_clustering_at_zoom,
                max_cluster_radius_px: self.max_cluster_radius_px,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with CREATOR_MAP__)
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., CREATOR_MAP__SERVER__PORT -> server.port
            .add_source(environment())
            .build()?;

        settings = apply_service_urls(settings)?;

        settings.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// Honor the conventional deployment variables for the two upstream services
fn apply_service_urls(settings: Config) -> Result<Config, ConfigError> {
    let mut builder = Config::builder().add_source(settings);

    if let Ok(url) = std::env::var("CREATOR_API_URL") {
        builder = builder.set_override("search_api.base_url", url)?;
    }
    if let Ok(url) = std::env::var("NOMINATIM_URL") {
        builder = builder.set_override("geocoding.base_url", url)?;
    }

    builder.build()
}
