use crate::models::{Coordinate, Place};
use crate::services::cache::{CacheKey, GeocodeCache};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Queries shorter than this (after trimming) never reach the network
pub const MIN_QUERY_LENGTH: usize = 3;

/// Maximum number of candidates requested from the geocoder
pub const RESULT_LIMIT: usize = 5;

/// Errors that can occur when talking to the geocoder
///
/// These never leave [`PlaceSearch::search`]; they are logged and turned into
/// an empty result there.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Geocoder returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

/// Built-in coordinates for frequently searched cities
#[derive(Debug, Clone, Default)]
pub struct CityTable {
    cities: Vec<(String, Coordinate)>,
}

const COMMON_CITIES: &[(&str, f64, f64)] = &[
    ("paris", 48.8566, 2.3522),
    ("marseille", 43.2965, 5.3698),
    ("lyon", 45.7578, 4.8320),
    ("toulouse", 43.6047, 1.4442),
    ("nice", 43.7102, 7.2620),
    ("nantes", 47.2184, -1.5536),
    ("montpellier", 43.6112, 3.8767),
    ("strasbourg", 48.5734, 7.7521),
    ("bordeaux", 44.8378, -0.5792),
    ("lille", 50.6292, 3.0573),
    ("rennes", 48.1173, -1.6778),
    ("grenoble", 45.1885, 5.7245),
    ("angers", 47.4784, -0.5630),
    ("dijon", 47.3220, 5.0415),
    ("nîmes", 43.8367, 4.3601),
    ("aix-en-provence", 43.5298, 5.4474),
];

impl CityTable {
    /// The French cities shipped with the application
    pub fn common() -> Self {
        Self {
            cities: COMMON_CITIES
                .iter()
                .filter_map(|(name, lat, lon)| {
                    Coordinate::new(*lat, *lon).ok().map(|c| (name.to_string(), c))
                })
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_city(mut self, name: &str, coordinate: Coordinate) -> Self {
        self.cities.push((name.to_lowercase(), coordinate));
        self
    }

    /// Case-insensitive lookup, substring match in both directions
    ///
    /// An exact name wins over a substring hit; otherwise table order decides.
    pub fn lookup(&self, query: &str) -> Option<Place> {
        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        let (name, coordinate) = self
            .cities
            .iter()
            .find(|(name, _)| *name == normalized)
            .or_else(|| {
                self.cities
                    .iter()
                    .find(|(name, _)| normalized.contains(name.as_str()) || name.contains(&normalized))
            })?;

        Some(Place {
            name: capitalize(name),
            coordinate: *coordinate,
            kind: Some("city".to_string()),
            importance: Some(0.9),
            is_common_city: true,
        })
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One row of a Nominatim `format=json` answer
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    display_name: String,
    lat: String,
    lon: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    country: Option<String>,
}

impl NominatimPlace {
    fn into_place(self) -> Option<Place> {
        let lat = self.lat.trim().parse::<f64>().ok()?;
        let lon = self.lon.trim().parse::<f64>().ok()?;
        let coordinate = Coordinate::new(lat, lon).ok()?;

        // Prefer the short locality name when address details are present
        let short_name = self.address.as_ref().and_then(|address| {
            let locality = address
                .city
                .as_ref()
                .or(address.town.as_ref())
                .or(address.village.as_ref())?;
            Some(match &address.country {
                Some(country) => format!("{}, {}", locality, country),
                None => locality.clone(),
            })
        });

        Some(Place {
            name: short_name.unwrap_or(self.display_name),
            coordinate,
            kind: self.kind,
            importance: self.importance,
            is_common_city: false,
        })
    }
}

/// Geocoder settings
#[derive(Debug, Clone)]
pub struct PlaceSearchOptions {
    pub base_url: String,
    pub user_agent: String,
    pub country_codes: Option<String>,
    pub accept_language: Option<String>,
    pub address_details: bool,
    pub timeout: Duration,
}

impl Default for PlaceSearchOptions {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("creator-map/", env!("CARGO_PKG_VERSION")).to_string(),
            country_codes: None,
            accept_language: None,
            address_details: false,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Resolves free-text place names to coordinates
pub struct PlaceSearch {
    client: Client,
    options: PlaceSearchOptions,
    cities: CityTable,
    cache: Option<GeocodeCache>,
}

impl PlaceSearch {
    pub fn new(options: PlaceSearchOptions) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            options,
            cities: CityTable::common(),
            cache: None,
        })
    }

    pub fn with_cities(mut self, cities: CityTable) -> Self {
        self.cities = cities;
        self
    }

    pub fn with_cache(mut self, cache: GeocodeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&GeocodeCache> {
        self.cache.as_ref()
    }

    /// Search for places matching `query`
    ///
    /// Never fails: short queries, misses and transport errors all produce
    /// an empty list.
    pub async fn search(&self, query: &str) -> Vec<Place> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LENGTH {
            tracing::debug!("Place query too short, skipping lookup");
            return Vec::new();
        }

        if let Some(place) = self.cities.lookup(query) {
            tracing::debug!("Place '{}' answered from the city table", place.name);
            return vec![place];
        }

        let cache_key = CacheKey::place_query(query, self.options.country_codes.as_deref());
        if let Some(cache) = &self.cache {
            if let Some(places) = cache.get(&cache_key).await {
                return places;
            }
        }

        match self.fetch(query).await {
            Ok(places) => {
                if let Some(cache) = &self.cache {
                    cache.insert(cache_key, places.clone()).await;
                }
                places
            }
            Err(e) => {
                tracing::error!("Place search for '{}' failed: {}", query, e);
                Vec::new()
            }
        }
    }

    async fn fetch(&self, query: &str) -> Result<Vec<Place>, GeocodeError> {
        let limit = RESULT_LIMIT.to_string();
        let mut params: Vec<(&str, &str)> = vec![("format", "json"), ("q", query), ("limit", &limit)];

        if let Some(cc) = &self.options.country_codes {
            params.push(("countrycodes", cc.as_str()));
        }
        if self.options.address_details {
            params.push(("addressdetails", "1"));
        }
        if let Some(lang) = &self.options.accept_language {
            params.push(("accept-language", lang.as_str()));
        }

        let url = format!("{}/search", self.options.base_url.trim_end_matches('/'));
        let started = std::time::Instant::now();

        let response = self
            .client
            .get(&url)
            .query(&params)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        let rows: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;

        let total = rows.len();
        let places: Vec<Place> = rows
            .into_iter()
            .filter_map(NominatimPlace::into_place)
            .take(RESULT_LIMIT)
            .collect();

        tracing::debug!(
            "Geocoder returned {} places ({} usable) in {}ms",
            total,
            places.len(),
            started.elapsed().as_millis()
        );

        Ok(places)
    }
}
