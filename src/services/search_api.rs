use crate::core::filters::{encode_pairs, SearchFilters};
use crate::models::{Coordinate, Entity};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default path of the creator map-search endpoint
pub const MAP_SEARCH_PATH: &str = "/creators/api/creators/map-search/";

/// Errors that can occur when querying the creator search API
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Search API returned status {0}")]
    Status(u16),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

/// Canonical search request: reference point, radius and filters
#[derive(Debug, Clone, PartialEq)]
pub struct MapQuery {
    pub center: Coordinate,
    pub radius_km: f64,
    pub filters: SearchFilters,
}

impl MapQuery {
    /// Serialize to the query string sent to the API
    ///
    /// Key order is fixed (`lat`, `lng`, `radius`, then filters), so equal
    /// queries always produce equal strings.
    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<(&str, String)> = vec![
            ("lat", self.center.latitude().to_string()),
            ("lng", self.center.longitude().to_string()),
            ("radius", self.radius_km.to_string()),
        ];
        pairs.extend(self.filters.to_pairs());
        encode_pairs(&pairs)
    }
}

/// One page of search results
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub entities: Vec<Entity>,
    pub total: Option<u64>,
    pub meta: Option<Value>,
    /// Rows dropped because they had no usable coordinate
    pub skipped: usize,
}

/// Remote creator search
pub trait CreatorSearch: Send + Sync {
    fn search(&self, query: &MapQuery) -> impl Future<Output = Result<SearchPage, SearchError>> + Send;
}

/// Raw response; older endpoints answer with `creators` instead of `points`
#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(alias = "creators", default)]
    points: Vec<Value>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    meta: Option<Value>,
}

/// Raw creator row with the field-name variants seen across endpoints
#[derive(Debug, Deserialize)]
struct RawCreator {
    id: Value,
    #[serde(alias = "full_name", default)]
    name: Option<String>,
    #[serde(alias = "latitude", default)]
    lat: Option<Value>,
    #[serde(alias = "longitude", default)]
    lng: Option<Value>,
    #[serde(default)]
    rating: Option<Value>,
    #[serde(alias = "image", default)]
    thumbnail: Option<String>,
    #[serde(default)]
    domains: Vec<RawDomain>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDomain {
    Name(String),
    Object { name: String },
}

/// Numbers sometimes arrive as strings (Decimal fields)
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawCreator {
    fn into_entity(self) -> Option<Entity> {
        let id = match &self.id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        let lat = self.lat.as_ref().and_then(as_f64)?;
        let lng = self.lng.as_ref().and_then(as_f64)?;
        let coordinate = match Coordinate::new(lat, lng) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Skipping creator {}: {}", id, e);
                return None;
            }
        };

        let url = self.url.unwrap_or_else(|| format!("/creators/creator/{}/", id));

        Some(Entity {
            display_name: self.name.unwrap_or_else(|| format!("Creator {}", id)),
            id,
            coordinate,
            rating: self.rating.as_ref().and_then(as_f64).filter(|r| r.is_finite()),
            thumbnail_url: self.thumbnail.filter(|t| !t.is_empty()),
            domains: self
                .domains
                .into_iter()
                .map(|d| match d {
                    RawDomain::Name(name) | RawDomain::Object { name } => name,
                })
                .collect(),
            url,
        })
    }
}

/// Parse a map-search response body
pub fn parse_search_response(body: Value) -> Result<SearchPage, SearchError> {
    let raw: RawSearchResponse = serde_json::from_value(body)
        .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

    let received = raw.points.len();
    let entities: Vec<Entity> = raw
        .points
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<RawCreator>(row) {
            Ok(creator) => Some(creator),
            Err(e) => {
                tracing::debug!("Skipping malformed creator row: {}", e);
                None
            }
        })
        .filter_map(RawCreator::into_entity)
        .collect();

    Ok(SearchPage {
        skipped: received - entities.len(),
        entities,
        total: raw.total,
        meta: raw.meta,
    })
}

/// HTTP client for the creator map-search endpoint
pub struct CreatorSearchClient {
    base_url: String,
    path: String,
    client: Client,
}

impl CreatorSearchClient {
    /// Create a new client
    pub fn new(base_url: String, path: String, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            path,
            client,
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

impl CreatorSearch for CreatorSearchClient {
    async fn search(&self, query: &MapQuery) -> Result<SearchPage, SearchError> {
        let url = format!("{}?{}", self.endpoint(), query.to_query_string());

        tracing::debug!("Querying creators: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unable to read body".to_string());
            tracing::error!("Creator search failed: {} - {}", status, body);
            return Err(SearchError::Status(status.as_u16()));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

        let page = parse_search_response(json)?;
        if page.skipped > 0 {
            tracing::debug!("Dropped {} creators without usable coordinates", page.skipped);
        }

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_points_response() {
        let page = parse_search_response(json!({
            "points": [
                {"id": 1, "name": "Alice", "lat": 48.85, "lng": 2.35, "rating": 4.5,
                 "thumbnail": "/media/a.jpg", "url": "/creators/creator/1/"},
                {"id": 2, "name": "No location", "lat": null, "lng": null, "url": "/creators/creator/2/"}
            ],
            "total": 2
        }))
        .unwrap();

        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.total, Some(2));
        assert_eq!(page.entities[0].id, "1");
        assert_eq!(page.entities[0].thumbnail_url.as_deref(), Some("/media/a.jpg"));
    }

    #[test]
    fn test_parse_creators_variant() {
        let page = parse_search_response(json!({
            "creators": [
                {"id": "abc", "full_name": "Bob", "latitude": "45.76", "longitude": "4.83",
                 "domains": [{"name": "Cuisine"}, "Voyage"]}
            ]
        }))
        .unwrap();

        let bob = &page.entities[0];
        assert_eq!(bob.display_name, "Bob");
        assert_eq!(bob.coordinate.latitude(), 45.76);
        assert_eq!(bob.domains, vec!["Cuisine", "Voyage"]);
        assert_eq!(bob.url, "/creators/creator/abc/");
    }

    #[test]
    fn test_decimal_rating_as_string() {
        let page = parse_search_response(json!({
            "creators": [
                {"id": 1, "full_name": "Chloé", "lat": "48.85", "lng": "2.35", "rating": "4.50"},
                {"id": 2, "full_name": "Unrated", "lat": 48.86, "lng": 2.36, "rating": null}
            ]
        }))
        .unwrap();

        assert_eq!(page.skipped, 0);
        assert_eq!(page.entities[0].rating, Some(4.5));
        assert_eq!(page.entities[1].rating, None);
    }

    #[test]
    fn test_out_of_range_creator_skipped() {
        let page = parse_search_response(json!({
            "points": [{"id": 9, "name": "Bad", "lat": 120.0, "lng": 0.0}]
        }))
        .unwrap();
        assert!(page.entities.is_empty());
    }

    #[test]
    fn test_query_string_order() {
        let mut filters = SearchFilters::default();
        filters.set("domains", "food");
        filters.set("query", "chef");

        let query = MapQuery {
            center: Coordinate::new(48.8566, 2.3522).unwrap(),
            radius_km: 50.0,
            filters,
        };

        assert_eq!(
            query.to_query_string(),
            "lat=48.8566&lng=2.3522&radius=50&query=chef&domains=food"
        );
    }

    #[test]
    fn test_endpoint_join() {
        let client = CreatorSearchClient::new(
            "http://localhost:8000/".to_string(),
            MAP_SEARCH_PATH.to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(client.endpoint(), "http://localhost:8000/creators/api/creators/map-search/");
    }
}
